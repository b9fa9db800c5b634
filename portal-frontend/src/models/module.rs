use serde::Serialize;

/// A navigation tile on the dashboard. Every module except the dashboard
/// itself leads to an inert placeholder page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DashboardModule {
    pub id: &'static str,
    pub title: &'static str,
}

impl DashboardModule {
    pub fn href(&self) -> String {
        if self.id == "dashboard" {
            "/dashboard".to_string()
        } else {
            format!("/modules/{}", self.id)
        }
    }

    pub fn initials(&self) -> String {
        self.title
            .split_whitespace()
            .filter(|word| word.chars().next().is_some_and(char::is_alphanumeric))
            .filter_map(|word| word.chars().next())
            .take(2)
            .collect::<String>()
            .to_uppercase()
    }
}

pub const DASHBOARD_MODULES: &[DashboardModule] = &[
    DashboardModule { id: "dashboard", title: "Dashboard" },
    DashboardModule { id: "purchasing", title: "Purchasing" },
    DashboardModule { id: "inventory", title: "Inventory" },
    DashboardModule { id: "crm", title: "CRM" },
    DashboardModule { id: "sales", title: "Sales" },
    DashboardModule { id: "address-book", title: "Address Book" },
    DashboardModule { id: "finance", title: "Finance & Banking" },
    DashboardModule { id: "project-management", title: "Project Management" },
    DashboardModule { id: "activity-management", title: "Activity Management" },
    DashboardModule { id: "support-management", title: "Support Management" },
    DashboardModule { id: "notification", title: "Notification" },
    DashboardModule { id: "hrm", title: "HRM" },
    DashboardModule { id: "payroll", title: "Payroll Management" },
    DashboardModule { id: "setup", title: "Setup & Overview" },
    DashboardModule { id: "reports", title: "Report Overview" },
];

pub fn find_module(id: &str) -> Option<&'static DashboardModule> {
    DASHBOARD_MODULES.iter().find(|module| module.id == id)
}
