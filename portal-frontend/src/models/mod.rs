pub mod module;
pub mod user;

pub use module::{find_module, DashboardModule, DASHBOARD_MODULES};
pub use user::{AuthUser, NewProfile, Profile, Role, Session};
