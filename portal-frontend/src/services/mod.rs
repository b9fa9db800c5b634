pub mod auth_gateway;
pub mod metrics;
pub mod session_store;
pub mod storage;
pub mod supabase;
