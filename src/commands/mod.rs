pub mod analyze;
pub mod auth;
