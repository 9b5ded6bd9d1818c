//! Middleware for the web server.

pub mod auth;

pub use auth::{require_admin_token, AdminToken};
