//! Product Viewer
//!
//! Signs a user in against Azure AD, acquires an access token for the
//! product API and lists the products it returns.

pub mod app;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod products;
pub mod ui;
