//! Protected product API integration.

pub mod client;
pub mod models;

pub use client::ProductClient;
pub use models::{Product, ProductId};
