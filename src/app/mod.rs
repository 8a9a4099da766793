//! Application lifecycle: user actions and the controller loop.

pub mod action;
pub mod controller;

pub use action::Action;
pub use controller::App;
