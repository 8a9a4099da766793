//! Terminal view: state container and rendering.

pub mod render;
pub mod state;

pub use render::render;
pub use state::{reduce, Event, ViewState};
