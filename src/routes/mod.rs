//! REST control surface.

pub mod health;
pub mod projects;
pub mod sessions;
