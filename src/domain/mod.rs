//! Domain layer - Pure business logic.

pub mod api;
pub mod capture;
pub mod errors;
pub mod jobs;
