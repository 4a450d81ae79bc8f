//! REST API for the stackforge control plane.
//!
//! A thin layer over the managers in [`crate::app::AppState`]. Creates answer
//! `201`, reads and actions `200`, and every error carries a
//! `{"message": ...}` body.

mod error;
pub mod handlers;
pub mod routes;
pub mod types;

pub use error::ApiError;
pub use routes::routes;

#[cfg(test)]
mod tests;
