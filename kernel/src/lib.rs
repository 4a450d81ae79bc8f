//! Stackforge kernel - changeset-driven infrastructure control plane.
//!
//! Proposed infrastructure changes live on changeset branches of a
//! branch-versioned store. Components are planned and applied by background
//! workers, and changesets are merged into or rebased onto trunk.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// REST API handlers and routes.
pub mod api;
/// Shared application state and worker wiring.
pub mod app;
/// Modules, components, resources and views.
pub mod catalog;
/// Changeset lifecycle.
pub mod changeset;
/// HTTP client for the REST API.
pub mod client;
/// Identifiers, entities, state machines and errors.
pub mod domain;
/// Infrastructure components (config, server, telemetry).
pub mod infrastructure;
/// Merge and rebase engine.
pub mod integration;
/// Plan/apply pipeline, executor and blob stores.
pub mod pipeline;
/// Entity repositories over a unit of work.
pub mod repository;
/// Branch-versioned SQLite store.
pub mod store;
/// Background plan and apply workers.
pub mod worker;
