//! HTTP handlers grouped by resource.

pub mod catalog;
pub mod changesets;
pub mod components;
pub mod integration;
pub mod tasks;
