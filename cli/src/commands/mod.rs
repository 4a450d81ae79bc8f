//! Command implementations, one module per resource.

pub mod apply;
pub mod changeset;
pub mod component;
pub mod module;
pub mod plan;
