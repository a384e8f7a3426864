//! Core domain types for the vellum platform.
//!
//! This crate provides the foundational identifier types and error
//! handling shared by the vellum workflow engine and the surrounding
//! content-management platform.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ParseIdError, TriggerId, WorkflowId, WorkflowRunId};
