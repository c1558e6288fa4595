//! Shared domain types for the ingestion core.
//!
//! Only the identity model (`Principal`, `Role`) and the opaque file
//! identifier (`FileId`) live here. Everything else — sessions, chunks,
//! pipelines, events — is owned by the `ingestion` crate, which depends on
//! this one rather than the other way around.

pub mod file_id;
pub mod principal;

pub use file_id::FileId;
pub use principal::{Principal, Role};
