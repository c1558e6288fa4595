//! Shared kernel for the chunked ingestion workspace.
//!
//! Contains only the types that every component and the API binary must agree
//! on: the `Principal`/`Role` identity model, the `FileId` newtype, and the
//! `IngestionError` taxonomy with its HTTP mapping. No business logic lives
//! here — components depend on this crate instead of on each other.

pub mod domain;
pub mod error;

pub use domain::{FileId, Principal, Role};
pub use error::{ErrorBody, IngestionError, RecoveryAction};
