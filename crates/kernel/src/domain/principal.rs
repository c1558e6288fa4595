//! The authenticated identity owning upload sessions and receiving events.

use serde::{Deserialize, Serialize};

/// Coarse authorization role carried by a `Principal`.
///
/// The ingestion core does not itself enforce fine-grained authorization
/// (that is the concern of whatever sits in front of it); `Role` exists so
/// a `TokenVerifier` has somewhere to put what it decoded from the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

/// The identity that owns upload sessions and receives their progress
/// events. Immutable for the lifetime of a connection/request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

impl Principal {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: id.into(), role }
    }
}
