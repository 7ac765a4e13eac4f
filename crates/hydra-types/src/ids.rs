//! Typed identifiers for documents and principals.
//!
//! Both ID types wrap UUIDv7 (time-ordered, globally unique) and display as
//! standard UUID text for logging. The `short()` form (first 8 hex chars) is
//! for human-facing output only, never a lookup key.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A document identifier (UUIDv7). One outline = one document.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(uuid::Uuid);

/// A principal identifier (UUIDv7, or UUIDv5 for sentinels).
///
/// The principal is the editing replica that minted a block; it keeps block
/// sequence numbers unique without coordination.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(uuid::Uuid);

macro_rules! impl_typed_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Create a new time-ordered ID (UUIDv7).
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            /// First 8 hex characters, for display only.
            pub fn short(&self) -> String {
                self.0.as_simple().to_string()[..8].to_string()
            }

            /// Full 32-character hex string (no hyphens).
            pub fn to_hex(&self) -> String {
                self.0.as_simple().to_string()
            }

            /// Parse from a hex string (32 chars, no hyphens) or standard UUID format.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                uuid::Uuid::parse_str(s).map(Self)
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<uuid::Uuid> for $T {
            fn from(u: uuid::Uuid) -> Self {
                Self(u)
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.short())
            }
        }
    };
}

impl_typed_id!(DocumentId, "DocumentId");
impl_typed_id!(PrincipalId, "PrincipalId");

/// Fixed namespace for deriving deterministic IDs via UUIDv5.
const HYDRA_NS: uuid::Uuid = uuid::uuid!("5f0c2d7e-93a1-4b6e-8c42-0d1e7a9b3f58");

impl PrincipalId {
    /// The well-known local principal used when no replica identity is known
    /// (single-user sessions, CLI imports). Same value every time.
    pub fn local() -> Self {
        Self(uuid::Uuid::new_v5(&HYDRA_NS, b"local"))
    }
}

impl DocumentId {
    /// Derive a stable document ID from a human name (e.g. an outline file stem).
    pub fn from_name(name: &str) -> Self {
        Self(uuid::Uuid::new_v5(&HYDRA_NS, name.as_bytes()))
    }
}
