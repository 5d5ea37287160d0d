//! Typed identifiers for blocks and users.
//!
//! Both ID types wrap a UUID. Block ids are UUIDv7 (time-ordered, globally
//! unique, minted when a block node is created). They display as standard UUID
//! text for logging; `short()` (first 8 hex chars) is for human-facing output
//! only and never used as a lookup key.
//!
//! `UserId` also has a deterministic sentinel via `UserId::local()`, derived
//! from UUIDv5, for changesets produced without an authenticated author.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A block identifier (UUIDv7). The only identity of a node that survives tree
/// mutation.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(uuid::Uuid);

/// A user identifier (UUIDv7, or UUIDv5 for sentinels).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(uuid::Uuid);

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_typed_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// A fresh time-ordered id.
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            /// The nil id.
            pub fn nil() -> Self {
                Self(uuid::Uuid::nil())
            }

            /// Accepts hyphenated or simple (32 hex chars) UUID text.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                s.parse()
            }

            /// Leading 8 hex chars, for log and debug output.
            pub fn short(&self) -> String {
                let mut hex = self.0.as_simple().to_string();
                hex.truncate(8);
                hex
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

        impl std::str::FromStr for $T {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                uuid::Uuid::parse_str(s).map(Self)
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($name, "({})"), self.short())
            }
        }
    };
}

impl_typed_id!(BlockId, "BlockId");
impl_typed_id!(UserId, "UserId");

// ── UserId sentinels ────────────────────────────────────────────────────────

/// Fixed namespace for deriving deterministic UserIds via UUIDv5.
const QUIRE_USER_NS: uuid::Uuid = uuid::uuid!("5d0f8a2e-3c41-4b7a-9e26-7f18c0d4b953");

impl UserId {
    /// The well-known "local" user.
    ///
    /// Used when a state is driven by a single editing session with no
    /// authenticated author. Same value every time (UUIDv5 of `b"local"`).
    pub fn local() -> Self {
        Self(uuid::Uuid::new_v5(&QUIRE_USER_NS, b"local"))
    }
}

// ============================================================================
// Tests
// ============================================================================
