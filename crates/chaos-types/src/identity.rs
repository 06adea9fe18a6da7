//! Identity types for the chaos economy
//!
//! Chat platform identities are opaque strings (snowflakes); everything the
//! economy mints on its own is a prefixed UUID.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate ID types with common implementations
macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse from a string (with or without prefix)
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                let s = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }
    };
}

define_id_type!(OfferId, "offer", "Unique identifier for a two-party offer");
define_id_type!(WindowId, "window", "Unique identifier for a lottery collection window");
define_id_type!(PromptId, "prompt", "Unique identifier for an interactive choice prompt");

/// Identity of a chat user as known to the economy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A chat user taking part in an economic action.
///
/// The platform tells us whether the account is automated; bots never hold
/// a stake in the economy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: AgentId,
    pub is_bot: bool,
}

impl Actor {
    pub fn user(id: impl Into<AgentId>) -> Self {
        Self {
            id: id.into(),
            is_bot: false,
        }
    }

    pub fn bot(id: impl Into<AgentId>) -> Self {
        Self {
            id: id.into(),
            is_bot: true,
        }
    }
}
