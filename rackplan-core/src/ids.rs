//! Type-safe ID newtypes for layout entities
//!
//! Local IDs are UUIDs minted in-process; remote IDs are whatever the remote
//! store hands back. Both are wrapped so they can never be confused.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to define a type-safe ID newtype
macro_rules! define_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Create from an existing string (for records coming off the wire)
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Get the inner string value
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner string
            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }
    };
}

define_id!(LocalId, "In-session identifier of an entity, stable for its local lifetime");
define_id!(RemoteId, "Permanent identifier assigned by the remote store on commit");
define_id!(ScopeId, "Branch/site scope a subscription and its graph are bound to");
define_id!(TicketId, "Correlation id of an optimistic mutation ticket");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_creation() {
        let id1 = LocalId::new();
        let id2 = LocalId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_id_from_string() {
        let id = RemoteId::from_string("r-123");
        assert_eq!(id.as_str(), "r-123");
        assert_eq!(format!("{}", id), "r-123");
    }

    #[test]
    fn test_id_serde_is_transparent() {
        let id = ScopeId::from_string("site-7");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"site-7\"");

        let parsed: ScopeId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }
}
