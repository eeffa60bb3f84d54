//! Typed identifiers used across the workspace.
//!
//! Every id is a thin wrapper around a `String` rather than a `Uuid`: device
//! ids are usually assigned by an operator or a fleet config file, and task
//! ids may originate from a planning agent that has its own naming scheme.
//! Wrapping keeps the map keys in [`galaxy_fleet`]'s registry and
//! [`galaxy_orchestration`]'s constellation from being accidentally swapped
//! for one another at a call site.

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Builds an id from anything string-like.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrows the underlying string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(DeviceId, "Stable identifier of a device in the fleet.");
string_id!(TaskId, "Stable identifier of a task (star) within a constellation.");
string_id!(DependencyId, "Stable identifier of a dependency (line) between two tasks.");
string_id!(ConstellationId, "Stable identifier of a constellation.");
