use std::fmt;

use serde::{Deserialize, Serialize};

/// A numbered schema change script.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Migration {
    /// Ordering key; versions are applied in ascending order.
    pub version: u64,

    /// Human readable name taken from the script's file name.
    pub name: String,

    /// One or more SQL statements.
    pub script: String,
}

impl Migration {
    /// Creates a migration.
    pub fn new(version: u64, name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            script: script.into(),
        }
    }
}

impl fmt::Display for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.version, self.name)
    }
}
