//! Domain model module declarations.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

pub mod caller;
pub mod lock;
pub mod package;
pub mod user_policy;

/// Numeric identifier of a device user. All app lock state is partitioned by it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub u32);

impl UserId {
    /// Value as stored in `SQLite`.
    #[must_use]
    pub fn as_db(self) -> i64 {
        i64::from(self.0)
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
