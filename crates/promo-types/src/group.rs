use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{GroupId, UserId};

/// A group chat that receives group-share promotions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub title: String,
    /// False once delivery is known to be impossible (bot removed, not admin).
    pub active: bool,
    pub added_by: Option<UserId>,
    pub added_at: DateTime<Utc>,
}

impl Group {
    pub fn new(
        id: GroupId,
        title: impl Into<String>,
        added_by: Option<UserId>,
        active: bool,
        added_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            active,
            added_by,
            added_at,
        }
    }
}
