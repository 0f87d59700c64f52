use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A per-user allowance consumed by specific actions and restored by the
/// daily reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    /// Group-share runs left today.
    DailyPromoRuns,
    /// Image-broadcast recipients left today.
    ImageBroadcasts,
}

impl fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DailyPromoRuns => write!(f, "daily_promo_runs"),
            Self::ImageBroadcasts => write!(f, "image_broadcasts"),
        }
    }
}

impl FromStr for QuotaKind {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "daily_promo_runs" | "promo_runs" => Ok(Self::DailyPromoRuns),
            "image_broadcasts" | "image_broadcasts_left" => Ok(Self::ImageBroadcasts),
            other => Err(TypeError::UnknownValue(other.to_string())),
        }
    }
}
