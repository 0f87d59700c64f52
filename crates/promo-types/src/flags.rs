use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// The feature switches the engine consults. Flags not present in the store
/// are treated as enabled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureFlag {
    /// Premium image broadcasts.
    ImagePromo,
    /// Force-join channel promotions.
    ChannelPromo,
    /// Sharing a saved promotion into groups.
    GroupPromo,
}

impl FeatureFlag {
    pub const ALL: [Self; 3] = [Self::ImagePromo, Self::ChannelPromo, Self::GroupPromo];

    /// Storage key.
    pub const fn name(self) -> &'static str {
        match self {
            Self::ImagePromo => "image_promo",
            Self::ChannelPromo => "channel_promo",
            Self::GroupPromo => "group_promo",
        }
    }
}

impl fmt::Display for FeatureFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FeatureFlag {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_suffix("_enabled").unwrap_or(s);
        Self::ALL
            .into_iter()
            .find(|flag| flag.name() == s)
            .ok_or_else(|| TypeError::UnknownValue(s.to_string()))
    }
}
