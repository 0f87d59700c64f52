use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use promo_types::{QuotaKind, UserId};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Credit amounts paid out or charged by the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Balance every user is reset to each day, before the referral bonus.
    pub base_daily_credits: i64,
    /// Permanent daily bonus earned per successful referral.
    pub referral_award: i64,
    /// Every n-th referral earns `milestone_bonus` on top.
    pub milestone_every: u32,
    pub milestone_bonus: i64,
    /// Paid to the user who adds the bot to a new group as admin.
    pub group_add_reward: i64,
    pub premium_group_add_reward: i64,
    /// Image broadcasts cost one credit per this many recipients, rounded up.
    pub image_recipients_per_credit: u32,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            base_daily_credits: 10,
            referral_award: 2,
            milestone_every: 5,
            milestone_bonus: 1,
            group_add_reward: 5,
            premium_group_add_reward: 10,
            image_recipients_per_credit: 10,
        }
    }
}

impl RewardConfig {
    pub fn group_add_reward_for(&self, premium: bool) -> i64 {
        if premium {
            self.premium_group_add_reward
        } else {
            self.group_add_reward
        }
    }

    /// Credits charged for an image broadcast to `targets` recipients.
    pub fn image_broadcast_cost(&self, targets: u32) -> i64 {
        i64::from(targets.div_ceil(self.image_recipients_per_credit.max(1)))
    }
}

/// Daily quota maxima, restored by the daily reset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub daily_promo_runs: u32,
    pub premium_daily_promo_runs: u32,
    pub image_broadcasts: u32,
    pub premium_image_broadcasts: u32,
    /// Groups one group-share run reaches.
    pub group_share_targets: usize,
    pub premium_group_share_targets: usize,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_promo_runs: 2,
            premium_daily_promo_runs: 4,
            image_broadcasts: 0,
            premium_image_broadcasts: 100,
            group_share_targets: 5,
            premium_group_share_targets: 10,
        }
    }
}

impl QuotaConfig {
    /// The value `kind` is restored to for a user with the given status.
    pub fn maximum(&self, kind: QuotaKind, premium: bool) -> u32 {
        match (kind, premium) {
            (QuotaKind::DailyPromoRuns, false) => self.daily_promo_runs,
            (QuotaKind::DailyPromoRuns, true) => self.premium_daily_promo_runs,
            (QuotaKind::ImageBroadcasts, false) => self.image_broadcasts,
            (QuotaKind::ImageBroadcasts, true) => self.premium_image_broadcasts,
        }
    }

    pub fn group_share_targets_for(&self, premium: bool) -> usize {
        if premium {
            self.premium_group_share_targets
        } else {
            self.group_share_targets
        }
    }
}

/// Pacing between consecutive sends of a batch, in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub group_share_pacing_ms: u64,
    pub image_broadcast_pacing_ms: u64,
    pub admin_broadcast_pacing_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            group_share_pacing_ms: 500,
            image_broadcast_pacing_ms: 200,
            admin_broadcast_pacing_ms: 100,
        }
    }
}

impl DeliveryConfig {
    pub fn group_share_pacing(&self) -> Duration {
        Duration::from_millis(self.group_share_pacing_ms)
    }

    pub fn image_broadcast_pacing(&self) -> Duration {
        Duration::from_millis(self.image_broadcast_pacing_ms)
    }

    pub fn admin_broadcast_pacing(&self) -> Duration {
        Duration::from_millis(self.admin_broadcast_pacing_ms)
    }
}

/// Top-level engine configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Users allowed to run admin operations.
    pub admin_ids: Vec<UserId>,
    pub rewards: RewardConfig,
    pub quotas: QuotaConfig,
    pub delivery: DeliveryConfig,
}

impl EngineConfig {
    pub fn is_admin(&self, user: UserId) -> bool {
        self.admin_ids.contains(&user)
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> EngineResult<Self> {
        toml::from_str(s).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Load from a TOML file, falling back to defaults when it is absent.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        match fs::read_to_string(path.as_ref()) {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(EngineError::Config(format!(
                "{}: {e}",
                path.as_ref().display()
            ))),
        }
    }

    pub fn to_toml_string(&self) -> EngineResult<String> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))
    }
}
