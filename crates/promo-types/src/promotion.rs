use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::ids::{ChannelId, PromotionId, UserId};

/// The kind of task a promotion asks other users to complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionKind {
    /// Visit a link.
    Normal,
    /// Join an external channel; membership is verified before claiming.
    ForceJoin,
}

impl PromotionKind {
    /// Credits awarded to a non-premium claimant for one completion.
    pub const fn base_reward(self) -> i64 {
        match self {
            Self::Normal => 1,
            Self::ForceJoin => 2,
        }
    }

    /// Reward for a claimant whose premium status is `premium` at claim time.
    pub const fn reward_for(self, premium: bool) -> i64 {
        if premium {
            self.base_reward() * 2
        } else {
            self.base_reward()
        }
    }
}

impl fmt::Display for PromotionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::ForceJoin => write!(f, "force_join"),
        }
    }
}

impl FromStr for PromotionKind {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" | "link" => Ok(Self::Normal),
            "force_join" | "force-join" | "channel" => Ok(Self::ForceJoin),
            other => Err(TypeError::UnknownValue(other.to_string())),
        }
    }
}

/// A saved "visit this link" payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalPromo {
    pub text: String,
    pub url: String,
}

impl NormalPromo {
    pub fn new(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            url: url.into(),
        }
    }

    /// Text must be non-blank and the url must be an http(s) link.
    pub fn validate(&self) -> Result<(), TypeError> {
        if self.text.trim().is_empty() {
            return Err(TypeError::InvalidPayload("promotion text is empty".into()));
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(TypeError::InvalidPayload(format!(
                "url must start with http:// or https://: {}",
                self.url
            )));
        }
        Ok(())
    }
}

/// What a promotion asks the claimant to do.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PromotionPayload {
    Normal(NormalPromo),
    ForceJoin { channel_id: ChannelId },
}

impl PromotionPayload {
    pub fn kind(&self) -> PromotionKind {
        match self {
            Self::Normal(_) => PromotionKind::Normal,
            Self::ForceJoin { .. } => PromotionKind::ForceJoin,
        }
    }

    pub fn validate(&self) -> Result<(), TypeError> {
        match self {
            Self::Normal(promo) => promo.validate(),
            Self::ForceJoin { channel_id } if channel_id.get() == 0 => {
                Err(TypeError::InvalidPayload("channel id must be non-zero".into()))
            }
            Self::ForceJoin { .. } => Ok(()),
        }
    }
}

/// A funded task. Only `remaining_budget` changes after creation, and a
/// promotion is never deleted: its history backs claim deduplication.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    pub id: PromotionId,
    pub owner_id: UserId,
    pub payload: PromotionPayload,
    pub initial_budget: u64,
    pub remaining_budget: u64,
    pub created_at: DateTime<Utc>,
}

impl Promotion {
    pub fn kind(&self) -> PromotionKind {
        self.payload.kind()
    }

    /// Eligible for selection while budget remains.
    pub fn is_funded(&self) -> bool {
        self.remaining_budget > 0
    }

    /// Completions paid out so far.
    pub fn spent(&self) -> u64 {
        self.initial_budget - self.remaining_budget
    }
}

/// The permanent record that `user_id` was rewarded for `promotion_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub user_id: UserId,
    pub promotion_id: PromotionId,
    pub reward: i64,
    pub claimed_at: DateTime<Utc>,
}

impl Claim {
    pub fn key(&self) -> (UserId, PromotionId) {
        (self.user_id, self.promotion_id)
    }
}
