use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::ids::{ChannelId, PromotionId, UserId};
use crate::promotion::NormalPromo;
use crate::quota::QuotaKind;

/// A participant in the credit economy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Spendable balance. Overwritten by the daily reset.
    pub credits: i64,
    /// Permanent bonus added to the daily allowance, earned by referrals.
    pub referral_credits: i64,
    pub referral_count: u32,
    pub is_premium: bool,
    pub premium_expiry: Option<DateTime<Utc>>,
    pub is_banned: bool,
    pub daily_promo_runs: u32,
    pub image_broadcasts_left: u32,
    pub normal_promo: Option<NormalPromo>,
    pub force_join_channel: Option<ChannelId>,
    /// Completions other users made on this user's promotions since the
    /// last weekly reset.
    pub clicks_received: u64,
    /// Promotions this user has been rewarded for. Never shrinks.
    pub completed_task_ids: BTreeSet<PromotionId>,
    pub joined_at: DateTime<Utc>,
}

impl User {
    /// A fresh record with empty balances and quotas.
    pub fn new(id: UserId, username: impl Into<String>, joined_at: DateTime<Utc>) -> Self {
        Self {
            id,
            username: username.into(),
            credits: 0,
            referral_credits: 0,
            referral_count: 0,
            is_premium: false,
            premium_expiry: None,
            is_banned: false,
            daily_promo_runs: 0,
            image_broadcasts_left: 0,
            normal_promo: None,
            force_join_channel: None,
            clicks_received: 0,
            completed_task_ids: BTreeSet::new(),
            joined_at,
        }
    }

    /// Premium is active when the flag is set and the expiry, if any, lies
    /// after `now`.
    pub fn premium_active(&self, now: DateTime<Utc>) -> bool {
        self.is_premium && self.premium_expiry.map_or(true, |expiry| expiry > now)
    }

    /// Premium flag set but expiry already passed.
    pub fn premium_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.is_premium && !self.premium_active(now)
    }

    /// Grant premium for `days` from `now`, extending an active subscription
    /// instead of shortening it. An expiry past the representable date range
    /// is refused and leaves the user unchanged.
    pub fn grant_premium(&mut self, days: i64, now: DateTime<Utc>) -> Result<(), TypeError> {
        let base = match self.premium_expiry {
            Some(expiry) if self.premium_active(now) => expiry,
            _ => now,
        };
        let expiry = Duration::try_days(days)
            .and_then(|span| base.checked_add_signed(span))
            .ok_or_else(|| TypeError::OutOfRange(format!("{days} days of premium")))?;
        self.is_premium = true;
        self.premium_expiry = Some(expiry);
        Ok(())
    }

    pub fn revoke_premium(&mut self) {
        self.is_premium = false;
        self.premium_expiry = None;
    }

    pub fn has_completed(&self, promotion: PromotionId) -> bool {
        self.completed_task_ids.contains(&promotion)
    }

    pub fn quota(&self, kind: QuotaKind) -> u32 {
        match kind {
            QuotaKind::DailyPromoRuns => self.daily_promo_runs,
            QuotaKind::ImageBroadcasts => self.image_broadcasts_left,
        }
    }

    pub fn quota_mut(&mut self, kind: QuotaKind) -> &mut u32 {
        match kind {
            QuotaKind::DailyPromoRuns => &mut self.daily_promo_runs,
            QuotaKind::ImageBroadcasts => &mut self.image_broadcasts_left,
        }
    }
}
