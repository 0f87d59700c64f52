use chrono::Utc;
use promo_store::{EntityStore, TxScope};
use promo_types::{FeatureFlag, GroupId, NormalPromo, QuotaKind, User, UserId};
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::info;

use crate::engine::{active_user, staged_user_mut, CreditEngine};
use crate::error::{EngineError, EngineResult};
use crate::ledger::withdraw;

/// Funds and quota set aside for one image broadcast.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BroadcastReservation {
    pub target_count: u32,
    pub cost: i64,
    pub quota_left: u32,
    pub credits_left: i64,
}

/// A consumed group-share run and the groups it should reach.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroupShareReservation {
    pub promo: NormalPromo,
    pub groups: Vec<GroupId>,
    pub runs_left: u32,
}

fn take_quota(user: &mut User, kind: QuotaKind, amount: u32) -> EngineResult<u32> {
    let available = user.quota(kind);
    if available < amount {
        return Err(EngineError::QuotaExhausted {
            quota: kind,
            requested: amount,
            available,
        });
    }
    let slot = user.quota_mut(kind);
    *slot -= amount;
    Ok(*slot)
}

impl<S: EntityStore> CreditEngine<S> {
    /// Spend `amount` of a daily quota. Returns what is left.
    pub fn consume_quota(&self, user: UserId, kind: QuotaKind, amount: u32) -> EngineResult<u32> {
        if amount == 0 {
            return Err(EngineError::InvalidInput("quota amount must be positive".into()));
        }
        self.store.transact(&TxScope::new().user(user), |tx| {
            active_user(tx, user)?;
            take_quota(staged_user_mut(tx, user)?, kind, amount)
        })
    }

    /// Reserve an image broadcast to `target_count` recipients: consumes
    /// that much image quota and debits `ceil(target_count / 10)` credits in
    /// one step. Premium only.
    pub fn reserve_image_broadcast(
        &self,
        user: UserId,
        target_count: u32,
    ) -> EngineResult<BroadcastReservation> {
        self.require_flag(FeatureFlag::ImagePromo)?;
        if target_count == 0 {
            return Err(EngineError::InvalidInput("target count must be positive".into()));
        }
        let cost = self.config.rewards.image_broadcast_cost(target_count);

        let reservation = self.store.transact(&TxScope::new().user(user), |tx| {
            if !active_user(tx, user)?.premium_active(Utc::now()) {
                return Err(EngineError::PremiumRequired);
            }
            let u = staged_user_mut(tx, user)?;
            let quota_left = take_quota(u, QuotaKind::ImageBroadcasts, target_count)?;
            let credits_left = withdraw(u, cost)?;
            Ok(BroadcastReservation {
                target_count,
                cost,
                quota_left,
                credits_left,
            })
        })?;

        info!(user = %user, targets = target_count, cost, "image broadcast reserved");
        Ok(reservation)
    }

    /// Consume one group-share run and pick the groups the saved promotion
    /// goes to. When no group is active the run is kept.
    pub fn reserve_group_share(&self, user: UserId) -> EngineResult<GroupShareReservation> {
        self.require_flag(FeatureFlag::GroupPromo)?;
        let active = self.active_group_ids()?;

        let reservation = self.store.transact(&TxScope::new().user(user), |tx| {
            let u = active_user(tx, user)?;
            let promo = u
                .normal_promo
                .clone()
                .ok_or_else(|| EngineError::InvalidInput("no saved promotion to share".into()))?;
            let targets = self
                .config
                .quotas
                .group_share_targets_for(u.premium_active(Utc::now()));

            let runs_left = take_quota(staged_user_mut(tx, user)?, QuotaKind::DailyPromoRuns, 1)?;
            if active.is_empty() {
                return Err(EngineError::NoGroupsAvailable);
            }
            let groups = active
                .choose_multiple(&mut rand::thread_rng(), targets)
                .copied()
                .collect();
            Ok(GroupShareReservation {
                promo,
                groups,
                runs_left,
            })
        })?;

        info!(
            user = %user,
            groups = reservation.groups.len(),
            runs_left = reservation.runs_left,
            "group share reserved"
        );
        Ok(reservation)
    }
}
