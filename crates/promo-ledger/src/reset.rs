use chrono::{DateTime, Utc};
use promo_store::{EntityStore, TxScope};
use promo_types::{QuotaKind, UserId};
use serde::Serialize;
use tracing::{info, warn};

use crate::engine::CreditEngine;
use crate::error::{EngineError, EngineResult};

/// Outcome of a sweep over every user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    pub processed: usize,
    pub failed: usize,
}

impl<S: EntityStore> CreditEngine<S> {
    /// Restore every user's daily balance and quotas.
    ///
    /// Expired premium is lapsed first, so the new allowance reflects the
    /// status at reset time. Users are reset one transaction each; users
    /// created after the sweep starts keep their signup defaults.
    pub fn daily_reset(&self) -> EngineResult<ResetReport> {
        let now = Utc::now();
        let report = self.sweep("daily", |id| self.reset_user_daily(id, now))?;
        info!(
            processed = report.processed,
            failed = report.failed,
            "daily reset finished"
        );
        Ok(report)
    }

    /// Zero every user's weekly click counter.
    pub fn weekly_reset(&self) -> EngineResult<ResetReport> {
        let report = self.sweep("weekly", |id| {
            self.store.transact(&TxScope::new().user(id), |tx| {
                if let Some(user) = tx.user_mut(id)? {
                    user.clicks_received = 0;
                }
                Ok::<_, EngineError>(())
            })
        })?;
        info!(
            processed = report.processed,
            failed = report.failed,
            "weekly reset finished"
        );
        Ok(report)
    }

    /// Daily reset of a single user. Idempotent within a cycle: the balance
    /// and quotas are overwritten, never incremented.
    pub fn reset_user_daily(&self, id: UserId, now: DateTime<Utc>) -> EngineResult<()> {
        let rewards = &self.config.rewards;
        let quotas = &self.config.quotas;
        self.store.transact(&TxScope::new().user(id), |tx| {
            let Some(user) = tx.user_mut(id)? else {
                return Ok(());
            };
            if user.premium_lapsed(now) {
                user.revoke_premium();
                info!(user = %id, "premium expired");
            }
            let premium = user.premium_active(now);
            let multiplier = if premium { 2 } else { 1 };
            user.credits = rewards
                .base_daily_credits
                .checked_add(user.referral_credits)
                .and_then(|allowance| allowance.checked_mul(multiplier))
                .ok_or_else(|| {
                    EngineError::InvalidInput(format!("daily allowance of {id} overflows"))
                })?;
            for kind in [QuotaKind::DailyPromoRuns, QuotaKind::ImageBroadcasts] {
                *user.quota_mut(kind) = quotas.maximum(kind, premium);
            }
            Ok::<_, EngineError>(())
        })
    }

    /// Apply `step` to every user id known when the sweep starts, retrying
    /// each failure once. A user that still fails is counted, not fatal.
    fn sweep(
        &self,
        job: &'static str,
        step: impl Fn(UserId) -> EngineResult<()>,
    ) -> EngineResult<ResetReport> {
        let mut report = ResetReport::default();
        for id in self.store.user_ids()? {
            let result = step(id).or_else(|err| {
                warn!(job, user = %id, error = %err, "reset failed, retrying");
                step(id)
            });
            match result {
                Ok(()) => report.processed += 1,
                Err(err) => {
                    warn!(job, user = %id, error = %err, "reset failed twice, skipping user");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}
