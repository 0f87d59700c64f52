use chrono::{DateTime, Utc};
use promo_store::{EntityStore, TxScope};
use promo_types::{FeatureFlag, User, UserId};
use serde::Serialize;
use tracing::info;

use crate::engine::{staged_user_mut, CreditEngine};
use crate::error::{EngineError, EngineResult};

/// A user's standing, as shown by the stats command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UserStats {
    pub user_id: UserId,
    pub username: String,
    pub credits: i64,
    pub referral_credits: i64,
    pub referral_count: u32,
    pub premium: bool,
    pub premium_expiry: Option<DateTime<Utc>>,
    pub banned: bool,
    pub clicks_received: u64,
    pub tasks_completed: usize,
    pub promotions_owned: usize,
    /// Completions still funded across the user's promotions.
    pub budget_outstanding: u64,
}

/// Population counts for admins.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SystemStats {
    pub users: usize,
    pub premium_users: usize,
    pub banned_users: usize,
    pub promotions: usize,
    pub funded_promotions: usize,
    pub claims: usize,
    pub groups: usize,
    pub active_groups: usize,
}

impl<S: EntityStore> CreditEngine<S> {
    /// Grant `days` of premium, extending any active subscription.
    pub fn grant_premium(&self, admin: UserId, user: UserId, days: i64) -> EngineResult<User> {
        self.require_admin(admin)?;
        if days <= 0 {
            return Err(EngineError::InvalidInput(format!(
                "premium days must be positive, got {days}"
            )));
        }
        let updated = self.update_user(user, |u| Ok(u.grant_premium(days, Utc::now())?))?;
        info!(admin = %admin, user = %user, days, expiry = ?updated.premium_expiry, "premium granted");
        Ok(updated)
    }

    pub fn revoke_premium(&self, admin: UserId, user: UserId) -> EngineResult<User> {
        self.require_admin(admin)?;
        let updated = self.update_user(user, |u| {
            u.revoke_premium();
            Ok(())
        })?;
        info!(admin = %admin, user = %user, "premium revoked");
        Ok(updated)
    }

    pub fn set_banned(&self, admin: UserId, user: UserId, banned: bool) -> EngineResult<User> {
        self.require_admin(admin)?;
        if admin == user && banned {
            return Err(EngineError::InvalidInput("admins cannot ban themselves".into()));
        }
        let updated = self.update_user(user, |u| {
            u.is_banned = banned;
            Ok(())
        })?;
        info!(admin = %admin, user = %user, banned, "ban status changed");
        Ok(updated)
    }

    pub fn set_flag(&self, admin: UserId, flag: FeatureFlag, enabled: bool) -> EngineResult<()> {
        self.require_admin(admin)?;
        self.store.set_flag(flag, enabled)?;
        info!(admin = %admin, flag = %flag, enabled, "feature flag set");
        Ok(())
    }

    pub fn user_stats(&self, user: UserId) -> EngineResult<UserStats> {
        let u = self.user(user)?;
        let (promotions_owned, budget_outstanding) = self
            .store
            .promotions()?
            .iter()
            .filter(|p| p.owner_id == user)
            .fold((0, 0), |(n, left), p| (n + 1, left + p.remaining_budget));
        Ok(UserStats {
            user_id: u.id,
            premium: u.premium_active(Utc::now()),
            premium_expiry: u.premium_expiry,
            banned: u.is_banned,
            credits: u.credits,
            referral_credits: u.referral_credits,
            referral_count: u.referral_count,
            clicks_received: u.clicks_received,
            tasks_completed: u.completed_task_ids.len(),
            promotions_owned,
            budget_outstanding,
            username: u.username,
        })
    }

    pub fn system_stats(&self, admin: UserId) -> EngineResult<SystemStats> {
        self.require_admin(admin)?;
        let now = Utc::now();
        let users = self.store.users()?;
        let promotions = self.store.promotions()?;
        let groups = self.store.groups()?;
        Ok(SystemStats {
            users: users.len(),
            premium_users: users.iter().filter(|u| u.premium_active(now)).count(),
            banned_users: users.iter().filter(|u| u.is_banned).count(),
            promotions: promotions.len(),
            funded_promotions: promotions.iter().filter(|p| p.is_funded()).count(),
            claims: users.iter().map(|u| u.completed_task_ids.len()).sum(),
            groups: groups.len(),
            active_groups: groups.iter().filter(|g| g.active).count(),
        })
    }

    fn update_user(
        &self,
        user: UserId,
        f: impl FnOnce(&mut User) -> EngineResult<()>,
    ) -> EngineResult<User> {
        self.store.transact(&TxScope::new().user(user), |tx| {
            let u = staged_user_mut(tx, user)?;
            f(&mut *u)?;
            Ok(u.clone())
        })
    }
}
