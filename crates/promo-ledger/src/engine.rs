use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use promo_store::{EntityStore, InMemoryEntityStore, Transaction};
use promo_types::{FeatureFlag, Group, GroupId, Promotion, PromotionId, QuotaKind, User, UserId};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

/// The credit ledger and promotion-task matching engine.
///
/// Every balance-affecting operation runs as a single store transaction, so
/// the engine itself holds no locks and no mutable state. Operations live in
/// separate modules as further `impl` blocks on this type.
pub struct CreditEngine<S = InMemoryEntityStore> {
    pub(crate) store: S,
    pub(crate) config: EngineConfig,
}

impl<S: EntityStore> CreditEngine<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ---- Read accessors ----

    pub fn user(&self, id: UserId) -> EngineResult<User> {
        self.store.user(id)?.ok_or(EngineError::UserNotFound(id))
    }

    pub fn promotion(&self, id: PromotionId) -> EngineResult<Promotion> {
        self.store
            .promotion(id)?
            .ok_or(EngineError::PromotionNotFound(id))
    }

    pub fn group(&self, id: GroupId) -> EngineResult<Option<Group>> {
        Ok(self.store.group(id)?)
    }

    pub fn flag(&self, flag: FeatureFlag) -> EngineResult<bool> {
        Ok(self.store.flag(flag)?)
    }

    pub fn flags(&self) -> EngineResult<BTreeMap<String, bool>> {
        Ok(self.store.flags()?)
    }

    // ---- Guards ----

    pub(crate) fn require_flag(&self, flag: FeatureFlag) -> EngineResult<()> {
        if self.store.flag(flag)? {
            Ok(())
        } else {
            Err(EngineError::FeatureDisabled(flag))
        }
    }

    pub(crate) fn require_admin(&self, actor: UserId) -> EngineResult<()> {
        if self.config.is_admin(actor) {
            Ok(())
        } else {
            Err(EngineError::NotAdmin(actor))
        }
    }

    /// A fresh user record with the starting balance and non-premium quotas.
    pub(crate) fn new_user(&self, id: UserId, username: &str, now: DateTime<Utc>) -> User {
        let mut user = User::new(id, username, now);
        user.credits = self.config.rewards.base_daily_credits;
        user.daily_promo_runs = self.config.quotas.maximum(QuotaKind::DailyPromoRuns, false);
        user.image_broadcasts_left = self.config.quotas.maximum(QuotaKind::ImageBroadcasts, false);
        user
    }
}

// ---------------------------------------------------------------------------
// Transaction helpers
// ---------------------------------------------------------------------------

pub(crate) fn staged_user<'t>(tx: &'t Transaction<'_>, id: UserId) -> EngineResult<&'t User> {
    tx.user(id)?.ok_or(EngineError::UserNotFound(id))
}

pub(crate) fn staged_user_mut<'t>(
    tx: &'t mut Transaction<'_>,
    id: UserId,
) -> EngineResult<&'t mut User> {
    tx.user_mut(id)?.ok_or(EngineError::UserNotFound(id))
}

/// The staged user, provided it exists and is not banned.
pub(crate) fn active_user<'t>(tx: &'t Transaction<'_>, id: UserId) -> EngineResult<&'t User> {
    let user = staged_user(tx, id)?;
    if user.is_banned {
        return Err(EngineError::Banned(id));
    }
    Ok(user)
}

#[cfg(test)]
pub(crate) mod testing {
    use promo_store::{StoreError, TxScope};

    use super::*;

    pub const ADMIN: UserId = UserId(1000);

    pub fn engine() -> CreditEngine {
        let config = EngineConfig {
            admin_ids: vec![ADMIN],
            ..EngineConfig::default()
        };
        CreditEngine::new(InMemoryEntityStore::new(), config)
    }

    /// Register `id` and force its balance to `credits`.
    pub fn user_with(engine: &CreditEngine, id: i64, credits: i64) -> UserId {
        let id = UserId(id);
        engine.register_user(id, &format!("user{id}")).unwrap();
        engine
            .store
            .transact::<_, StoreError, _>(&TxScope::new().user(id), |tx| {
                if let Some(user) = tx.user_mut(id)? {
                    user.credits = credits;
                }
                Ok(())
            })
            .unwrap();
        id
    }

    pub fn edit_user(engine: &CreditEngine, id: UserId, f: impl FnOnce(&mut User)) {
        engine
            .store
            .transact::<_, StoreError, _>(&TxScope::new().user(id), |tx| {
                if let Some(user) = tx.user_mut(id)? {
                    f(user);
                }
                Ok(())
            })
            .unwrap();
    }
}
