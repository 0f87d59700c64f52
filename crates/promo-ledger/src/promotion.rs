use chrono::Utc;
use promo_store::{EntityStore, TxScope};
use promo_types::{
    ChannelId, FeatureFlag, NormalPromo, Promotion, PromotionKind, PromotionPayload, UserId,
};
use tracing::info;

use crate::engine::{active_user, staged_user_mut, CreditEngine};
use crate::error::{EngineError, EngineResult};
use crate::ledger::withdraw;

impl<S: EntityStore> CreditEngine<S> {
    /// Fund a new promotion. The owner pays one credit per completion up
    /// front; the debit and the new record commit together.
    pub fn create_promotion(
        &self,
        owner: UserId,
        payload: PromotionPayload,
        budget: i64,
    ) -> EngineResult<Promotion> {
        payload.validate()?;
        if budget <= 0 {
            return Err(EngineError::InvalidInput(format!(
                "budget must be positive, got {budget}"
            )));
        }
        if payload.kind() == PromotionKind::ForceJoin {
            self.require_flag(FeatureFlag::ChannelPromo)?;
        }

        let promotion = self.store.transact(&TxScope::new().user(owner), |tx| {
            active_user(tx, owner)?;
            withdraw(staged_user_mut(tx, owner)?, budget)?;
            Ok::<_, EngineError>(tx.insert_promotion(
                owner,
                payload,
                budget.unsigned_abs(),
                Utc::now(),
            ))
        })?;

        info!(
            owner = %owner,
            promotion = %promotion.id,
            kind = %promotion.kind(),
            budget,
            "promotion created"
        );
        Ok(promotion)
    }

    /// Fund a promotion from the payload the owner saved earlier.
    pub fn create_promotion_from_saved(
        &self,
        owner: UserId,
        kind: PromotionKind,
        budget: i64,
    ) -> EngineResult<Promotion> {
        let user = self.user(owner)?;
        let payload = match kind {
            PromotionKind::Normal => user.normal_promo.map(PromotionPayload::Normal),
            PromotionKind::ForceJoin => user
                .force_join_channel
                .map(|channel_id| PromotionPayload::ForceJoin { channel_id }),
        }
        .ok_or_else(|| EngineError::InvalidInput(format!("no saved {kind} promotion")))?;
        self.create_promotion(owner, payload, budget)
    }

    /// Save the reusable link promotion used by group shares and
    /// `create_promotion_from_saved`.
    pub fn set_normal_promo(
        &self,
        user: UserId,
        text: &str,
        url: &str,
    ) -> EngineResult<NormalPromo> {
        let promo = NormalPromo::new(text.trim(), url.trim());
        promo.validate()?;
        let saved = promo.clone();
        self.store.transact(&TxScope::new().user(user), |tx| {
            active_user(tx, user)?;
            staged_user_mut(tx, user)?.normal_promo = Some(saved);
            Ok::<_, EngineError>(())
        })?;
        info!(user = %user, url = %promo.url, "normal promotion saved");
        Ok(promo)
    }

    /// Save the channel used by force-join promotions.
    pub fn set_force_join_channel(&self, user: UserId, channel: ChannelId) -> EngineResult<()> {
        PromotionPayload::ForceJoin { channel_id: channel }.validate()?;
        self.require_flag(FeatureFlag::ChannelPromo)?;
        self.store.transact(&TxScope::new().user(user), |tx| {
            active_user(tx, user)?;
            staged_user_mut(tx, user)?.force_join_channel = Some(channel);
            Ok::<_, EngineError>(())
        })?;
        info!(user = %user, channel = %channel, "force-join channel saved");
        Ok(())
    }
}
