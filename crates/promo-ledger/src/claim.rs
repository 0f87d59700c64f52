use chrono::Utc;
use promo_store::{EntityStore, TxScope};
use promo_types::{Claim, PromotionId, PromotionKind, UserId};
use serde::Serialize;
use tracing::{debug, info};

use crate::engine::{active_user, staged_user_mut, CreditEngine};
use crate::error::{EngineError, EngineResult};
use crate::ledger::deposit;

/// What a successful claim paid out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClaimReceipt {
    pub promotion_id: PromotionId,
    pub owner_id: UserId,
    pub kind: PromotionKind,
    pub reward: i64,
    pub remaining_budget: u64,
}

impl<S: EntityStore> CreditEngine<S> {
    /// Reward `user` for completing `promotion`.
    ///
    /// Checks run in a fixed order: the claimant exists and is not banned,
    /// the promotion exists and belongs to someone else, no earlier claim
    /// exists, and budget remains. On success the claim record, the budget
    /// decrement, the reward and the owner's click all commit together.
    pub fn try_claim(&self, user: UserId, promotion: PromotionId) -> EngineResult<ClaimReceipt> {
        // The owner never changes, so it can be read before locking.
        let owner = self.store.promotion(promotion)?.map(|p| p.owner_id);
        let mut scope = TxScope::new().user(user).promotion(promotion);
        if let Some(owner) = owner {
            scope = scope.user(owner);
        }

        let receipt = self.store.transact(&scope, |tx| {
            let now = Utc::now();
            let premium = active_user(tx, user)?.premium_active(now);

            let promo = tx
                .promotion(promotion)?
                .ok_or(EngineError::PromotionNotFound(promotion))?;
            let (owner_id, kind) = (promo.owner_id, promo.kind());
            if owner_id == user {
                return Err(EngineError::InvalidInput(
                    "cannot claim your own promotion".into(),
                ));
            }
            if tx.has_claim(user, promotion)? {
                return Err(EngineError::AlreadyClaimed { user, promotion });
            }
            if promo.remaining_budget == 0 {
                return Err(EngineError::BudgetExhausted(promotion));
            }

            let promo = tx
                .promotion_mut(promotion)?
                .ok_or(EngineError::PromotionNotFound(promotion))?;
            promo.remaining_budget -= 1;
            let remaining_budget = promo.remaining_budget;

            let reward = kind.reward_for(premium);
            tx.insert_claim(Claim {
                user_id: user,
                promotion_id: promotion,
                reward,
                claimed_at: now,
            })?;
            deposit(staged_user_mut(tx, user)?, reward)?;
            if let Some(owner) = tx.user_mut(owner_id)? {
                owner.clicks_received += 1;
            }

            Ok(ClaimReceipt {
                promotion_id: promotion,
                owner_id,
                kind,
                reward,
                remaining_budget,
            })
        })?;

        info!(
            user = %user,
            promotion = %promotion,
            reward = receipt.reward,
            remaining = receipt.remaining_budget,
            "task claimed"
        );
        if receipt.remaining_budget == 0 {
            debug!(promotion = %promotion, "promotion budget exhausted");
        }
        Ok(receipt)
    }
}
