use chrono::Utc;
use promo_store::{EntityStore, TxScope};
use promo_types::{User, UserId};
use serde::Serialize;
use tracing::{debug, info};

use crate::engine::CreditEngine;
use crate::error::{EngineError, EngineResult};

/// Result of a plain get-or-create.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub user: User,
    pub created: bool,
}

/// Why a referral link did not pay out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// The invitee had used the bot before.
    AlreadyRegistered,
    SelfReferral,
    UnknownInviter,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReferralOutcome {
    Rewarded {
        inviter: UserId,
        award: i64,
        referral_credits: i64,
        referral_count: u32,
        milestone: bool,
    },
    Ignored { reason: IgnoreReason },
}

impl ReferralOutcome {
    pub fn is_rewarded(&self) -> bool {
        matches!(self, Self::Rewarded { .. })
    }
}

impl<S: EntityStore> CreditEngine<S> {
    /// Get or create `user`. New users start with the daily base balance and
    /// non-premium quotas.
    pub fn register_user(&self, user: UserId, username: &str) -> EngineResult<Registration> {
        let registration = self.store.transact(&TxScope::new().user(user), |tx| {
            if let Some(existing) = tx.user(user)? {
                return Ok::<_, EngineError>(Registration {
                    user: existing.clone(),
                    created: false,
                });
            }
            let fresh = self.new_user(user, username, Utc::now());
            tx.insert_user(fresh.clone())?;
            Ok(Registration {
                user: fresh,
                created: true,
            })
        })?;
        if registration.created {
            debug!(user = %user, username, "user registered");
        }
        Ok(registration)
    }

    /// Record that `invitee` arrived through `inviter`'s link.
    ///
    /// A new invitee is always created. The inviter is rewarded only when
    /// the invitee is new, distinct from the inviter, and the inviter exists.
    pub fn register_referral(
        &self,
        inviter: UserId,
        invitee: UserId,
        username: &str,
    ) -> EngineResult<ReferralOutcome> {
        let rewards = &self.config.rewards;
        let scope = TxScope::new().user(inviter).user(invitee);

        let outcome = self.store.transact(&scope, |tx| {
            if tx.user(invitee)?.is_some() {
                return Ok::<_, EngineError>(ReferralOutcome::Ignored {
                    reason: IgnoreReason::AlreadyRegistered,
                });
            }
            tx.insert_user(self.new_user(invitee, username, Utc::now()))?;

            if inviter == invitee {
                return Ok(ReferralOutcome::Ignored {
                    reason: IgnoreReason::SelfReferral,
                });
            }
            let Some(referrer) = tx.user_mut(inviter)? else {
                return Ok(ReferralOutcome::Ignored {
                    reason: IgnoreReason::UnknownInviter,
                });
            };

            referrer.referral_count += 1;
            let milestone = rewards.milestone_every > 0
                && referrer.referral_count % rewards.milestone_every == 0;
            let award = rewards.referral_award + if milestone { rewards.milestone_bonus } else { 0 };
            referrer.referral_credits =
                referrer.referral_credits.checked_add(award).ok_or_else(|| {
                    EngineError::InvalidInput(format!(
                        "referral allowance of {inviter} would overflow"
                    ))
                })?;

            Ok(ReferralOutcome::Rewarded {
                inviter,
                award,
                referral_credits: referrer.referral_credits,
                referral_count: referrer.referral_count,
                milestone,
            })
        })?;

        match &outcome {
            ReferralOutcome::Rewarded {
                award, milestone, ..
            } => info!(inviter = %inviter, invitee = %invitee, award, milestone, "referral rewarded"),
            ReferralOutcome::Ignored { reason } => {
                debug!(inviter = %inviter, invitee = %invitee, ?reason, "referral ignored")
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::testing::*;

    use super::*;

    #[test]
    fn register_user_is_get_or_create() {
        let engine = engine();
        let first = engine.register_user(UserId(1), "alice").unwrap();
        assert!(first.created);
        assert_eq!(first.user.credits, 10);
        assert_eq!(first.user.daily_promo_runs, 2);

        engine.debit(UserId(1), 4).unwrap();
        let again = engine.register_user(UserId(1), "renamed").unwrap();
        assert!(!again.created);
        assert_eq!(again.user.credits, 6);
        assert_eq!(again.user.username, "alice");
    }

    #[test]
    fn referral_rewards_inviter_once() {
        let engine = engine();
        let inviter = user_with(&engine, 1, 0);

        let outcome = engine.register_referral(inviter, UserId(2), "bob").unwrap();
        assert!(outcome.is_rewarded());
        let again = engine.register_referral(inviter, UserId(2), "bob").unwrap();
        assert_eq!(
            again,
            ReferralOutcome::Ignored {
                reason: IgnoreReason::AlreadyRegistered
            }
        );

        let user = engine.user(inviter).unwrap();
        assert_eq!(user.referral_credits, 2);
        assert_eq!(user.referral_count, 1);
        assert!(engine.user(UserId(2)).is_ok());
    }

    #[test]
    fn existing_user_cannot_be_referred() {
        let engine = engine();
        let inviter = user_with(&engine, 1, 0);
        let old = user_with(&engine, 2, 0);
        let outcome = engine.register_referral(inviter, old, "old").unwrap();
        assert!(!outcome.is_rewarded());
        assert_eq!(engine.user(inviter).unwrap().referral_credits, 0);
    }

    #[test]
    fn self_and_unknown_inviters_still_create_invitee() {
        let engine = engine();
        let outcome = engine.register_referral(UserId(5), UserId(5), "me").unwrap();
        assert_eq!(
            outcome,
            ReferralOutcome::Ignored {
                reason: IgnoreReason::SelfReferral
            }
        );
        assert_eq!(engine.user(UserId(5)).unwrap().referral_credits, 0);

        let outcome = engine.register_referral(UserId(77), UserId(6), "new").unwrap();
        assert_eq!(
            outcome,
            ReferralOutcome::Ignored {
                reason: IgnoreReason::UnknownInviter
            }
        );
        assert!(engine.user(UserId(6)).is_ok());
        assert!(engine.user(UserId(77)).is_err());
    }

    #[test]
    fn every_fifth_referral_earns_milestone_bonus() {
        let engine = engine();
        let inviter = user_with(&engine, 1, 0);
        let outcomes: Vec<_> = (2..=6)
            .map(|i| engine.register_referral(inviter, UserId(i), "x").unwrap())
            .collect();
        assert!(matches!(
            outcomes[4],
            ReferralOutcome::Rewarded {
                award: 3,
                milestone: true,
                referral_count: 5,
                ..
            }
        ));
        assert_eq!(engine.user(inviter).unwrap().referral_credits, 11);
    }
}
