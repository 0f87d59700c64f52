use promo_store::EntityStore;
use promo_types::{
    ChannelId, FeatureFlag, GroupId, NormalPromo, Promotion, PromotionId, PromotionKind,
    PromotionPayload, QuotaKind, User, UserId,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::admin::{SystemStats, UserStats};
use crate::claim::ClaimReceipt;
use crate::engine::CreditEngine;
use crate::error::EngineResult;
use crate::groups::GroupRegistration;
use crate::leaderboard::LeaderboardEntry;
use crate::quota::{BroadcastReservation, GroupShareReservation};
use crate::referral::{ReferralOutcome, Registration};
use crate::reset::ResetReport;

/// Every operation a presentation layer can ask of the engine, on behalf
/// of the acting user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    // ---- User actions ----
    Register {
        username: String,
    },
    /// The actor arrived through `inviter`'s referral link.
    JoinViaReferral {
        inviter: UserId,
        username: String,
    },
    CreatePromotion {
        payload: PromotionPayload,
        budget: i64,
    },
    CreateFromSaved {
        kind: PromotionKind,
        budget: i64,
    },
    SaveNormalPromo {
        text: String,
        url: String,
    },
    SaveForceJoinChannel {
        channel: ChannelId,
    },
    PickTask,
    Claim {
        promotion: PromotionId,
    },
    ConsumeQuota {
        kind: QuotaKind,
        amount: u32,
    },
    ReserveImageBroadcast {
        target_count: u32,
    },
    ReserveGroupShare,
    /// The actor added the bot to a group.
    AddGroup {
        group: GroupId,
        title: String,
        bot_is_admin: bool,
    },
    Leaderboard {
        n: usize,
    },
    Stats,

    // ---- Admin actions ----
    Credit {
        user: UserId,
        amount: i64,
    },
    Debit {
        user: UserId,
        amount: i64,
    },
    GrantPremium {
        user: UserId,
        days: i64,
    },
    RevokePremium {
        user: UserId,
    },
    SetBanned {
        user: UserId,
        banned: bool,
    },
    SetFlag {
        flag: FeatureFlag,
        enabled: bool,
    },
    DeactivateGroup {
        group: GroupId,
    },
    SystemStats,
    DailyReset,
    WeeklyReset,
}

impl Action {
    pub fn is_admin_only(&self) -> bool {
        matches!(
            self,
            Self::Credit { .. }
                | Self::Debit { .. }
                | Self::GrantPremium { .. }
                | Self::RevokePremium { .. }
                | Self::SetBanned { .. }
                | Self::SetFlag { .. }
                | Self::DeactivateGroup { .. }
                | Self::SystemStats
                | Self::DailyReset
                | Self::WeeklyReset
        )
    }
}

/// The typed result of a dispatched [`Action`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum ActionOutcome {
    Registered(Registration),
    Referral(ReferralOutcome),
    PromotionCreated(Promotion),
    PromoSaved(NormalPromo),
    ChannelSaved(ChannelId),
    Task(Option<Promotion>),
    Claimed(ClaimReceipt),
    QuotaLeft(u32),
    ImageBroadcast(BroadcastReservation),
    GroupShare(GroupShareReservation),
    Group(GroupRegistration),
    Leaderboard(Vec<LeaderboardEntry>),
    Stats(UserStats),
    Balance(i64),
    User(User),
    FlagSet { flag: FeatureFlag, enabled: bool },
    GroupDeactivated(bool),
    SystemStats(SystemStats),
    Reset(ResetReport),
}

impl<S: EntityStore> CreditEngine<S> {
    /// Run `action` for `actor`. Admin actions check `actor` against the
    /// configured admin list before doing anything.
    pub fn dispatch(&self, actor: UserId, action: Action) -> EngineResult<ActionOutcome> {
        debug!(actor = %actor, ?action, "dispatch");
        if action.is_admin_only() {
            self.require_admin(actor)?;
        }

        Ok(match action {
            Action::Register { username } => {
                ActionOutcome::Registered(self.register_user(actor, &username)?)
            }
            Action::JoinViaReferral { inviter, username } => {
                ActionOutcome::Referral(self.register_referral(inviter, actor, &username)?)
            }
            Action::CreatePromotion { payload, budget } => {
                ActionOutcome::PromotionCreated(self.create_promotion(actor, payload, budget)?)
            }
            Action::CreateFromSaved { kind, budget } => ActionOutcome::PromotionCreated(
                self.create_promotion_from_saved(actor, kind, budget)?,
            ),
            Action::SaveNormalPromo { text, url } => {
                ActionOutcome::PromoSaved(self.set_normal_promo(actor, &text, &url)?)
            }
            Action::SaveForceJoinChannel { channel } => {
                self.set_force_join_channel(actor, channel)?;
                ActionOutcome::ChannelSaved(channel)
            }
            Action::PickTask => ActionOutcome::Task(self.pick_task(actor)?),
            Action::Claim { promotion } => ActionOutcome::Claimed(self.try_claim(actor, promotion)?),
            Action::ConsumeQuota { kind, amount } => {
                ActionOutcome::QuotaLeft(self.consume_quota(actor, kind, amount)?)
            }
            Action::ReserveImageBroadcast { target_count } => {
                ActionOutcome::ImageBroadcast(self.reserve_image_broadcast(actor, target_count)?)
            }
            Action::ReserveGroupShare => ActionOutcome::GroupShare(self.reserve_group_share(actor)?),
            Action::AddGroup {
                group,
                title,
                bot_is_admin,
            } => ActionOutcome::Group(self.register_group(group, &title, Some(actor), bot_is_admin)?),
            Action::Leaderboard { n } => ActionOutcome::Leaderboard(self.top_n(n)?),
            Action::Stats => ActionOutcome::Stats(self.user_stats(actor)?),

            Action::Credit { user, amount } => ActionOutcome::Balance(self.credit(user, amount)?),
            Action::Debit { user, amount } => ActionOutcome::Balance(self.debit(user, amount)?),
            Action::GrantPremium { user, days } => {
                ActionOutcome::User(self.grant_premium(actor, user, days)?)
            }
            Action::RevokePremium { user } => ActionOutcome::User(self.revoke_premium(actor, user)?),
            Action::SetBanned { user, banned } => {
                ActionOutcome::User(self.set_banned(actor, user, banned)?)
            }
            Action::SetFlag { flag, enabled } => {
                self.set_flag(actor, flag, enabled)?;
                ActionOutcome::FlagSet { flag, enabled }
            }
            Action::DeactivateGroup { group } => {
                ActionOutcome::GroupDeactivated(self.mark_group_inactive(group)?)
            }
            Action::SystemStats => ActionOutcome::SystemStats(self.system_stats(actor)?),
            Action::DailyReset => ActionOutcome::Reset(self.daily_reset()?),
            Action::WeeklyReset => ActionOutcome::Reset(self.weekly_reset()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::testing::*;
    use crate::error::EngineError;

    use super::*;

    #[test]
    fn user_flow_through_dispatch() {
        let engine = engine();
        let owner = UserId(1);
        let worker = UserId(2);
        engine
            .dispatch(owner, Action::Register { username: "owner".into() })
            .unwrap();
        let joined = engine
            .dispatch(
                worker,
                Action::JoinViaReferral {
                    inviter: owner,
                    username: "worker".into(),
                },
            )
            .unwrap();
        assert!(matches!(joined, ActionOutcome::Referral(r) if r.is_rewarded()));

        let created = engine
            .dispatch(
                owner,
                Action::CreatePromotion {
                    payload: PromotionPayload::Normal(NormalPromo::new("x", "https://x.example")),
                    budget: 2,
                },
            )
            .unwrap();
        let ActionOutcome::PromotionCreated(promo) = created else {
            panic!("expected a created promotion");
        };

        let task = engine.dispatch(worker, Action::PickTask).unwrap();
        assert_eq!(task, ActionOutcome::Task(Some(promo.clone())));

        let claimed = engine
            .dispatch(worker, Action::Claim { promotion: promo.id })
            .unwrap();
        assert!(matches!(claimed, ActionOutcome::Claimed(r) if r.reward == 1));
    }

    #[test]
    fn admin_actions_require_admin() {
        let engine = engine();
        let u = user_with(&engine, 1, 0);
        assert!(matches!(
            engine.dispatch(u, Action::Credit { user: u, amount: 5 }),
            Err(EngineError::NotAdmin(_))
        ));
        assert!(matches!(
            engine.dispatch(u, Action::DailyReset),
            Err(EngineError::NotAdmin(_))
        ));
        assert_eq!(
            engine
                .dispatch(ADMIN, Action::Credit { user: u, amount: 5 })
                .unwrap(),
            ActionOutcome::Balance(5)
        );
    }

    #[test]
    fn actions_deserialize_from_tagged_json() {
        let action: Action =
            serde_json::from_str(r#"{"action":"claim","promotion":4}"#).unwrap();
        assert_eq!(
            action,
            Action::Claim {
                promotion: PromotionId(4)
            }
        );
        let action: Action = serde_json::from_str(
            r#"{"action":"create_promotion","budget":3,"payload":{"kind":"force_join","channel_id":-100}}"#,
        )
        .unwrap();
        assert!(matches!(action, Action::CreatePromotion { budget: 3, .. }));
        assert!(!action.is_admin_only());
    }
}
