use std::sync::Arc;

use promo_ledger::{
    BroadcastReservation, ClaimReceipt, CreditEngine, EngineError, EngineResult,
    GroupRegistration, GroupShareReservation, ReferralOutcome,
};
use promo_store::EntityStore;
use promo_types::{GroupId, PromotionId, PromotionPayload, UserId};
use serde::Serialize;
use tracing::{info, warn};

use crate::batch::{BatchReport, BatchSender};
use crate::message::{Message, Recipient};
use crate::notifier::Notifier;
use crate::traits::{DeliveryChannel, MembershipOracle};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroupShareReport {
    pub reservation: GroupShareReservation,
    pub delivery: BatchReport,
    /// Groups switched off because delivery failed permanently.
    pub deactivated: Vec<GroupId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImageBroadcastReport {
    pub reservation: BroadcastReservation,
    pub delivery: BatchReport,
}

/// A report handed to the admins.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReportReceipt {
    pub promotion: PromotionId,
    pub reported_user: UserId,
    pub admins_notified: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AdminBroadcastReport {
    pub delivery: BatchReport,
    /// Users banned because they blocked the bot.
    pub banned: Vec<UserId>,
}

/// Engine operations that also talk to the messaging platform.
///
/// Every ledger change commits before any network call, and a delivery
/// failure never rolls one back. No paid-for send is refunded.
pub struct Workflows<S: EntityStore> {
    engine: Arc<CreditEngine<S>>,
    channel: Arc<dyn DeliveryChannel>,
    oracle: Arc<dyn MembershipOracle>,
    notifier: Notifier,
}

impl<S: EntityStore> Workflows<S> {
    pub fn new(
        engine: Arc<CreditEngine<S>>,
        channel: Arc<dyn DeliveryChannel>,
        oracle: Arc<dyn MembershipOracle>,
    ) -> Self {
        let notifier = Notifier::new(Arc::clone(&channel));
        Self {
            engine,
            channel,
            oracle,
            notifier,
        }
    }

    pub fn engine(&self) -> &CreditEngine<S> {
        &self.engine
    }

    /// Wait until every notification sent so far has been handed to the
    /// channel.
    pub async fn flush_notifications(&self) {
        self.notifier.flush().await;
    }

    /// Register a user who followed `inviter`'s link. A rewarded inviter is
    /// told about the new referral.
    pub fn register_referral(
        &self,
        inviter: UserId,
        invitee: UserId,
        username: &str,
    ) -> EngineResult<ReferralOutcome> {
        let outcome = self.engine.register_referral(inviter, invitee, username)?;
        if let ReferralOutcome::Rewarded {
            award, milestone, ..
        } = outcome
        {
            let mut text = format!(
                "New user @{username} joined via your link! You get +{award} permanent daily credits."
            );
            if milestone {
                text.push_str(" Milestone bonus included.");
            }
            self.notifier.notify(Recipient::User(inviter), Message::text(text));
        }
        Ok(outcome)
    }

    /// Record that the bot joined `group`. The group is greeted, and a
    /// rewarded adder is thanked.
    pub fn register_group(
        &self,
        group: GroupId,
        title: &str,
        added_by: Option<UserId>,
        bot_is_admin: bool,
    ) -> EngineResult<GroupRegistration> {
        let registration = self
            .engine
            .register_group(group, title, added_by, bot_is_admin)?;

        if let Some((adder, reward)) = registration.reward {
            let text = format!("Thanks for making me admin in '{title}'! You got {reward} credits.");
            self.notifier.notify(Recipient::User(adder), Message::text(text));
        }
        let greeting = if registration.group.active {
            "Hello! I'm ready to receive promotions."
        } else {
            "Hello! For me to work, please promote me to admin."
        };
        self.notifier
            .notify(Recipient::Group(group), Message::text(greeting));
        Ok(registration)
    }

    /// Forward a complaint about a promotion's owner to every admin.
    pub fn report_promotion(
        &self,
        reporter: UserId,
        promotion: PromotionId,
        note: Option<&str>,
    ) -> EngineResult<ReportReceipt> {
        let user = self.engine.user(reporter)?;
        if user.is_banned {
            return Err(EngineError::Banned(reporter));
        }
        let promo = self.engine.promotion(promotion)?;
        if promo.owner_id == reporter {
            return Err(EngineError::InvalidInput(
                "cannot report your own promotion".into(),
            ));
        }

        let mut text = format!(
            "New report\nReporter: @{} ({})\nReported user: {}\nPromotion: #{}",
            user.username, reporter, promo.owner_id, promotion
        );
        if let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) {
            text.push_str("\n\n");
            text.push_str(note);
        }
        let admins = &self.engine.config().admin_ids;
        for admin in admins {
            self.notifier
                .notify(Recipient::User(*admin), Message::text(text.clone()));
        }

        info!(
            reporter = %reporter,
            promotion = %promotion,
            owner = %promo.owner_id,
            "promotion reported"
        );
        Ok(ReportReceipt {
            promotion,
            reported_user: promo.owner_id,
            admins_notified: admins.len(),
        })
    }

    /// Claim a link promotion and tell the owner.
    pub fn claim_normal(&self, user: UserId, promotion: PromotionId) -> EngineResult<ClaimReceipt> {
        let receipt = self.engine.try_claim(user, promotion)?;
        self.notify_owner(&receipt);
        Ok(receipt)
    }

    /// Check channel membership for a force-join promotion, then claim.
    /// Link promotions skip the check.
    pub async fn verify_and_claim(
        &self,
        user: UserId,
        promotion: PromotionId,
    ) -> EngineResult<ClaimReceipt> {
        let promo = self.engine.promotion(promotion)?;
        if let PromotionPayload::ForceJoin { channel_id } = promo.payload {
            let joined = self
                .oracle
                .is_member(channel_id, user)
                .await
                .map_err(|err| EngineError::ExternalDeliveryFailed(err.to_string()))?;
            if !joined {
                return Err(EngineError::NotAMember {
                    user,
                    channel: channel_id,
                });
            }
        }
        self.claim_normal(user, promotion)
    }

    /// Post the user's saved promotion into a random sample of groups.
    pub async fn group_share(&self, user: UserId) -> EngineResult<GroupShareReport> {
        let reservation = self.engine.reserve_group_share(user)?;
        let recipients: Vec<_> = reservation
            .groups
            .iter()
            .map(|g| Recipient::Group(*g))
            .collect();
        let message = Message::text(format!(
            "{}\n{}",
            reservation.promo.text, reservation.promo.url
        ));

        let sender = BatchSender::new(
            Arc::clone(&self.channel),
            self.engine.config().delivery.group_share_pacing(),
        );
        let delivery = sender.send_all(&recipients, &message).await;

        let mut deactivated = Vec::new();
        for recipient in &delivery.permanent_failures {
            if let Recipient::Group(group) = recipient {
                match self.engine.mark_group_inactive(*group) {
                    Ok(true) => deactivated.push(*group),
                    Ok(false) => {}
                    Err(err) => warn!(group = %group, error = %err, "could not deactivate group"),
                }
            }
        }

        info!(
            user = %user,
            sent = delivery.sent,
            deactivated = deactivated.len(),
            "group share delivered"
        );
        Ok(GroupShareReport {
            reservation,
            delivery,
            deactivated,
        })
    }

    /// Send an image to `target_count` random users, paid for up front.
    pub async fn image_broadcast(
        &self,
        user: UserId,
        target_count: u32,
        image: &str,
        caption: &str,
    ) -> EngineResult<ImageBroadcastReport> {
        let reservation = self.engine.reserve_image_broadcast(user, target_count)?;
        let recipients: Vec<_> = self
            .engine
            .broadcast_recipients(user, target_count as usize)?
            .into_iter()
            .map(Recipient::User)
            .collect();

        let sender = BatchSender::new(
            Arc::clone(&self.channel),
            self.engine.config().delivery.image_broadcast_pacing(),
        );
        let delivery = sender
            .send_all(&recipients, &Message::image(image, caption))
            .await;

        info!(
            user = %user,
            reserved = target_count,
            sent = delivery.sent,
            "image broadcast delivered"
        );
        Ok(ImageBroadcastReport {
            reservation,
            delivery,
        })
    }

    /// Message every non-banned user. Users who blocked the bot are banned.
    pub async fn admin_broadcast(
        &self,
        admin: UserId,
        message: &Message,
    ) -> EngineResult<AdminBroadcastReport> {
        if !self.engine.config().is_admin(admin) {
            return Err(EngineError::NotAdmin(admin));
        }
        let recipients: Vec<_> = self
            .engine
            .store()
            .users()?
            .into_iter()
            .filter(|u| !u.is_banned && u.id != admin)
            .map(|u| Recipient::User(u.id))
            .collect();

        let sender = BatchSender::new(
            Arc::clone(&self.channel),
            self.engine.config().delivery.admin_broadcast_pacing(),
        );
        let delivery = sender.send_all(&recipients, message).await;

        let mut banned = Vec::new();
        for recipient in &delivery.permanent_failures {
            if let Recipient::User(user) = recipient {
                match self.engine.set_banned(admin, *user, true) {
                    Ok(_) => banned.push(*user),
                    Err(err) => warn!(user = %user, error = %err, "could not ban unreachable user"),
                }
            }
        }

        info!(
            admin = %admin,
            sent = delivery.sent,
            banned = banned.len(),
            "admin broadcast delivered"
        );
        Ok(AdminBroadcastReport { delivery, banned })
    }

    fn notify_owner(&self, receipt: &ClaimReceipt) {
        let text = format!(
            "Someone completed your promotion #{}. {} completions left.",
            receipt.promotion_id, receipt.remaining_budget
        );
        self.notifier
            .notify(Recipient::User(receipt.owner_id), Message::text(text));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use promo_ledger::{DeliveryConfig, EngineConfig};
    use promo_store::{InMemoryEntityStore, StoreError, TxScope};
    use promo_types::{ChannelId, NormalPromo};

    use super::*;
    use crate::testing::{MockChannel, MockOracle};

    const ADMIN: UserId = UserId(999);

    fn engine() -> Arc<CreditEngine> {
        let config = EngineConfig {
            admin_ids: vec![ADMIN],
            delivery: DeliveryConfig {
                group_share_pacing_ms: 0,
                image_broadcast_pacing_ms: 0,
                admin_broadcast_pacing_ms: 0,
            },
            ..EngineConfig::default()
        };
        Arc::new(CreditEngine::new(InMemoryEntityStore::new(), config))
    }

    fn user(engine: &CreditEngine, id: i64) -> UserId {
        engine.register_user(UserId(id), "u").unwrap();
        UserId(id)
    }

    fn make_premium(engine: &CreditEngine, id: UserId) {
        engine.grant_premium(ADMIN, id, 30).unwrap();
        engine
            .store()
            .transact::<_, StoreError, _>(&TxScope::new().user(id), |tx| {
                if let Some(u) = tx.user_mut(id)? {
                    u.image_broadcasts_left = 100;
                }
                Ok(())
            })
            .unwrap();
    }

    fn workflows(
        engine: Arc<CreditEngine>,
        channel: Arc<MockChannel>,
        oracle: MockOracle,
    ) -> Workflows<InMemoryEntityStore> {
        Workflows::new(engine, channel, Arc::new(oracle))
    }

    // ---- Claims ----

    #[tokio::test]
    async fn claim_notifies_owner() {
        let engine = engine();
        let owner = user(&engine, 1);
        let worker = user(&engine, 2);
        let p = engine
            .create_promotion(
                owner,
                PromotionPayload::Normal(NormalPromo::new("x", "https://x.example")),
                2,
            )
            .unwrap()
            .id;
        let channel = Arc::new(MockChannel::default());
        let flows = workflows(engine, channel.clone(), MockOracle::default());

        let receipt = flows.claim_normal(worker, p).unwrap();
        assert_eq!(receipt.reward, 1);
        flows.flush_notifications().await;
        assert_eq!(channel.sent(), vec![Recipient::User(owner)]);
    }

    #[test]
    fn claim_outside_runtime_still_commits() {
        let engine = engine();
        let owner = user(&engine, 1);
        let worker = user(&engine, 2);
        let p = engine
            .create_promotion(
                owner,
                PromotionPayload::Normal(NormalPromo::new("x", "https://x.example")),
                2,
            )
            .unwrap()
            .id;
        let channel = Arc::new(MockChannel::default());
        let flows = workflows(engine.clone(), channel.clone(), MockOracle::default());

        let receipt = flows.claim_normal(worker, p).unwrap();
        assert_eq!(receipt.reward, 1);
        assert_eq!(engine.user(worker).unwrap().credits, 1);
        assert!(channel.sent().is_empty());
    }

    // ---- Registration notices ----

    #[tokio::test]
    async fn referral_notifies_inviter() {
        let engine = engine();
        let inviter = user(&engine, 1);
        let channel = Arc::new(MockChannel::default());
        let flows = workflows(engine, channel.clone(), MockOracle::default());

        let outcome = flows.register_referral(inviter, UserId(2), "newbie").unwrap();
        assert!(matches!(outcome, ReferralOutcome::Rewarded { .. }));
        flows.flush_notifications().await;

        let messages = channel.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, Recipient::User(inviter));
        assert!(messages[0].1.text.contains("@newbie"));
    }

    #[tokio::test]
    async fn ignored_referral_sends_nothing() {
        let engine = engine();
        let channel = Arc::new(MockChannel::default());
        let flows = workflows(engine, channel.clone(), MockOracle::default());

        flows.register_referral(UserId(5), UserId(5), "me").unwrap();
        flows.register_referral(UserId(77), UserId(6), "orphan").unwrap();
        flows.flush_notifications().await;
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn group_add_thanks_adder_and_greets_group() {
        let engine = engine();
        let adder = user(&engine, 1);
        let channel = Arc::new(MockChannel::default());
        let flows = workflows(engine, channel.clone(), MockOracle::default());

        let reg = flows
            .register_group(GroupId(-700), "Fans", Some(adder), true)
            .unwrap();
        assert!(reg.reward.is_some());
        flows.flush_notifications().await;

        let mut sent = channel.sent();
        sent.sort();
        let mut expected = vec![Recipient::User(adder), Recipient::Group(GroupId(-700))];
        expected.sort();
        assert_eq!(sent, expected);
        let greeting = channel
            .messages()
            .into_iter()
            .find(|(r, _)| *r == Recipient::Group(GroupId(-700)))
            .unwrap();
        assert!(greeting.1.text.contains("ready to receive promotions"));
    }

    #[tokio::test]
    async fn group_without_admin_rights_asks_for_promotion() {
        let engine = engine();
        let adder = user(&engine, 1);
        let channel = Arc::new(MockChannel::default());
        let flows = workflows(engine, channel.clone(), MockOracle::default());

        let reg = flows
            .register_group(GroupId(-701), "Quiet", Some(adder), false)
            .unwrap();
        assert!(reg.reward.is_none());
        flows.flush_notifications().await;

        let messages = channel.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, Recipient::Group(GroupId(-701)));
        assert!(messages[0].1.text.contains("promote me to admin"));
    }

    // ---- Reports ----

    #[tokio::test]
    async fn report_reaches_every_admin() {
        let engine = Arc::new(CreditEngine::new(
            InMemoryEntityStore::new(),
            EngineConfig {
                admin_ids: vec![ADMIN, UserId(998)],
                ..EngineConfig::default()
            },
        ));
        let owner = user(&engine, 1);
        let reporter = user(&engine, 2);
        let p = engine
            .create_promotion(
                owner,
                PromotionPayload::Normal(NormalPromo::new("spam", "https://spam.example")),
                1,
            )
            .unwrap()
            .id;
        let channel = Arc::new(MockChannel::failing_permanently([Recipient::User(
            UserId(998),
        )]));
        let flows = workflows(engine, channel.clone(), MockOracle::default());

        let receipt = flows
            .report_promotion(reporter, p, Some("looks like a scam"))
            .unwrap();
        assert_eq!(receipt.reported_user, owner);
        assert_eq!(receipt.admins_notified, 2);
        flows.flush_notifications().await;

        let messages = channel.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, Recipient::User(ADMIN));
        assert!(messages[0].1.text.contains(&owner.to_string()));
        assert!(messages[0].1.text.contains("looks like a scam"));
    }

    #[tokio::test]
    async fn report_rejects_own_promotion_and_banned_reporter() {
        let engine = engine();
        let owner = user(&engine, 1);
        let reporter = user(&engine, 2);
        let p = engine
            .create_promotion(
                owner,
                PromotionPayload::Normal(NormalPromo::new("x", "https://x.example")),
                1,
            )
            .unwrap()
            .id;
        engine.set_banned(ADMIN, reporter, true).unwrap();
        let channel = Arc::new(MockChannel::default());
        let flows = workflows(engine, channel.clone(), MockOracle::default());

        assert!(matches!(
            flows.report_promotion(owner, p, None),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            flows.report_promotion(reporter, p, None),
            Err(EngineError::Banned(_))
        ));
        assert!(matches!(
            flows.report_promotion(UserId(404), p, None),
            Err(EngineError::UserNotFound(_))
        ));
        flows.flush_notifications().await;
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn force_join_requires_membership() {
        let engine = engine();
        let owner = user(&engine, 1);
        let worker = user(&engine, 2);
        let channel_id = ChannelId(-100_500);
        let p = engine
            .create_promotion(owner, PromotionPayload::ForceJoin { channel_id }, 2)
            .unwrap()
            .id;

        let flows = workflows(
            engine.clone(),
            Arc::new(MockChannel::default()),
            MockOracle::default(),
        );
        assert!(matches!(
            flows.verify_and_claim(worker, p).await,
            Err(EngineError::NotAMember { .. })
        ));
        assert_eq!(engine.promotion(p).unwrap().remaining_budget, 2);

        let oracle = MockOracle {
            members: BTreeSet::from([(channel_id, worker)]),
            unavailable: false,
        };
        let flows = workflows(engine.clone(), Arc::new(MockChannel::default()), oracle);
        let receipt = flows.verify_and_claim(worker, p).await.unwrap();
        assert_eq!(receipt.reward, 2);
    }

    #[tokio::test]
    async fn oracle_outage_is_external_failure() {
        let engine = engine();
        let owner = user(&engine, 1);
        let worker = user(&engine, 2);
        let p = engine
            .create_promotion(
                owner,
                PromotionPayload::ForceJoin {
                    channel_id: ChannelId(-7),
                },
                1,
            )
            .unwrap()
            .id;
        let oracle = MockOracle {
            unavailable: true,
            ..MockOracle::default()
        };
        let flows = workflows(engine, Arc::new(MockChannel::default()), oracle);
        assert!(matches!(
            flows.verify_and_claim(worker, p).await,
            Err(EngineError::ExternalDeliveryFailed(_))
        ));
    }

    // ---- Group shares ----

    #[tokio::test]
    async fn group_share_deactivates_dead_groups() {
        let engine = engine();
        let u = user(&engine, 1);
        engine
            .set_normal_promo(u, "shop", "https://shop.example")
            .unwrap();
        engine.register_group(GroupId(-1), "a", None, true).unwrap();
        engine.register_group(GroupId(-2), "b", None, true).unwrap();

        let channel = Arc::new(MockChannel::failing_permanently([Recipient::Group(
            GroupId(-2),
        )]));
        let flows = workflows(engine.clone(), channel.clone(), MockOracle::default());
        let report = flows.group_share(u).await.unwrap();

        assert_eq!(report.delivery.sent, 1);
        assert_eq!(report.deactivated, vec![GroupId(-2)]);
        assert_eq!(engine.active_group_ids().unwrap(), vec![GroupId(-1)]);
        assert_eq!(report.reservation.runs_left, 1);
        assert!(channel.messages()[0].1.text.contains("https://shop.example"));
    }

    // ---- Broadcasts ----

    #[tokio::test]
    async fn image_broadcast_reaches_other_users() {
        let engine = engine();
        let sender = user(&engine, 1);
        make_premium(&engine, sender);
        for id in 2..=4 {
            user(&engine, id);
        }
        let channel = Arc::new(MockChannel::default());
        let flows = workflows(engine.clone(), channel.clone(), MockOracle::default());

        let report = flows
            .image_broadcast(sender, 10, "file-1", "look")
            .await
            .unwrap();
        assert_eq!(report.reservation.cost, 1);
        assert_eq!(report.delivery.sent, 3);
        assert!(!channel.sent().contains(&Recipient::User(sender)));
        assert_eq!(engine.user(sender).unwrap().image_broadcasts_left, 90);
    }

    #[tokio::test]
    async fn admin_broadcast_bans_blocked_users() {
        let engine = engine();
        for id in 1..=3 {
            user(&engine, id);
        }
        let blocked = Recipient::User(UserId(2));
        let channel = Arc::new(MockChannel::failing_permanently([blocked]));
        let flows = workflows(engine.clone(), channel, MockOracle::default());

        assert!(matches!(
            flows.admin_broadcast(UserId(1), &Message::text("hi")).await,
            Err(EngineError::NotAdmin(_))
        ));

        let report = flows
            .admin_broadcast(ADMIN, &Message::text("hi"))
            .await
            .unwrap();
        assert_eq!(report.delivery.sent, 2);
        assert_eq!(report.banned, vec![UserId(2)]);
        assert!(engine.user(UserId(2)).unwrap().is_banned);
    }
}
