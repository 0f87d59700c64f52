use colored::Colorize;
use promo_ledger::{ActionOutcome, ReferralOutcome, UserStats};
use promo_types::{Promotion, PromotionPayload, User};
use serde::Serialize;

use crate::cli::OutputFormat;

/// Print `value` as JSON, or hand it to `text` for the human form.
pub fn emit<T: Serialize>(
    format: OutputFormat,
    value: &T,
    text: impl FnOnce(&T),
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => text(value),
    }
    Ok(())
}

pub fn ok(message: impl std::fmt::Display) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn outcome(outcome: &ActionOutcome) {
    match outcome {
        ActionOutcome::Registered(reg) => {
            if reg.created {
                ok(format_args!("Welcome, {}", reg.user.username.bold()));
            } else {
                println!("Already registered as {}", reg.user.username.bold());
            }
            user_line(&reg.user);
        }
        ActionOutcome::Referral(ReferralOutcome::Rewarded {
            inviter,
            award,
            referral_count,
            milestone,
            ..
        }) => {
            ok(format_args!(
                "Referral recorded: {} earns {} (referral #{})",
                inviter.to_string().yellow(),
                award.to_string().green(),
                referral_count
            ));
            if *milestone {
                println!("  {}", "milestone bonus reached".cyan());
            }
        }
        ActionOutcome::Referral(ReferralOutcome::Ignored { reason }) => {
            println!("Registered; referral not rewarded ({reason:?})");
        }
        ActionOutcome::PromotionCreated(promo) => {
            ok("Promotion funded");
            promotion(promo);
        }
        ActionOutcome::PromoSaved(promo) => {
            ok(format_args!("Saved link promotion {}", promo.url.blue()))
        }
        ActionOutcome::ChannelSaved(channel) => {
            ok(format_args!("Saved channel {}", channel.to_string().yellow()))
        }
        ActionOutcome::Task(Some(promo)) => promotion(promo),
        ActionOutcome::Task(None) => println!("No tasks available right now."),
        ActionOutcome::Claimed(receipt) => ok(format_args!(
            "Earned {} credits for #{} ({} completions left)",
            receipt.reward.to_string().green(),
            receipt.promotion_id,
            receipt.remaining_budget
        )),
        ActionOutcome::QuotaLeft(left) => ok(format_args!("{left} left today")),
        ActionOutcome::ImageBroadcast(r) => ok(format_args!(
            "Reserved {} recipients for {} credits ({} credits left)",
            r.target_count, r.cost, r.credits_left
        )),
        ActionOutcome::GroupShare(r) => ok(format_args!(
            "Sharing to {} groups ({} runs left today)",
            r.groups.len(),
            r.runs_left
        )),
        ActionOutcome::Group(reg) => {
            let status = if reg.group.active {
                "active".green()
            } else {
                "inactive".red()
            };
            ok(format_args!("Group {} is {}", reg.group.title.bold(), status));
            if let Some((user, reward)) = reg.reward {
                println!("  {} earned {} credits", user.to_string().yellow(), reward);
            }
        }
        ActionOutcome::Leaderboard(entries) => {
            if entries.is_empty() {
                println!("No users yet.");
            }
            for entry in entries {
                println!(
                    "{:>3}. {:<24} {}",
                    entry.rank,
                    entry.username.bold(),
                    entry.clicks_received.to_string().cyan()
                );
            }
        }
        ActionOutcome::Stats(stats) => user_stats(stats),
        ActionOutcome::Balance(balance) => {
            ok(format_args!("Balance is now {}", balance.to_string().bold()))
        }
        ActionOutcome::User(user) => user_line(user),
        ActionOutcome::FlagSet { flag, enabled } => ok(format_args!(
            "{} {}",
            flag.to_string().bold(),
            if *enabled { "on".green() } else { "off".red() }
        )),
        ActionOutcome::GroupDeactivated(true) => ok("Group deactivated"),
        ActionOutcome::GroupDeactivated(false) => println!("Group was already inactive."),
        ActionOutcome::SystemStats(s) => {
            println!("Users:      {} ({} premium, {} banned)", s.users, s.premium_users, s.banned_users);
            println!("Promotions: {} ({} funded)", s.promotions, s.funded_promotions);
            println!("Claims:     {}", s.claims);
            println!("Groups:     {} ({} active)", s.groups, s.active_groups);
        }
        ActionOutcome::Reset(report) => ok(format_args!(
            "Reset {} users, {} failed",
            report.processed, report.failed
        )),
    }
}

fn promotion(promo: &Promotion) {
    let target = match &promo.payload {
        PromotionPayload::Normal(p) => format!("{} {}", p.text, p.url.blue()),
        PromotionPayload::ForceJoin { channel_id } => format!("join {}", channel_id.to_string().yellow()),
    };
    println!(
        "  #{} [{}] {} ({}/{} left)",
        promo.id.to_string().yellow().bold(),
        promo.kind(),
        target,
        promo.remaining_budget,
        promo.initial_budget
    );
}

fn user_line(user: &User) {
    let mut tags = Vec::new();
    if user.is_premium {
        tags.push("premium".cyan().to_string());
    }
    if user.is_banned {
        tags.push("banned".red().to_string());
    }
    println!(
        "  {} {} {} credits {}",
        user.id.to_string().yellow(),
        user.username.bold(),
        user.credits,
        tags.join(" ")
    );
}

fn user_stats(stats: &UserStats) {
    println!("{} ({})", stats.username.bold(), stats.user_id.to_string().yellow());
    println!("  Credits:    {}", stats.credits.to_string().green());
    println!(
        "  Referrals:  {} (+{} daily)",
        stats.referral_count, stats.referral_credits
    );
    match (stats.premium, stats.premium_expiry) {
        (true, Some(until)) => println!("  Premium:    {} until {}", "yes".cyan(), until),
        (true, None) => println!("  Premium:    {}", "yes".cyan()),
        _ => println!("  Premium:    no"),
    }
    if stats.banned {
        println!("  {}", "BANNED".red().bold());
    }
    println!("  Clicks:     {} this week", stats.clicks_received);
    println!("  Tasks done: {}", stats.tasks_completed);
    println!(
        "  Promotions: {} ({} completions funded)",
        stats.promotions_owned, stats.budget_outstanding
    );
}
