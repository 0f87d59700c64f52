use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use promo_delivery::{LogChannel, Message, TrustingOracle, Workflows};
use promo_ledger::{Action, ActionOutcome, CreditEngine};
use promo_scheduler::Scheduler;
use promo_store::InMemoryEntityStore;
use promo_types::{NormalPromo, PromotionPayload, UserId};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::cli::*;
use crate::output::{self, emit, ok};
use crate::settings::Settings;
use crate::state::{self, StateFileJobs, StateLock};

/// One invocation: the loaded ledger plus the global options.
struct Session {
    engine: Arc<CreditEngine>,
    workflows: Workflows<InMemoryEntityStore>,
    format: OutputFormat,
    actor: Option<UserId>,
}

impl Session {
    /// The `--as` user, or the first configured admin.
    fn actor(&self) -> anyhow::Result<UserId> {
        match self.actor.or_else(|| self.engine.config().admin_ids.first().copied()) {
            Some(actor) => Ok(actor),
            None => bail!("no acting user: pass --as <USER> or set engine.admin_ids"),
        }
    }

    fn dispatch(&self, action: Action) -> anyhow::Result<()> {
        let outcome = self.engine.dispatch(self.actor()?, action)?;
        self.print(&outcome)
    }

    fn print(&self, outcome: &ActionOutcome) -> anyhow::Result<()> {
        emit(self.format, outcome, output::outcome)
    }
}

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::load(&cli.config)?;
    match cli.command {
        Command::Config => {
            print!("{}", settings.to_toml()?);
            return Ok(());
        }
        Command::Run => return cmd_run(&settings, &cli.state).await,
        _ => {}
    }

    // Writers hold the state lock from load to save. Read-only commands
    // read whatever snapshot was last saved.
    let read_only = cli.command.is_read_only();
    let mut lock = if read_only {
        None
    } else {
        Some(StateLock::open(&cli.state)?)
    };
    let _guard = lock.as_mut().map(StateLock::acquire).transpose()?;

    let engine = Arc::new(CreditEngine::new(
        state::load(&cli.state)?,
        settings.engine.clone(),
    ));
    let session = Session {
        workflows: Workflows::new(
            Arc::clone(&engine),
            Arc::new(LogChannel),
            Arc::new(TrustingOracle),
        ),
        engine,
        format: cli.format,
        actor: cli.actor,
    };

    let result = match cli.command {
        Command::Register(args) => cmd_register(&session, args),
        Command::Show(args) => cmd_show(&session, args),
        Command::Credit(AmountArgs { user, amount }) => {
            session.dispatch(Action::Credit { user, amount })
        }
        Command::Debit(AmountArgs { user, amount }) => {
            session.dispatch(Action::Debit { user, amount })
        }
        Command::Promote(args) => cmd_promote(&session, args),
        Command::Save(args) => cmd_save(&session, args),
        Command::Task => session.dispatch(Action::PickTask),
        Command::Claim(args) => cmd_claim(&session, args).await,
        Command::Report(args) => cmd_report(&session, args),
        Command::Leaderboard(args) => session.dispatch(Action::Leaderboard { n: args.limit }),
        Command::Premium(args) => cmd_premium(&session, args),
        Command::Ban(BanArgs { user, lift }) => session.dispatch(Action::SetBanned {
            user,
            banned: !lift,
        }),
        Command::Flag(args) => cmd_flag(&session, args),
        Command::Group(args) => cmd_group(&session, args).await,
        Command::Broadcast(args) => cmd_broadcast(&session, args).await,
        Command::Reset(ResetArgs { job }) => session.dispatch(match job {
            ResetJob::Daily => Action::DailyReset,
            ResetJob::Weekly => Action::WeeklyReset,
        }),
        Command::Stats => session.dispatch(Action::SystemStats),
        Command::Dispatch(args) => cmd_dispatch(&session, args),
        Command::Config | Command::Run => Ok(()),
    };
    // Notifications run on spawned tasks; the runtime stops when we return.
    session.workflows.flush_notifications().await;

    // Failed operations leave the ledger untouched, but broadcasts commit
    // their reservation before delivery can fail, so save either way.
    if !read_only {
        state::save(&session.engine, &cli.state)?;
    }
    result
}

fn cmd_register(session: &Session, args: RegisterArgs) -> anyhow::Result<()> {
    match args.invited_by {
        Some(inviter) => {
            let outcome =
                session
                    .workflows
                    .register_referral(inviter, session.actor()?, &args.username)?;
            session.print(&ActionOutcome::Referral(outcome))
        }
        None => session.dispatch(Action::Register {
            username: args.username,
        }),
    }
}

fn cmd_show(session: &Session, args: ShowArgs) -> anyhow::Result<()> {
    let user = match args.user {
        Some(user) => user,
        None => session.actor()?,
    };
    let stats = session.engine.user_stats(user)?;
    session.print(&ActionOutcome::Stats(stats))
}

fn cmd_promote(session: &Session, args: PromoteArgs) -> anyhow::Result<()> {
    session.dispatch(match args.target {
        PromoteTarget::Link { text, url, budget } => Action::CreatePromotion {
            payload: PromotionPayload::Normal(NormalPromo::new(text, url)),
            budget,
        },
        PromoteTarget::Channel { channel, budget } => Action::CreatePromotion {
            payload: PromotionPayload::ForceJoin {
                channel_id: channel,
            },
            budget,
        },
        PromoteTarget::Saved { kind, budget } => Action::CreateFromSaved { kind, budget },
    })
}

fn cmd_save(session: &Session, args: SaveArgs) -> anyhow::Result<()> {
    session.dispatch(match args.payload {
        SavePayload::Link { text, url } => Action::SaveNormalPromo { text, url },
        SavePayload::Channel { channel } => Action::SaveForceJoinChannel { channel },
    })
}

async fn cmd_claim(session: &Session, args: ClaimArgs) -> anyhow::Result<()> {
    let receipt = session
        .workflows
        .verify_and_claim(session.actor()?, args.promotion)
        .await?;
    session.print(&ActionOutcome::Claimed(receipt))
}

fn cmd_report(session: &Session, args: ReportArgs) -> anyhow::Result<()> {
    let receipt = session.workflows.report_promotion(
        session.actor()?,
        args.promotion,
        args.note.as_deref(),
    )?;
    emit(session.format, &receipt, |r| {
        ok(format_args!(
            "Reported user {} to {} admins",
            r.reported_user.to_string().yellow(),
            r.admins_notified
        ));
    })
}

fn cmd_premium(session: &Session, args: PremiumArgs) -> anyhow::Result<()> {
    session.dispatch(if args.revoke {
        Action::RevokePremium { user: args.user }
    } else {
        Action::GrantPremium {
            user: args.user,
            days: args.days,
        }
    })
}

fn cmd_flag(session: &Session, args: FlagArgs) -> anyhow::Result<()> {
    match (args.flag, args.state) {
        (Some(flag), Some(state)) => session.dispatch(Action::SetFlag {
            flag,
            enabled: state == Toggle::On,
        }),
        (Some(flag), None) => {
            let enabled = session.engine.flag(flag)?;
            session.print(&ActionOutcome::FlagSet { flag, enabled })
        }
        (None, _) => {
            let flags = session.engine.flags()?;
            emit(session.format, &flags, |flags| {
                for (name, enabled) in flags {
                    let state = if *enabled { "on".green() } else { "off".red() };
                    println!("{name:<16} {state}");
                }
            })
        }
    }
}

async fn cmd_group(session: &Session, args: GroupArgs) -> anyhow::Result<()> {
    match args.action {
        GroupAction::Add {
            group,
            title,
            not_admin,
        } => {
            let registration = session.workflows.register_group(
                group,
                &title,
                Some(session.actor()?),
                !not_admin,
            )?;
            session.print(&ActionOutcome::Group(registration))
        }
        GroupAction::Remove { group } => session.dispatch(Action::DeactivateGroup { group }),
        GroupAction::Share => {
            let report = session.workflows.group_share(session.actor()?).await?;
            emit(session.format, &report, |r| {
                ok(format_args!(
                    "Shared to {} of {} groups ({} runs left today)",
                    r.delivery.sent,
                    r.reservation.groups.len(),
                    r.reservation.runs_left
                ));
                for group in &r.deactivated {
                    println!("  {} {}", "deactivated".red(), group);
                }
            })
        }
    }
}

async fn cmd_broadcast(session: &Session, args: BroadcastArgs) -> anyhow::Result<()> {
    let actor = session.actor()?;
    match (args.image, args.targets) {
        (Some(image), Some(targets)) => {
            let report = session
                .workflows
                .image_broadcast(actor, targets, &image, &args.text)
                .await?;
            emit(session.format, &report, |r| {
                ok(format_args!(
                    "Image sent to {} users for {} credits ({} broadcasts left today)",
                    r.delivery.sent, r.reservation.cost, r.reservation.quota_left
                ));
            })
        }
        (None, None) => {
            let report = session
                .workflows
                .admin_broadcast(actor, &Message::text(args.text))
                .await?;
            emit(session.format, &report, |r| {
                ok(format_args!(
                    "Broadcast sent to {} users, {} failed",
                    r.delivery.sent, r.delivery.failed
                ));
                if !r.banned.is_empty() {
                    println!("  {} {} unreachable users", "banned".red(), r.banned.len());
                }
            })
        }
        _ => bail!("--image and --targets go together"),
    }
}

fn cmd_dispatch(session: &Session, args: DispatchArgs) -> anyhow::Result<()> {
    let action: Action = serde_json::from_str(&args.json).context("parsing action")?;
    session.dispatch(action)
}

async fn cmd_run(settings: &Settings, state: &Path) -> anyhow::Result<()> {
    let jobs = Arc::new(StateFileJobs::new(state, settings.engine.clone()));
    let handle = Scheduler::new(jobs, settings.schedule.clone()).spawn();
    let mut events = handle.subscribe();
    ok("Scheduler running, Ctrl-C to stop");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => ok(format_args!(
                    "{} done: {} users, {} failed",
                    event.job.to_string().cyan(),
                    event.report.processed,
                    event.report.failed
                )),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "missed job events"),
                Err(RecvError::Closed) => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("listening for Ctrl-C")?;
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}
