use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use promo_types::{ChannelId, FeatureFlag, GroupId, PromotionId, PromotionKind, UserId};

#[derive(Parser)]
#[command(
    name = "promo",
    about = "Promo Credit Ledger: credits, promotions and task matching",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Snapshot file holding the ledger state.
    #[arg(long, global = true, default_value = "promo-state.json")]
    pub state: PathBuf,

    /// TOML settings file. A missing file means defaults.
    #[arg(long, global = true, default_value = "promo.toml")]
    pub config: PathBuf,

    /// Act as this user. Defaults to the first configured admin.
    #[arg(long = "as", global = true, value_name = "USER")]
    pub actor: Option<UserId>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Register the acting user, optionally through a referral link
    Register(RegisterArgs),
    /// Show a user's balances and activity
    Show(ShowArgs),
    /// Add credits to a user (admin)
    Credit(AmountArgs),
    /// Remove credits from a user (admin)
    Debit(AmountArgs),
    /// Fund a new promotion
    Promote(PromoteArgs),
    /// Save a promotion payload for later use
    Save(SaveArgs),
    /// Pick a random task the acting user can complete
    Task,
    /// Complete a task and collect the reward
    Claim(ClaimArgs),
    /// Report a promotion's owner to the admins
    Report(ReportArgs),
    /// Show the weekly leaderboard
    Leaderboard(LeaderboardArgs),
    /// Grant or revoke premium (admin)
    Premium(PremiumArgs),
    /// Ban or unban a user (admin)
    Ban(BanArgs),
    /// List feature flags, or set one (admin)
    Flag(FlagArgs),
    /// Manage the groups the bot posts into
    Group(GroupArgs),
    /// Broadcast a message to users
    Broadcast(BroadcastArgs),
    /// Run a scheduled reset now (admin)
    Reset(ResetArgs),
    /// Show system-wide counts (admin)
    Stats,
    /// Dispatch a JSON-encoded action
    Dispatch(DispatchArgs),
    /// Print the effective settings as TOML
    Config,
    /// Run the reset scheduler until interrupted
    Run,
}

impl Command {
    /// Commands that never change the state file.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Self::Show(_)
                | Self::Task
                | Self::Report(_)
                | Self::Leaderboard(_)
                | Self::Stats
                | Self::Config
                | Self::Flag(FlagArgs { state: None, .. })
        )
    }
}

#[derive(Args)]
pub struct RegisterArgs {
    pub username: String,
    /// The user whose referral link was followed.
    #[arg(long)]
    pub invited_by: Option<UserId>,
}

#[derive(Args)]
pub struct ShowArgs {
    /// Defaults to the acting user.
    pub user: Option<UserId>,
}

#[derive(Args)]
pub struct AmountArgs {
    pub user: UserId,
    pub amount: i64,
}

#[derive(Args)]
pub struct PromoteArgs {
    #[command(subcommand)]
    pub target: PromoteTarget,
}

#[derive(Subcommand)]
pub enum PromoteTarget {
    /// Pay users to visit a link
    Link {
        text: String,
        url: String,
        #[arg(short, long)]
        budget: i64,
    },
    /// Pay users to join a channel
    Channel {
        #[arg(allow_hyphen_values = true)]
        channel: ChannelId,
        #[arg(short, long)]
        budget: i64,
    },
    /// Fund the payload saved earlier with `save`
    Saved {
        #[arg(default_value = "normal")]
        kind: PromotionKind,
        #[arg(short, long)]
        budget: i64,
    },
}

#[derive(Args)]
pub struct SaveArgs {
    #[command(subcommand)]
    pub payload: SavePayload,
}

#[derive(Subcommand)]
pub enum SavePayload {
    Link {
        text: String,
        url: String,
    },
    Channel {
        #[arg(allow_hyphen_values = true)]
        channel: ChannelId,
    },
}

#[derive(Args)]
pub struct ClaimArgs {
    pub promotion: PromotionId,
}

#[derive(Args)]
pub struct ReportArgs {
    pub promotion: PromotionId,
    /// What is wrong with it.
    #[arg(long)]
    pub note: Option<String>,
}

#[derive(Args)]
pub struct LeaderboardArgs {
    #[arg(short = 'n', long, default_value = "10")]
    pub limit: usize,
}

#[derive(Args)]
pub struct PremiumArgs {
    pub user: UserId,
    #[arg(long, default_value = "30")]
    pub days: i64,
    #[arg(long, conflicts_with = "days")]
    pub revoke: bool,
}

#[derive(Args)]
pub struct BanArgs {
    pub user: UserId,
    /// Lift an existing ban instead.
    #[arg(long)]
    pub lift: bool,
}

#[derive(Args)]
pub struct FlagArgs {
    pub flag: Option<FeatureFlag>,
    #[arg(id = "toggle", value_name = "STATE", requires = "flag")]
    pub state: Option<Toggle>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

#[derive(Args)]
pub struct GroupArgs {
    #[command(subcommand)]
    pub action: GroupAction,
}

#[derive(Subcommand)]
pub enum GroupAction {
    /// Record that the acting user added the bot to a group
    Add {
        #[arg(allow_hyphen_values = true)]
        group: GroupId,
        title: String,
        /// The bot was added without admin rights.
        #[arg(long)]
        not_admin: bool,
    },
    /// Stop posting into a group (admin)
    Remove {
        #[arg(allow_hyphen_values = true)]
        group: GroupId,
    },
    /// Share the acting user's saved link promotion into groups
    Share,
}

#[derive(Args)]
pub struct BroadcastArgs {
    pub text: String,
    /// Send as a paid image broadcast to this many random users.
    #[arg(long, requires = "targets")]
    pub image: Option<String>,
    #[arg(long, requires = "image")]
    pub targets: Option<u32>,
}

#[derive(Args)]
pub struct ResetArgs {
    pub job: ResetJob,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ResetJob {
    Daily,
    Weekly,
}

#[derive(Args)]
pub struct DispatchArgs {
    /// For example `{"action":"claim","promotion":3}`.
    pub json: String,
}
