use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "subtrack",
    version,
    about = "Track episodic show subscriptions and watch progress"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Subscribe to a show by its detail page url.
    Add { url: String },
    /// Drop a subscription.
    Remove { url: String },
    /// Check subscriptions for new episodes.
    Refresh {
        /// Refresh only this subscription, ignoring the cool-down.
        #[arg(long)]
        url: Option<String>,
    },
    /// Set the intro/outro lengths (seconds) the player skips.
    Skip {
        url: String,
        #[arg(long)]
        intro: Option<u32>,
        #[arg(long)]
        outro: Option<u32>,
    },
    List,
    /// Recent plays per series.
    History {
        /// Only this series.
        series: Option<String>,
    },
    Resume { series: String },
    /// Record a playback position reported by a player.
    Progress {
        series: String,
        #[arg(long)]
        episode: usize,
        #[arg(long = "title")]
        episode_title: Option<String>,
        #[arg(long = "url")]
        episode_url: Option<String>,
        #[arg(long = "position-ms")]
        position_ms: u64,
        #[arg(long = "duration-ms", default_value_t = 0)]
        duration_ms: u64,
    },
    /// Record positions streamed on stdin as `<episode> <position_ms> [duration_ms]`.
    Track { series: String },
    /// Stay running: refresh on startup, hourly, and whenever a line is entered.
    Watch,
}
