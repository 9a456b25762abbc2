use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Course discovery and selection automation for ZF-style portals.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log formatter to use
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,

    /// Configuration file (defaults to `coursegrab.toml` when present)
    #[arg(long, env = "COURSEGRAB_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TracingFormat {
    /// Human-readable compact output
    Pretty,
    /// One JSON object per event
    Json,
}

fn default_tracing_format() -> TracingFormat {
    if cfg!(debug_assertions) {
        TracingFormat::Pretty
    } else {
        TracingFormat::Json
    }
}

/// School and credential shared by every subcommand.
#[derive(clap::Args, Debug, Clone)]
pub struct SessionArgs {
    /// School id from the `schools` table in the configuration
    #[arg(long, env = "PORTAL_SCHOOL")]
    pub school: String,

    /// Session cookie copied from a logged-in browser
    #[arg(long, env = "PORTAL_CREDENTIAL", hide_env_values = true)]
    pub credential: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List every course section visible to the session
    Fetch {
        #[command(flatten)]
        session: SessionArgs,

        /// Restrict to these category codes (repeatable)
        #[arg(long = "category")]
        categories: Vec<String>,

        /// Print per-chunk outcomes instead of the course list
        #[arg(long)]
        report: bool,
    },
    /// Submit one selection
    Select {
        #[command(flatten)]
        session: SessionArgs,

        /// Section id (`jxb_id`)
        #[arg(long)]
        section: String,

        /// Execution section id (`do_jxb_id`)
        #[arg(long)]
        execution_section: String,

        /// Course id (`kch_id`)
        #[arg(long)]
        course: String,

        #[arg(long, default_value = "01")]
        category: String,

        /// Selection window id (`xkkz_id`), when known
        #[arg(long)]
        window: Option<String>,
    },
    /// Submit a JSON array of selection requests in bounded batches
    Batch {
        #[command(flatten)]
        session: SessionArgs,

        /// File holding the requests
        file: PathBuf,

        /// Overrides `batch_size` from the configuration
        #[arg(long)]
        batch_size: Option<usize>,

        /// Overrides `inter_batch_delay` from the configuration
        #[arg(long, value_parser = parse_delay)]
        delay: Option<std::time::Duration>,
    },
    /// Arm a scheduled grab and follow it until it finishes
    Grab {
        #[command(flatten)]
        session: SessionArgs,

        /// Keywords in priority order (repeatable)
        #[arg(long = "keyword", required = true)]
        keywords: Vec<String>,

        /// Activation time: RFC 3339, or `YYYY-MM-DD HH:MM[:SS]` in the configured timezone
        #[arg(long)]
        at: String,

        /// Expiry time, same formats as `--at`
        #[arg(long)]
        until: String,

        /// Restrict to these category codes (repeatable)
        #[arg(long = "category")]
        categories: Vec<String>,

        /// Also consider sections that are already full
        #[arg(long)]
        include_full: bool,
    },
}

fn parse_delay(text: &str) -> Result<std::time::Duration, String> {
    crate::config::parse_duration_text(text)
}

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// Parse an RFC 3339 timestamp, or a naive one interpreted in `tz`.
pub fn parse_time(text: &str, tz: Tz) -> anyhow::Result<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Ok(parsed.with_timezone(&Utc));
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .with_context(|| format!("unrecognised time '{text}'"))?;

    let local = tz
        .from_local_datetime(&naive)
        .earliest()
        .with_context(|| format!("'{text}' does not exist in {tz}"))?;
    Ok(local.with_timezone(&Utc))
}
