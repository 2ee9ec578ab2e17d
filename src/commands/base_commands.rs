use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

#[derive(Parser)]
#[command(author, version, about)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch one month of records per --month from a source API
    Fetch {
        /// API to fetch from
        #[arg(value_enum)]
        source: Source,
        /// Month to fetch (YYYY-MM); repeatable, defaults to the previous month
        #[arg(short, long = "month", value_name = "YYYY-MM")]
        months: Vec<String>,
        /// Path to the metrics config YAML
        #[arg(short, long)]
        config: Option<String>,
        /// Directory receiving one JSON file per source and month
        #[arg(short, long)]
        output: Option<String>,
        /// Ignore cached results and fetch again
        #[arg(long)]
        refresh: bool,
    },
    /// Inspect or reset the fetch cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// Delete every cached result
    Clear {
        /// Path to the metrics config YAML
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Delete the cached result of one source and month
    Invalidate {
        /// API whose result should be dropped
        #[arg(value_enum)]
        source: Source,
        /// Month to drop (YYYY-MM)
        #[arg(short, long, value_name = "YYYY-MM")]
        month: String,
        /// Path to the metrics config YAML
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Source {
    /// Merged pull requests from GitHub issue search
    Github,
    /// Resolved issues from a Jira JQL search
    Jira,
    /// Pipelines from Semaphore CI
    Semaphore,
}

impl Source {
    pub fn name(&self) -> &'static str {
        match self {
            Source::Github => "github",
            Source::Jira => "jira",
            Source::Semaphore => "semaphore",
        }
    }
}
