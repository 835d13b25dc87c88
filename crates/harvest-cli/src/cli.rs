use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use harvest_core::dead_letter::DiscardScope;
use harvest_core::export::PayrollExportFormat;
use harvest_core::{PickerStatus, QualityGrade};

#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "Record orchard harvest work offline and sync it when connected")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the device config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Orchard to work on (overrides the configured orchard)
    #[arg(long, global = true, value_name = "ID")]
    pub orchard: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record a bucket for a picker
    Scan {
        /// Picker badge code
        code: String,
        /// Quality grade
        #[arg(short, long, value_enum, default_value_t = GradeArg::A)]
        grade: GradeArg,
    },
    /// Check a picker in for today
    CheckIn {
        /// Picker badge code
        code: String,
    },
    /// Check a picker out for today
    CheckOut {
        /// Picker badge code
        code: String,
    },
    /// Record the end of a picker's break
    Break {
        /// Picker badge code
        code: String,
        /// The break was the meal break
        #[arg(long)]
        meal: bool,
    },
    /// Manage the crew roster
    Crew {
        #[command(subcommand)]
        command: CrewCommands,
    },
    /// Show entries waiting to sync
    Queue {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Push queued entries to the remote service
    Sync {
        /// Keep running and sync periodically until interrupted
        #[arg(long)]
        watch: bool,
    },
    /// Inspect and resolve entries that failed to sync
    Dlq {
        #[command(subcommand)]
        command: DlqCommands,
    },
    /// Show today's earnings per picker
    Payroll {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show break and minimum-wage violations
    Compliance {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show or change the orchard's pay settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
    /// Export today's payroll
    Export {
        /// Export format
        #[arg(long, value_enum, default_value_t = ExportFormatArg::Csv)]
        format: ExportFormatArg,
        /// Output file or directory (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Configure this device
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum CrewCommands {
    /// Add a picker to the roster
    Add {
        /// Badge code printed on the picker's card
        code: String,
        /// Display name
        #[arg(required = true)]
        name: Vec<String>,
    },
    /// List the roster
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Archive a picker; archived pickers cannot be credited buckets
    Archive {
        /// Picker badge code
        code: String,
    },
    /// Change a picker's status
    Status {
        /// Picker badge code
        code: String,
        /// New status
        #[arg(value_enum)]
        status: StatusArg,
    },
}

#[derive(Subcommand)]
pub enum DlqCommands {
    /// List failed entries grouped by severity
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Send an entry back to the live queue with a fresh retry budget
    Retry {
        /// Entry id
        id: String,
    },
    /// Drop an entry permanently
    Discard {
        /// Entry id
        id: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Drop every entry in a severity scope
    DiscardAll {
        /// Which entries to drop
        #[arg(long, value_enum, default_value_t = ScopeArg::Critical)]
        scope: ScopeArg,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum SettingsCommands {
    /// Show the cached settings
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change settings; fails if someone else changed them first
    Set {
        /// Pay per bucket
        #[arg(long, value_name = "AMOUNT")]
        piece_rate: Option<f64>,
        /// Minimum hourly wage
        #[arg(long, value_name = "AMOUNT")]
        min_wage_rate: Option<f64>,
        /// Target buckets per hour
        #[arg(long, value_name = "RATE")]
        min_buckets_per_hour: Option<f64>,
        /// Season target in tonnes
        #[arg(long, value_name = "TONNES")]
        target_tons: Option<f64>,
        /// Fruit variety
        #[arg(long)]
        variety: Option<String>,
    },
    /// Replace the cached settings with the remote values
    Pull,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Create or update the device config
    Init {
        /// Supabase project URL
        #[arg(long, value_name = "URL")]
        supabase_url: Option<String>,
        /// Supabase anon/public key
        #[arg(long, value_name = "KEY")]
        supabase_anon_key: Option<String>,
        /// Orchard this device works for
        #[arg(long = "orchard-id", value_name = "ID")]
        orchard_id: Option<String>,
        /// Seconds between background syncs
        #[arg(long, value_name = "SECS")]
        sync_interval_secs: Option<u64>,
        /// Failed attempts before an entry is dead-lettered
        #[arg(long, value_name = "COUNT")]
        dead_letter_threshold: Option<u32>,
        /// Dead-letter constraint and permission failures immediately
        #[arg(long)]
        dead_letter_permanent_errors: Option<bool>,
    },
    /// Show the effective config
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum GradeArg {
    A,
    B,
    C,
    Reject,
}

impl From<GradeArg> for QualityGrade {
    fn from(grade: GradeArg) -> Self {
        match grade {
            GradeArg::A => Self::A,
            GradeArg::B => Self::B,
            GradeArg::C => Self::C,
            GradeArg::Reject => Self::Reject,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StatusArg {
    Active,
    Inactive,
    Archived,
    Break,
    Issue,
}

impl From<StatusArg> for PickerStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Active => Self::Active,
            StatusArg::Inactive => Self::Inactive,
            StatusArg::Archived => Self::Archived,
            StatusArg::Break => Self::Break,
            StatusArg::Issue => Self::Issue,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ScopeArg {
    /// Entries that reached the retry ceiling
    Critical,
    /// Everything shown by `dlq list`
    All,
}

impl From<ScopeArg> for DiscardScope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::Critical => Self::Critical,
            ScopeArg::All => Self::All,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ExportFormatArg {
    Csv,
    Json,
    Xero,
}

impl From<ExportFormatArg> for PayrollExportFormat {
    fn from(format: ExportFormatArg) -> Self {
        match format {
            ExportFormatArg::Csv => Self::Csv,
            ExportFormatArg::Json => Self::Json,
            ExportFormatArg::Xero => Self::Xero,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
}
