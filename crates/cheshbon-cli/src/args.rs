use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug, Clone)]
#[command(name = "cheshbon", version, about = "Cheshbon CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportMode {
    Full,
    Core,
    AllDetails,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Diff two spec versions and report impacted outputs.
    /// Exit codes: 0 = no impact, 1 = impacted, 2 = non-executable.
    Diff {
        /// Spec v1 (the "from" version).
        #[arg(long)]
        from: PathBuf,

        /// Spec v2 (the "to" version).
        #[arg(long)]
        to: PathBuf,

        /// Transform registry matching --from (requires --to-registry).
        #[arg(long)]
        from_registry: Option<PathBuf>,

        /// Transform registry matching --to (requires --from-registry).
        #[arg(long)]
        to_registry: Option<PathBuf>,

        /// Bindings evaluated against the "to" spec.
        #[arg(long)]
        bindings: Option<PathBuf>,

        /// Raw schema (digested into all-details reports).
        #[arg(long)]
        raw_schema: Option<PathBuf>,

        /// Report detail: full, core, or the all-details artifact.
        #[arg(long, value_enum, default_value_t = ReportMode::Full)]
        report: ReportMode,

        /// Output directory; stdout when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Validate a single spec against optional registry/bindings/schema.
    Validate {
        spec: PathBuf,

        #[arg(long)]
        registry: Option<PathBuf>,

        #[arg(long)]
        bindings: Option<PathBuf>,

        #[arg(long)]
        raw_schema: Option<PathBuf>,
    },

    /// Re-check an all-details report against its inputs.
    Doctor {
        /// The all-details report to verify.
        #[arg(long)]
        report: PathBuf,

        #[arg(long)]
        from: PathBuf,

        #[arg(long)]
        to: PathBuf,

        #[arg(long)]
        from_registry: Option<PathBuf>,

        #[arg(long)]
        to_registry: Option<PathBuf>,

        #[arg(long)]
        bindings: Option<PathBuf>,

        #[arg(long)]
        raw_schema: Option<PathBuf>,

        /// Check every witness instead of the bounded sample.
        #[arg(long)]
        strict: bool,
    },
}
