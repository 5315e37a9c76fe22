//! # Pillar Audit CLI (`pillar`)
//!
//! ## Usage
//!
//! ```bash
//! pillar --config ./pillar.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pillar audit <root>` | Analyze a Terraform tree and write a JSON report |
//! | `pillar chunks <root>` | List chunks and parse warnings (offline) |
//! | `pillar guidance list` | Print the guidance corpus |
//! | `pillar guidance build` | Embed the guidance corpus into the cache |
//! | `pillar init` | Create the embedding cache database |
//! | `pillar completions <shell>` | Print a shell completion script |
//!
//! ## Exit codes
//!
//! `0` PASS, `1` FAIL (any HIGH finding), `2` fatal error, `3` nothing
//! analyzed under `--require-coverage`.

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pillar_audit::audit_cmd::{self, AuditOptions};
use pillar_audit::config::{self, Config};
use pillar_audit::guidance_cmd;
use pillar_audit::progress::ProgressMode;
use pillar_audit::report::EXIT_FATAL;

/// Pillar Audit: Well-Architected compliance checks for Terraform.
#[derive(Parser)]
#[command(
    name = "pillar",
    about = "Retrieval-augmented Well-Architected compliance checks for Terraform",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Offline commands fall back to defaults when the file does not exist.
    #[arg(long, global = true, default_value = "./pillar.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    /// Progress on stderr. Defaults to `human` when stderr is a terminal.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    /// AWS profile for the `bedrock` reasoning provider.
    #[arg(long, global = true)]
    profile: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze the Terraform files under ROOT.
    ///
    /// Writes `results_YYYYmmdd_HHMMSS.json` (or `--output`) and prints a
    /// summary. Exits 1 when any HIGH-severity finding exists.
    Audit {
        /// Directory (or single file) to analyze.
        root: PathBuf,

        /// Report path.
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Override `[pipeline].concurrency`.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Override `[retrieval].k`.
        #[arg(long)]
        k: Option<usize>,

        /// Exit 3 instead of 0 when nothing could be analyzed.
        #[arg(long)]
        require_coverage: bool,

        /// Print the JSON report to stdout instead of the summary.
        #[arg(long)]
        print_json: bool,
    },

    /// List the chunks ROOT produces. Makes no provider calls.
    Chunks {
        root: PathBuf,
    },

    /// Inspect or pre-build the guidance index.
    Guidance {
        #[command(subcommand)]
        action: GuidanceAction,
    },

    /// Create the embedding cache database.
    Init,

    /// Print a shell completion script.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum GuidanceAction {
    /// Print every clause of the corpus, grouped by pillar.
    List,
    /// Embed the corpus and record its hash in the cache.
    Build,
}

fn init_tracing(log_json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pillar_audit=info"));
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "pillar", &mut std::io::stdout());
        }
        Commands::Chunks { root } => {
            let cfg = config::load_config_or_default(&cli.config)?;
            audit_cmd::run_chunks(&cfg, &root)?;
        }
        Commands::Guidance {
            action: GuidanceAction::List,
        } => {
            let cfg = config::load_config_or_default(&cli.config)?;
            guidance_cmd::run_guidance_list(&cfg)?;
        }
        Commands::Guidance {
            action: GuidanceAction::Build,
        } => {
            let cfg = config::load_config(&cli.config)?;
            guidance_cmd::run_guidance_build(&cfg).await?;
        }
        Commands::Init => {
            let cfg = config::load_config_or_default(&cli.config)?;
            guidance_cmd::run_init(&cfg).await?;
        }
        Commands::Audit {
            root,
            output,
            concurrency,
            k,
            require_coverage,
            print_json,
        } => {
            let mut cfg = config::load_config(&cli.config)?;
            apply_overrides(&mut cfg, concurrency, k, cli.profile)?;
            let options = AuditOptions {
                output,
                require_coverage,
                print_json,
            };
            let reporter = progress.reporter();
            return audit_cmd::run_audit(&cfg, &root, &options, reporter.as_ref()).await;
        }
    }
    Ok(0)
}

fn apply_overrides(
    cfg: &mut Config,
    concurrency: Option<usize>,
    k: Option<usize>,
    profile: Option<String>,
) -> anyhow::Result<()> {
    if let Some(n) = concurrency {
        cfg.pipeline.concurrency = n;
    }
    if let Some(k) = k {
        cfg.retrieval.k = k;
    }
    if let (Some(profile), Some(reasoning)) = (profile, cfg.reasoning_section.as_mut()) {
        reasoning.profile = Some(profile);
    }
    cfg.validate()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_flag_overrides_config() {
        let cli = Cli::try_parse_from([
            "pillar", "--profile", "audit-ro", "audit", "./infra", "--concurrency", "2",
        ])
        .unwrap();
        let mut cfg = config::parse_config(
            "[reasoning]\nprovider = \"bedrock\"\nmodel = \"m\"\nprofile = \"default\"",
        )
        .unwrap();
        let Commands::Audit { concurrency, k, .. } = cli.command else {
            panic!("expected audit");
        };
        apply_overrides(&mut cfg, concurrency, k, cli.profile).unwrap();
        assert_eq!(cfg.reasoning().unwrap().profile.as_deref(), Some("audit-ro"));
        assert_eq!(cfg.pipeline.concurrency, 2);
    }

    #[test]
    fn test_overrides_are_validated() {
        let mut cfg = Config::default();
        assert!(apply_overrides(&mut cfg, Some(0), None, None).is_err());
    }
}
