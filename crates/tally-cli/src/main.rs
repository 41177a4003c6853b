//! Tally CLI - photo-to-total assistant
//!
//! Main entry point for the Tally application.

mod app;
mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tally_core::{AIProvider, InputModality, Tier};

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Analyze a photo and get back one number")]
#[command(version)]
struct Cli {
    /// Configuration file (default: ~/.tally/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Mirror logs to stdout
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send an image for analysis and show the result
    Analyze {
        /// Image file to analyze
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        /// How the image was obtained
        #[arg(long, value_enum, default_value_t = ModalityArg::Single)]
        modality: ModalityArg,

        /// AI provider to use instead of the configured one
        #[arg(long, value_enum)]
        provider: Option<ProviderArg>,

        /// Quota tier to check before analyzing
        #[arg(long, value_enum, default_value_t = TierArg::Free)]
        tier: TierArg,
    },

    /// List recent analyses
    History {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },

    /// Show today's remaining analyses
    Usage {
        /// Quota tier
        #[arg(long, value_enum, default_value_t = TierArg::Free)]
        tier: TierArg,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModalityArg {
    /// One photo
    #[value(alias = "image")]
    Single,
    /// One photo out of a multi-image selection
    #[value(alias = "images")]
    Batch,
    /// An image received through a shared link
    #[value(alias = "url")]
    Link,
}

impl From<ModalityArg> for InputModality {
    fn from(arg: ModalityArg) -> Self {
        match arg {
            ModalityArg::Single => InputModality::SingleImage,
            ModalityArg::Batch => InputModality::ImageBatch,
            ModalityArg::Link => InputModality::ExternalLink,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProviderArg {
    /// Anthropic Claude
    #[value(alias = "anthropic")]
    Claude,
    /// Google Gemini
    #[value(alias = "google")]
    Gemini,
}

impl From<ProviderArg> for AIProvider {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Claude => AIProvider::Claude,
            ProviderArg::Gemini => AIProvider::Gemini,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TierArg {
    Free,
    #[value(alias = "pro")]
    Premium,
}

impl From<TierArg> for Tier {
    fn from(arg: TierArg) -> Self {
        match arg {
            TierArg::Free => Tier::Free,
            TierArg::Premium => Tier::Premium,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let options = app::InitOptions {
        config_path: cli.config,
        log_to_stdout: cli.verbose,
        ..app::InitOptions::command()
    };

    let ctx = match app::initialize(options) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Analyze {
            image,
            modality,
            provider,
            tier,
        } => {
            commands::analyze::run(
                &ctx,
                commands::analyze::AnalyzeArgs {
                    image,
                    modality: modality.into(),
                    provider: provider.map(Into::into),
                    tier: tier.into(),
                },
            )
            .await
        }
        Commands::History { limit } => commands::history::run(&ctx, limit)
            .await
            .map(|_| ExitCode::SUCCESS),
        Commands::Usage { tier } => commands::usage::run(&ctx, tier.into())
            .await
            .map(|_| ExitCode::SUCCESS),
        Commands::Config => commands::config::run(&ctx).map(|_| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
