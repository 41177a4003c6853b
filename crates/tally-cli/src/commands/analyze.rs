//! Analyze command
//!
//! Handles `tally analyze <IMAGE>`: opens a capture session for the image,
//! runs it through the orchestrator and shows the screen the outcome routes
//! to.

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tally_adapters::ai::provider_for;
use tally_adapters::{media_type_for_path, AiAnalysisClient};
use tally_core::{
    AIProvider, AnalysisClient, ApiKeyManager, CaptureAnalyzeOrchestrator, CapturedImage,
    DisplayIntent, FlowNavigator, HistoryRecorder, InputModality, LifecycleEvent,
    OrchestratorSettings, Outcome, PromptBuilder, SessionPhase, SessionSequence, Tier, UsageGate,
};
use tracing::{error, info, warn};

use crate::app::AppContext;

/// Exit status after the user cancelled
const EXIT_CANCELLED: u8 = 130;

/// Parsed arguments of `tally analyze`
pub struct AnalyzeArgs {
    pub image: PathBuf,
    pub modality: InputModality,
    pub provider: Option<AIProvider>,
    pub tier: Tier,
}

/// Analyze one image and print the result
///
/// # Errors
/// - Returns error if the image cannot be read or is empty
/// - Returns error if the database cannot be opened
pub async fn run(ctx: &AppContext, args: AnalyzeArgs) -> Result<ExitCode> {
    let config = ctx.config();

    let configured: AIProvider = config
        .ai
        .default_provider
        .parse()
        .map_err(|e: String| anyhow!(e))?;
    let provider = args.provider.unwrap_or(configured);

    let api_key = match ApiKeyManager::load_api_key(provider) {
        Ok(key) => key,
        Err(_) => {
            eprintln!("Error: API key not configured.\n");
            eprintln!("{}", ApiKeyManager::missing_key_guidance(provider));
            return Ok(ExitCode::FAILURE);
        }
    };

    let bytes = tokio::fs::read(&args.image)
        .await
        .with_context(|| format!("Failed to read image {}", args.image.display()))?;
    let image = CapturedImage::new(bytes, media_type_for_path(&args.image));
    let session = SessionSequence::new()
        .open(image)
        .with_context(|| format!("Cannot analyze {}", args.image.display()))?;

    let store = Arc::new(ctx.open_store().await?);

    let remaining = store
        .remaining(args.tier)
        .await
        .context("Failed to read usage")?;
    if remaining == 0 {
        eprintln!("Daily limit reached for the {} tier.", args.tier);
        eprintln!("Check `tally usage` or try again tomorrow.");
        return Ok(ExitCode::FAILURE);
    }

    let prompt = PromptBuilder::build_analysis_prompt(&config.analysis.instruction)
        .map_err(|e| anyhow!("Failed to build prompt: {}", e))?;

    let model = model_for(provider, configured, &config.ai.model);
    let client = Arc::new(AiAnalysisClient::new(provider_for(provider, &api_key, model)));

    let orchestrator = CaptureAnalyzeOrchestrator::new(
        client,
        Arc::clone(&store),
        store,
        prompt,
        OrchestratorSettings::from(&config.orchestrator),
    );

    #[cfg(unix)]
    let _lifecycle = attach_job_control(&orchestrator);

    let session_id = session.id();
    orchestrator.start(session)?;

    info!(
        session_id = %session_id,
        provider = %provider,
        modality = %args.modality,
        image = %args.image.display(),
        "Analyze command dispatched"
    );
    println!(
        "Analyzing {} with {}...",
        args.image.display(),
        provider.display_name()
    );

    let outcome = wait_for_outcome(&orchestrator).await?;

    // History and usage writes finish before the process exits
    orchestrator.settle().await;

    let intent = FlowNavigator::new(args.modality).route(&outcome);
    if let DisplayIntent::ShowOverloaded { correlation_id } = &intent {
        error!(
            session_id = %session_id,
            correlation_id = %correlation_id,
            outcome = %outcome,
            "Analysis failed"
        );
    } else {
        info!(session_id = %session_id, outcome = %outcome, "Analysis finished");
    }

    println!();
    println!("{}", render(&intent));

    Ok(ExitCode::from(exit_status(&intent)))
}

/// The configured model only applies to the configured provider
fn model_for<'a>(provider: AIProvider, configured: AIProvider, model: &'a str) -> &'a str {
    if provider == configured {
        model
    } else {
        ""
    }
}

#[cfg(unix)]
fn attach_job_control<A, U, H>(
    orchestrator: &CaptureAnalyzeOrchestrator<A, U, H>,
) -> Option<(tally_adapters::SignalLifecycle, tokio::task::JoinHandle<()>)>
where
    A: AnalysisClient + ?Sized + 'static,
    U: UsageGate + ?Sized + 'static,
    H: HistoryRecorder + ?Sized + 'static,
{
    match tally_adapters::SignalLifecycle::install() {
        Ok(lifecycle) => {
            let listener = orchestrator.attach(&lifecycle);
            Some((lifecycle, listener))
        }
        Err(e) => {
            warn!(error = %e, "Job-control signals unavailable, suspend handling disabled");
            None
        }
    }
}

/// Drives the session until it resolves
///
/// An interruption seen while the process is running means the terminal is
/// in the foreground, so it is fed back as a resume. Once no retries are left
/// the session is cancelled. Ctrl-C cancels as well.
pub(crate) async fn wait_for_outcome<A, U, H>(
    orchestrator: &CaptureAnalyzeOrchestrator<A, U, H>,
) -> Result<Outcome>
where
    A: AnalysisClient + ?Sized + 'static,
    U: UsageGate + ?Sized + 'static,
    H: HistoryRecorder + ?Sized + 'static,
{
    let mut watcher = orchestrator
        .outcome()
        .context("No analysis session is running")?;
    let mut phase = watcher.phase();

    loop {
        match phase {
            SessionPhase::Resolved(outcome) => return Ok(outcome),
            SessionPhase::Interrupted(kind) => {
                orchestrator.on_lifecycle_event(LifecycleEvent::Foreground);
                if matches!(orchestrator.phase(), Some(SessionPhase::Interrupted(_))) {
                    eprintln!("Connection lost ({}), giving up.", kind);
                    orchestrator.cancel();
                } else {
                    eprintln!("Connection lost ({}), retrying...", kind);
                }
            }
            SessionPhase::InFlight => {}
        }

        phase = tokio::select! {
            changed = watcher.changed() => {
                changed.context("Analysis session ended without a result")?
            }
            _ = tokio::signal::ctrl_c() => {
                orchestrator.cancel();
                watcher.phase()
            }
        };
    }
}

/// Text shown for a display intent
pub(crate) fn render(intent: &DisplayIntent) -> String {
    match intent {
        DisplayIntent::ShowResult {
            amount,
            description,
        } => format!("{}\nTotal: {}", description, format_amount(*amount)),
        DisplayIntent::ShowNothingRecognized { modality } => match modality {
            InputModality::SingleImage => {
                "Nothing recognizable in this photo. Try another shot.".to_string()
            }
            InputModality::ImageBatch => {
                "Nothing recognizable in these images. Try different ones.".to_string()
            }
            InputModality::ExternalLink => {
                "Nothing recognizable at that link. Try another one.".to_string()
            }
        },
        DisplayIntent::StayInProgress => "Still analyzing...".to_string(),
        DisplayIntent::ShowOverloaded { correlation_id } => format!(
            "The analysis service is busy right now. Please try again later.\nReference: {}",
            correlation_id
        ),
        DisplayIntent::ReturnToEntry => "Analysis cancelled.".to_string(),
    }
}

/// Process exit status for a display intent
pub(crate) fn exit_status(intent: &DisplayIntent) -> u8 {
    match intent {
        DisplayIntent::ShowResult { .. } | DisplayIntent::ShowNothingRecognized { .. } => 0,
        DisplayIntent::ReturnToEntry => EXIT_CANCELLED,
        DisplayIntent::StayInProgress | DisplayIntent::ShowOverloaded { .. } => 1,
    }
}

fn format_amount(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("{:.0}", amount)
    } else {
        format!("{:.1}", amount)
    }
}
