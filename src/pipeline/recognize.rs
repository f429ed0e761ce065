//! Recognition: one VLM call per unit image, one Markdown fragment per unit.
//!
//! Units are processed sequentially in natural order. Each call hands a
//! [`RecognitionBackend`] the instruction for the unit's category and the
//! encoded image; [`ProviderBackend`] sends them to an edgequake-llm provider
//! as a system message and an image-only user message. Calls are wrapped in the
//! run's [`RetryPolicy`](crate::retry::RetryPolicy) and a per-call timeout;
//! a unit whose budget runs out is reported and skipped, the stage goes on.
//!
//! Responses are written verbatim to `{stem}.md`. No cleanup happens here,
//! the merger trims surrounding whitespace.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, UnitError};
use crate::output::{RunManifest, Stage, StageReport};
use crate::pipeline::encode::encode_file;
use crate::pipeline::input::{ensure_dir, unit_inputs, UnitInput, TEXT_EXTENSION};
use crate::progress::Reporter;
use crate::prompts::instruction_for;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use futures::future::BoxFuture;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Model used when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

// ── Backend boundary ─────────────────────────────────────────────────────

/// One recognition call: an instruction plus one encoded unit image.
#[derive(Clone, Copy)]
pub struct RecognitionRequest<'a> {
    /// Unit stem, e.g. `crop_000_001_text`.
    pub unit: &'a str,
    pub instruction: &'a str,
    pub image: &'a ImageData,
    pub options: &'a CompletionOptions,
}

/// Text returned for one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// A vision model that turns one unit image into text.
///
/// Every `Err` counts as a failed attempt and is retried under the run's
/// retry policy.
pub trait RecognitionBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str {
        "vlm"
    }

    fn transcribe<'a>(
        &'a self,
        request: RecognitionRequest<'a>,
    ) -> BoxFuture<'a, Result<Transcript, String>>;
}

/// [`RecognitionBackend`] over an edgequake-llm chat provider.
///
/// Sends a system message with the instruction and a user message holding
/// the image with empty text.
pub struct ProviderBackend {
    provider: Arc<dyn LLMProvider>,
}

impl ProviderBackend {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }
}

impl RecognitionBackend for ProviderBackend {
    fn name(&self) -> &str {
        "llm"
    }

    fn transcribe<'a>(
        &'a self,
        request: RecognitionRequest<'a>,
    ) -> BoxFuture<'a, Result<Transcript, String>> {
        Box::pin(async move {
            let messages = vec![
                ChatMessage::system(request.instruction),
                ChatMessage::user_with_images("", vec![request.image.clone()]),
            ];
            let response = self
                .provider
                .chat(&messages, Some(request.options))
                .await
                .map_err(|e| e.to_string())?;
            Ok(Transcript {
                content: response.content,
                prompt_tokens: response.prompt_tokens as u64,
                completion_tokens: response.completion_tokens as u64,
            })
        })
    }
}

// ── Stage ────────────────────────────────────────────────────────────────

/// Recognize every unit in `input_dir` and write fragments to `output_dir`.
///
/// With a manifest, listed units without an image are reported as
/// [`UnitError::MissingArtifact`] instead of being silently absent.
pub async fn run(
    input_dir: &Path,
    output_dir: &Path,
    manifest: Option<&RunManifest>,
    backend: &dyn RecognitionBackend,
    config: &PipelineConfig,
    reporter: &Reporter,
) -> Result<StageReport, PipelineError> {
    let start = Instant::now();
    let (inputs, missing) = unit_inputs(input_dir, manifest)?;
    ensure_dir(output_dir)?;
    info!(
        "Recognizing {} units from {} with {}",
        inputs.len(),
        input_dir.display(),
        backend.name()
    );

    let mut report = StageReport::new(Stage::Recognize);
    report.total = inputs.len() + missing.len();
    reporter.stage_start(Stage::Recognize, report.total);

    for e in missing {
        warn!("{}", e);
        reporter.unit_error(Stage::Recognize, e.name(), &e.to_string());
        report.failures.push(e);
    }

    let options = build_options(config);
    for (i, unit) in inputs.iter().enumerate() {
        debug!("[{}/{}] {}", i + 1, inputs.len(), unit.stem);
        match recognize_unit(unit, output_dir, backend, &options, config).await {
            Ok(fragment) => {
                report.succeeded += 1;
                report.units += 1;
                report.input_tokens += fragment.input_tokens;
                report.output_tokens += fragment.output_tokens;
                reporter.unit_complete(Stage::Recognize, &fragment.file_name);
            }
            Err(e) => {
                warn!("{}", e);
                reporter.unit_error(Stage::Recognize, e.name(), &e.to_string());
                report.failures.push(e);
            }
        }
    }

    report.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Recognition complete: {}/{} fragments written, {} in / {} out tokens",
        report.succeeded, report.total, report.input_tokens, report.output_tokens
    );
    reporter.stage_complete(&report);
    Ok(report)
}

struct Fragment {
    file_name: String,
    input_tokens: u64,
    output_tokens: u64,
}

async fn recognize_unit(
    unit: &UnitInput,
    output_dir: &Path,
    backend: &dyn RecognitionBackend,
    options: &CompletionOptions,
    config: &PipelineConfig,
) -> Result<Fragment, UnitError> {
    let image_name = crate::pipeline::input::file_name(&unit.path);
    let image = encode_file(&unit.path).map_err(|e| UnitError::EncodeFailed {
        name: image_name.clone(),
        detail: e.to_string(),
    })?;

    let instruction = instruction_for(unit.name.category(), config.system_prompt.as_deref());
    let request = RecognitionRequest {
        unit: &unit.stem,
        instruction: &instruction,
        image: &image,
        options,
    };

    let timeout = Duration::from_secs(config.api_timeout_secs);
    let policy = config.retry_policy();
    let (transcript, attempts) = policy
        .run(&unit.stem, |_attempt| async move {
            match tokio::time::timeout(timeout, backend.transcribe(request)).await {
                Ok(result) => result,
                Err(_) => Err(format!("no response within {}s", timeout.as_secs())),
            }
        })
        .await
        .map_err(|exhausted| UnitError::RecognitionFailed {
            name: image_name.clone(),
            attempts: exhausted.attempts,
            detail: exhausted.last_error,
        })?;

    let file_name = format!("{}.{}", unit.stem, TEXT_EXTENSION);
    std::fs::write(output_dir.join(&file_name), &transcript.content).map_err(|e| {
        UnitError::WriteFailed {
            name: file_name.clone(),
            detail: e.to_string(),
        }
    })?;
    debug!(
        "{}: {} chars after {} attempt(s), {} in / {} out tokens",
        file_name,
        transcript.content.len(),
        attempts,
        transcript.prompt_tokens,
        transcript.completion_tokens
    );

    Ok(Fragment {
        file_name,
        input_tokens: transcript.prompt_tokens,
        output_tokens: transcript.completion_tokens,
    })
}

/// Sampling options for every recognition call.
pub fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        PipelineError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the recognition backend: a pre-built `config.backend`, else a
/// [`ProviderBackend`] over [`resolve_provider`].
pub fn resolve_backend(
    config: &PipelineConfig,
) -> Result<Arc<dyn RecognitionBackend>, PipelineError> {
    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }
    Ok(Arc::new(ProviderBackend::new(resolve_provider(config)?)))
}

/// Resolve the recognition provider, most specific first:
///
/// 1. a pre-built `config.provider`;
/// 2. `config.provider_name` with `config.model` (or [`DEFAULT_MODEL`]);
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set;
/// 4. OpenAI, when `OPENAI_API_KEY` is set;
/// 5. whatever [`ProviderFactory::from_env`] detects.
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| PipelineError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be detected from the environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
