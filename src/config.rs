//! Configuration types for a scan-to-Markdown run.
//!
//! All run behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Keeping every knob in one struct makes it easy
//! to share a config between the orchestrator and the individual stages and
//! to print it when diagnosing a run.

use crate::error::PipelineError;
use crate::output::Stage;
use crate::pipeline::layout::LayoutEngine;
use crate::pipeline::recognize::RecognitionBackend;
use crate::progress::ProgressCallback;
use crate::retry::{Backoff, RetryPolicy};
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Minimum width and height accepted by the recognition backend.
pub const DEFAULT_MIN_DIMENSION: u32 = 56;

/// Configuration for one pipeline run.
///
/// # Example
/// ```rust
/// use edgequake_scan2md::{MergeOrder, PipelineConfig};
///
/// let config = PipelineConfig::builder("book")
///     .merge_order(MergeOrder::Natural)
///     .max_attempts(5)
///     .layout_url("http://localhost:8866/layout")
///     .build()
///     .unwrap();
/// assert_eq!(config.folder_name, "book");
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Folder under `input_root` holding the page images.
    pub folder_name: String,

    /// Root of source folders. Default: `input`.
    pub input_root: PathBuf,

    /// Root of run outputs; the run writes to `output_root/<folder_name>`. Default: `output`.
    pub output_root: PathBuf,

    /// First stage to run. Earlier stages are assumed done. Default: [`Stage::Deskew`].
    pub start_stage: Stage,

    /// Unit ordering used by reassembly. Default: [`MergeOrder::TypePriority`].
    pub merge_order: MergeOrder,

    /// Minimum width and height of a unit image. Default: 56.
    pub min_dimension: u32,

    /// Skew estimation parameters.
    pub deskew: DeskewOptions,

    /// LLM model identifier. If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed recognition backend. Takes precedence over every provider setting.
    pub backend: Option<Arc<dyn RecognitionBackend>>,

    /// Pre-constructed layout engine. Takes precedence over `layout_url`.
    pub layout_engine: Option<Arc<dyn LayoutEngine>>,

    /// Endpoint of an HTTP layout detection service.
    pub layout_url: Option<String>,

    /// Per-page timeout for the layout service, in seconds. Default: 120.
    pub layout_timeout_secs: u64,

    /// Sampling temperature for recognition. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens generated per unit. Default: 2048.
    pub max_tokens: usize,

    /// Recognition attempts per unit, including the first. Default: 3.
    pub max_attempts: u32,

    /// Wait between recognition attempts in milliseconds. Default: 2000.
    pub retry_delay_ms: u64,

    /// Fixed (default) or exponential growth of `retry_delay_ms`.
    pub backoff: Backoff,

    /// Per-attempt recognition timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Replaces the built-in base instruction. Category hints are still appended.
    pub system_prompt: Option<String>,

    /// Receives stage and unit events.
    pub progress_callback: Option<ProgressCallback>,
}

impl PipelineConfig {
    /// Create a new builder for the given input folder.
    pub fn builder(folder_name: impl Into<String>) -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::new(folder_name),
        }
    }

    /// Config with every default set.
    pub fn new(folder_name: impl Into<String>) -> Self {
        Self {
            folder_name: folder_name.into(),
            input_root: PathBuf::from("input"),
            output_root: PathBuf::from("output"),
            start_stage: Stage::Deskew,
            merge_order: MergeOrder::default(),
            min_dimension: DEFAULT_MIN_DIMENSION,
            deskew: DeskewOptions::default(),
            model: None,
            provider_name: None,
            provider: None,
            backend: None,
            layout_engine: None,
            layout_url: None,
            layout_timeout_secs: 120,
            temperature: 0.1,
            max_tokens: 2048,
            max_attempts: 3,
            retry_delay_ms: 2000,
            backoff: Backoff::Fixed,
            api_timeout_secs: 120,
            system_prompt: None,
            progress_callback: None,
        }
    }

    /// Retry policy applied at the recognition boundary.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.retry_delay_ms),
            self.backoff,
        )
    }

    /// Whether `stage` is part of this run.
    pub fn runs(&self, stage: Stage) -> bool {
        stage >= self.start_stage
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("folder_name", &self.folder_name)
            .field("input_root", &self.input_root)
            .field("output_root", &self.output_root)
            .field("start_stage", &self.start_stage)
            .field("merge_order", &self.merge_order)
            .field("min_dimension", &self.min_dimension)
            .field("deskew", &self.deskew)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .field(
                "layout_engine",
                &self.layout_engine.as_ref().map(|e| e.name().to_string()),
            )
            .field("layout_url", &self.layout_url)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_attempts", &self.max_attempts)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("backoff", &self.backoff)
            .finish()
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn input_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.input_root = root.into();
        self
    }

    pub fn output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.output_root = root.into();
        self
    }

    pub fn start_stage(mut self, stage: Stage) -> Self {
        self.config.start_stage = stage;
        self
    }

    pub fn merge_order(mut self, order: MergeOrder) -> Self {
        self.config.merge_order = order;
        self
    }

    pub fn min_dimension(mut self, px: u32) -> Self {
        self.config.min_dimension = px;
        self
    }

    pub fn deskew(mut self, opts: DeskewOptions) -> Self {
        self.config.deskew = opts;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn RecognitionBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn layout_engine(mut self, engine: Arc<dyn LayoutEngine>) -> Self {
        self.config.layout_engine = Some(engine);
        self
    }

    pub fn layout_url(mut self, url: impl Into<String>) -> Self {
        self.config.layout_url = Some(url.into());
        self
    }

    pub fn layout_timeout_secs(mut self, secs: u64) -> Self {
        self.config.layout_timeout_secs = secs;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_delay_ms = ms;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.config.backoff = backoff;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        let name = c.folder_name.trim();
        if name.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Folder name must not be empty".into(),
            ));
        }
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(PipelineError::InvalidConfig(format!(
                "Folder name must be a single path component, got '{}'",
                c.folder_name
            )));
        }
        if c.min_dimension == 0 {
            return Err(PipelineError::InvalidConfig(
                "Minimum dimension must be ≥ 1".into(),
            ));
        }
        if c.max_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "Max attempts must be ≥ 1".into(),
            ));
        }
        if !(0.0..90.0).contains(&c.deskew.max_angle_deg) {
            return Err(PipelineError::InvalidConfig(format!(
                "Max skew angle must be in [0, 90), got {}",
                c.deskew.max_angle_deg
            )));
        }
        Ok(self.config)
    }
}

// ── Enums & option groups ────────────────────────────────────────────────

/// How reassembly orders units.
///
/// | Order | Sort key |
/// |-------|----------|
/// | `TypePriority` | `(source_index, priority(category), region_index)` |
/// | `Natural` | `(source_index, region_index)` |
///
/// Type priority lifts titles above body text above figures and tables
/// within a page, which can move a table printed beside a heading ahead of
/// the text under it. `Natural` keeps strict top-to-bottom order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MergeOrder {
    /// Page, then title → text → figure/table, then region. (default)
    #[default]
    TypePriority,
    /// Page, then region: pure visual reading order.
    Natural,
}

/// Parameters of the line-based skew estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeskewOptions {
    /// Canny hysteresis low threshold. Default: 50.
    pub canny_low: f32,
    /// Canny hysteresis high threshold. Default: 150.
    pub canny_high: f32,
    /// Minimum Hough accumulator votes for a line. Default: 200.
    pub vote_threshold: u32,
    /// Non-maximum suppression radius in Hough space. Default: 8.
    pub suppression_radius: u32,
    /// Lines deviating from horizontal by this much or more are ignored. Default: 45.
    pub max_angle_deg: f32,
}

impl Default for DeskewOptions {
    fn default() -> Self {
        Self {
            canny_low: 50.0,
            canny_high: 150.0,
            vote_threshold: 200,
            suppression_radius: 8,
            max_angle_deg: 45.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = PipelineConfig::new("scan");
        assert_eq!(c.min_dimension, 56);
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.merge_order, MergeOrder::TypePriority);
        assert_eq!(c.start_stage, Stage::Deskew);
        assert_eq!(c.input_root, PathBuf::from("input"));
        assert_eq!(c.output_root, PathBuf::from("output"));
    }

    #[test]
    fn builder_rejects_nested_folder() {
        let err = PipelineConfig::builder("a/b").build().unwrap_err();
        assert!(err.to_string().contains("single path component"));
    }

    #[test]
    fn builder_rejects_empty_folder() {
        assert!(PipelineConfig::builder("  ").build().is_err());
    }

    #[test]
    fn builder_rejects_zero_attempts() {
        assert!(PipelineConfig::builder("x").max_attempts(0).build().is_err());
    }

    #[test]
    fn retry_policy_follows_config() {
        let c = PipelineConfig::builder("x")
            .max_attempts(5)
            .retry_delay_ms(10)
            .backoff(Backoff::Exponential)
            .build()
            .unwrap();
        let p = c.retry_policy();
        assert_eq!(p.max_attempts, 5);
        assert_eq!(p.delay_before(3), Duration::from_millis(20));
    }

    #[test]
    fn runs_only_from_start_stage() {
        let c = PipelineConfig::builder("x")
            .start_stage(Stage::Recognize)
            .build()
            .unwrap();
        assert!(!c.runs(Stage::Segment));
        assert!(c.runs(Stage::Recognize));
        assert!(c.runs(Stage::Merge));
    }
}
