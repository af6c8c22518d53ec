//! Pipeline error model.

use std::fmt;

/// Runtime stage a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Normalize,
    Load,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Normalize => "normalize",
            Self::Load => "load",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categorized pipeline error.
///
/// `Config` is raised before any run starts. `Transport` and `Decode` come
/// out of page fetching and surface through the runtime unchanged. `Stage`
/// wraps failures inside the runtime's normalize/load stages, and
/// `Infrastructure` covers host-side problems (temp dirs, task joins).
/// None of them are retried.
#[derive(Debug)]
pub enum PipelineError {
    /// Invalid harness or plan configuration.
    Config(String),
    /// A page could not be fetched.
    Transport {
        resource: String,
        page: u32,
        message: String,
    },
    /// A page was fetched but is not a JSON array of records.
    Decode {
        resource: String,
        page: u32,
        message: String,
    },
    /// Failure inside a runtime stage.
    Stage { stage: Stage, source: anyhow::Error },
    /// Infrastructure error (temp files, task panics, etc.)
    Infrastructure(anyhow::Error),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport {
                resource,
                page,
                message,
            } => write!(
                f,
                "transport error fetching '{resource}' page {page}: {message}"
            ),
            Self::Decode {
                resource,
                page,
                message,
            } => write!(f, "decoding error in '{resource}' page {page}: {message}"),
            Self::Stage { stage, source } => write!(f, "{stage} stage failed: {source:#}"),
            Self::Infrastructure(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn stage(stage: Stage, source: impl Into<anyhow::Error>) -> Self {
        Self::Stage {
            stage,
            source: source.into(),
        }
    }

    /// Returns `true` for errors detected before any run started.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// The runtime stage this error aborted, if any. Fetch failures belong
    /// to extraction.
    #[must_use]
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            Self::Transport { .. } | Self::Decode { .. } => Some(Stage::Extract),
            Self::Stage { stage, .. } => Some(*stage),
            Self::Config(_) | Self::Infrastructure(_) => None,
        }
    }
}
