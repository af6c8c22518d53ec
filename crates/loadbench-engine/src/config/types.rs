use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default maximum number of page fetches per collection.
pub const DEFAULT_MAXIMUM_PAGE: u32 = 5;

/// Top-level harness file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub version: String,
    pub pipeline: String,
    pub source: SourceSettings,
    #[serde(default)]
    pub destination: DestinationSettings,
    #[serde(default)]
    pub profiles: Profiles,
}

impl HarnessConfig {
    /// Name of the source grouping; falls back to the pipeline name.
    #[must_use]
    pub fn source_name(&self) -> &str {
        self.source.name.as_deref().unwrap_or(&self.pipeline)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    #[serde(default)]
    pub name: Option<String>,
    pub base_url: String,
    #[serde(default)]
    pub paginator: PaginatorSettings,
    pub collections: Vec<CollectionSpec>,
}

/// Page-number pagination parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginatorSettings {
    #[serde(default = "default_base_page")]
    pub base_page: u32,
    #[serde(default = "default_page_param")]
    pub page_param: String,
    /// Upper bound on page fetches. The API reports no page total, so this
    /// and the first empty page are the only stop signals.
    #[serde(default = "default_maximum_page")]
    pub maximum_page: u32,
}

fn default_base_page() -> u32 {
    1
}
fn default_page_param() -> String {
    "page".to_string()
}
fn default_maximum_page() -> u32 {
    DEFAULT_MAXIMUM_PAGE
}

impl Default for PaginatorSettings {
    fn default() -> Self {
        Self {
            base_page: default_base_page(),
            page_param: default_page_param(),
            maximum_page: default_maximum_page(),
        }
    }
}

/// One API collection to ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    pub endpoint: String,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationSettings {
    #[serde(default = "default_destination_path")]
    pub path: PathBuf,
}

fn default_destination_path() -> PathBuf {
    PathBuf::from("loadbench.sqlite")
}

impl Default for DestinationSettings {
    fn default() -> Self {
        Self {
            path: default_destination_path(),
        }
    }
}

/// Unit of work handed from extraction to the next stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// One record per unit, page boundaries flattened.
    Item,
    /// One page of records per unit.
    Page,
}

impl Granularity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Item => "item",
            Self::Page => "page",
        }
    }
}

/// Per-stage worker counts. `None` leaves the runtime default in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageWorkers {
    #[serde(default)]
    pub extract: Option<u32>,
    #[serde(default)]
    pub normalize: Option<u32>,
    #[serde(default)]
    pub load: Option<u32>,
}

impl StageWorkers {
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.extract.is_none() && self.normalize.is_none() && self.load.is_none()
    }
}

/// How a run names its dataset namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum DatasetPolicy {
    /// `<prefix>_<random suffix>`, fresh on every construction.
    Unique { prefix: String },
    /// The same name every time; reruns replace the previous tables.
    Fixed { name: String },
}

/// Tunables for one kind of run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProfile {
    pub granularity: Granularity,
    pub dataset: DatasetPolicy,
    #[serde(default)]
    pub workers: StageWorkers,
    #[serde(default)]
    pub buffer_max_items: Option<u32>,
    #[serde(default)]
    pub file_rotation_size_mb: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profiles {
    #[serde(default = "default_naive")]
    pub naive: RunProfile,
    #[serde(default = "default_optimized")]
    pub optimized: RunProfile,
    #[serde(default = "default_production")]
    pub production: RunProfile,
}

fn default_naive() -> RunProfile {
    RunProfile {
        granularity: Granularity::Item,
        dataset: DatasetPolicy::Unique {
            prefix: "naive".to_string(),
        },
        workers: StageWorkers::default(),
        buffer_max_items: None,
        file_rotation_size_mb: None,
    }
}

fn default_optimized() -> RunProfile {
    RunProfile {
        granularity: Granularity::Page,
        dataset: DatasetPolicy::Unique {
            prefix: "optimized".to_string(),
        },
        workers: StageWorkers {
            extract: Some(2),
            normalize: Some(2),
            load: Some(2),
        },
        buffer_max_items: Some(10_000),
        file_rotation_size_mb: Some(100),
    }
}

fn default_production() -> RunProfile {
    RunProfile {
        granularity: Granularity::Page,
        dataset: DatasetPolicy::Fixed {
            name: "loadbench_data".to_string(),
        },
        workers: StageWorkers::default(),
        buffer_max_items: Some(10_000),
        file_rotation_size_mb: Some(100),
    }
}

impl Default for Profiles {
    fn default() -> Self {
        Self {
            naive: default_naive(),
            optimized: default_optimized(),
            production: default_production(),
        }
    }
}
