//! Pipeline configuration: validated, purely descriptive execution plans.
//!
//! A [`PipelinePlan`] bundles a [`Source`] (an ordered group of resource
//! definitions), a dataset namespace, a destination path and the run's
//! tunables. Building one never touches the network or the destination.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use loadbench_store::schema::normalize_identifier;
use uuid::Uuid;

use crate::config::types::{
    DatasetPolicy, Granularity, HarnessConfig, RunProfile, StageWorkers,
};
use crate::config::validator::{check_dataset_name, check_tuning};
use crate::error::PipelineError;
use crate::resource::{PageNumberPaginator, PageSource, ResourceDefinition};

/// Hex characters of the random suffix in unique dataset names.
const UNIQUE_SUFFIX_LEN: usize = 12;

impl DatasetPolicy {
    /// Resolve the dataset name for one run.
    #[must_use]
    pub fn dataset_name(&self) -> String {
        match self {
            Self::Unique { prefix } => {
                let id = Uuid::new_v4().simple().to_string();
                format!("{prefix}_{}", &id[..UNIQUE_SUFFIX_LEN])
            }
            Self::Fixed { name } => name.clone(),
        }
    }
}

/// Everything that determines one execution's behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub granularity: Granularity,
    pub workers: StageWorkers,
    pub buffer_max_items: Option<u32>,
    pub file_rotation_size_mb: Option<u32>,
    pub dataset_name: String,
}

impl RunConfig {
    /// Build a run config from a profile, resolving its dataset policy.
    #[must_use]
    pub fn from_profile(profile: &RunProfile) -> Self {
        Self {
            granularity: profile.granularity,
            workers: profile.workers,
            buffer_max_items: profile.buffer_max_items,
            file_rotation_size_mb: profile.file_rotation_size_mb,
            dataset_name: profile.dataset.dataset_name(),
        }
    }
}

/// A named, ordered group of resources run together.
#[derive(Debug, Clone)]
pub struct Source {
    name: String,
    resources: Vec<ResourceDefinition>,
}

impl Source {
    pub fn new(name: impl Into<String>, resources: Vec<ResourceDefinition>) -> Self {
        Self {
            name: name.into(),
            resources,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn resources(&self) -> &[ResourceDefinition] {
        &self.resources
    }
}

/// Validated execution plan handed to a [`PipelineRuntime`](crate::runtime::PipelineRuntime).
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    label: String,
    pipeline_name: String,
    destination: PathBuf,
    source: Source,
    run: RunConfig,
}

impl PipelinePlan {
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] listing every problem found: an
    /// empty source, duplicate resource names, zero tuning values or an
    /// unusable dataset name.
    pub fn new(
        pipeline_name: impl Into<String>,
        destination: impl Into<PathBuf>,
        source: Source,
        run: RunConfig,
    ) -> Result<Self, PipelineError> {
        let pipeline_name = pipeline_name.into();
        let mut errors = Vec::new();

        if pipeline_name.trim().is_empty() {
            errors.push("pipeline name must not be empty".to_string());
        }
        if source.resources.is_empty() {
            errors.push(format!("source '{}' has no resources", source.name));
        }
        // Names that normalize to the same table would overwrite each other.
        let mut seen = HashSet::new();
        for resource in &source.resources {
            if !seen.insert(normalize_identifier(resource.name())) {
                errors.push(format!("duplicate resource name '{}'", resource.name()));
            }
        }
        check_tuning(
            &run.workers,
            run.buffer_max_items,
            run.file_rotation_size_mb,
            "run",
            &mut errors,
        );
        check_dataset_name(&run.dataset_name, "run", &mut errors);

        if !errors.is_empty() {
            return Err(PipelineError::config(errors.join("; ")));
        }

        Ok(Self {
            label: pipeline_name.clone(),
            pipeline_name,
            destination: destination.into(),
            source,
            run,
        })
    }

    /// Name used in progress messages (defaults to the pipeline name).
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    #[must_use]
    pub fn source(&self) -> &Source {
        &self.source
    }

    #[must_use]
    pub fn run_config(&self) -> &RunConfig {
        &self.run
    }

    #[must_use]
    pub fn dataset_name(&self) -> &str {
        &self.run.dataset_name
    }
}

/// Build the source for `config` with every collection at `granularity`.
///
/// # Errors
///
/// Returns [`PipelineError::Config`] if the paginator settings are invalid.
pub fn build_source(
    config: &HarnessConfig,
    granularity: Granularity,
    page_source: &Arc<dyn PageSource>,
) -> Result<Source, PipelineError> {
    let paginator = PageNumberPaginator::from_settings(&config.source.paginator)?;
    let resources = config
        .source
        .collections
        .iter()
        .map(|collection| {
            ResourceDefinition::new(
                collection,
                granularity,
                paginator.clone(),
                Arc::clone(page_source),
            )
        })
        .collect();
    Ok(Source::new(config.source_name(), resources))
}

/// Build the plan for one profile of the harness.
///
/// # Errors
///
/// Returns [`PipelineError::Config`] if the resulting plan is invalid.
pub fn plan_from_profile(
    config: &HarnessConfig,
    label: &str,
    profile: &RunProfile,
    page_source: &Arc<dyn PageSource>,
) -> Result<PipelinePlan, PipelineError> {
    let source = build_source(config, profile.granularity, page_source)?;
    let plan = PipelinePlan::new(
        config.pipeline.clone(),
        config.destination.path.clone(),
        source,
        RunConfig::from_profile(profile),
    )?;
    Ok(plan.with_label(label))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_harness_str;
    use crate::config::types::CollectionSpec;
    use crate::resource::tests::ScriptedSource;

    fn run_config(dataset: &str) -> RunConfig {
        RunConfig {
            granularity: Granularity::Page,
            workers: StageWorkers::default(),
            buffer_max_items: None,
            file_rotation_size_mb: None,
            dataset_name: dataset.to_string(),
        }
    }

    fn definition(name: &str, source: &Arc<ScriptedSource>) -> ResourceDefinition {
        ResourceDefinition::new(
            &CollectionSpec::new(name, name),
            Granularity::Page,
            PageNumberPaginator::default(),
            source.clone(),
        )
    }

    #[test]
    fn unique_policy_never_repeats() {
        let policy = DatasetPolicy::Unique {
            prefix: "jaffle_naive".into(),
        };
        let names: HashSet<String> = (0..1_000).map(|_| policy.dataset_name()).collect();
        assert_eq!(names.len(), 1_000);
        assert!(names.iter().all(|n| n.starts_with("jaffle_naive_")));
    }

    #[test]
    fn fixed_policy_is_stable() {
        let policy = DatasetPolicy::Fixed {
            name: "jaffle_shop_data".into(),
        };
        assert_eq!(policy.dataset_name(), "jaffle_shop_data");
        assert_eq!(policy.dataset_name(), policy.dataset_name());
    }

    #[tokio::test]
    async fn duplicate_resource_names_rejected_before_any_fetch() {
        let scripted = Arc::new(ScriptedSource::pages(vec![vec![serde_json::json!({"id": 1})]]));
        let source = Source::new(
            "shop",
            vec![definition("customers", &scripted), definition("customers", &scripted)],
        );

        let err = PipelinePlan::new("p", "dest.sqlite", source, run_config("ds")).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("duplicate resource name 'customers'"));
        assert_eq!(scripted.calls(), 0);
    }

    #[test]
    fn names_colliding_after_normalization_rejected() {
        let scripted = Arc::new(ScriptedSource::pages(Vec::new()));
        let source = Source::new(
            "shop",
            vec![definition("Orders", &scripted), definition("orders", &scripted)],
        );
        let err = PipelinePlan::new("p", "dest.sqlite", source, run_config("ds")).unwrap_err();
        assert!(err.to_string().contains("duplicate resource name 'orders'"));
    }

    #[test]
    fn empty_source_rejected() {
        let err = PipelinePlan::new("p", "dest.sqlite", Source::new("shop", vec![]), run_config("ds"))
            .unwrap_err();
        assert!(err.to_string().contains("has no resources"));
    }

    #[test]
    fn zero_workers_rejected() {
        let scripted = Arc::new(ScriptedSource::pages(Vec::new()));
        let mut run = run_config("ds");
        run.workers.normalize = Some(0);
        run.buffer_max_items = Some(0);
        let err = PipelinePlan::new(
            "p",
            "dest.sqlite",
            Source::new("shop", vec![definition("orders", &scripted)]),
            run,
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("normalize workers"));
        assert!(msg.contains("buffer_max_items"));
    }

    #[test]
    fn plan_from_profile_uses_profile_settings() {
        let yaml = r#"
version: "1.0"
pipeline: jaffle_shop
source:
  base_url: https://example.com/api/v1
  paginator:
    maximum_page: 3
  collections:
    - name: customers
      endpoint: customers
    - name: orders
      endpoint: orders
destination:
  path: /tmp/jaffle.sqlite
"#;
        let config = parse_harness_str(yaml).unwrap();
        let page_source: Arc<dyn PageSource> = Arc::new(ScriptedSource::pages(Vec::new()));

        let plan =
            plan_from_profile(&config, "optimized", &config.profiles.optimized, &page_source)
                .unwrap();
        assert_eq!(plan.label(), "optimized");
        assert_eq!(plan.pipeline_name(), "jaffle_shop");
        assert_eq!(plan.destination(), Path::new("/tmp/jaffle.sqlite"));
        assert_eq!(plan.source().name(), "jaffle_shop");
        assert_eq!(plan.source().resources().len(), 2);
        assert!(plan
            .source()
            .resources()
            .iter()
            .all(|r| r.granularity() == Granularity::Page && r.paginator().maximum_page() == 3));
        assert!(plan.dataset_name().starts_with("optimized_"));
        assert_eq!(plan.run_config().buffer_max_items, Some(10_000));
    }
}
