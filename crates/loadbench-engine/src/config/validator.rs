//! Semantic validation for parsed harness configuration values.

use std::collections::HashSet;

use anyhow::{bail, Result};

use crate::config::types::{DatasetPolicy, HarnessConfig, RunProfile, StageWorkers};

/// Check that every present tuning value is at least 1.
pub(crate) fn check_tuning(
    workers: &StageWorkers,
    buffer_max_items: Option<u32>,
    file_rotation_size_mb: Option<u32>,
    context: &str,
    errors: &mut Vec<String>,
) {
    let stages = [
        ("extract", workers.extract),
        ("normalize", workers.normalize),
        ("load", workers.load),
    ];
    for (stage, count) in stages {
        if count == Some(0) {
            errors.push(format!("{context}: {stage} workers must be at least 1"));
        }
    }
    if buffer_max_items == Some(0) {
        errors.push(format!("{context}: buffer_max_items must be at least 1"));
    }
    if file_rotation_size_mb == Some(0) {
        errors.push(format!("{context}: file_rotation_size_mb must be at least 1"));
    }
}

/// Check that a dataset name or prefix is usable as a table namespace.
pub(crate) fn check_dataset_name(name: &str, context: &str, errors: &mut Vec<String>) {
    if name.trim().is_empty() {
        errors.push(format!("{context}: dataset name must not be empty"));
    } else if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        errors.push(format!(
            "{context}: dataset name '{name}' may only contain ASCII letters, digits and '_'"
        ));
    }
}

fn validate_profile(profile: &RunProfile, context: &str, errors: &mut Vec<String>) {
    check_tuning(
        &profile.workers,
        profile.buffer_max_items,
        profile.file_rotation_size_mb,
        context,
        errors,
    );
    match &profile.dataset {
        DatasetPolicy::Unique { prefix } => check_dataset_name(prefix, context, errors),
        DatasetPolicy::Fixed { name } => check_dataset_name(name, context, errors),
    }
}

/// Validate a parsed harness configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the harness config.
pub fn validate_harness(config: &HarnessConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported harness version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.pipeline.trim().is_empty() {
        errors.push("Pipeline name must not be empty".to_string());
    }

    let base_url = config.source.base_url.trim();
    if base_url.is_empty() {
        errors.push("Source base_url must not be empty".to_string());
    } else if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        errors.push(format!(
            "Source base_url '{base_url}' must start with http:// or https://"
        ));
    }

    let paginator = &config.source.paginator;
    if paginator.maximum_page == 0 {
        errors.push("paginator maximum_page must be at least 1".to_string());
    }
    if paginator.page_param.trim().is_empty() {
        errors.push("paginator page_param must not be empty".to_string());
    }

    if config.source.collections.is_empty() {
        errors.push("Source must define at least one collection".to_string());
    }

    let mut seen = HashSet::new();
    for (i, collection) in config.source.collections.iter().enumerate() {
        if collection.name.trim().is_empty() {
            errors.push(format!("Collection {i} has an empty name"));
        } else if !seen.insert(collection.name.as_str()) {
            errors.push(format!("Duplicate collection name '{}'", collection.name));
        }
        if collection.endpoint.trim().is_empty() {
            errors.push(format!(
                "Collection '{}' has an empty endpoint",
                collection.name
            ));
        }
    }

    validate_profile(&config.profiles.naive, "profiles.naive", &mut errors);
    validate_profile(&config.profiles.optimized, "profiles.optimized", &mut errors);
    validate_profile(&config.profiles.production, "profiles.production", &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Harness validation failed:\n  - {}", errors.join("\n  - "));
    }
}
