//! Harness YAML loading. `${NAME}` references are expanded from the
//! environment before the document is deserialized, so a base URL or a
//! destination path can differ between machines without editing the file.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::{Captures, Regex};

use crate::config::types::HarnessConfig;

static ENV_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Expand every `${NAME}` reference in `input` from the process environment.
///
/// # Errors
///
/// Names every unset variable at once, each listed a single time.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut unset = BTreeSet::new();
    let expanded = ENV_REFERENCE.replace_all(input, |caps: &Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| {
            unset.insert(caps[1].to_string());
            String::new()
        })
    });

    if !unset.is_empty() {
        let names: Vec<String> = unset.into_iter().collect();
        anyhow::bail!(
            "Harness references unset environment variable(s): {}",
            names.join(", ")
        );
    }
    Ok(expanded.into_owned())
}

/// Deserialize a harness document held in memory.
///
/// # Errors
///
/// Fails on unset variables or when the YAML does not match the harness
/// layout.
pub fn parse_harness_str(yaml: &str) -> Result<HarnessConfig> {
    let expanded = substitute_env_vars(yaml)?;
    serde_yaml::from_str(&expanded).context("Harness YAML does not match the expected layout")
}

/// Read and deserialize the harness file at `path`.
///
/// # Errors
///
/// See [`parse_harness_str`]; also fails when the file cannot be read.
pub fn parse_harness(path: &Path) -> Result<HarnessConfig> {
    let yaml = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read harness {}", path.display()))?;
    parse_harness_str(&yaml).with_context(|| format!("Invalid harness {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Granularity;

    const SHOP_HARNESS: &str = r#"
version: "1.0"
pipeline: shop
source:
  base_url: ${LB_PARSER_SHOP_URL}
  collections:
    - name: orders
      endpoint: orders
destination:
  path: ${LB_PARSER_SHOP_DIR}/bench.sqlite
profiles:
  naive:
    granularity: item
    dataset:
      policy: unique
      prefix: shop_naive
"#;

    #[test]
    fn base_url_and_destination_come_from_environment() {
        std::env::set_var("LB_PARSER_SHOP_URL", "https://shop.example.com/api/v1");
        std::env::set_var("LB_PARSER_SHOP_DIR", "/var/lib/loadbench");

        let config = parse_harness_str(SHOP_HARNESS).unwrap();
        assert_eq!(config.source.base_url, "https://shop.example.com/api/v1");
        assert_eq!(
            config.destination.path,
            std::path::PathBuf::from("/var/lib/loadbench/bench.sqlite")
        );
        assert_eq!(config.profiles.naive.granularity, Granularity::Item);

        std::env::remove_var("LB_PARSER_SHOP_URL");
        std::env::remove_var("LB_PARSER_SHOP_DIR");
    }

    #[test]
    fn harness_without_references_is_unchanged() {
        let yaml = "base_url: https://jaffle-shop.scalevector.ai/api/v1\nmaximum_page: 5";
        assert_eq!(substitute_env_vars(yaml).unwrap(), yaml);
    }

    #[test]
    fn unset_variables_are_reported_together_once() {
        let yaml = "base_url: ${LB_PARSER_UNSET_URL}\n\
                    path: ${LB_PARSER_UNSET_DIR}/a.sqlite\n\
                    fallback: ${LB_PARSER_UNSET_URL}";
        let message = substitute_env_vars(yaml).unwrap_err().to_string();
        assert_eq!(
            message,
            "Harness references unset environment variable(s): \
             LB_PARSER_UNSET_DIR, LB_PARSER_UNSET_URL"
        );
    }

    #[test]
    fn harness_missing_required_sections_is_rejected() {
        let err = parse_harness_str("version: \"1.0\"\npipeline: shop\n").unwrap_err();
        assert!(err.to_string().contains("expected layout"));
    }

    #[test]
    fn unreadable_harness_names_the_path() {
        let message = parse_harness(Path::new("/nonexistent/jaffle_shop.yaml"))
            .unwrap_err()
            .to_string();
        assert!(message.contains("/nonexistent/jaffle_shop.yaml"), "{message}");
    }
}
