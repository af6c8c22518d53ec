use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use loadbench_engine::config::parser::parse_harness_str;
use loadbench_engine::pipeline::plan_from_profile;
use loadbench_engine::resource::FetchError;
use loadbench_engine::{
    run_comparison, run_timed, LocalRuntime, PageSource, PipelineError, PipelinePlan, Stage,
};
use loadbench_store::{DestinationStore, SqliteDestination};
use serde_json::{json, Value};

/// Five pages of `page_size` records per endpoint, then an empty page.
/// Fails every request for `fail_page` when set.
struct FakeShopApi {
    page_size: u32,
    fail_page: Option<u32>,
    requests: AtomicU32,
}

impl FakeShopApi {
    fn new(page_size: u32) -> Self {
        Self {
            page_size,
            fail_page: None,
            requests: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl PageSource for FakeShopApi {
    async fn fetch_page(
        &self,
        endpoint: &str,
        _page_param: &str,
        page: u32,
    ) -> Result<Vec<Value>, FetchError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.fail_page == Some(page) {
            return Err(FetchError::Transport(format!(
                "GET {endpoint}?page={page}: connection reset"
            )));
        }
        if page > 5 {
            return Ok(Vec::new());
        }
        Ok((0..self.page_size)
            .map(|i| {
                json!({
                    "id": format!("{endpoint}-{page}-{i}"),
                    "amount": i * 100,
                    "details": {"page": page, "tags": ["a", "b"]},
                })
            })
            .collect())
    }
}

fn harness(destination: &Path, max_pages: u32) -> String {
    format!(
        r#"
version: "1.0"
pipeline: jaffle_shop
source:
  base_url: https://example.com/api/v1
  paginator:
    maximum_page: {max_pages}
  collections:
    - name: customers
      endpoint: customers
    - name: orders
      endpoint: orders
destination:
  path: {}
profiles:
  naive:
    granularity: item
    dataset:
      policy: unique
      prefix: jaffle_naive
  optimized:
    granularity: page
    dataset:
      policy: unique
      prefix: jaffle_optimized
    workers:
      extract: 2
      normalize: 2
      load: 2
    buffer_max_items: 10000
    file_rotation_size_mb: 100
  production:
    granularity: page
    dataset:
      policy: fixed
      name: jaffle_shop_data
"#,
        destination.display()
    )
}

fn plans(
    destination: &Path,
    max_pages: u32,
    api: Arc<FakeShopApi>,
) -> (PipelinePlan, PipelinePlan, PipelinePlan) {
    let config = parse_harness_str(&harness(destination, max_pages)).unwrap();
    let page_source: Arc<dyn PageSource> = api;
    let naive = plan_from_profile(&config, "naive", &config.profiles.naive, &page_source).unwrap();
    let optimized =
        plan_from_profile(&config, "optimized", &config.profiles.optimized, &page_source).unwrap();
    let production =
        plan_from_profile(&config, "production", &config.profiles.production, &page_source)
            .unwrap();
    (naive, optimized, production)
}

#[tokio::test]
async fn comparison_loads_both_datasets() {
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("bench.sqlite");
    let (naive, optimized, _) = plans(&destination, 5, Arc::new(FakeShopApi::new(4)));
    let runtime = LocalRuntime::new().with_work_dir(dir.path().join("work"));

    let comparison = run_comparison(&runtime, &naive, &optimized).await.unwrap();

    assert_eq!(comparison.naive.rows_loaded(), 40);
    assert_eq!(comparison.optimized.rows_loaded(), 40);
    assert_eq!(comparison.naive.load_info.units_extracted, 40);
    assert_eq!(comparison.optimized.load_info.units_extracted, 10);
    assert_ne!(
        comparison.naive.load_info.dataset_name,
        comparison.optimized.load_info.dataset_name
    );
    assert!(comparison.render().contains("PERFORMANCE RESULTS"));

    let store = SqliteDestination::open(&destination).unwrap();
    for run in [&comparison.naive, &comparison.optimized] {
        let dataset = &run.load_info.dataset_name;
        assert_eq!(store.table_row_count(dataset, "customers").unwrap(), Some(20));
        assert_eq!(store.table_row_count(dataset, "orders").unwrap(), Some(20));
    }
}

#[tokio::test]
async fn max_pages_bounds_each_collection() {
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("bench.sqlite");
    let api = Arc::new(FakeShopApi::new(3));
    let (_, optimized, _) = plans(&destination, 2, Arc::clone(&api));

    let result = run_timed(&LocalRuntime::new(), &optimized).await.unwrap();

    assert_eq!(result.rows_loaded(), 12);
    assert_eq!(api.requests.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn transport_failure_on_page_two_commits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("bench.sqlite");
    let mut api = FakeShopApi::new(4);
    api.fail_page = Some(2);
    let (_, _, production) = plans(&destination, 5, Arc::new(api));
    let store = SqliteDestination::open(&destination).unwrap();

    let err = run_timed(&LocalRuntime::new(), &production)
        .await
        .unwrap_err();

    match &err {
        PipelineError::Transport { page, .. } => assert_eq!(*page, 2),
        other => panic!("expected transport error, got {other}"),
    }
    assert_eq!(err.failed_stage(), Some(Stage::Extract));

    for table in ["customers", "orders"] {
        assert_eq!(store.table_row_count("jaffle_shop_data", table).unwrap(), None);
    }
    let tables = store.list_tables().unwrap();
    assert!(
        tables.iter().all(|t| !t.starts_with("jaffle_shop_data")),
        "{tables:?}"
    );
    assert!(store.load_history("jaffle_shop_data").unwrap().is_empty());
}

#[tokio::test]
async fn failed_rerun_keeps_previous_production_load() {
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("bench.sqlite");
    let (_, _, production) = plans(&destination, 5, Arc::new(FakeShopApi::new(4)));
    run_timed(&LocalRuntime::new(), &production).await.unwrap();

    let mut failing = FakeShopApi::new(4);
    failing.fail_page = Some(2);
    let (_, _, production) = plans(&destination, 5, Arc::new(failing));
    run_timed(&LocalRuntime::new(), &production)
        .await
        .unwrap_err();

    let store = SqliteDestination::open(&destination).unwrap();
    assert_eq!(
        store.table_row_count("jaffle_shop_data", "orders").unwrap(),
        Some(20)
    );
    assert_eq!(store.load_history("jaffle_shop_data").unwrap().len(), 1);
}

#[tokio::test]
async fn production_rerun_replaces_instead_of_appending() {
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("bench.sqlite");
    let runtime = LocalRuntime::new();

    for _ in 0..2 {
        let (_, _, production) = plans(&destination, 5, Arc::new(FakeShopApi::new(4)));
        let result = run_timed(&runtime, &production).await.unwrap();
        assert_eq!(result.load_info.dataset_name, "jaffle_shop_data");
    }

    let store = SqliteDestination::open(&destination).unwrap();
    assert_eq!(
        store.table_row_count("jaffle_shop_data", "orders").unwrap(),
        Some(20)
    );
    assert_eq!(store.load_history("jaffle_shop_data").unwrap().len(), 2);
}

#[tokio::test]
async fn nested_fields_are_flattened_into_columns() {
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("bench.sqlite");
    let (_, _, production) = plans(&destination, 1, Arc::new(FakeShopApi::new(2)));
    run_timed(&LocalRuntime::new(), &production).await.unwrap();

    let conn = rusqlite::Connection::open(&destination).unwrap();
    let (page, tags): (i64, String) = conn
        .query_row(
            "SELECT details__page, details__tags FROM jaffle_shop_data__orders LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(page, 1);
    assert_eq!(tags, r#"["a","b"]"#);
}
