//! Resource definitions: one paginated API collection turned into a lazy
//! sequence of loadable units.

mod http;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::types::{CollectionSpec, Granularity, PaginatorSettings, DEFAULT_MAXIMUM_PAGE};
use crate::error::PipelineError;

pub use http::HttpPageSource;

/// Failure fetching a single page, before it is attributed to a resource.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    Decode(String),
}

impl FetchError {
    fn into_pipeline_error(self, resource: &str, page: u32) -> PipelineError {
        let resource = resource.to_string();
        match self {
            Self::Transport(message) => PipelineError::Transport {
                resource,
                page,
                message,
            },
            Self::Decode(message) => PipelineError::Decode {
                resource,
                page,
                message,
            },
        }
    }
}

/// Anything that can return one page of a collection.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch page `page` of `endpoint`, passing the page number as `page_param`.
    /// An empty vector means the collection is exhausted.
    async fn fetch_page(
        &self,
        endpoint: &str,
        page_param: &str,
        page: u32,
    ) -> Result<Vec<Value>, FetchError>;
}

/// Page-number pagination with a hard bound on page fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageNumberPaginator {
    base_page: u32,
    page_param: String,
    maximum_page: u32,
}

impl PageNumberPaginator {
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] when `maximum_page` is zero or
    /// `page_param` is empty.
    pub fn new(
        base_page: u32,
        page_param: impl Into<String>,
        maximum_page: u32,
    ) -> Result<Self, PipelineError> {
        let page_param = page_param.into();
        if maximum_page == 0 {
            return Err(PipelineError::config("maximum_page must be at least 1"));
        }
        if page_param.trim().is_empty() {
            return Err(PipelineError::config("page_param must not be empty"));
        }
        Ok(Self {
            base_page,
            page_param,
            maximum_page,
        })
    }

    /// # Errors
    ///
    /// See [`PageNumberPaginator::new`].
    pub fn from_settings(settings: &PaginatorSettings) -> Result<Self, PipelineError> {
        Self::new(
            settings.base_page,
            settings.page_param.clone(),
            settings.maximum_page,
        )
    }

    #[must_use]
    pub fn maximum_page(&self) -> u32 {
        self.maximum_page
    }
}

impl Default for PageNumberPaginator {
    fn default() -> Self {
        Self {
            base_page: 1,
            page_param: "page".to_string(),
            maximum_page: DEFAULT_MAXIMUM_PAGE,
        }
    }
}

/// Load policy for a resource's destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDisposition {
    /// Overwrite the whole table on every run.
    Replace,
}

impl WriteDisposition {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Replace => "replace",
        }
    }
}

/// A unit handed from extraction to the next stage.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadUnit {
    Item(Value),
    Page(Vec<Value>),
}

impl LoadUnit {
    /// Number of records carried by this unit.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Item(_) => 1,
            Self::Page(records) => records.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn into_records(self) -> Vec<Value> {
        match self {
            Self::Item(record) => vec![record],
            Self::Page(records) => records,
        }
    }
}

/// One named, lazily paginated collection.
#[derive(Clone)]
pub struct ResourceDefinition {
    name: String,
    endpoint: String,
    granularity: Granularity,
    write_disposition: WriteDisposition,
    paginator: PageNumberPaginator,
    source: Arc<dyn PageSource>,
}

impl fmt::Debug for ResourceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDefinition")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("granularity", &self.granularity)
            .field("write_disposition", &self.write_disposition)
            .field("paginator", &self.paginator)
            .finish_non_exhaustive()
    }
}

impl ResourceDefinition {
    pub fn new(
        collection: &CollectionSpec,
        granularity: Granularity,
        paginator: PageNumberPaginator,
        source: Arc<dyn PageSource>,
    ) -> Self {
        Self {
            name: collection.name.clone(),
            endpoint: collection.endpoint.clone(),
            granularity,
            write_disposition: WriteDisposition::Replace,
            paginator,
            source,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[must_use]
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    #[must_use]
    pub fn write_disposition(&self) -> WriteDisposition {
        self.write_disposition
    }

    #[must_use]
    pub fn paginator(&self) -> &PageNumberPaginator {
        &self.paginator
    }

    /// Start a fresh pass over the collection. No page is fetched until the
    /// first call to [`ResourceReader::next_unit`].
    #[must_use]
    pub fn reader(&self) -> ResourceReader {
        ResourceReader {
            name: self.name.clone(),
            endpoint: self.endpoint.clone(),
            granularity: self.granularity,
            next_page: self.paginator.base_page,
            paginator: self.paginator.clone(),
            source: Arc::clone(&self.source),
            pages_fetched: 0,
            exhausted: false,
            pending: VecDeque::new(),
        }
    }
}

/// Consume-once cursor over a resource's units.
///
/// Stops at the first empty page or after `maximum_page` fetches. A fetch
/// error ends the sequence; the error is returned as-is.
pub struct ResourceReader {
    name: String,
    endpoint: String,
    granularity: Granularity,
    paginator: PageNumberPaginator,
    source: Arc<dyn PageSource>,
    next_page: u32,
    pages_fetched: u32,
    exhausted: bool,
    pending: VecDeque<Value>,
}

impl ResourceReader {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of page requests issued so far, the terminating empty page included.
    #[must_use]
    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    /// Next unit, or `None` once the collection is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Transport`] or [`PipelineError::Decode`] when
    /// a page cannot be fetched.
    pub async fn next_unit(&mut self) -> Result<Option<LoadUnit>, PipelineError> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Ok(Some(LoadUnit::Item(record)));
            }
            let Some(records) = self.fetch_next_page().await? else {
                return Ok(None);
            };
            match self.granularity {
                Granularity::Page => return Ok(Some(LoadUnit::Page(records))),
                Granularity::Item => self.pending = records.into(),
            }
        }
    }

    async fn fetch_next_page(&mut self) -> Result<Option<Vec<Value>>, PipelineError> {
        if self.exhausted || self.pages_fetched >= self.paginator.maximum_page {
            self.exhausted = true;
            return Ok(None);
        }

        let page = self.next_page;
        self.pages_fetched += 1;
        self.next_page = self.next_page.saturating_add(1);

        let fetched = self
            .source
            .fetch_page(&self.endpoint, &self.paginator.page_param, page)
            .await;
        let records = match fetched {
            Ok(records) => records,
            Err(e) => {
                self.exhausted = true;
                return Err(e.into_pipeline_error(&self.name, page));
            }
        };

        tracing::debug!(
            resource = self.name,
            page,
            records = records.len(),
            "fetched page"
        );
        if records.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }
        Ok(Some(records))
    }
}
