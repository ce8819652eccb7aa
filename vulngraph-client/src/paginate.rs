use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::source::decode;
use crate::{ClientError, Filter, PageCursor, PageId, PageRequest, PageSource, Resource};

/// Page sizing and failure tolerance shared by every resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagingSettings {
    pub page_size: usize,
    pub id_batch_size: usize,
    /// Offset pagination stops after this many failed pages in a row.
    pub max_consecutive_failures: usize,
}

impl Default for PagingSettings {
    fn default() -> Self {
        Self {
            page_size: 1000,
            id_batch_size: 250,
            max_consecutive_failures: 3,
        }
    }
}

/// One fetched page, or the reason it could not be fetched.
#[derive(Debug)]
pub struct Page<T> {
    pub id: PageId,
    pub records: Result<Vec<T>, ClientError>,
}

enum Plan {
    Offset,
    Batches(Vec<Vec<u64>>),
}

/// Lazily walks the pages of one resource.
///
/// A page that fails to fetch or decode is yielded as an error and the walk
/// moves on to the next page. Offset walks give up after
/// `max_consecutive_failures` failed pages in a row, since the position of
/// the following page can no longer be trusted.
pub struct Paginator<'a, T> {
    source: &'a dyn PageSource,
    resource: Resource,
    filters: Vec<Filter>,
    plan: Plan,
    settings: PagingSettings,
    next: Option<PageCursor>,
    index: usize,
    consecutive_failures: usize,
    gave_up: bool,
    _record: PhantomData<fn() -> T>,
}

impl<'a, T: DeserializeOwned> Paginator<'a, T> {
    pub fn new(
        source: &'a dyn PageSource,
        resource: Resource,
        mut filters: Vec<Filter>,
        settings: PagingSettings,
    ) -> Result<Self, ClientError> {
        resource.validate(&filters)?;

        let mut ids = None;
        filters.retain(|f| match f {
            Filter::Ids(list) => {
                ids = Some(list.clone());
                false
            }
            _ => true,
        });
        let plan = match ids {
            Some(ids) => {
                let size = settings.id_batch_size.max(1);
                Plan::Batches(ids.chunks(size).map(<[u64]>::to_vec).collect())
            }
            None => Plan::Offset,
        };

        let mut paginator = Self {
            source,
            resource,
            filters,
            plan,
            settings,
            next: None,
            index: 0,
            consecutive_failures: 0,
            gave_up: false,
            _record: PhantomData,
        };
        paginator.restart();
        Ok(paginator)
    }

    /// Rewind to the first page.
    pub fn restart(&mut self) {
        self.index = 0;
        self.consecutive_failures = 0;
        self.gave_up = false;
        self.next = self.cursor_at_start();
    }

    /// True when the walk stopped because of repeated failures.
    pub fn gave_up(&self) -> bool {
        self.gave_up
    }

    pub fn resource(&self) -> Resource {
        self.resource
    }

    fn cursor_at_start(&self) -> Option<PageCursor> {
        match &self.plan {
            Plan::Offset => Some(PageCursor::Offset(0)),
            Plan::Batches(batches) => batches.first().map(|ids| PageCursor::Batch {
                index: 0,
                ids: ids.clone(),
            }),
        }
    }

    fn batch_after(&self, index: usize) -> Option<PageCursor> {
        match &self.plan {
            Plan::Batches(batches) => batches.get(index + 1).map(|ids| PageCursor::Batch {
                index: index + 1,
                ids: ids.clone(),
            }),
            Plan::Offset => None,
        }
    }

    fn request(&self, cursor: &PageCursor) -> PageRequest {
        let mut params: Vec<(String, String)> = self
            .filters
            .iter()
            .map(|f| (f.name().to_string(), f.query_value()))
            .collect();
        match cursor {
            PageCursor::Offset(offset) => {
                params.push(("offset".into(), offset.to_string()));
                params.push(("truncation_limit".into(), self.settings.page_size.to_string()));
            }
            PageCursor::Batch { ids, .. } => {
                params.push(("ids".into(), crate::resource::join_ids(ids)));
            }
        }
        PageRequest {
            resource: self.resource,
            params,
        }
    }

    /// Fetch the next page, or `None` once the resource is exhausted.
    pub async fn next_page(&mut self) -> Option<Page<T>> {
        let cursor = self.next.take()?;
        let request = self.request(&cursor);
        let result = match self.source.fetch(&request).await {
            Ok(body) => decode::<T>(self.resource, &body),
            Err(e) => Err(e),
        };

        let id = PageId {
            resource: self.resource,
            index: self.index,
            cursor: cursor.clone(),
        };
        self.index += 1;

        let records = match result {
            Ok(envelope) => {
                self.consecutive_failures = 0;
                self.next = match &cursor {
                    PageCursor::Offset(offset)
                        if envelope.has_more && !envelope.data.is_empty() =>
                    {
                        Some(PageCursor::Offset(offset + envelope.data.len() as u64))
                    }
                    PageCursor::Offset(_) => None,
                    PageCursor::Batch { index, .. } => self.batch_after(*index),
                };
                debug!(page = %id, records = envelope.data.len(), "page fetched");
                Ok(envelope.data)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                warn!(page = %id, error = %e, "page failed");
                self.next = match &cursor {
                    PageCursor::Offset(_)
                        if self.consecutive_failures >= self.settings.max_consecutive_failures =>
                    {
                        warn!(
                            resource = %self.resource,
                            failures = self.consecutive_failures,
                            "giving up on resource after consecutive page failures"
                        );
                        self.gave_up = true;
                        None
                    }
                    PageCursor::Offset(offset) => Some(PageCursor::Offset(
                        offset + self.settings.page_size as u64,
                    )),
                    PageCursor::Batch { index, .. } => self.batch_after(*index),
                };
                Err(e)
            }
        };

        Some(Page { id, records })
    }
}

/// Why a page did not reach the end of its handler.
#[derive(Debug)]
pub enum PageFailure<E> {
    Fetch(ClientError),
    Handler(E),
}

impl<E: fmt::Display> fmt::Display for PageFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageFailure::Fetch(e) => write!(f, "fetch failed: {e}"),
            PageFailure::Handler(e) => write!(f, "handler failed: {e}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for PageFailure<E> {}

/// Error returned by [`ApiClient::iterate`].
#[derive(Debug, thiserror::Error)]
pub enum IterationError<E: fmt::Debug + fmt::Display> {
    /// The request was rejected before any page was fetched.
    #[error(transparent)]
    Request(ClientError),
    /// A page failed and no error handler was supplied.
    #[error("{page}: {failure}")]
    Page { page: PageId, failure: PageFailure<E> },
}

/// Totals for one iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationSummary {
    pub pages: usize,
    pub records: usize,
    pub page_errors: usize,
    /// Offset pagination stopped early after repeated failures.
    pub gave_up: bool,
}

/// Error callback for [`ApiClient::iterate`]; receiving it makes failures non-fatal.
pub type ErrorHandler<'h, E> = &'h mut (dyn FnMut(&PageId, &PageFailure<E>) + Send);

/// Pages vendor resources through a [`PageSource`].
pub struct ApiClient<S> {
    source: S,
    settings: PagingSettings,
}

impl<S: PageSource> ApiClient<S> {
    pub fn new(source: S, settings: PagingSettings) -> Self {
        Self { source, settings }
    }

    pub fn settings(&self) -> PagingSettings {
        self.settings
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Lazy page walk over `resource`.
    pub fn pages<T: DeserializeOwned>(
        &self,
        resource: Resource,
        filters: Vec<Filter>,
    ) -> Result<Paginator<'_, T>, ClientError> {
        Paginator::new(&self.source, resource, filters, self.settings)
    }

    /// Hand every page of `resource` to `on_page`.
    ///
    /// Without `on_error` the first failed page (fetch or handler) ends the
    /// iteration with that failure. With it, the failure is reported and the
    /// next page is processed.
    pub async fn iterate<T, E, F>(
        &self,
        resource: Resource,
        filters: Vec<Filter>,
        mut on_page: F,
        mut on_error: Option<ErrorHandler<'_, E>>,
    ) -> Result<IterationSummary, IterationError<E>>
    where
        T: DeserializeOwned,
        E: fmt::Debug + fmt::Display,
        F: AsyncFnMut(Vec<T>) -> Result<(), E>,
    {
        let mut pages = self
            .pages::<T>(resource, filters)
            .map_err(IterationError::Request)?;
        let mut summary = IterationSummary::default();

        while let Some(page) = pages.next_page().await {
            summary.pages += 1;
            let failure = match page.records {
                Ok(records) => {
                    summary.records += records.len();
                    on_page(records).await.err().map(PageFailure::Handler)
                }
                Err(e) => Some(PageFailure::Fetch(e)),
            };
            let Some(failure) = failure else { continue };

            summary.page_errors += 1;
            match on_error.as_deref_mut() {
                Some(handler) => handler(&page.id, &failure),
                None => {
                    return Err(IterationError::Page {
                        page: page.id,
                        failure,
                    });
                }
            }
        }

        summary.gave_up = pages.gave_up();
        Ok(summary)
    }
}
