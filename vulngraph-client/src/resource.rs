use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::ClientError;

/// A pageable vendor resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// Host asset listing.
    Hosts,
    /// Ids of hosts with processed scan data.
    ScannedHostIds,
    /// Scan list.
    Scans,
    /// Detection rows of one scan.
    ScanResults,
    /// Knowledge-base entries, requested by QID.
    Vulnerabilities,
    /// Scan history of one host.
    HostScans,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Hosts => "hosts",
            Resource::ScannedHostIds => "scanned_host_ids",
            Resource::Scans => "scans",
            Resource::ScanResults => "scan_results",
            Resource::Vulnerabilities => "vulnerabilities",
            Resource::HostScans => "host_scans",
        }
    }

    /// Whether `filter` is one of the query parameters this resource takes.
    pub fn accepts(&self, filter: &Filter) -> bool {
        matches!(
            (self, filter),
            (
                Resource::Hosts | Resource::ScannedHostIds,
                Filter::ProcessedAfter(_) | Filter::ProcessedBefore(_)
            ) | (Resource::ScanResults, Filter::ScanRef(_))
                | (Resource::Vulnerabilities, Filter::Ids(_))
                | (Resource::HostScans, Filter::HostAddress(_))
        )
    }

    /// The filter a request for this resource cannot be made without.
    fn required_filter(&self) -> Option<&'static str> {
        match self {
            Resource::ScanResults => Some("scan_ref"),
            Resource::Vulnerabilities => Some("ids"),
            Resource::HostScans => Some("target"),
            _ => None,
        }
    }

    /// Reject filters the resource does not recognize and missing required ones.
    pub fn validate(&self, filters: &[Filter]) -> Result<(), ClientError> {
        if let Some(f) = filters.iter().find(|f| !self.accepts(f)) {
            return Err(ClientError::UnsupportedFilter {
                resource: *self,
                filter: f.name(),
            });
        }
        if let Some(required) = self.required_filter()
            && !filters.iter().any(|f| f.name() == required)
        {
            return Err(ClientError::MissingFilter {
                resource: *self,
                filter: required,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recognized query filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    ProcessedAfter(DateTime<Utc>),
    ProcessedBefore(DateTime<Utc>),
    ScanRef(String),
    /// Numeric ids; the paginator splits them into request-sized batches.
    Ids(Vec<u64>),
    HostAddress(String),
}

impl Filter {
    /// Query parameter name.
    pub fn name(&self) -> &'static str {
        match self {
            Filter::ProcessedAfter(_) => "vm_processed_after",
            Filter::ProcessedBefore(_) => "vm_processed_before",
            Filter::ScanRef(_) => "scan_ref",
            Filter::Ids(_) => "ids",
            Filter::HostAddress(_) => "target",
        }
    }

    pub fn query_value(&self) -> String {
        match self {
            Filter::ProcessedAfter(t) | Filter::ProcessedBefore(t) => {
                t.to_rfc3339_opts(SecondsFormat::Secs, true)
            }
            Filter::ScanRef(s) | Filter::HostAddress(s) => s.clone(),
            Filter::Ids(ids) => join_ids(ids),
        }
    }
}

pub(crate) fn join_ids(ids: &[u64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Position of a page within a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    Offset(u64),
    Batch { index: usize, ids: Vec<u64> },
}

/// Identifies a page in error reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageId {
    pub resource: Resource,
    /// Zero-based position in request order.
    pub index: usize,
    pub cursor: PageCursor,
}

impl PageId {
    /// Ids requested by a batch page; empty for offset pages.
    pub fn ids(&self) -> &[u64] {
        match &self.cursor {
            PageCursor::Batch { ids, .. } => ids,
            PageCursor::Offset(_) => &[],
        }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cursor {
            PageCursor::Offset(offset) => {
                write!(f, "{} page {} (offset {offset})", self.resource, self.index)
            }
            PageCursor::Batch { index, ids } => write!(
                f,
                "{} page {} (batch {index}, {} ids)",
                self.resource,
                self.index,
                ids.len()
            ),
        }
    }
}

/// One HTTP-level request for a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub resource: Resource,
    pub params: Vec<(String, String)>,
}

impl PageRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}
