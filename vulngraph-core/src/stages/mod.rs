//! Pipeline stages.
//!
//! Each stage is one sequential async flow over the vendor API and the job
//! store. Page failures are counted on the stage report and never end a
//! stage; store failures do.

mod account;
mod hosts;
mod vulns;

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{debug, error};
use uuid::Uuid;
use vulngraph_client::{ApiClient, PageId};
use vulngraph_db::JobState;
use vulngraph_types::{Entity, Relationship};

use crate::config::IntegrationConfig;
use crate::error::StageError;

pub use account::{fetch_account, fetch_services};
pub use hosts::{build_host_cloud_relationships, fetch_hosts, fetch_scanned_host_ids};
pub use vulns::{fetch_assessments, fetch_finding_vulnerabilities, fetch_findings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageId {
    Account,
    Services,
    ScannedHostIds,
    Hosts,
    HostCloud,
    Assessments,
    Findings,
    FindingVulns,
}

impl StageId {
    /// Every stage, dependencies first.
    pub const ALL: [StageId; 8] = [
        StageId::Account,
        StageId::Services,
        StageId::ScannedHostIds,
        StageId::Hosts,
        StageId::HostCloud,
        StageId::Assessments,
        StageId::Findings,
        StageId::FindingVulns,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Account => "fetch-account",
            StageId::Services => "fetch-services",
            StageId::ScannedHostIds => "fetch-scanned-host-ids",
            StageId::Hosts => "fetch-hosts",
            StageId::HostCloud => "build-host-ec2-gcp-relationship",
            StageId::Assessments => "fetch-assessments",
            StageId::Findings => "fetch-findings",
            StageId::FindingVulns => "fetch-finding-vulns",
        }
    }

    pub fn parse(name: &str) -> Option<StageId> {
        StageId::ALL.into_iter().find(|s| s.as_str() == name)
    }

    pub fn depends_on(&self) -> &'static [StageId] {
        match self {
            StageId::Account | StageId::ScannedHostIds => &[],
            StageId::Services => &[StageId::Account],
            StageId::Hosts => &[StageId::Account, StageId::ScannedHostIds],
            StageId::HostCloud => &[StageId::Hosts],
            StageId::Assessments => &[StageId::Hosts, StageId::Services],
            StageId::Findings => &[StageId::Assessments, StageId::Hosts],
            StageId::FindingVulns => &[StageId::Findings],
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Pending,
    Fetching,
    Converting,
    Writing,
    Done,
    Failed,
}

impl StageState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageState::Done | StageState::Failed)
    }
}

/// Progress and diagnostic counts for one stage run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: StageId,
    pub state: StageState,
    pub pages: usize,
    pub records: usize,
    pub page_errors: usize,
    pub entities_created: usize,
    pub relationships_created: usize,
    /// Derived relationships or records seen more than once.
    pub duplicates: usize,
    /// Records skipped because upstream data was absent.
    pub missing: usize,
    /// A paginated walk stopped early after repeated failures.
    pub gave_up: bool,
    /// Finding-key partials an earlier run already took.
    pub partials_consumed_earlier: usize,
    /// Finding-key partials no producer wrote.
    pub partials_never_produced: usize,
}

impl StageReport {
    pub fn new(stage: StageId) -> Self {
        Self {
            stage,
            state: StageState::Pending,
            pages: 0,
            records: 0,
            page_errors: 0,
            entities_created: 0,
            relationships_created: 0,
            duplicates: 0,
            missing: 0,
            gave_up: false,
            partials_consumed_earlier: 0,
            partials_never_produced: 0,
        }
    }

    /// Move to `next`; terminal states are final.
    pub fn enter(&mut self, next: StageState) {
        if self.state.is_terminal() || self.state == next {
            return;
        }
        debug!(stage = %self.stage, from = ?self.state, to = ?next, "stage state");
        self.state = next;
    }

    pub fn has_soft_errors(&self) -> bool {
        self.page_errors > 0 || self.duplicates > 0 || self.missing > 0 || self.gave_up
    }

    pub(crate) fn record_page_error(
        &mut self,
        correlation_id: &Uuid,
        page: &PageId,
        error: &dyn fmt::Display,
    ) {
        self.page_errors += 1;
        error!(
            stage = %self.stage,
            page = %page,
            error = %error,
            error_correlation_id = %correlation_id,
            total_page_errors = self.page_errors,
            "error processing page"
        );
    }
}

/// Everything a stage needs for one run.
pub struct StageContext<'a, S> {
    pub config: &'a IntegrationConfig,
    pub client: &'a ApiClient<S>,
    pub state: &'a dyn JobState,
    /// Web UI host for links.
    pub ui_host: String,
    pub now: DateTime<Utc>,
}

pub(crate) async fn load_entity(
    state: &dyn JobState,
    key: &'static str,
) -> Result<Entity, StageError> {
    let value = state
        .get_data(key)
        .await?
        .ok_or(StageError::MissingData(key))?;
    serde_json::from_value(value).map_err(|e| StageError::InvalidData {
        key,
        message: e.to_string(),
    })
}

/// Add `entity` unless its key is taken; true if added.
pub(crate) async fn add_entity_once(
    state: &dyn JobState,
    entity: Entity,
    report: &mut StageReport,
) -> Result<bool, StageError> {
    if state.has_key(&entity.key).await? {
        return Ok(false);
    }
    state.add_entity(entity).await?;
    report.entities_created += 1;
    Ok(true)
}

/// Add `relationship` unless its key is taken; true if added.
pub(crate) async fn add_relationship_once(
    state: &dyn JobState,
    relationship: impl Into<Relationship>,
    report: &mut StageReport,
) -> Result<bool, StageError> {
    let relationship = relationship.into();
    if state.has_key(relationship.key()).await? {
        return Ok(false);
    }
    state.add_relationship(relationship).await?;
    report.relationships_created += 1;
    Ok(true)
}
