//! Stage runner.
//!
//! Stages run one after another in dependency order against a single job
//! store. A stage that fails, or is skipped, blocks every stage that depends
//! on it; independent stages still run.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{Instrument, error, info, info_span, warn};
use vulngraph_client::{ApiClient, PageSource};
use vulngraph_db::JobState;

use crate::config::{ConfigError, IntegrationConfig};
use crate::error::StageError;
use crate::stages::{
    StageContext, StageId, StageReport, StageState, build_host_cloud_relationships, fetch_account,
    fetch_assessments, fetch_finding_vulnerabilities, fetch_findings, fetch_hosts,
    fetch_scanned_host_ids, fetch_services,
};

/// How one stage ended.
#[derive(Debug)]
pub enum StageOutcome {
    Completed(StageReport),
    Failed {
        report: StageReport,
        error: StageError,
    },
    Skipped {
        stage: StageId,
        /// First dependency that did not complete.
        blocked_by: StageId,
    },
}

impl StageOutcome {
    pub fn stage(&self) -> StageId {
        match self {
            StageOutcome::Completed(report) | StageOutcome::Failed { report, .. } => report.stage,
            StageOutcome::Skipped { stage, .. } => *stage,
        }
    }

    pub fn report(&self) -> Option<&StageReport> {
        match self {
            StageOutcome::Completed(report) | StageOutcome::Failed { report, .. } => Some(report),
            StageOutcome::Skipped { .. } => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StageOutcome::Completed(_))
    }
}

/// Outcomes of one pipeline run, in execution order.
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<StageOutcome>,
}

impl RunReport {
    /// True when every stage that was asked for completed.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(StageOutcome::is_completed)
    }

    pub fn outcome(&self, stage: StageId) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|o| o.stage() == stage)
    }

    pub fn failed(&self) -> impl Iterator<Item = &StageOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, StageOutcome::Failed { .. }))
    }
}

pub struct Pipeline<'a, S> {
    ctx: StageContext<'a, S>,
    stages: Vec<StageId>,
}

impl<'a, S: PageSource> Pipeline<'a, S> {
    pub fn new(
        config: &'a IntegrationConfig,
        client: &'a ApiClient<S>,
        state: &'a dyn JobState,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let ui_host = config.ui_host()?;
        Ok(Self {
            ctx: StageContext {
                config,
                client,
                state,
                ui_host,
                now: Utc::now(),
            },
            stages: StageId::ALL.to_vec(),
        })
    }

    /// Pin the clock used for the default scan window.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.ctx.now = now;
        self
    }

    /// Run only `stages`, still in dependency order. A selected stage whose
    /// dependency was not selected is expected to find that dependency's
    /// output already in the store.
    pub fn with_stages(mut self, stages: &[StageId]) -> Self {
        self.stages = StageId::ALL
            .into_iter()
            .filter(|s| stages.contains(s))
            .collect();
        self
    }

    pub async fn run(&self) -> RunReport {
        let mut report = RunReport::default();
        let mut blocked: HashSet<StageId> = HashSet::new();

        for &stage in &self.stages {
            if let Some(&dep) = stage.depends_on().iter().find(|d| blocked.contains(d)) {
                warn!(stage = %stage, blocked_by = %dep, "skipping stage");
                blocked.insert(stage);
                report.outcomes.push(StageOutcome::Skipped {
                    stage,
                    blocked_by: dep,
                });
                continue;
            }

            let span = info_span!("stage", id = %stage);
            let outcome = self.run_one(stage).instrument(span).await;
            if !outcome.is_completed() {
                blocked.insert(stage);
            }
            report.outcomes.push(outcome);
        }
        report
    }

    async fn run_one(&self, stage: StageId) -> StageOutcome {
        info!("stage started");
        let mut report = StageReport::new(stage);
        match run_stage(&self.ctx, stage, &mut report).await {
            Ok(()) => {
                report.enter(StageState::Done);
                if report.has_soft_errors() {
                    warn!(
                        page_errors = report.page_errors,
                        duplicates = report.duplicates,
                        missing = report.missing,
                        gave_up = report.gave_up,
                        "stage finished with soft errors"
                    );
                } else {
                    info!(
                        entities = report.entities_created,
                        relationships = report.relationships_created,
                        "stage finished"
                    );
                }
                StageOutcome::Completed(report)
            }
            Err(e) => {
                report.enter(StageState::Failed);
                error!(error = %e, state = ?report.state, "stage failed");
                StageOutcome::Failed { report, error: e }
            }
        }
    }
}

async fn run_stage<S: PageSource>(
    ctx: &StageContext<'_, S>,
    stage: StageId,
    report: &mut StageReport,
) -> Result<(), StageError> {
    match stage {
        StageId::Account => fetch_account(ctx, report).await,
        StageId::Services => fetch_services(ctx, report).await,
        StageId::ScannedHostIds => fetch_scanned_host_ids(ctx, report).await,
        StageId::Hosts => fetch_hosts(ctx, report).await,
        StageId::HostCloud => build_host_cloud_relationships(ctx, report).await,
        StageId::Assessments => fetch_assessments(ctx, report).await,
        StageId::Findings => fetch_findings(ctx, report).await,
        StageId::FindingVulns => fetch_finding_vulnerabilities(ctx, report).await,
    }
}
