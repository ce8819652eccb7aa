use std::collections::{BTreeSet, HashSet};

use tracing::{info, warn};
use uuid::Uuid;
use vulngraph_client::{LogThrottle, PageFailure, PageId, PageSource, Resource};
use vulngraph_db::iterate_entities;
use vulngraph_types::{DirectRelationship, Entity, HostRecord, RelationshipClass};

use super::{
    StageContext, StageReport, StageState, add_relationship_once, load_entity,
};
use crate::constants::{
    DATA_ACCOUNT_ENTITY, DATA_SCANNED_HOST_IDS, ENTITY_TYPE_HOST, HOST_IDS_LOG_EVERY,
};
use crate::converters::{create_host_entity, host_cloud_target};
use crate::dedup::build_mapped_relationships;
use crate::error::StageError;

/// List ids of hosts with scan data processed inside the configured window.
pub async fn fetch_scanned_host_ids<S: PageSource>(
    ctx: &StageContext<'_, S>,
    report: &mut StageReport,
) -> Result<(), StageError> {
    let correlation_id = Uuid::new_v4();
    let mut ids = BTreeSet::new();
    let mut throttle = LogThrottle::new(HOST_IDS_LOG_EVERY);
    let mut on_error = |page: &PageId, failure: &PageFailure<StageError>| {
        warn!(
            page = %page,
            error = %failure,
            error_correlation_id = %correlation_id,
            "error fetching scanned host ids"
        );
    };

    report.enter(StageState::Fetching);
    let summary = ctx
        .client
        .iterate(
            Resource::ScannedHostIds,
            ctx.config.window_filters(ctx.now),
            async |page: Vec<u64>| {
                for id in page {
                    ids.insert(id);
                    if throttle.tick() {
                        info!(collected = ids.len(), "collecting scanned host ids");
                    }
                }
                Ok::<(), StageError>(())
            },
            Some(&mut on_error),
        )
        .await?;

    report.pages = summary.pages;
    report.records = summary.records;
    report.page_errors = summary.page_errors;
    report.gave_up = summary.gave_up;

    report.enter(StageState::Writing);
    let ids: Vec<u64> = ids.into_iter().collect();
    info!(count = ids.len(), "storing scanned host ids");
    ctx.state
        .set_data(DATA_SCANNED_HOST_IDS, serde_json::to_value(&ids)?)
        .await?;
    Ok(())
}

/// Create host entities and `account HAS host` edges.
pub async fn fetch_hosts<S: PageSource>(
    ctx: &StageContext<'_, S>,
    report: &mut StageReport,
) -> Result<(), StageError> {
    let account = load_entity(ctx.state, DATA_ACCOUNT_ENTITY).await?;
    let scanned: HashSet<u64> = match ctx.state.get_data(DATA_SCANNED_HOST_IDS).await? {
        Some(value) => serde_json::from_value(value).map_err(|e| StageError::InvalidData {
            key: DATA_SCANNED_HOST_IDS,
            message: e.to_string(),
        })?,
        None => {
            warn!("no scanned host ids recorded; no host will be marked recently scanned");
            HashSet::new()
        }
    };

    let correlation_id = Uuid::new_v4();
    let mut pages = ctx
        .client
        .pages::<HostRecord>(Resource::Hosts, ctx.config.window_filters(ctx.now))?;

    loop {
        report.enter(StageState::Fetching);
        let Some(page) = pages.next_page().await else {
            break;
        };
        report.pages += 1;
        let hosts = match page.records {
            Ok(hosts) => hosts,
            Err(e) => {
                report.record_page_error(&correlation_id, &page.id, &e);
                continue;
            }
        };
        report.records += hosts.len();

        report.enter(StageState::Converting);
        let entities: Vec<Entity> = hosts
            .iter()
            .map(|h| create_host_entity(h, scanned.contains(&h.id)))
            .collect();

        report.enter(StageState::Writing);
        for entity in entities {
            if ctx.state.has_key(&entity.key).await? {
                report.duplicates += 1;
                warn!(key = %entity.key, "host listed more than once; keeping the first record");
                continue;
            }
            let has = DirectRelationship::new(RelationshipClass::Has, &account, &entity);
            ctx.state.add_entity(entity).await?;
            report.entities_created += 1;
            add_relationship_once(ctx.state, has, report).await?;
        }
    }

    report.gave_up = pages.gave_up();
    info!(
        hosts = report.entities_created,
        page_errors = report.page_errors,
        "hosts ingested"
    );
    Ok(())
}

/// Map hosts onto the cloud instances behind them (`host IS aws_instance`).
pub async fn build_host_cloud_relationships<S: PageSource>(
    ctx: &StageContext<'_, S>,
    report: &mut StageReport,
) -> Result<(), StageError> {
    let state = ctx.state;
    report.enter(StageState::Converting);

    let visited = iterate_entities(state, ENTITY_TYPE_HOST, async |host_entity: Entity| {
        let Some(host) = host_entity.raw::<HostRecord>() else {
            report.missing += 1;
            warn!(key = %host_entity.key, "host entity carries no source record");
            return Ok(());
        };
        let Some((target, filter_keys)) = host_cloud_target(&host) else {
            return Ok(());
        };
        let outcome = build_mapped_relationships(
            RelationshipClass::Is,
            (ENTITY_TYPE_HOST, host_entity.key.as_str()),
            &filter_keys,
            [target],
            true,
        );
        report.enter(StageState::Writing);
        for relationship in outcome.created {
            add_relationship_once(state, relationship, report).await?;
        }
        Ok::<(), StageError>(())
    })
    .await?;

    report.records = visited;
    Ok(())
}
