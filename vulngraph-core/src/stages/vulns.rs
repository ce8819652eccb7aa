use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};
use uuid::Uuid;
use vulngraph_client::{Filter, LogThrottle, PageSource, Resource};
use vulngraph_types::{
    DirectRelationship, Entity, HostRecord, Relationship, RelationshipClass, ScanRecord,
    ScanResultItem, VulnRecord,
};

use super::{
    StageContext, StageReport, StageState, add_entity_once, add_relationship_once, load_entity,
};
use crate::collector::{FindingKeyCollector, PartialLoad, pop_partial, store_partial};
use crate::constants::{
    DATA_HOST_VULNERABILITY_FINDING_KEYS, DATA_VMDR_SERVICE_ENTITY,
    DATA_WEBAPP_VULNERABILITY_FINDING_KEYS, ENTITY_TYPE_ASSESSMENT, ENTITY_TYPE_HOST,
    RECORDS_LOG_EVERY,
};
use crate::converters::{
    create_assessment_entity, create_finding_entity, host_key, vulnerability_target_entities,
};
use crate::dedup::build_finding_vulnerability_relationships;
use crate::error::StageError;

/// Per host, turn its scan history into assessments linked to the host and
/// to the scanning service.
pub async fn fetch_assessments<S: PageSource>(
    ctx: &StageContext<'_, S>,
    report: &mut StageReport,
) -> Result<(), StageError> {
    let service = load_entity(ctx.state, DATA_VMDR_SERVICE_ENTITY).await?;
    let correlation_id = Uuid::new_v4();
    let hosts = ctx.state.entities_of_type(ENTITY_TYPE_HOST).await?;

    for host_entity in hosts {
        let Some(host) = host_entity.raw::<HostRecord>() else {
            report.missing += 1;
            warn!(key = %host_entity.key, "host entity carries no source record");
            continue;
        };

        let mut pages = ctx
            .client
            .pages::<ScanRecord>(Resource::HostScans, vec![Filter::HostAddress(host.ip)])?;
        loop {
            report.enter(StageState::Fetching);
            let Some(page) = pages.next_page().await else {
                break;
            };
            report.pages += 1;
            let scans = match page.records {
                Ok(scans) => scans,
                Err(e) => {
                    report.record_page_error(&correlation_id, &page.id, &e);
                    continue;
                }
            };
            report.records += scans.len();

            report.enter(StageState::Writing);
            for scan in scans {
                let assessment = create_assessment_entity(&scan);
                let has =
                    DirectRelationship::new(RelationshipClass::Has, &host_entity, &assessment);
                let performed =
                    DirectRelationship::new(RelationshipClass::Performed, &service, &assessment);
                add_entity_once(ctx.state, assessment, report).await?;
                add_relationship_once(ctx.state, has, report).await?;
                add_relationship_once(ctx.state, performed, report).await?;
            }
        }
        report.gave_up |= pages.gave_up();
    }

    info!(
        assessments = report.entities_created,
        page_errors = report.page_errors,
        "assessments ingested"
    );
    Ok(())
}

/// Per assessment, ingest the detections of its scan and record which
/// finding keys belong to each QID.
pub async fn fetch_findings<S: PageSource>(
    ctx: &StageContext<'_, S>,
    report: &mut StageReport,
) -> Result<(), StageError> {
    let correlation_id = Uuid::new_v4();
    let mut collector = FindingKeyCollector::new();
    let mut throttle = LogThrottle::new(RECORDS_LOG_EVERY);
    let mut host_cache: HashMap<String, Option<Entity>> = HashMap::new();
    let assessments = ctx.state.entities_of_type(ENTITY_TYPE_ASSESSMENT).await?;

    for assessment in assessments {
        let Some(scan) = assessment.raw::<ScanRecord>() else {
            report.missing += 1;
            warn!(key = %assessment.key, "assessment entity carries no source record");
            continue;
        };

        let mut pages = ctx.client.pages::<ScanResultItem>(
            Resource::ScanResults,
            vec![Filter::ScanRef(scan.reference.clone())],
        )?;
        loop {
            report.enter(StageState::Fetching);
            let Some(page) = pages.next_page().await else {
                break;
            };
            report.pages += 1;
            let items = match page.records {
                Ok(items) => items,
                Err(e) => {
                    report.record_page_error(&correlation_id, &page.id, &e);
                    continue;
                }
            };

            report.enter(StageState::Converting);
            let mut findings = Vec::with_capacity(items.len());
            for item in items {
                if let Some(row) = item.malformed_detection() {
                    report.missing += 1;
                    warn!(
                        ip = %row.get("ip").unwrap_or(&serde_json::Value::Null),
                        qid = %row["qid"],
                        scan = %scan.reference,
                        "detection row could not be decoded; skipping"
                    );
                    continue;
                }
                findings.extend(item.into_finding());
            }
            report.records += findings.len();

            report.enter(StageState::Writing);
            for finding in findings {
                let key = host_key(&finding.ip);
                if !host_cache.contains_key(&key) {
                    let found = ctx.state.find_entity(&key).await?;
                    host_cache.insert(key.clone(), found);
                }
                let Some(host) = host_cache.get(&key).and_then(Option::as_ref) else {
                    report.missing += 1;
                    warn!(
                        ip = %finding.ip,
                        qid = finding.qid,
                        scan = %scan.reference,
                        "finding references a host that was not ingested; skipping"
                    );
                    continue;
                };

                let entity = create_finding_entity(&finding);
                let finding_key = entity.key.clone();
                let has = DirectRelationship::new(RelationshipClass::Has, host, &entity);
                let identified =
                    DirectRelationship::new(RelationshipClass::Identified, &assessment, &entity);
                add_entity_once(ctx.state, entity, report).await?;
                add_relationship_once(ctx.state, has, report).await?;
                add_relationship_once(ctx.state, identified, report).await?;
                collector.add(finding.qid, finding_key);

                if throttle.tick() {
                    info!(
                        findings = throttle.seen(),
                        qids = collector.qid_count(),
                        page_errors = report.page_errors,
                        "processing findings"
                    );
                }
            }
        }
        report.gave_up |= pages.gave_up();
    }

    report.enter(StageState::Writing);
    store_partial(ctx.state, DATA_HOST_VULNERABILITY_FINDING_KEYS, &collector).await?;
    info!(
        qids = collector.qid_count(),
        finding_keys = collector.finding_key_count(),
        "stored finding keys"
    );
    Ok(())
}

/// Fetch catalog entries for every collected QID and map each recorded
/// finding onto its vulnerabilities.
pub async fn fetch_finding_vulnerabilities<S: PageSource>(
    ctx: &StageContext<'_, S>,
    report: &mut StageReport,
) -> Result<(), StageError> {
    let mut collector = FindingKeyCollector::new();
    for data_key in [
        DATA_WEBAPP_VULNERABILITY_FINDING_KEYS,
        DATA_HOST_VULNERABILITY_FINDING_KEYS,
    ] {
        match pop_partial(ctx.state, data_key).await? {
            PartialLoad::Loaded(partial) => collector.load_serialized(partial),
            PartialLoad::AlreadyConsumed => {
                report.partials_consumed_earlier += 1;
                warn!(
                    data_key,
                    "finding keys were already consumed by an earlier run of this stage"
                );
            }
            PartialLoad::NeverProduced => {
                report.partials_never_produced += 1;
                debug!(data_key, "no finding keys recorded");
            }
        }
    }
    if collector.is_empty() {
        info!("no finding keys collected; nothing to enrich");
        return Ok(());
    }
    info!(
        qids = collector.qid_count(),
        finding_keys = collector.finding_key_count(),
        "fetching vulnerability details"
    );

    let correlation_id = Uuid::new_v4();
    let mut throttle = LogThrottle::new(RECORDS_LOG_EVERY);
    let mut findings_processed = 0usize;
    let mut returned = HashSet::new();
    let mut pages = ctx.client.pages::<VulnRecord>(
        Resource::Vulnerabilities,
        vec![Filter::Ids(collector.all_qids())],
    )?;

    loop {
        report.enter(StageState::Fetching);
        let Some(page) = pages.next_page().await else {
            break;
        };
        report.pages += 1;
        let vulns = match page.records {
            Ok(vulns) => vulns,
            Err(e) => {
                report.record_page_error(&correlation_id, &page.id, &e);
                continue;
            }
        };

        for vuln in vulns {
            report.records += 1;
            returned.insert(vuln.qid);
            report.enter(StageState::Converting);
            let targets =
                vulnerability_target_entities(&ctx.ui_host, &vuln, ctx.config.include_cve_targets);

            let Some(finding_keys) = collector.get(vuln.qid) else {
                report.missing += 1;
                warn!(qid = vuln.qid, "catalog returned a QID no finding references");
                continue;
            };

            report.enter(StageState::Writing);
            for finding_key in finding_keys {
                findings_processed += 1;
                let Some(finding) = ctx.state.find_entity(finding_key).await? else {
                    report.missing += 1;
                    warn!(
                        qid = vuln.qid,
                        finding_key = %finding_key,
                        "finding was not stored by an earlier stage"
                    );
                    continue;
                };

                let outcome = build_finding_vulnerability_relationships(
                    &finding.entity_type,
                    finding_key,
                    targets.iter().cloned(),
                );
                if !outcome.duplicates.is_empty() {
                    report.duplicates += outcome.duplicates.len();
                    warn!(
                        qid = vuln.qid,
                        duplicate_keys = ?outcome.duplicate_keys(),
                        "finding maps to the same vulnerability more than once"
                    );
                }

                let mut fresh = Vec::with_capacity(outcome.created.len());
                for relationship in outcome.created {
                    if !ctx.state.has_key(&relationship.key).await? {
                        fresh.push(Relationship::from(relationship));
                    }
                }
                if !fresh.is_empty() {
                    report.relationships_created += fresh.len();
                    ctx.state.add_relationships(fresh).await?;
                }
            }

            if throttle.tick() {
                info!(
                    vulnerabilities = report.records,
                    findings = findings_processed,
                    page_errors = report.page_errors,
                    "processing vulnerabilities"
                );
            }
        }
    }

    report.gave_up = pages.gave_up();
    let unreturned = collector.qid_count().saturating_sub(returned.len());
    if unreturned > 0 {
        warn!(
            unreturned,
            page_errors = report.page_errors,
            "some QIDs got no catalog entry"
        );
    }
    info!(
        vulnerabilities = report.records,
        findings = findings_processed,
        relationships = report.relationships_created,
        "vulnerability enrichment finished"
    );
    Ok(())
}
