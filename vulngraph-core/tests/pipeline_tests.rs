use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use vulngraph_client::{ApiClient, ClientError, PageRequest, PageSource, PagingSettings, Resource};
use vulngraph_core::collector::pop_partial;
use vulngraph_core::constants::{
    DATA_HOST_VULNERABILITY_FINDING_KEYS, ENTITY_TYPE_ASSESSMENT, ENTITY_TYPE_HOST,
    ENTITY_TYPE_HOST_FINDING,
};
use vulngraph_core::{
    IntegrationConfig, PartialLoad, Pipeline, StageError, StageId, StageOutcome,
};
use vulngraph_db::{JobState, MemoryJobState, SqliteJobState};
use vulngraph_types::Relationship;

/// Answers each request from a fixed table keyed by resource and the one
/// parameter that varies per call. Anything past the first offset page is
/// empty.
struct Scripted {
    bodies: HashMap<(Resource, String), String>,
    requests: Mutex<Vec<PageRequest>>,
}

impl Scripted {
    fn new() -> Self {
        Self {
            bodies: HashMap::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn with(mut self, resource: Resource, selector: &str, data: &str) -> Self {
        self.bodies.insert(
            (resource, selector.to_string()),
            format!("{{\"data\":{data},\"hasMore\":false}}"),
        );
        self
    }

    fn requests_for(&self, resource: Resource) -> Vec<PageRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.resource == resource)
            .cloned()
            .collect()
    }
}

fn selector(request: &PageRequest) -> String {
    let name = match request.resource {
        Resource::HostScans => "target",
        Resource::ScanResults => "scan_ref",
        Resource::Vulnerabilities => "ids",
        _ => return String::new(),
    };
    request.param(name).unwrap_or_default().to_string()
}

#[async_trait]
impl PageSource for Scripted {
    async fn fetch(&self, request: &PageRequest) -> Result<Vec<u8>, ClientError> {
        self.requests.lock().unwrap().push(request.clone());
        if request.param("offset").is_some_and(|o| o != "0") {
            return Ok(br#"{"data":[],"hasMore":false}"#.to_vec());
        }
        match self.bodies.get(&(request.resource, selector(request))) {
            Some(body) => Ok(body.clone().into_bytes()),
            None => Ok(br#"{"data":[],"hasMore":false}"#.to_vec()),
        }
    }
}

fn config() -> IntegrationConfig {
    IntegrationConfig {
        api_url: "https://qualysapi.qg3.apps.qualys.com".into(),
        username: "analyst".into(),
        ..Default::default()
    }
}

fn settings() -> PagingSettings {
    PagingSettings {
        page_size: 100,
        id_batch_size: 50,
        max_consecutive_failures: 3,
    }
}

/// Two hosts seen by one scan, each with a detection of QID 1001.
fn two_host_source() -> Scripted {
    let finding = |ip: &str| {
        format!(
            r#"{{"ip":"{ip}","qid":1001,"title":"OpenSSH","severity":"4","port":"22","protocol":"tcp","ssl":"no"}}"#
        )
    };
    let scan = r#"[{"REF":"scan/1","TYPE":"Scheduled","TITLE":"Weekly","PROCESSED":1,"STATUS":{"STATE":"Finished"}}]"#;
    Scripted::new()
        .with(Resource::ScannedHostIds, "", "[1, 2]")
        .with(
            Resource::Hosts,
            "",
            r#"[{"ID":1,"IP":"10.0.0.1"},{"ID":2,"IP":"10.0.0.2","EC2_INSTANCE_ID":"i-0abc"}]"#,
        )
        .with(Resource::HostScans, "10.0.0.1", scan)
        .with(Resource::HostScans, "10.0.0.2", scan)
        .with(
            Resource::ScanResults,
            "scan/1",
            &format!(
                r#"[{{"scan_report_template_title":"Scan Results"}},{},{}]"#,
                finding("10.0.0.1"),
                finding("10.0.0.2")
            ),
        )
        .with(
            Resource::Vulnerabilities,
            "1001",
            r#"[{"QID":1001,"TITLE":"OpenSSH weak ciphers","SEVERITY_LEVEL":"4"}]"#,
        )
}

fn now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap()
}

fn vuln_relationships(relationships: &[Relationship]) -> Vec<&Relationship> {
    relationships
        .iter()
        .filter(|r| r.relationship_type() == "qualys_host_finding_is_vuln")
        .collect()
}

#[tokio::test]
async fn full_run_maps_findings_onto_one_vulnerability() {
    let config = config();
    let client = ApiClient::new(two_host_source(), settings());
    let state = MemoryJobState::new();

    let report = Pipeline::new(&config, &client, &state)
        .unwrap()
        .with_now(now())
        .run()
        .await;
    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.outcomes.len(), StageId::ALL.len());

    let hosts = state.entities_of_type(ENTITY_TYPE_HOST).await.unwrap();
    assert_eq!(hosts.len(), 2);
    assert!(
        hosts
            .iter()
            .all(|h| h.property("recentlyScanned") == Some(&serde_json::json!(true)))
    );
    assert_eq!(
        state.entities_of_type(ENTITY_TYPE_ASSESSMENT).await.unwrap().len(),
        1
    );

    let findings = state.entities_of_type(ENTITY_TYPE_HOST_FINDING).await.unwrap();
    let keys: Vec<&str> = findings.iter().map(|f| f.key.as_str()).collect();
    assert_eq!(
        keys,
        [
            "qualys_finding:10.0.0.1:1001:22:tcp:0",
            "qualys_finding:10.0.0.2:1001:22:tcp:0"
        ]
    );

    let relationships = state.relationships().await.unwrap();
    let vuln_edges = vuln_relationships(&relationships);
    assert_eq!(vuln_edges.len(), 2);
    for edge in vuln_edges {
        let Relationship::Mapped(mapped) = edge else {
            panic!("finding edges are mapped");
        };
        assert_eq!(mapped.mapping.target_entity.key.as_deref(), Some("vuln-qid:1001"));
    }

    let cloud_edges = relationships
        .iter()
        .filter(|r| r.relationship_type().ends_with("_is_aws_instance"))
        .count();
    assert_eq!(cloud_edges, 1);

    let catalog_requests = client.source().requests_for(Resource::Vulnerabilities);
    assert_eq!(catalog_requests.len(), 1);
    assert_eq!(catalog_requests[0].param("ids"), Some("1001"));

    let enrich = report.outcome(StageId::FindingVulns).unwrap().report().unwrap();
    assert_eq!(enrich.records, 1);
    assert_eq!(enrich.relationships_created, 2);
    assert_eq!(enrich.duplicates, 0);
}

#[tokio::test]
async fn collector_partial_holds_both_finding_keys() {
    let config = config();
    let client = ApiClient::new(two_host_source(), settings());
    let state = MemoryJobState::new();

    let report = Pipeline::new(&config, &client, &state)
        .unwrap()
        .with_now(now())
        .with_stages(&[
            StageId::Account,
            StageId::Services,
            StageId::Hosts,
            StageId::Assessments,
            StageId::Findings,
        ])
        .run()
        .await;
    assert!(report.is_success(), "{report:?}");

    let PartialLoad::Loaded(partial) = pop_partial(&state, DATA_HOST_VULNERABILITY_FINDING_KEYS)
        .await
        .unwrap()
    else {
        panic!("findings stage stores a partial");
    };
    assert_eq!(
        partial,
        vec![(
            1001,
            vec![
                "qualys_finding:10.0.0.1:1001:22:tcp:0".to_string(),
                "qualys_finding:10.0.0.2:1001:22:tcp:0".to_string(),
            ]
        )]
    );
}

#[tokio::test]
async fn failed_stage_skips_its_dependents() {
    let config = config();
    let client = ApiClient::new(two_host_source(), settings());
    let state = MemoryJobState::new();

    // No account stage, so hosts cannot find the account entity.
    let report = Pipeline::new(&config, &client, &state)
        .unwrap()
        .with_now(now())
        .with_stages(&[
            StageId::ScannedHostIds,
            StageId::Hosts,
            StageId::HostCloud,
            StageId::Assessments,
        ])
        .run()
        .await;

    assert!(!report.is_success());
    assert!(report.outcome(StageId::ScannedHostIds).unwrap().is_completed());
    assert!(matches!(
        report.outcome(StageId::Hosts),
        Some(StageOutcome::Failed {
            error: StageError::MissingData(_),
            ..
        })
    ));
    for stage in [StageId::HostCloud, StageId::Assessments] {
        assert!(matches!(
            report.outcome(stage),
            Some(StageOutcome::Skipped {
                blocked_by: StageId::Hosts,
                ..
            })
        ));
    }
    assert_eq!(report.failed().count(), 1);
    assert!(client.source().requests_for(Resource::HostScans).is_empty());
}

#[tokio::test]
async fn rerun_of_enrichment_sees_consumed_partial() {
    let config = config();
    let client = ApiClient::new(two_host_source(), settings());
    let state = SqliteJobState::open_in_memory().unwrap();

    let first = Pipeline::new(&config, &client, &state)
        .unwrap()
        .with_now(now())
        .run()
        .await;
    assert!(first.is_success(), "{first:?}");
    let edges_before = vuln_relationships(&state.relationships().await.unwrap()).len();

    let again = Pipeline::new(&config, &client, &state)
        .unwrap()
        .with_stages(&[StageId::FindingVulns])
        .run()
        .await;
    assert!(again.is_success());
    let report = again.outcome(StageId::FindingVulns).unwrap().report().unwrap();
    assert_eq!(report.pages, 0);
    assert_eq!(report.relationships_created, 0);
    assert_eq!(report.partials_consumed_earlier, 1);
    assert_eq!(report.partials_never_produced, 1);

    assert_eq!(
        pop_partial(&state, DATA_HOST_VULNERABILITY_FINDING_KEYS)
            .await
            .unwrap(),
        PartialLoad::AlreadyConsumed
    );
    assert_eq!(
        vuln_relationships(&state.relationships().await.unwrap()).len(),
        edges_before
    );
    assert_eq!(client.source().requests_for(Resource::Vulnerabilities).len(), 1);
}

#[tokio::test]
async fn enrichment_tells_consumed_keys_from_keys_never_written() {
    let config = config();
    let client = ApiClient::new(two_host_source(), settings());

    let fresh = MemoryJobState::new();
    let never_ran = Pipeline::new(&config, &client, &fresh)
        .unwrap()
        .with_stages(&[StageId::FindingVulns])
        .run()
        .await;
    let never_ran = never_ran
        .outcome(StageId::FindingVulns)
        .unwrap()
        .report()
        .unwrap()
        .clone();
    assert_eq!(never_ran.partials_never_produced, 2);
    assert_eq!(never_ran.partials_consumed_earlier, 0);

    let used = MemoryJobState::new();
    let first = Pipeline::new(&config, &client, &used)
        .unwrap()
        .with_now(now())
        .run()
        .await;
    assert!(first.is_success(), "{first:?}");
    let rerun = Pipeline::new(&config, &client, &used)
        .unwrap()
        .with_stages(&[StageId::FindingVulns])
        .run()
        .await;
    let rerun = rerun
        .outcome(StageId::FindingVulns)
        .unwrap()
        .report()
        .unwrap()
        .clone();
    assert_eq!(rerun.partials_never_produced, 1);
    assert_eq!(rerun.partials_consumed_earlier, 1);

    assert_ne!(never_ran, rerun);
}

#[tokio::test]
async fn undecodable_detection_rows_are_counted_missing() {
    let config = config();
    let source = two_host_source().with(
        Resource::ScanResults,
        "scan/1",
        r#"[
            {"scan_report_template_title":"Scan Results"},
            {"ip":"10.0.0.1","qid":1001,"title":null,"port":"22","protocol":"tcp","ssl":"no"},
            {"ip":"10.0.0.2","qid":"1001","title":"OpenSSH","port":"22","protocol":"tcp"}
        ]"#,
    );
    let client = ApiClient::new(source, settings());
    let state = MemoryJobState::new();

    let report = Pipeline::new(&config, &client, &state)
        .unwrap()
        .with_now(now())
        .run()
        .await;
    assert!(report.is_success(), "{report:?}");

    let findings = report.outcome(StageId::Findings).unwrap().report().unwrap();
    assert_eq!(findings.records, 1);
    assert_eq!(findings.missing, 1);
    assert!(findings.has_soft_errors());
    assert_eq!(
        state.entities_of_type(ENTITY_TYPE_HOST_FINDING).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn finding_for_unknown_host_is_counted_missing() {
    let config = config();
    let source = two_host_source().with(
        Resource::Hosts,
        "",
        r#"[{"ID":1,"IP":"10.0.0.1"}]"#,
    );
    let client = ApiClient::new(source, settings());
    let state = MemoryJobState::new();

    let report = Pipeline::new(&config, &client, &state)
        .unwrap()
        .with_now(now())
        .run()
        .await;
    assert!(report.is_success());

    let findings = report.outcome(StageId::Findings).unwrap().report().unwrap();
    assert_eq!(findings.missing, 1);
    assert_eq!(findings.entities_created, 1);
    assert!(findings.has_soft_errors());
    assert_eq!(
        state.entities_of_type(ENTITY_TYPE_HOST_FINDING).await.unwrap().len(),
        1
    );
}

#[test]
fn pipeline_rejects_invalid_config() {
    let mut config = config();
    config.username.clear();
    let client = ApiClient::new(Scripted::new(), settings());
    let state = MemoryJobState::new();
    assert!(Pipeline::new(&config, &client, &state).is_err());
}

#[tokio::test]
async fn graph_survives_reopening_the_store() {
    let config = config();
    let client = ApiClient::new(two_host_source(), settings());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("jobstate.db");

    let (entities, relationships) = {
        let state = SqliteJobState::open(&path).unwrap();
        let report = Pipeline::new(&config, &client, &state)
            .unwrap()
            .with_now(now())
            .run()
            .await;
        assert!(report.is_success(), "{report:?}");
        (
            state.entities().await.unwrap().len(),
            state.relationships().await.unwrap().len(),
        )
    };

    let reopened = SqliteJobState::open(&path).unwrap();
    assert_eq!(reopened.entities().await.unwrap().len(), entities);
    assert_eq!(reopened.relationships().await.unwrap().len(), relationships);
    assert!(
        reopened
            .find_entity("qualys_finding:10.0.0.2:1001:22:tcp:0")
            .await
            .unwrap()
            .is_some()
    );
}
