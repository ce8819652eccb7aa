// ---------------------------------------------------------------------------
// Vendor record -> graph conversion
// ---------------------------------------------------------------------------
//
// Pure functions: every key is derived from the record alone.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use vulngraph_types::{
    Entity, HostRecord, ScanFinding, ScanRecord, TargetEntity, VulnRecord, filter_keys,
};

use crate::config::IntegrationConfig;
use crate::constants::*;

/// Parse a vendor timestamp into epoch milliseconds.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) and bare dates.
pub fn parse_time(value: Option<&str>) -> Option<i64> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Some(t.timestamp_millis());
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(t.and_utc().timestamp_millis());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc().timestamp_millis())
}

/// Vendor severities are numeric strings, 1 through 5.
pub fn parse_severity(value: &str) -> Option<u8> {
    value.trim().parse().ok()
}

pub fn create_account_entity(config: &IntegrationConfig, ui_host: &str) -> Entity {
    Entity::new(
        format!("{ENTITY_TYPE_ACCOUNT}:{ui_host}:{}", config.username),
        ENTITY_TYPE_ACCOUNT,
        &["Account"],
    )
    .with("name", config.username.as_str())
    .with("username", config.username.as_str())
    .with("webLink", format!("https://qualysguard.{ui_host}/"))
}

pub fn create_vmdr_service_entity(account_key: &str) -> Entity {
    Entity::new(
        format!("{ENTITY_TYPE_SERVICE_VMDR}:{account_key}"),
        ENTITY_TYPE_SERVICE_VMDR,
        &["Service"],
    )
    .with("name", "Qualys Vulnerability Manager")
    .with("displayName", "Qualys Vulnerability Manager")
    .with("category", vec!["security"])
    .with("function", vec!["scanning", "vulnerability-management"])
}

pub fn host_key(ip: &str) -> String {
    format!("{ENTITY_TYPE_HOST}:{ip}")
}

pub fn create_host_entity(host: &HostRecord, recently_scanned: bool) -> Entity {
    Entity::new(host_key(&host.ip), ENTITY_TYPE_HOST, &["Host"])
        .with_raw(host)
        .with("id", host.id.to_string())
        .with("ip", host.ip.as_str())
        .with("name", host.ip.as_str())
        .with("trackingMethod", host.tracking_method.clone())
        .with("dns", host.dns.clone())
        .with("fqdn", host.fqdn())
        .with("cloudProvider", host.cloud_provider.clone())
        .with("cloudService", host.cloud_service.clone())
        .with("cloudResourceId", host.cloud_resource_id.clone())
        .with("ec2InstanceId", host.ec2_instance_id.clone())
        .with("os", host.os.clone())
        .with("qgHostId", host.qg_host_id.clone())
        .with(
            "lastVulnScanDatetime",
            parse_time(host.last_vuln_scan_datetime.as_deref()),
        )
        .with(
            "lastVmScannedDate",
            parse_time(host.last_vm_scanned_date.as_deref()),
        )
        .with(
            "lastVmAuthScannedDate",
            parse_time(host.last_vm_auth_scanned_date.as_deref()),
        )
        .with("recentlyScanned", recently_scanned)
}

pub fn assessment_key(scan_ref: &str) -> String {
    format!("{ENTITY_TYPE_ASSESSMENT}:{scan_ref}")
}

pub fn create_assessment_entity(scan: &ScanRecord) -> Entity {
    Entity::new(
        assessment_key(&scan.reference),
        ENTITY_TYPE_ASSESSMENT,
        &["Assessment"],
    )
    .with_raw(scan)
    .with("ref", scan.reference.as_str())
    .with("type", scan.scan_type.as_str())
    .with("name", scan.title.as_str())
    .with("summary", scan.title.as_str())
    .with("userLogin", scan.user_login.clone())
    .with("launchDatetime", parse_time(scan.launch_datetime.as_deref()))
    .with("duration", scan.duration.clone())
    .with("processingPriority", scan.processing_priority.clone())
    .with("processed", scan.processed == 1)
    .with("statusState", scan.status.state.as_str())
    .with("target", scan.target.clone())
    .with("category", "Vulnerability Scan")
    .with("internal", true)
}

/// One finding per host, QID, port, protocol and TLS flag.
pub fn finding_key(finding: &ScanFinding) -> String {
    format!(
        "qualys_finding:{}:{}:{}:{}:{}",
        finding.ip,
        finding.qid,
        finding.port,
        finding.protocol,
        u8::from(finding.is_ssl())
    )
}

pub fn create_finding_entity(finding: &ScanFinding) -> Entity {
    let numeric_severity = parse_severity(&finding.severity);
    let impact = finding.impact.as_deref().filter(|s| !s.is_empty());
    Entity::new(
        finding_key(finding),
        ENTITY_TYPE_HOST_FINDING,
        &["Finding"],
    )
    .with_raw(finding)
    .with("name", finding.title.as_str())
    .with("title", finding.title.as_str())
    .with("ip", finding.ip.as_str())
    .with("qid", finding.qid)
    .with("type", finding.finding_type.as_str())
    .with("severity", finding.severity.as_str())
    .with("numericSeverity", numeric_severity)
    .with("port", finding.port.as_str())
    .with("protocol", finding.protocol.as_str())
    .with("ssl", finding.is_ssl())
    .with("dns", finding.dns.clone())
    .with("netbios", finding.netbios.clone())
    .with("os", finding.os.clone())
    .with("ipStatus", finding.ip_status.clone())
    .with("fqdn", finding.fqdn.clone())
    .with("cveId", finding.cve_id.clone())
    .with("vendorReference", finding.vendor_reference.clone())
    .with("bugtraqId", finding.bugtraq_id.clone())
    .with("threat", finding.threat.clone())
    .with("impact", impact)
    .with("solution", finding.solution.clone())
    .with("associatedMalware", finding.associated_malware.clone())
    .with("results", finding.results.clone())
    .with("pciVuln", finding.pci_vuln.clone())
    .with("instance", finding.instance.clone())
    .with("category", finding.category.clone())
    .with("exploitability", finding.exploitability.clone())
    .with("exploitable", finding.exploitability.is_some())
    .with("open", true)
}

pub fn vuln_web_link(ui_host: &str, qid: u64) -> String {
    format!("https://qualysguard.{ui_host}/fo/common/vuln_info.php?id={qid}")
}

pub fn qualys_vuln_key(qid: u64) -> String {
    format!("vuln-qid:{qid}")
}

/// Targets a finding for `vuln` should point at.
///
/// The catalog target (`vuln-qid:<qid>`) is always first. With
/// `include_cves`, one CVE target per listed CVE id follows, keyed by the
/// lower-cased id.
pub fn vulnerability_target_entities(
    ui_host: &str,
    vuln: &VulnRecord,
    include_cves: bool,
) -> Vec<TargetEntity> {
    let cvss = vuln.cvss_base();
    let cvss_v3 = vuln.cvss_v3_base();
    let severity = vuln
        .severity_level
        .as_ref()
        .and_then(|s| s.as_f64());

    let mut targets = vec![
        TargetEntity::new(ENTITY_TYPE_QUALYS_VULN)
            .with_class("Vulnerability")
            .with_key(qualys_vuln_key(vuln.qid))
            .with("qid", vuln.qid)
            .with("id", vuln.qid.to_string())
            .with("name", vuln.title.as_str())
            .with("displayName", vuln.title.as_str())
            .with("webLink", vuln_web_link(ui_host, vuln.qid))
            .with("severityLevel", severity)
            .with("cveIds", vuln.cve_ids())
            .with("cvssScore", cvss)
            .with("cvssScoreV3", cvss_v3)
            .with("vulnType", vuln.vuln_type.clone())
            .with("solution", vuln.solution.clone())
            .with(
                "discoveryRemote",
                vuln.discovery.as_ref().and_then(|d| d.remote),
            )
            .with("category", vuln.category.clone()),
    ];

    if include_cves && let Some(list) = vuln.cve_list.as_ref().and_then(|l| l.cve.as_ref()) {
        for cve in list.iter() {
            let Some(id) = cve.id.as_deref() else {
                continue;
            };
            targets.push(
                TargetEntity::new(ENTITY_TYPE_CVE)
                    .with_class("Vulnerability")
                    .with_key(id.to_lowercase())
                    .with("qid", vuln.qid)
                    .with("id", id)
                    .with("name", id)
                    .with("displayName", id)
                    .with("webLink", cve.url.clone())
                    .with("cvssScore", cvss)
                    .with("cvssScoreV3", cvss_v3),
            );
        }
    }

    targets
}

/// Mapped target for the cloud instance behind a host, with its filter keys.
pub fn host_cloud_target(host: &HostRecord) -> Option<(TargetEntity, Vec<Vec<String>>)> {
    let provider = host.cloud_provider.as_deref().unwrap_or_default();
    if let Some(instance_id) = host
        .ec2_instance_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .or_else(|| {
            host.cloud_resource_id
                .as_deref()
                .filter(|_| provider.eq_ignore_ascii_case("aws"))
        })
    {
        let target = TargetEntity::new(ENTITY_TYPE_EC2_INSTANCE)
            .with("instanceId", instance_id)
            .with("publicIpAddress", host.ip.as_str());
        return Some((target, filter_keys(&[&["_type", "instanceId"]])));
    }
    if provider.eq_ignore_ascii_case("gcp")
        && let Some(id) = host.cloud_resource_id.as_deref().filter(|id| !id.is_empty())
    {
        let target = TargetEntity::new(ENTITY_TYPE_GCP_INSTANCE)
            .with("id", id)
            .with("publicIpAddress", host.ip.as_str());
        return Some((target, filter_keys(&[&["_type", "id"]])));
    }
    None
}
