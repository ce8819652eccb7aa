//! Entity types, job-data keys and stage identifiers shared by the pipeline.

pub const ENTITY_TYPE_ACCOUNT: &str = "qualys_account";
pub const ENTITY_TYPE_SERVICE_VMDR: &str = "qualys_vulnerability_manager";
pub const ENTITY_TYPE_HOST: &str = "qualys_host";
pub const ENTITY_TYPE_ASSESSMENT: &str = "qualys_assessment";
pub const ENTITY_TYPE_HOST_FINDING: &str = "qualys_host_finding";

/// Catalog vulnerability, always produced for a QID.
pub const ENTITY_TYPE_QUALYS_VULN: &str = "qualys_vuln";
/// CVE vulnerability, produced only when enabled.
pub const ENTITY_TYPE_CVE: &str = "cve";

pub const ENTITY_TYPE_EC2_INSTANCE: &str = "aws_instance";
pub const ENTITY_TYPE_GCP_INSTANCE: &str = "google_compute_instance";

pub const DATA_ACCOUNT_ENTITY: &str = "ACCOUNT_ENTITY";
pub const DATA_VMDR_SERVICE_ENTITY: &str = "VMDR_SERVICE_ENTITY";
pub const DATA_SCANNED_HOST_IDS: &str = "SCANNED_HOST_IDS";
pub const DATA_HOST_VULNERABILITY_FINDING_KEYS: &str = "HOST_VULNERABILITY_FINDING_KEYS";
pub const DATA_WEBAPP_VULNERABILITY_FINDING_KEYS: &str = "WEBAPP_VULNERABILITY_FINDING_KEYS";

/// Catalog entries and findings between progress logs.
pub const RECORDS_LOG_EVERY: usize = 1000;
/// Scanned host ids between progress logs.
pub const HOST_IDS_LOG_EVERY: usize = 5000;
