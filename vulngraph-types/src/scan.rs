use serde::{Deserialize, Deserializer, Serialize};

/// Processing state of a scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ScanStatus {
    #[serde(default)]
    pub state: String,
}

/// One scan (assessment) from the scan list or a host's scan history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ScanRecord {
    #[serde(rename = "REF")]
    pub reference: String,
    #[serde(rename = "TYPE", default)]
    pub scan_type: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_login: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_datetime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_priority: Option<String>,
    #[serde(default)]
    pub processed: u8,
    #[serde(default)]
    pub status: ScanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// A single detection row from a scan's results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanFinding {
    pub ip: String,
    pub qid: u64,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_empty")]
    pub finding_type: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub severity: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub port: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub protocol: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub ssl: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub netbios: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cve_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bugtraq_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threat: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exploitability: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associated_malware: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pci_vuln: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl ScanFinding {
    pub fn new(ip: impl Into<String>, qid: u64) -> Self {
        Self {
            ip: ip.into(),
            qid,
            title: String::new(),
            finding_type: String::new(),
            severity: String::new(),
            port: String::new(),
            protocol: String::new(),
            ssl: String::new(),
            dns: None,
            netbios: None,
            os: None,
            ip_status: None,
            fqdn: None,
            cve_id: None,
            vendor_reference: None,
            bugtraq_id: None,
            threat: None,
            impact: None,
            solution: None,
            exploitability: None,
            associated_malware: None,
            results: None,
            pci_vuln: None,
            instance: None,
            category: None,
        }
    }

    /// The vendor reports the SSL flag as "yes"/"no".
    pub fn is_ssl(&self) -> bool {
        self.ssl.eq_ignore_ascii_case("yes")
    }
}

/// Scan result pages mix a report header, the scan job summary and the
/// detection rows. Only the detection rows carry `qid`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ScanResultItem {
    Finding(Box<ScanFinding>),
    Other(serde_json::Value),
}

impl ScanResultItem {
    pub fn into_finding(self) -> Option<ScanFinding> {
        match self {
            ScanResultItem::Finding(f) => Some(*f),
            ScanResultItem::Other(_) => None,
        }
    }

    /// A row that carries `qid` but did not decode as a detection.
    pub fn malformed_detection(&self) -> Option<&serde_json::Value> {
        match self {
            ScanResultItem::Other(value) if value.get("qid").is_some() => Some(value),
            _ => None,
        }
    }
}

/// The vendor sends `null` for blank text columns.
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
