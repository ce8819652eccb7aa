use serde::{Deserialize, Serialize};

/// DNS breakdown reported alongside a host record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DnsData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,
}

/// A host as returned by the vendor host listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct HostRecord {
    pub id: u64,
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_data: Option<DnsData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ec2_instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(rename = "QG_HOSTID", default, skip_serializing_if = "Option::is_none")]
    pub qg_host_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_vuln_scan_datetime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_vm_scanned_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_vm_auth_scanned_date: Option<String>,
}

impl HostRecord {
    pub fn new(id: u64, ip: impl Into<String>) -> Self {
        Self {
            id,
            ip: ip.into(),
            tracking_method: None,
            dns: None,
            dns_data: None,
            cloud_provider: None,
            cloud_service: None,
            cloud_resource_id: None,
            ec2_instance_id: None,
            os: None,
            qg_host_id: None,
            last_vuln_scan_datetime: None,
            last_vm_scanned_date: None,
            last_vm_auth_scanned_date: None,
        }
    }

    /// Fully qualified name, preferring the structured DNS data.
    pub fn fqdn(&self) -> Option<&str> {
        self.dns_data
            .as_ref()
            .and_then(|d| d.fqdn.as_deref())
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_record_from_vendor_json() {
        let json = r#"{
            "ID": 4242,
            "IP": "10.0.0.1",
            "TRACKING_METHOD": "IP",
            "DNS": "web01",
            "DNS_DATA": {"HOSTNAME": "web01", "DOMAIN": "corp.local", "FQDN": "web01.corp.local"},
            "CLOUD_PROVIDER": "AWS",
            "EC2_INSTANCE_ID": "i-0abc",
            "QG_HOSTID": "qg-1",
            "LAST_VULN_SCAN_DATETIME": "2024-03-01T10:00:00Z"
        }"#;
        let host: HostRecord = serde_json::from_str(json).unwrap();
        assert_eq!(host.id, 4242);
        assert_eq!(host.ip, "10.0.0.1");
        assert_eq!(host.fqdn(), Some("web01.corp.local"));
        assert_eq!(host.ec2_instance_id.as_deref(), Some("i-0abc"));
        assert_eq!(host.qg_host_id.as_deref(), Some("qg-1"));
        assert!(host.cloud_service.is_none());
    }

    #[test]
    fn empty_fqdn_is_absent() {
        let mut host = HostRecord::new(1, "10.0.0.2");
        host.dns_data = Some(DnsData {
            fqdn: Some(String::new()),
            ..Default::default()
        });
        assert_eq!(host.fqdn(), None);
    }
}
