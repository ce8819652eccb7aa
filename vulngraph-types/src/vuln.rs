use serde::{Deserialize, Serialize};

/// Converted XML payloads collapse single-element lists into a bare object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        match self {
            OneOrMany::Many(items) => items.iter(),
            OneOrMany::One(item) => std::slice::from_ref(item).iter(),
        }
    }
}

/// Scores arrive either as JSON numbers or as numeric strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Score {
    Number(f64),
    Text(String),
}

impl Score {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Score::Number(n) => Some(*n),
            Score::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Cve {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct CveList {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cve: Option<OneOrMany<Cve>>,
}

impl CveList {
    /// CVE identifiers in listing order, skipping entries without an id.
    pub fn ids(&self) -> Vec<String> {
        self.cve
            .as_ref()
            .map(|list| list.iter().filter_map(|c| c.id.clone()).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Cvss {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<Score>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Discovery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<u8>,
}

/// A knowledge-base (catalog) vulnerability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct VulnRecord {
    pub qid: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vuln_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity_level: Option<Score>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cve_list: Option<CveList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cvss: Option<Cvss>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cvss_v3: Option<Cvss>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<Discovery>,
}

impl VulnRecord {
    pub fn new(qid: u64, title: impl Into<String>) -> Self {
        Self {
            qid,
            title: title.into(),
            vuln_type: None,
            severity_level: None,
            category: None,
            solution: None,
            cve_list: None,
            cvss: None,
            cvss_v3: None,
            discovery: None,
        }
    }

    pub fn cve_ids(&self) -> Vec<String> {
        self.cve_list.as_ref().map(CveList::ids).unwrap_or_default()
    }

    pub fn cvss_base(&self) -> Option<f64> {
        self.cvss.as_ref()?.base.as_ref()?.as_f64()
    }

    pub fn cvss_v3_base(&self) -> Option<f64> {
        self.cvss_v3.as_ref()?.base.as_ref()?.as_f64()
    }
}
