pub mod graph;
pub mod host;
pub mod scan;
pub mod vuln;

pub use graph::{
    DirectRelationship, Entity, MappedRelationship, Properties, Relationship, RelationshipClass,
    RelationshipDirection, RelationshipMapping, TargetEntity, direct_relationship_key,
    filter_keys, relationship_type,
};
pub use host::{DnsData, HostRecord};
pub use scan::{ScanFinding, ScanRecord, ScanResultItem, ScanStatus};
pub use vuln::{Cve, CveList, Cvss, Discovery, OneOrMany, Score, VulnRecord};
