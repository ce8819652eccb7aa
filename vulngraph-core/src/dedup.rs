use std::collections::HashSet;

use vulngraph_types::{MappedRelationship, RelationshipClass, TargetEntity, filter_keys};

/// Relationships built for one source, split by first occurrence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildOutcome {
    pub created: Vec<MappedRelationship>,
    /// Later relationships whose key matched an earlier one.
    pub duplicates: Vec<MappedRelationship>,
}

impl BuildOutcome {
    pub fn duplicate_keys(&self) -> Vec<&str> {
        self.duplicates.iter().map(|r| r.key.as_str()).collect()
    }
}

/// Build one mapped relationship per target, keeping at most one per key.
///
/// The key covers the class, source, target type and the target values
/// named by the first filter-key combination, so targets a matcher would
/// resolve to the same entity collapse into one edge.
pub fn build_mapped_relationships(
    class: RelationshipClass,
    source: (&str, &str),
    target_filter_keys: &[Vec<String>],
    targets: impl IntoIterator<Item = TargetEntity>,
    skip_target_creation: bool,
) -> BuildOutcome {
    let mut seen = HashSet::new();
    let mut outcome = BuildOutcome::default();
    for target in targets {
        let relationship = MappedRelationship::new(
            class,
            source,
            target_filter_keys.to_vec(),
            target,
            skip_target_creation,
        );
        if seen.insert(relationship.key.clone()) {
            outcome.created.push(relationship);
        } else {
            outcome.duplicates.push(relationship);
        }
    }
    outcome
}

/// `finding IS vulnerability` edges, matched on target type and key.
pub fn build_finding_vulnerability_relationships(
    finding_type: &str,
    finding_key: &str,
    targets: impl IntoIterator<Item = TargetEntity>,
) -> BuildOutcome {
    build_mapped_relationships(
        RelationshipClass::Is,
        (finding_type, finding_key),
        &filter_keys(&[&["_type", "_key"]]),
        targets,
        false,
    )
}
