// ---------------------------------------------------------------------------
// Graph entities and relationships
// ---------------------------------------------------------------------------

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Free-form entity properties. `null` values are never stored.
pub type Properties = serde_json::Map<String, Value>;

/// A graph entity: type tag, class tags, key and normalized properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(rename = "_type")]
    pub entity_type: String,
    #[serde(rename = "_class")]
    pub class: Vec<String>,
    /// The vendor record this entity was converted from.
    #[serde(rename = "_rawData", default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<Value>,
    #[serde(flatten)]
    pub properties: Properties,
}

impl Entity {
    pub fn new(key: impl Into<String>, entity_type: impl Into<String>, class: &[&str]) -> Self {
        Self {
            key: key.into(),
            entity_type: entity_type.into(),
            class: class.iter().map(|c| c.to_string()).collect(),
            raw_data: None,
            properties: Properties::new(),
        }
    }

    /// Set a property. Absent values (`None`, JSON `null`) leave the
    /// property unset rather than storing a placeholder.
    pub fn with<V: Into<Value>>(mut self, name: &str, value: V) -> Self {
        set_property(&mut self.properties, name, value);
        self
    }

    /// Attach the source record.
    pub fn with_raw<T: Serialize>(mut self, source: &T) -> Self {
        self.raw_data = serde_json::to_value(source).ok();
        self
    }

    /// Decode the source record, if one was attached and still matches `T`.
    pub fn raw<T: DeserializeOwned>(&self) -> Option<T> {
        self.raw_data
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

fn set_property<V: Into<Value>>(properties: &mut Properties, name: &str, value: V) {
    match value.into() {
        Value::Null => {}
        v => {
            properties.insert(name.to_string(), v);
        }
    }
}

/// Relationship verbs used by this graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipClass {
    Has,
    Is,
    Performed,
    Identified,
}

impl RelationshipClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipClass::Has => "HAS",
            RelationshipClass::Is => "IS",
            RelationshipClass::Performed => "PERFORMED",
            RelationshipClass::Identified => "IDENTIFIED",
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            RelationshipClass::Has => "has",
            RelationshipClass::Is => "is",
            RelationshipClass::Performed => "performed",
            RelationshipClass::Identified => "identified",
        }
    }
}

impl fmt::Display for RelationshipClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relationship type tag, e.g. `qualys_host_has_assessment`.
///
/// When the target type shares the source's leading namespace segment
/// (`qualys_`), the segment is not repeated.
pub fn relationship_type(class: RelationshipClass, from_type: &str, to_type: &str) -> String {
    let namespace = from_type.split('_').next().unwrap_or(from_type);
    let to = to_type
        .strip_prefix(namespace)
        .and_then(|rest| rest.strip_prefix('_'))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(to_type);
    format!("{from_type}_{}_{to}", class.verb())
}

/// An edge between two entities that both exist in the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectRelationship {
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(rename = "_type")]
    pub relationship_type: String,
    #[serde(rename = "_class")]
    pub class: RelationshipClass,
    #[serde(rename = "_fromEntityKey")]
    pub from_key: String,
    #[serde(rename = "_toEntityKey")]
    pub to_key: String,
}

impl DirectRelationship {
    pub fn new(class: RelationshipClass, from: &Entity, to: &Entity) -> Self {
        Self::between(
            class,
            (from.entity_type.as_str(), from.key.as_str()),
            (to.entity_type.as_str(), to.key.as_str()),
        )
    }

    /// Build from `(type, key)` pairs when the entities are not at hand.
    pub fn between(class: RelationshipClass, from: (&str, &str), to: (&str, &str)) -> Self {
        Self {
            key: direct_relationship_key(class, from.1, to.1),
            relationship_type: relationship_type(class, from.0, to.0),
            class,
            from_key: from.1.to_string(),
            to_key: to.1.to_string(),
        }
    }
}

/// Canonical key of a direct edge; depends only on its endpoints and class.
pub fn direct_relationship_key(class: RelationshipClass, from_key: &str, to_key: &str) -> String {
    format!("{from_key}|{}|{to_key}", class.verb())
}

/// Properties describing the far side of a mapped relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEntity {
    #[serde(rename = "_type")]
    pub entity_type: String,
    #[serde(rename = "_class", default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(rename = "_key", default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(flatten)]
    pub properties: Properties,
}

impl TargetEntity {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            class: None,
            key: None,
            properties: Properties::new(),
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with<V: Into<Value>>(mut self, name: &str, value: V) -> Self {
        set_property(&mut self.properties, name, value);
        self
    }

    /// The value a matcher would compare for `name`.
    pub fn filter_value(&self, name: &str) -> Option<String> {
        match name {
            "_type" => Some(self.entity_type.clone()),
            "_key" => self.key.clone(),
            "_class" => self.class.clone(),
            other => self.properties.get(other).map(|v| match v {
                Value::String(s) => s.clone(),
                v => v.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipDirection {
    Forward,
    Reverse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipMapping {
    pub source_entity_key: String,
    pub relationship_direction: RelationshipDirection,
    /// Property-name combinations the matcher tries, in order.
    pub target_filter_keys: Vec<Vec<String>>,
    pub target_entity: TargetEntity,
    #[serde(default)]
    pub skip_target_creation: bool,
}

/// An edge whose target is resolved by an external matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedRelationship {
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(rename = "_type")]
    pub relationship_type: String,
    #[serde(rename = "_class")]
    pub class: RelationshipClass,
    #[serde(rename = "_mapping")]
    pub mapping: RelationshipMapping,
}

impl MappedRelationship {
    /// Build a forward mapped relationship from `source` to `target`.
    ///
    /// The key is derived from the source key, the relationship type and the
    /// target values named by the first filter-key combination, so two
    /// descriptors a matcher would resolve to the same target share a key.
    pub fn new(
        class: RelationshipClass,
        source: (&str, &str),
        target_filter_keys: Vec<Vec<String>>,
        target: TargetEntity,
        skip_target_creation: bool,
    ) -> Self {
        let relationship_type = relationship_type(class, source.0, &target.entity_type);
        let identity = target_filter_keys
            .first()
            .map(|names| {
                names
                    .iter()
                    .map(|n| format!("{n}={}", target.filter_value(n).unwrap_or_default()))
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_default();
        Self {
            key: format!("{}|{relationship_type}|{identity}", source.1),
            relationship_type,
            class,
            mapping: RelationshipMapping {
                source_entity_key: source.1.to_string(),
                relationship_direction: RelationshipDirection::Forward,
                target_filter_keys,
                target_entity: target,
                skip_target_creation,
            },
        }
    }
}

/// Any relationship the job store accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Relationship {
    Mapped(MappedRelationship),
    Direct(DirectRelationship),
}

impl Relationship {
    pub fn key(&self) -> &str {
        match self {
            Relationship::Mapped(r) => &r.key,
            Relationship::Direct(r) => &r.key,
        }
    }

    pub fn relationship_type(&self) -> &str {
        match self {
            Relationship::Mapped(r) => &r.relationship_type,
            Relationship::Direct(r) => &r.relationship_type,
        }
    }
}

impl From<DirectRelationship> for Relationship {
    fn from(r: DirectRelationship) -> Self {
        Relationship::Direct(r)
    }
}

impl From<MappedRelationship> for Relationship {
    fn from(r: MappedRelationship) -> Self {
        Relationship::Mapped(r)
    }
}

/// Convenience for `target_filter_keys` literals.
pub fn filter_keys(combos: &[&[&str]]) -> Vec<Vec<String>> {
    combos
        .iter()
        .map(|names| names.iter().map(|n| n.to_string()).collect())
        .collect()
}
