use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use vulngraph_db::JobState;
use vulngraph_types::{Entity, Relationship};

#[derive(Debug, Serialize)]
struct GraphDocument {
    entities: Vec<Entity>,
    relationships: Vec<Relationship>,
}

/// Write every entity and relationship in `state` to `path` as JSON.
/// Returns the entity and relationship counts.
pub async fn export_graph(state: &dyn JobState, path: &Path) -> Result<(usize, usize)> {
    let document = GraphDocument {
        entities: state.entities().await.context("failed to read entities")?,
        relationships: state
            .relationships()
            .await
            .context("failed to read relationships")?,
    };
    let counts = (document.entities.len(), document.relationships.len());

    let json = serde_json::to_string_pretty(&document).context("failed to serialize graph")?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vulngraph_db::MemoryJobState;
    use vulngraph_types::{DirectRelationship, RelationshipClass};

    #[tokio::test]
    async fn export_writes_entities_and_relationships() {
        let state = MemoryJobState::new();
        let account = Entity::new("qualys_account:qg3:analyst", "qualys_account", &["Account"]);
        let host = Entity::new("qualys_host:10.0.0.1", "qualys_host", &["Host"])
            .with("ip", "10.0.0.1");
        let has = DirectRelationship::new(RelationshipClass::Has, &account, &host);
        state.add_entities(vec![account, host]).await.unwrap();
        state.add_relationship(has.into()).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("graph.json");
        let counts = export_graph(&state, &path).await.unwrap();
        assert_eq!(counts, (2, 1));

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["entities"].as_array().unwrap().len(), 2);
        assert_eq!(
            written["relationships"][0]["_type"],
            "qualys_account_has_host"
        );
    }
}
