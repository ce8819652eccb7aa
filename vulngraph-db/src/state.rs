use async_trait::async_trait;
use serde_json::Value;
use vulngraph_types::{Entity, Relationship};

use crate::error::DbError;

/// Per-run store shared by pipeline stages.
///
/// Entity and relationship keys share one namespace; adding a key that is
/// already present fails with [`DbError::DuplicateKey`] and leaves the
/// store unchanged.
#[async_trait]
pub trait JobState: Send + Sync {
    async fn get_data(&self, key: &str) -> Result<Option<Value>, DbError>;

    async fn set_data(&self, key: &str, value: Value) -> Result<(), DbError>;

    /// True if an entity or relationship with this key was added.
    async fn has_key(&self, key: &str) -> Result<bool, DbError>;

    async fn add_entities(&self, entities: Vec<Entity>) -> Result<(), DbError>;

    async fn add_relationships(&self, relationships: Vec<Relationship>) -> Result<(), DbError>;

    async fn find_entity(&self, key: &str) -> Result<Option<Entity>, DbError>;

    /// Entities of one type in insertion order.
    async fn entities_of_type(&self, entity_type: &str) -> Result<Vec<Entity>, DbError>;

    async fn entities(&self) -> Result<Vec<Entity>, DbError>;

    async fn relationships(&self) -> Result<Vec<Relationship>, DbError>;

    async fn add_entity(&self, entity: Entity) -> Result<(), DbError> {
        self.add_entities(vec![entity]).await
    }

    async fn add_relationship(&self, relationship: Relationship) -> Result<(), DbError> {
        self.add_relationships(vec![relationship]).await
    }
}

/// Run `handler` over every stored entity of `entity_type`.
///
/// The entity list is read up front, so the handler may add to the store.
/// Returns the number of entities visited; the first handler error stops
/// the walk.
pub async fn iterate_entities<S, E, F>(
    state: &S,
    entity_type: &str,
    mut handler: F,
) -> Result<usize, E>
where
    S: JobState + ?Sized,
    E: From<DbError>,
    F: AsyncFnMut(Entity) -> Result<(), E>,
{
    let entities = state.entities_of_type(entity_type).await?;
    let count = entities.len();
    for entity in entities {
        handler(entity).await?;
    }
    Ok(count)
}

/// Reject keys already in the store or repeated within one batch.
pub(crate) fn check_new_keys<'k>(
    keys: impl IntoIterator<Item = &'k str>,
    mut exists: impl FnMut(&str) -> Result<bool, DbError>,
) -> Result<(), DbError> {
    let mut batch = std::collections::HashSet::new();
    for key in keys {
        if !batch.insert(key) || exists(key)? {
            return Err(DbError::DuplicateKey(key.to_string()));
        }
    }
    Ok(())
}
