use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use vulngraph_types::{Entity, Relationship};

use crate::error::DbError;
use crate::state::{JobState, check_new_keys};

#[derive(Default)]
struct Inner {
    data: HashMap<String, Value>,
    entities: Vec<Entity>,
    entity_index: HashMap<String, usize>,
    relationships: Vec<Relationship>,
    relationship_keys: HashMap<String, usize>,
}

impl Inner {
    fn has_key(&self, key: &str) -> bool {
        self.entity_index.contains_key(key) || self.relationship_keys.contains_key(key)
    }
}

/// Job state held in process memory.
#[derive(Default)]
pub struct MemoryJobState {
    inner: Mutex<Inner>,
}

impl MemoryJobState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, DbError> {
        self.inner.lock().map_err(|_| DbError::Poisoned)
    }
}

#[async_trait]
impl JobState for MemoryJobState {
    async fn get_data(&self, key: &str) -> Result<Option<Value>, DbError> {
        Ok(self.lock()?.data.get(key).cloned())
    }

    async fn set_data(&self, key: &str, value: Value) -> Result<(), DbError> {
        self.lock()?.data.insert(key.to_string(), value);
        Ok(())
    }

    async fn has_key(&self, key: &str) -> Result<bool, DbError> {
        Ok(self.lock()?.has_key(key))
    }

    async fn add_entities(&self, entities: Vec<Entity>) -> Result<(), DbError> {
        let mut inner = self.lock()?;
        check_new_keys(entities.iter().map(|e| e.key.as_str()), |k| Ok(inner.has_key(k)))?;
        for entity in entities {
            let index = inner.entities.len();
            inner.entity_index.insert(entity.key.clone(), index);
            inner.entities.push(entity);
        }
        Ok(())
    }

    async fn add_relationships(&self, relationships: Vec<Relationship>) -> Result<(), DbError> {
        let mut inner = self.lock()?;
        check_new_keys(relationships.iter().map(Relationship::key), |k| {
            Ok(inner.has_key(k))
        })?;
        for relationship in relationships {
            let index = inner.relationships.len();
            inner
                .relationship_keys
                .insert(relationship.key().to_string(), index);
            inner.relationships.push(relationship);
        }
        Ok(())
    }

    async fn find_entity(&self, key: &str) -> Result<Option<Entity>, DbError> {
        let inner = self.lock()?;
        Ok(inner
            .entity_index
            .get(key)
            .map(|&i| inner.entities[i].clone()))
    }

    async fn entities_of_type(&self, entity_type: &str) -> Result<Vec<Entity>, DbError> {
        Ok(self
            .lock()?
            .entities
            .iter()
            .filter(|e| e.entity_type == entity_type)
            .cloned()
            .collect())
    }

    async fn entities(&self) -> Result<Vec<Entity>, DbError> {
        Ok(self.lock()?.entities.clone())
    }

    async fn relationships(&self) -> Result<Vec<Relationship>, DbError> {
        Ok(self.lock()?.relationships.clone())
    }
}
