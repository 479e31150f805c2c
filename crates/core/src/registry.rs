//! Read-only source of truth for the entities conversations are about.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::domain::entity::{Entity, EntityId};

pub trait EntityRegistry: Send + Sync {
    fn all(&self) -> &[Entity];

    fn get(&self, id: &EntityId) -> Option<&Entity>;

    fn contains(&self, id: &EntityId) -> bool {
        self.get(id).is_some()
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("could not read registry fixture `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse registry fixture `{path}`: {source}")]
    ParseFile { path: PathBuf, source: serde_json::Error },
    #[error("duplicate entity id `{0}` in registry")]
    DuplicateId(String),
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryRegistry {
    entities: Vec<Entity>,
    index: HashMap<EntityId, usize>,
}

impl InMemoryRegistry {
    pub fn new(entities: Vec<Entity>) -> Result<Self, RegistryError> {
        let mut index = HashMap::with_capacity(entities.len());
        for (position, entity) in entities.iter().enumerate() {
            if index.insert(entity.id.clone(), position).is_some() {
                return Err(RegistryError::DuplicateId(entity.id.0.clone()));
            }
        }
        Ok(Self { entities, index })
    }

    pub fn from_json_file(path: &Path) -> Result<Self, RegistryError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| RegistryError::ReadFile { path: path.to_path_buf(), source })?;
        let entities = serde_json::from_str::<Vec<Entity>>(&raw)
            .map_err(|source| RegistryError::ParseFile { path: path.to_path_buf(), source })?;
        Self::new(entities)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl EntityRegistry for InMemoryRegistry {
    fn all(&self) -> &[Entity] {
        &self.entities
    }

    fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.index.get(id).and_then(|position| self.entities.get(*position))
    }
}
