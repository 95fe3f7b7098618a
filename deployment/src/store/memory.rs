//! In-memory configuration store

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::errors::DeploymentError;
use crate::store::ConfigStore;

/// Hierarchical in-memory store backed by a JSON object tree. Used by tests
/// and by hosts that run without a durable store.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    root: RwLock<Value>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self {
            root: RwLock::new(Value::Object(Map::new())),
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn read(&self, path: &[&str]) -> Result<Value, DeploymentError> {
        let root = self.root.read().await;
        let mut current = &*root;

        for segment in path {
            current = current
                .as_object()
                .and_then(|obj| obj.get(*segment))
                .ok_or_else(|| {
                    DeploymentError::NotFound(format!("config path {} missing", path.join("/")))
                })?;
        }

        Ok(current.clone())
    }

    async fn write(&self, path: &[&str], value: Value, _depth: u8) -> Result<(), DeploymentError> {
        let (last, parents) = path.split_last().ok_or_else(|| {
            DeploymentError::Invalid("config write requires a non-empty path".to_string())
        })?;

        let mut root = self.root.write().await;
        let mut current = &mut *root;

        for segment in parents {
            current = ensure_object(current)
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }

        ensure_object(current).insert(last.to_string(), value);

        Ok(())
    }

    async fn delete(&self, path: &[&str]) -> Result<(), DeploymentError> {
        let Some((last, parents)) = path.split_last() else {
            return Ok(());
        };

        let mut root = self.root.write().await;
        let mut current = &mut *root;

        for segment in parents {
            match current.as_object_mut().and_then(|obj| obj.get_mut(*segment)) {
                Some(next) => current = next,
                None => return Ok(()),
            }
        }

        if let Some(obj) = current.as_object_mut() {
            obj.remove(*last);
        }

        Ok(())
    }
}

/// Replace non-object values in the walk with an empty object so a write
/// can descend through them.
fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}
