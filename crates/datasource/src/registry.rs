use std::collections::HashMap;
use std::sync::Arc;

use weft_core::{ActionError, DataSource, DataSourceId};

/// Globally registered data sources.
///
/// Built once at startup and then shared behind an `Arc`. Screen-local
/// descriptors are passed per lookup and take precedence.
#[derive(Debug, Default)]
pub struct DataSourceRegistry {
    sources: HashMap<DataSourceId, Arc<DataSource>>,
}

impl DataSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, replacing any with the same id.
    pub fn register(&mut self, source: DataSource) {
        self.sources.insert(source.id.clone(), Arc::new(source));
    }

    pub fn get(&self, id: &str) -> Option<Arc<DataSource>> {
        self.sources.get(id).cloned()
    }

    /// Look up `id`, preferring screen-local descriptors.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::NotFound`] when neither registry has `id`.
    pub fn find(&self, id: &str, local: &[DataSource]) -> Result<Arc<DataSource>, ActionError> {
        if let Some(source) = local.iter().find(|ds| ds.id.as_str() == id) {
            return Ok(Arc::new(source.clone()));
        }
        self.get(id)
            .ok_or_else(|| ActionError::NotFound(format!("data source '{id}'")))
    }

    /// Return a sorted list of all registered ids.
    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.sources.keys().map(DataSourceId::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl FromIterator<DataSource> for DataSourceRegistry {
    fn from_iter<I: IntoIterator<Item = DataSource>>(iter: I) -> Self {
        let mut registry = Self::new();
        for source in iter {
            registry.register(source);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_list() {
        let registry: DataSourceRegistry = [
            DataSource::new("b", "/b"),
            DataSource::new("a", "/a"),
        ]
        .into_iter()
        .collect();
        assert_eq!(registry.list(), vec!["a", "b"]);
        assert_eq!(registry.len(), 2);
        assert!(!registry.is_empty());
    }

    #[test]
    fn local_descriptors_shadow_global() {
        let mut registry = DataSourceRegistry::new();
        registry.register(DataSource::new("todos", "/global"));
        let local = vec![DataSource::new("todos", "/local")];

        assert_eq!(registry.find("todos", &local).unwrap().path, "/local");
        assert_eq!(registry.find("todos", &[]).unwrap().path, "/global");
    }

    #[test]
    fn unknown_id_is_not_found() {
        let registry = DataSourceRegistry::new();
        let err = registry.find("missing", &[]).unwrap_err();
        assert!(matches!(err, ActionError::NotFound(_)));
    }
}
