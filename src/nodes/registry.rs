//! Node registry for managing available node kinds.

use crate::core::error::LoadError;
use crate::core::node::{Category, NodeKind, NodeMetadata};
use crate::nodes::builtin::remote::{RemoteNode, RemoteTransport};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Factory function for creating node instances with default config.
pub type NodeFactory = Arc<dyn Fn() -> Box<dyn NodeKind> + Send + Sync>;

/// Rebuilds a node from its kind-tagged config.
pub type NodeDeserializer =
    Arc<dyn Fn(&serde_json::Value) -> Result<Box<dyn NodeKind>, LoadError> + Send + Sync>;

/// Registry entry containing metadata, factory and deserializer.
#[derive(Clone)]
pub struct RegistryEntry {
    /// Cached metadata of a default instance.
    pub metadata: NodeMetadata,
    /// Factory function to create instances.
    pub factory: NodeFactory,
    /// Rebuilds an instance from a saved config.
    pub deserializer: NodeDeserializer,
}

/// Registry of node kinds, keyed by kind tag.
///
/// Loading a saved graph resolves each node's `"kind"` tag here.
pub struct NodeRegistry {
    kinds: IndexMap<String, RegistryEntry>,
    categories: IndexMap<Category, Vec<String>>,
}

/// Deserialize a config into `T`, ignoring the `"kind"` tag.
pub fn deserialize_config<T>(kind: &str, value: &serde_json::Value) -> Result<T, LoadError>
where
    T: DeserializeOwned,
{
    serde_json::from_value(value.clone()).map_err(|e| LoadError::InvalidConfig {
        kind: kind.to_string(),
        message: e.to_string(),
    })
}

impl NodeRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            kinds: IndexMap::new(),
            categories: IndexMap::new(),
        }
    }

    /// Create a registry pre-populated with built-in kinds.
    ///
    /// `remote` needs a transport and is only added by
    /// [`with_transport`](NodeRegistry::with_transport).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::nodes::builtin::register_all(&mut registry);
        registry
    }

    /// Built-in kinds plus `remote`, bound to `transport`.
    pub fn with_transport(transport: Arc<dyn RemoteTransport>) -> Self {
        let mut registry = Self::with_builtins();
        let for_factory = Arc::clone(&transport);
        registry.register_with(
            RemoteNode::default().metadata(),
            move || Box::new(RemoteNode::default().with_transport(Arc::clone(&for_factory))),
            move |value| {
                let node: RemoteNode = deserialize_config(RemoteNode::KIND, value)?;
                Ok(Box::new(node.with_transport(Arc::clone(&transport))))
            },
        );
        registry
    }

    /// Register a kind whose config is its serde representation.
    pub fn register_node<T>(&mut self)
    where
        T: NodeKind + Default + DeserializeOwned + 'static,
    {
        let metadata = T::default().metadata();
        let kind = metadata.kind.clone();
        self.register_with(
            metadata,
            || Box::new(T::default()),
            move |value| Ok(Box::new(deserialize_config::<T>(&kind, value)?)),
        );
    }

    /// Register a kind with explicit factory and deserializer.
    ///
    /// Re-registering a kind replaces the previous entry.
    pub fn register_with<F, D>(&mut self, metadata: NodeMetadata, factory: F, deserializer: D)
    where
        F: Fn() -> Box<dyn NodeKind> + Send + Sync + 'static,
        D: Fn(&serde_json::Value) -> Result<Box<dyn NodeKind>, LoadError> + Send + Sync + 'static,
    {
        let kind = metadata.kind.clone();
        let category = metadata.category;

        let entry = RegistryEntry {
            metadata,
            factory: Arc::new(factory),
            deserializer: Arc::new(deserializer),
        };

        if let Some(previous) = self.kinds.insert(kind.clone(), entry) {
            if let Some(ids) = self.categories.get_mut(&previous.metadata.category) {
                ids.retain(|k| k != &kind);
            }
        }
        self.categories.entry(category).or_default().push(kind);
    }

    /// Create a default-configured node of `kind`.
    pub fn create(&self, kind: &str) -> Option<Box<dyn NodeKind>> {
        self.kinds.get(kind).map(|e| (e.factory)())
    }

    /// Rebuild a node from its kind-tagged config.
    pub fn deserialize(&self, value: &serde_json::Value) -> Result<Box<dyn NodeKind>, LoadError> {
        let kind = value
            .get("kind")
            .and_then(serde_json::Value::as_str)
            .ok_or(LoadError::MissingKind)?;
        let entry = self
            .kinds
            .get(kind)
            .ok_or_else(|| LoadError::UnknownKind(kind.to_string()))?;
        (entry.deserializer)(value)
    }

    /// Get metadata for a kind without creating an instance.
    pub fn get_metadata(&self, kind: &str) -> Option<&NodeMetadata> {
        self.kinds.get(kind).map(|e| &e.metadata)
    }

    /// Check if a kind is registered.
    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    /// All registered kind tags, in registration order.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(|s| s.as_str())
    }

    /// Kinds in one category.
    pub fn kinds_by_category(&self, category: Category) -> Vec<&str> {
        self.categories
            .get(&category)
            .map(|ids| ids.iter().map(|s| s.as_str()).collect())
            .unwrap_or_default()
    }

    /// Metadata grouped by category, in first-registration order.
    pub fn grouped_by_category(&self) -> IndexMap<Category, Vec<&NodeMetadata>> {
        self.categories
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(category, ids)| {
                let entries = ids.iter().filter_map(|id| self.get_metadata(id)).collect();
                (*category, entries)
            })
            .collect()
    }

    /// Search kinds by tag, name or description.
    pub fn search(&self, query: &str) -> Vec<&str> {
        let query = query.to_lowercase();
        self.kinds
            .iter()
            .filter(|(_, entry)| {
                let m = &entry.metadata;
                m.kind.to_lowercase().contains(&query)
                    || m.name.to_lowercase().contains(&query)
                    || m.description.to_lowercase().contains(&query)
            })
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Get the total number of registered kinds.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
