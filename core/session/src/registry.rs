//! Protocol registry for resolving sessions by name.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::local::LocalSession;
use crate::memory::MemorySession;
use crate::session::Session;
use skiff_common::{Error, Result};

/// Factory function type for creating sessions.
pub type SessionFactory = Box<dyn Fn(Value) -> Result<Arc<dyn Session>> + Send + Sync>;

/// Registry of session factories keyed by protocol name.
pub struct ProtocolRegistry {
    factories: HashMap<String, SessionFactory>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a session factory.
    ///
    /// # Errors
    /// - Returns error if the protocol is already registered
    pub fn register(&mut self, protocol: impl Into<String>, factory: SessionFactory) -> Result<()> {
        let protocol = protocol.into();
        if self.factories.contains_key(&protocol) {
            return Err(Error::AlreadyExists(format!(
                "Protocol '{}' is already registered",
                protocol
            )));
        }
        self.factories.insert(protocol, factory);
        Ok(())
    }

    /// Build a session for `protocol` from its JSON configuration.
    ///
    /// # Errors
    /// - Protocol not registered
    /// - Configuration invalid for the protocol
    pub fn resolve(&self, protocol: &str, config: Value) -> Result<Arc<dyn Session>> {
        let factory = self.factories.get(protocol).ok_or_else(|| {
            Error::NotFound(format!("Protocol '{}' is not registered", protocol))
        })?;
        factory(config)
    }

    /// Registered protocol names, sorted.
    pub fn protocols(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn memory_factory(config: Value) -> Result<Arc<dyn Session>> {
    let hostname = config
        .get("hostname")
        .and_then(|v| v.as_str())
        .unwrap_or("localhost");
    Ok(Arc::new(MemorySession::new(hostname)))
}

fn local_factory(config: Value) -> Result<Arc<dyn Session>> {
    let root = config
        .get("root")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidInput("Local protocol requires 'root' path".to_string()))?;
    Ok(Arc::new(LocalSession::new(root)?))
}

/// Registry with the bundled `memory` and `local` protocols.
pub fn create_default_registry() -> ProtocolRegistry {
    let mut factories: HashMap<String, SessionFactory> = HashMap::new();
    factories.insert("memory".to_string(), Box::new(memory_factory));
    factories.insert("local".to_string(), Box::new(local_factory));
    ProtocolRegistry { factories }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_protocols() {
        let registry = create_default_registry();
        assert_eq!(registry.protocols(), vec!["local", "memory"]);

        let session = registry
            .resolve("memory", json!({ "hostname": "unit" }))
            .unwrap();
        assert_eq!(session.host().hostname, "unit");
    }

    #[test]
    fn test_local_requires_root() {
        let registry = create_default_registry();
        assert!(matches!(
            registry.resolve("local", Value::Null),
            Err(Error::InvalidInput(_))
        ));

        let temp = tempfile::TempDir::new().unwrap();
        let session = registry
            .resolve("local", json!({ "root": temp.path().to_str().unwrap() }))
            .unwrap();
        assert_eq!(session.host().protocol, "local");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = ProtocolRegistry::new();
        registry.register("test", Box::new(memory_factory)).unwrap();
        assert!(registry.register("test", Box::new(memory_factory)).is_err());
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = ProtocolRegistry::new();
        assert!(matches!(
            registry.resolve("sftp", Value::Null),
            Err(Error::NotFound(_))
        ));
    }
}
