//! ---
//! eph_section: "02-harness-lifecycle"
//! eph_subsection: "module"
//! eph_type: "source"
//! eph_scope: "code"
//! eph_description: "Configuration sink receiving the published connection settings."
//! eph_version: "v0.1.0"
//! eph_owner: "tbd"
//! ---
use indexmap::IndexMap;
use parking_lot::RwLock;

/// Ordered key/value set handed to a sink in one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishedConfig {
    entries: IndexMap<String, String>,
}

impl PublishedConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Receiver for published connection settings.
pub trait ConfigurationSink: Send + Sync {
    fn set(&self, key: &str, value: &str);

    /// Publish a complete set. Implementations that can do so should make the
    /// whole batch visible at once.
    fn apply(&self, config: &PublishedConfig) {
        for (key, value) in config.iter() {
            self.set(key, value);
        }
    }
}

/// In-memory sink readable by test code.
#[derive(Debug, Default)]
pub struct MemorySink {
    values: RwLock<IndexMap<String, String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    pub fn snapshot(&self) -> IndexMap<String, String> {
        self.values.read().clone()
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl ConfigurationSink for MemorySink {
    fn set(&self, key: &str, value: &str) {
        self.values.write().insert(key.to_owned(), value.to_owned());
    }

    fn apply(&self, config: &PublishedConfig) {
        let mut values = self.values.write();
        for (key, value) in config.iter() {
            values.insert(key.to_owned(), value.to_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ConfigurationSink for RecordingSink {
        fn set(&self, key: &str, value: &str) {
            self.calls.lock().push((key.to_owned(), value.to_owned()));
        }
    }

    #[test]
    fn default_apply_preserves_order() {
        let mut config = PublishedConfig::new();
        config.insert("b", "2");
        config.insert("a", "1");
        let sink = RecordingSink::default();
        sink.apply(&config);
        let calls = sink.calls.lock();
        assert_eq!(calls[0], ("b".to_owned(), "2".to_owned()));
        assert_eq!(calls[1], ("a".to_owned(), "1".to_owned()));
    }

    #[test]
    fn memory_sink_apply_inserts_batch() {
        let mut config = PublishedConfig::new();
        config.insert("azure.cosmosdb.uri", "https://127.0.0.1:8081/");
        config.insert("server.port", "8090");
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        sink.apply(&config);
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.get("server.port").as_deref(), Some("8090"));
        let keys: Vec<_> = sink.snapshot().keys().cloned().collect();
        assert_eq!(keys, vec!["azure.cosmosdb.uri", "server.port"]);
    }

    #[test]
    fn set_overwrites_value() {
        let sink = MemorySink::new();
        sink.set("k", "1");
        sink.set("k", "2");
        assert_eq!(sink.get("k").as_deref(), Some("2"));
        assert_eq!(sink.len(), 1);
    }
}
