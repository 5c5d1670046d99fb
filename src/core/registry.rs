//! Name-keyed factory registry for capabilities and task payload types.
//!
//! A plain map populated at process start; no dynamic loading, no global
//! singleton. The queue pre-creates one lane per registered capability name,
//! and the scheduler instantiates capability instances for workers from the
//! same registry.

use std::collections::HashMap;

/// Factory closure; receives the registered name so the created instance
/// knows its own type name.
pub type Factory<T> = Box<dyn Fn(&str) -> T + Send + Sync>;

/// Generic name -> factory mapping.
pub struct Registry<T> {
    factories: HashMap<String, Factory<T>>,
}

/// Registry of capability instances, keyed by lane name.
pub type CapabilityRegistry = Registry<Box<dyn crate::core::Capability>>;

impl<T> Registry<T> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a factory under `name`. Returns false (and keeps the
    /// existing factory) when the name is already taken.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&str) -> T + Send + Sync + 'static,
    ) -> bool {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return false;
        }
        self.factories.insert(name, Box::new(factory));
        true
    }

    /// Create an instance for `name`, or `None` when unregistered.
    #[must_use]
    pub fn create(&self, name: &str) -> Option<T> {
        self.factories.get(name).map(|f| f(name))
    }

    /// All registered names, sorted for deterministic iteration.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_create() {
        let mut registry: Registry<String> = Registry::new();
        assert!(registry.register("cpu", |name| format!("made-{name}")));

        let instance = registry.create("cpu").unwrap();
        assert_eq!(instance, "made-cpu");
        assert!(registry.create("gpu").is_none());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry: Registry<u32> = Registry::new();
        assert!(registry.register("cpu", |_| 1));
        assert!(!registry.register("cpu", |_| 2));
        assert_eq!(registry.create("cpu"), Some(1));
    }

    #[test]
    fn test_names_sorted() {
        let mut registry: Registry<u32> = Registry::new();
        registry.register("ocr", |_| 0);
        registry.register("cpu", |_| 0);
        registry.register("detect", |_| 0);
        assert_eq!(registry.names(), vec!["cpu", "detect", "ocr"]);
        assert!(registry.contains("ocr"));
        assert!(!registry.contains("lpr"));
    }
}
