//! Name → factory lookup for transforms.

use std::collections::BTreeMap;
use std::sync::Arc;

use assetforge_shared::{ForgeError, Result};

use crate::Transform;
use crate::builtin;

/// Builds a transform from the optional argument of a step spec.
pub type TransformFactory = Arc<dyn Fn(Option<&str>) -> Result<Arc<dyn Transform>> + Send + Sync>;

/// Registered transform factories keyed by name.
#[derive(Clone, Default)]
pub struct TransformRegistry {
    factories: BTreeMap<String, TransformFactory>,
}

impl TransformRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in transform.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    /// Add or replace a factory.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(Option<&str>) -> Result<Arc<dyn Transform>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Instantiate the transform for a `name` or `name:argument` spec.
    pub fn create(&self, spec: &str) -> Result<Arc<dyn Transform>> {
        let (name, arg) = match spec.split_once(':') {
            Some((name, arg)) => (name.trim(), Some(arg.trim()).filter(|a| !a.is_empty())),
            None => (spec.trim(), None),
        };
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ForgeError::UnknownTransform {
                name: name.to_string(),
            })?;
        factory(arg)
    }
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

/// Fail with a configuration error when a step needs an argument.
pub(crate) fn required_arg<'a>(name: &str, arg: Option<&'a str>, what: &str) -> Result<&'a str> {
    arg.ok_or_else(|| ForgeError::config(format!("transform `{name}` requires {what} (`{name}:<{what}>`)")))
}
