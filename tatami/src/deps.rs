//! Dependency registry — named values, lazy resolvers, and injection.
//!
//! A [`DependencyRegistry`] holds concrete JSON values and named async
//! resolvers whose results are memoized on first use. Registered entries can
//! be interpolated into prompt templates (`"hello {user_name}"`), injected
//! into typed structs via serde, or merged from another registry.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use futures::Future;
use serde_json::Value;

use crate::error::{Error, Result};

/// A lazy dependency producer. Results are memoized per registry.
pub type Resolver =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// Keyed map of dependency values and lazy resolvers.
#[derive(Default)]
pub struct DependencyRegistry {
    values: HashMap<String, Value>,
    resolvers: HashMap<String, Resolver>,
    resolved: Mutex<HashMap<String, Value>>,
}

impl DependencyRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a concrete value under a name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Register a lazy resolver under a name.
    ///
    /// The resolver runs at most once; its result is memoized until the key
    /// is overwritten by a [`merge`](Self::merge).
    pub fn register_resolver<F, Fut>(&mut self, name: impl Into<String>, resolver: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.resolvers.insert(
            name.into(),
            Arc::new(move || {
                Box::pin(resolver()) as Pin<Box<dyn Future<Output = Result<Value>> + Send>>
            }),
        );
    }

    /// Names of every registered value and resolver.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .values
            .keys()
            .chain(self.resolvers.keys())
            .cloned()
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.resolvers.is_empty()
    }

    /// Look up a concrete value (resolvers are not consulted).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Resolve a name: concrete value, memoized result, or a fresh resolver
    /// run (memoized afterwards).
    ///
    /// # Errors
    ///
    /// Unknown names and resolver failures surface as configuration errors.
    pub async fn resolve(&self, name: &str) -> Result<Value> {
        if let Some(value) = self.values.get(name) {
            return Ok(value.clone());
        }

        if let Some(cached) = self
            .resolved
            .lock()
            .map_err(|e| Error::configuration(e.to_string()))?
            .get(name)
        {
            return Ok(cached.clone());
        }

        let Some(resolver) = self.resolvers.get(name) else {
            return Err(Error::configuration(format!(
                "unknown dependency '{name}'"
            )));
        };

        let value = resolver().await?;
        self.resolved
            .lock()
            .map_err(|e| Error::configuration(e.to_string()))?
            .insert(name.to_owned(), value.clone());
        Ok(value)
    }

    /// Materialize every registered entry into a plain map.
    pub async fn resolve_all(&self) -> Result<HashMap<String, Value>> {
        let mut all = self.values.clone();
        let resolver_names: Vec<String> = self.resolvers.keys().cloned().collect();
        for name in resolver_names {
            let value = self.resolve(&name).await?;
            all.entry(name).or_insert(value);
        }
        Ok(all)
    }

    /// Substitute `{name}` occurrences in a template.
    ///
    /// String values substitute verbatim; other values substitute as compact
    /// JSON. Escaped braces are not supported — a brace pair always names a
    /// dependency.
    ///
    /// # Errors
    ///
    /// Fails on the first `{name}` with no registered entry.
    pub async fn resolve_template(&self, template: &str) -> Result<String> {
        let mut output = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find('{') {
            output.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let Some(end) = after.find('}') else {
                output.push('{');
                rest = after;
                continue;
            };
            let name = &after[..end];
            let value = self.resolve(name).await?;
            match value {
                Value::String(text) => output.push_str(&text),
                other => output.push_str(&other.to_string()),
            }
            rest = &after[end + 1..];
        }
        output.push_str(rest);
        Ok(output)
    }

    /// Materialize the registry into a typed struct.
    ///
    /// Field names map to dependency names through serde, which also enforces
    /// type compatibility.
    ///
    /// # Errors
    ///
    /// Fails when a resolver fails or the value shapes do not fit `T`.
    pub async fn inject<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let all = self.resolve_all().await?;
        let map: serde_json::Map<String, Value> = all.into_iter().collect();
        serde_json::from_value(Value::Object(map)).map_err(|e| {
            Error::configuration(format!("dependency injection failed: {e}"))
        })
    }

    /// Merge another registry into this one, overwriting on conflict.
    ///
    /// Memoized resolver results for overwritten keys are invalidated.
    pub fn merge(&mut self, other: Self) {
        let Self {
            values,
            resolvers,
            resolved,
        } = other;

        if let Ok(mut own_resolved) = self.resolved.lock() {
            for key in values.keys().chain(resolvers.keys()) {
                own_resolved.remove(key);
            }
            if let Ok(other_resolved) = resolved.lock() {
                own_resolved.extend(other_resolved.clone());
            }
        }
        self.values.extend(values);
        self.resolvers.extend(resolvers);
    }
}

impl Clone for DependencyRegistry {
    fn clone(&self) -> Self {
        Self {
            values: self.values.clone(),
            resolvers: self.resolvers.clone(),
            resolved: Mutex::new(
                self.resolved
                    .lock()
                    .map(|guard| guard.clone())
                    .unwrap_or_default(),
            ),
        }
    }
}

impl std::fmt::Debug for DependencyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyRegistry")
            .field("values", &self.values.keys().collect::<Vec<_>>())
            .field("resolvers", &self.resolvers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl From<HashMap<String, Value>> for DependencyRegistry {
    fn from(values: HashMap<String, Value>) -> Self {
        Self {
            values,
            ..Default::default()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn resolve_prefers_concrete_values() {
        let mut registry = DependencyRegistry::new();
        registry.insert("user_name", "mina");
        assert_eq!(
            registry.resolve("user_name").await.unwrap(),
            json!("mina")
        );
    }

    #[tokio::test]
    async fn resolver_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = DependencyRegistry::new();
        let counter = Arc::clone(&calls);
        registry.register_resolver("expensive", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!(42))
            }
        });

        assert_eq!(registry.resolve("expensive").await.unwrap(), json!(42));
        assert_eq!(registry.resolve("expensive").await.unwrap(), json!(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_name_errors() {
        let registry = DependencyRegistry::new();
        assert!(registry.resolve("ghost").await.is_err());
    }

    #[tokio::test]
    async fn template_substitutes_values() {
        let mut registry = DependencyRegistry::new();
        registry.insert("city", "Kyoto");
        registry.insert("count", 3);

        let rendered = registry
            .resolve_template("visit {city} {count} times")
            .await
            .unwrap();
        assert_eq!(rendered, "visit Kyoto 3 times");
    }

    #[tokio::test]
    async fn template_unknown_name_errors() {
        let registry = DependencyRegistry::new();
        assert!(registry.resolve_template("hi {nobody}").await.is_err());
    }

    #[tokio::test]
    async fn inject_builds_typed_struct() {
        #[derive(serde::Deserialize)]
        struct Settings {
            city: String,
            retries: u32,
        }

        let mut registry = DependencyRegistry::new();
        registry.insert("city", "Kyoto");
        registry.register_resolver("retries", || async { Ok(json!(3)) });

        let settings: Settings = registry.inject().await.unwrap();
        assert_eq!(settings.city, "Kyoto");
        assert_eq!(settings.retries, 3);
    }

    #[tokio::test]
    async fn inject_incompatible_types_fail() {
        #[derive(Debug, serde::Deserialize)]
        struct Settings {
            #[allow(dead_code)]
            retries: u32,
        }

        let mut registry = DependencyRegistry::new();
        registry.insert("retries", "not a number");
        assert!(registry.inject::<Settings>().await.is_err());
    }

    #[tokio::test]
    async fn merge_overwrites_and_invalidates() {
        let mut base = DependencyRegistry::new();
        base.register_resolver("flag", || async { Ok(json!("old")) });
        assert_eq!(base.resolve("flag").await.unwrap(), json!("old"));

        let mut update = DependencyRegistry::new();
        update.insert("flag", "new");
        base.merge(update);

        assert_eq!(base.resolve("flag").await.unwrap(), json!("new"));
    }

    #[test]
    fn names_are_sorted_and_deduped() {
        let mut registry = DependencyRegistry::new();
        registry.insert("b", 1);
        registry.insert("a", 2);
        registry.register_resolver("c", || async { Ok(Value::Null) });
        assert_eq!(registry.names(), vec!["a", "b", "c"]);
    }
}
