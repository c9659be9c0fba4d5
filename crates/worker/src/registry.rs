use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use jobforge_manifest::BatchPayload;

use crate::error::HandlerError;

pub type HandlerResult = Result<Vec<JsonValue>, HandlerError>;

/// Task handler: the records of one batch in, result records out.
pub type Handler = Arc<dyn Fn(&BatchPayload) -> HandlerResult + Send + Sync>;

/// Handlers by name, populated once at worker startup.
///
/// Resolution order: exact name, then the longest matching `prefix.*`
/// pattern, then `*`.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, pattern: impl Into<String>, handler: F)
    where
        F: Fn(&BatchPayload) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers.insert(pattern.into(), Arc::new(handler));
    }

    pub fn with<F>(mut self, pattern: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&BatchPayload) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(pattern, handler);
        self
    }

    pub fn resolve(&self, name: &str) -> Option<Handler> {
        if let Some(h) = self.handlers.get(name) {
            return Some(h.clone());
        }

        // Category match: "text.*" matches "text.uppercase".
        let category = self
            .handlers
            .iter()
            .filter_map(|(pattern, h)| {
                let prefix = pattern.strip_suffix(".*")?;
                name.strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('.'))
                    .then_some((prefix.len(), h))
            })
            .max_by_key(|(len, _)| *len);
        if let Some((_, h)) = category {
            return Some(h.clone());
        }

        self.handlers.get("*").cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobforge_core::{BatchId, JobId};
    use serde_json::json;

    fn payload() -> BatchPayload {
        let job_id = JobId::new();
        BatchPayload {
            job_id,
            batch_id: BatchId::for_ordinal(job_id, 0),
            records: vec![json!(1)],
        }
    }

    fn tagged(tag: &'static str) -> impl Fn(&BatchPayload) -> HandlerResult {
        move |_| Ok(vec![json!(tag)])
    }

    #[test]
    fn exact_name_wins() {
        let registry = HandlerRegistry::new()
            .with("text.upper", tagged("exact"))
            .with("text.*", tagged("category"))
            .with("*", tagged("wildcard"));
        let handler = registry.resolve("text.upper").unwrap();
        assert_eq!(handler(&payload()).unwrap(), vec![json!("exact")]);
    }

    #[test]
    fn longest_category_wins() {
        let registry = HandlerRegistry::new()
            .with("text.*", tagged("text"))
            .with("text.nlp.*", tagged("nlp"));
        let handler = registry.resolve("text.nlp.tokenize").unwrap();
        assert_eq!(handler(&payload()).unwrap(), vec![json!("nlp")]);
        let handler = registry.resolve("text.lower").unwrap();
        assert_eq!(handler(&payload()).unwrap(), vec![json!("text")]);
    }

    #[test]
    fn category_requires_a_segment_boundary() {
        let registry = HandlerRegistry::new().with("text.*", tagged("text"));
        assert!(registry.resolve("textual").is_none());
        assert!(registry.resolve("text").is_none());
    }

    #[test]
    fn wildcard_is_the_fallback() {
        let registry = HandlerRegistry::new().with("*", tagged("any"));
        assert!(registry.contains("whatever"));
        assert!(!HandlerRegistry::new().contains("whatever"));
    }
}
