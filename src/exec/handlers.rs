//! In-process task handlers for the `internal` and `function` methods.

use crate::payload::Payload;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A named piece of in-process work.
///
/// `Ok` means success and becomes the task's results; `Err` carries a
/// failure message.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, payload: &Payload) -> Result<Payload, String>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Payload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Payload, String>> + Send,
{
    async fn run(&self, payload: &Payload) -> Result<Payload, String> {
        (self.0)(payload.clone()).await
    }
}

/// Handlers keyed by command name.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in handlers:
    /// `noop` (returns null), `echo` (returns its payload) and `sleep`
    /// (waits `{"ms": n}` milliseconds).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_fn("noop", |_| async { Ok(Payload::Null) });
        registry.register_fn("echo", |payload| async move { Ok(payload) });
        registry.register_fn("sleep", |payload| async move {
            let Some(ms) = payload.get("ms").and_then(Payload::as_i64) else {
                return Err("sleep expects {\"ms\": <milliseconds>}".to_string());
            };
            let Ok(ms) = u64::try_from(ms) else {
                return Err(format!("invalid sleep duration {}", ms));
            };
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(Payload::Null)
        });
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Register an async closure as a handler.
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, String>> + Send + 'static,
    {
        self.register(name, Arc::new(FnHandler(f)));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
