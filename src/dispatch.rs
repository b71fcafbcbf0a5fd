//! Job handler dispatch.
//!
//! Routing is an explicit registry from a stable job type string to a
//! handler, resolved once at startup — no runtime type introspection. The
//! registry's only job is correct routing: handler failures are caught one
//! level above, in the worker loop, while an unregistered type is a
//! configuration error that fails fast.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// A typed unit of background work.
///
/// The job type names both the handler and the queue partition the payload
/// travels on, so a payload type maps to exactly one queue.
pub trait Job: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unique name of the job. MUST be unique for the whole application.
    const JOB_TYPE: &'static str;

    /// The application data provided to this job at runtime.
    type Context: Clone + Send + Sync + 'static;

    /// Execute the job.
    fn run(&self, ctx: Self::Context) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Type-erased handler entry point: context + raw payload in, handler
/// outcome out.
pub type RunFn<Context> = Arc<
    dyn Fn(Context, serde_json::Value) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send
        + Sync,
>;

/// Registry of job handlers, indexed by job type.
pub struct HandlerRegistry<Context> {
    handlers: HashMap<String, RunFn<Context>>,
}

impl<Context: Clone + Send + Sync + 'static> HandlerRegistry<Context> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a job type. Duplicate registration is refused — the mapping
    /// is resolved once at startup and two handlers for one type would make
    /// routing ambiguous.
    pub fn register<J: Job<Context = Context>>(&mut self) -> Result<()> {
        if self.handlers.contains_key(J::JOB_TYPE) {
            return Err(Error::HandlerAlreadyRegistered(J::JOB_TYPE.to_string()));
        }

        let run: RunFn<Context> = Arc::new(|ctx, payload| {
            Box::pin(async move {
                let job: J = serde_json::from_value(payload)
                    .map_err(|e| anyhow::anyhow!("payload decode for {}: {e}", J::JOB_TYPE))?;
                job.run(ctx).await
            })
        });
        self.handlers.insert(J::JOB_TYPE.to_string(), run);
        Ok(())
    }

    /// Look up the handler for a job type.
    pub fn get(&self, job_type: &str) -> Option<RunFn<Context>> {
        self.handlers.get(job_type).cloned()
    }

    /// Resolve and invoke the handler for `job_type`.
    ///
    /// The outer `Result` is routing (unknown type fails fast); the inner
    /// one is the handler's own outcome, for the caller to retire.
    pub async fn dispatch(
        &self,
        job_type: &str,
        ctx: Context,
        payload: serde_json::Value,
    ) -> Result<anyhow::Result<()>> {
        let run = self
            .get(job_type)
            .ok_or_else(|| Error::UnknownJobType(job_type.to_string()))?;
        Ok(run(ctx, payload).await)
    }

    /// All registered job types — the worker's poll set.
    pub fn job_types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

impl<Context: Clone + Send + Sync + 'static> Default for HandlerRegistry<Context> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Context> std::fmt::Debug for HandlerRegistry<Context> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    struct CountJob {
        amount: usize,
    }

    impl Job for CountJob {
        const JOB_TYPE: &'static str = "test.count";
        type Context = Arc<AtomicUsize>;

        async fn run(&self, ctx: Self::Context) -> anyhow::Result<()> {
            ctx.fetch_add(self.amount, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatch_routes_to_the_registered_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register::<CountJob>().unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let outcome = registry
            .dispatch(
                "test.count",
                counter.clone(),
                serde_json::json!({"amount": 3}),
            )
            .await
            .unwrap();

        assert!(outcome.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn duplicate_registration_is_refused() {
        let mut registry = HandlerRegistry::new();
        registry.register::<CountJob>().unwrap();
        assert!(matches!(
            registry.register::<CountJob>(),
            Err(Error::HandlerAlreadyRegistered(_))
        ));
    }

    #[tokio::test]
    async fn unknown_job_type_fails_fast() {
        let registry: HandlerRegistry<Arc<AtomicUsize>> = HandlerRegistry::new();
        let err = registry
            .dispatch(
                "test.unknown",
                Arc::new(AtomicUsize::new(0)),
                serde_json::Value::Null,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownJobType(_)));
    }

    #[tokio::test]
    async fn malformed_payload_is_a_handler_failure_not_a_routing_failure() {
        let mut registry = HandlerRegistry::new();
        registry.register::<CountJob>().unwrap();

        let outcome = registry
            .dispatch(
                "test.count",
                Arc::new(AtomicUsize::new(0)),
                serde_json::json!({"wrong": true}),
            )
            .await
            .unwrap();
        assert!(outcome.is_err());
    }
}
