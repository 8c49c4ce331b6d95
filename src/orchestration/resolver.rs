//! Executor resolution for registered resources.
//!
//! The `ExecutorResolver` maps a namespace to a runnable [`Executor`]. The
//! executor is built by the constructor registered for the resource's kind
//! and then cached by namespace, so every task targeting the same resource
//! shares one executor.

use crate::core::resource::{Resource, ResourceKind};
use crate::error::Result;
use crate::registry::Registry;
use crate::util;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Everything an executor gets for one task.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Namespace of the resource being invoked.
    pub namespace: String,
    /// The task's own payload.
    pub payload: serde_json::Value,
    /// The payload stored on the registered resource.
    pub resource_payload: serde_json::Value,
    pub metadata: BTreeMap<String, String>,
    /// Cancelled when the scheduler stops waiting for this task.
    ///
    /// Executors doing long work should watch it and return early. The
    /// scheduler never aborts the work itself.
    pub cancel: CancellationToken,
}

/// What an executor reports back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorOutput {
    pub success: bool,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ExecutorOutput {
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// A runnable handler for one resource.
///
/// Implementations must be safe to call from several workers at once.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, request: ExecutionRequest) -> ExecutorOutput;
}

/// Builds an executor for a resource of one kind.
pub type ExecutorConstructor =
    Arc<dyn Fn(&Resource) -> Result<Arc<dyn Executor>> + Send + Sync>;

/// One optional constructor per [`ResourceKind`].
#[derive(Clone, Default)]
pub struct ExecutorTable {
    constructors: [Option<ExecutorConstructor>; ResourceKind::ALL.len()],
}

impl ExecutorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the constructor for a kind, replacing any previous one.
    pub fn register<F>(&mut self, kind: ResourceKind, constructor: F)
    where
        F: Fn(&Resource) -> Result<Arc<dyn Executor>> + Send + Sync + 'static,
    {
        self.constructors[kind.index()] = Some(Arc::new(constructor));
    }

    /// Builder form of [`ExecutorTable::register`].
    pub fn with<F>(mut self, kind: ResourceKind, constructor: F) -> Self
    where
        F: Fn(&Resource) -> Result<Arc<dyn Executor>> + Send + Sync + 'static,
    {
        self.register(kind, constructor);
        self
    }

    pub fn get(&self, kind: ResourceKind) -> Option<&ExecutorConstructor> {
        self.constructors[kind.index()].as_ref()
    }

    pub fn supports(&self, kind: ResourceKind) -> bool {
        self.get(kind).is_some()
    }
}

impl std::fmt::Debug for ExecutorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<&str> = ResourceKind::ALL
            .iter()
            .filter(|k| self.supports(**k))
            .map(|k| k.as_str())
            .collect();
        f.debug_struct("ExecutorTable").field("kinds", &kinds).finish()
    }
}

#[derive(Clone)]
struct CachedExecutor {
    executor: Arc<dyn Executor>,
    resource_payload: serde_json::Value,
}

/// Resolves namespaces to cached executors.
///
/// The cache is guarded by an async `RwLock` and may be read by any number
/// of workers at once.
pub struct ExecutorResolver {
    registry: Arc<RwLock<Registry>>,
    table: ExecutorTable,
    cache: RwLock<HashMap<String, CachedExecutor>>,
}

impl ExecutorResolver {
    /// Create a resolver over a shared registry.
    ///
    /// # Arguments
    ///
    /// * `registry` - Registry used to look up resources on cache misses
    /// * `table` - Constructors by resource kind
    pub fn new(registry: Arc<RwLock<Registry>>, table: ExecutorTable) -> Self {
        Self {
            registry,
            table,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// The registry this resolver reads from.
    pub fn registry(&self) -> &Arc<RwLock<Registry>> {
        &self.registry
    }

    /// Resolve a namespace to its executor.
    ///
    /// Returns `None` when the namespace is not registered, the resource is
    /// disabled, no constructor exists for its kind, or the constructor
    /// fails or panics. Construction problems are logged.
    pub async fn resolve(&self, namespace: &str) -> Option<Arc<dyn Executor>> {
        self.resolve_entry(namespace).await.map(|e| e.executor)
    }

    /// Resolve the executor together with the resource payload it was built for.
    pub(crate) async fn resolve_with_payload(
        &self,
        namespace: &str,
    ) -> Option<(Arc<dyn Executor>, serde_json::Value)> {
        self.resolve_entry(namespace)
            .await
            .map(|e| (e.executor, e.resource_payload))
    }

    async fn resolve_entry(&self, namespace: &str) -> Option<CachedExecutor> {
        if let Some(entry) = self.cache.read().await.get(namespace) {
            return Some(entry.clone());
        }

        let resource = {
            let registry = self.registry.read().await;
            let resource = registry.get(namespace)?;
            if !resource.enabled {
                debug!(namespace, "Resource is disabled, not resolving executor");
                return None;
            }
            resource.clone()
        };

        let Some(constructor) = self.table.get(resource.kind) else {
            warn!(namespace, kind = %resource.kind, "No executor constructor for kind");
            return None;
        };

        let executor = match panic::catch_unwind(AssertUnwindSafe(|| constructor(&resource))) {
            Ok(Ok(executor)) => executor,
            Ok(Err(e)) => {
                warn!(namespace, error = %e, "Failed to construct executor");
                return None;
            }
            Err(panic) => {
                warn!(
                    namespace,
                    panic = %util::panic_message(&*panic),
                    "Executor constructor panicked"
                );
                return None;
            }
        };

        let mut cache = self.cache.write().await;
        // A concurrent resolve may have filled the slot first; keep that one.
        let entry = cache
            .entry(namespace.to_string())
            .or_insert(CachedExecutor {
                executor,
                resource_payload: resource.payload,
            });
        debug!(namespace, "Cached executor");
        Some(entry.clone())
    }

    /// Drop every cached executor.
    pub async fn invalidate_all(&self) {
        self.cache.write().await.clear();
    }

    /// Drop the cached executor for one namespace.
    ///
    /// Returns true if an entry was removed.
    pub async fn invalidate(&self, namespace: &str) -> bool {
        self.cache.write().await.remove(namespace).is_some()
    }

    pub async fn cached_count(&self) -> usize {
        self.cache.read().await.len()
    }
}

type BoxedHandler = Arc<dyn Fn(ExecutionRequest) -> BoxFuture<'static, ExecutorOutput> + Send + Sync>;

/// Adapts a closure into an [`Executor`].
#[derive(Clone)]
pub struct FnExecutor {
    handler: BoxedHandler,
}

impl FnExecutor {
    /// Wrap an async closure.
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(ExecutionRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ExecutorOutput> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |request: ExecutionRequest| handler(request).boxed()),
        }
    }

    /// Wrap a synchronous closure that runs on the blocking thread pool.
    ///
    /// A panic inside the closure becomes a failed output.
    pub fn blocking<F>(handler: F) -> Self
    where
        F: Fn(ExecutionRequest) -> ExecutorOutput + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        Self::new(move |request| {
            let handler = Arc::clone(&handler);
            async move {
                match util::blocking(move || (*handler)(request)).await {
                    Ok(output) => output,
                    Err(e) => ExecutorOutput::failure(e.to_string()),
                }
            }
        })
    }

    /// Wrap this executor for use in an [`ExecutorTable`].
    pub fn into_executor(self) -> Arc<dyn Executor> {
        Arc::new(self)
    }
}

#[async_trait]
impl Executor for FnExecutor {
    async fn run(&self, request: ExecutionRequest) -> ExecutorOutput {
        (self.handler)(request).await
    }
}

impl std::fmt::Debug for FnExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnExecutor").finish_non_exhaustive()
    }
}
