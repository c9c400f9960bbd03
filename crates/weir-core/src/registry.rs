//! Executor traits and the node-type registry.
//!
//! A node's `type` tag resolves to a registered executor. Capability is a
//! stored tag ([`ExecutorKind`]), fixed at registration: `Simple` executors
//! run once per invocation, `Loop` executors drive repeated execution of
//! their body sub-graph through a sequence generator. The scheduler pattern
//! matches on the tag -- it never probes an executor at call time.
//!
//! The user-facing traits use RPITIT async methods and follow the boxed
//! dynamic-dispatch pattern:
//! 1. Define an object-safe `*Dyn` trait with boxed futures
//! 2. Blanket-impl `*Dyn` for all implementors of the user trait
//! 3. `BoxNodeExecutor` / `BoxLoopExecutor` wrap `Box<dyn *Dyn>` and delegate

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use weir_types::flow::HandleMap;

use crate::context::RunContext;

// ---------------------------------------------------------------------------
// User-facing executor traits (RPITIT)
// ---------------------------------------------------------------------------

/// Behavior bound to a node type that runs once per invocation.
///
/// Implementations receive the node's resolved input (static input overlaid
/// with edge-propagated values) and the run-scoped context, and produce the
/// node's output mapping. Any error aborts the run it occurs in.
pub trait NodeExecutor: Send + Sync {
    /// The type tag this executor registers under.
    fn node_type(&self) -> &str;

    /// Execute the node and produce its output handles.
    fn execute(
        &self,
        input: &HandleMap,
        run: &RunContext,
    ) -> impl Future<Output = anyhow::Result<HandleMap>> + Send;
}

/// Behavior bound to a loop-capable node type.
///
/// A loop executor does not produce output directly: it generates the
/// ordered sequence of per-iteration input overrides, and the scheduler
/// replays the loop's body sub-graph once per element.
pub trait LoopExecutor: Send + Sync {
    /// The type tag this executor registers under.
    fn node_type(&self) -> &str;

    /// Generate the per-iteration input overrides for one loop execution.
    ///
    /// The engine calls this once per loop invocation with `iteration` set
    /// to `None`. A sequence of length K replays the body K times; an empty
    /// sequence completes the loop without running its body.
    fn sequence(
        &self,
        input: &HandleMap,
        run: &RunContext,
        iteration: Option<usize>,
    ) -> impl Future<Output = anyhow::Result<Vec<HandleMap>>> + Send;
}

// ---------------------------------------------------------------------------
// Object-safe mirrors with boxed futures
// ---------------------------------------------------------------------------

/// Object-safe version of [`NodeExecutor`] with boxed futures.
///
/// This trait exists solely to enable dynamic dispatch; a blanket
/// implementation covers every [`NodeExecutor`].
pub trait NodeExecutorDyn: Send + Sync {
    fn node_type(&self) -> &str;

    fn execute_boxed<'a>(
        &'a self,
        input: &'a HandleMap,
        run: &'a RunContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<HandleMap>> + Send + 'a>>;
}

impl<T: NodeExecutor> NodeExecutorDyn for T {
    fn node_type(&self) -> &str {
        NodeExecutor::node_type(self)
    }

    fn execute_boxed<'a>(
        &'a self,
        input: &'a HandleMap,
        run: &'a RunContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<HandleMap>> + Send + 'a>> {
        Box::pin(self.execute(input, run))
    }
}

/// Object-safe version of [`LoopExecutor`] with boxed futures.
pub trait LoopExecutorDyn: Send + Sync {
    fn node_type(&self) -> &str;

    fn sequence_boxed<'a>(
        &'a self,
        input: &'a HandleMap,
        run: &'a RunContext,
        iteration: Option<usize>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<HandleMap>>> + Send + 'a>>;
}

impl<T: LoopExecutor> LoopExecutorDyn for T {
    fn node_type(&self) -> &str {
        LoopExecutor::node_type(self)
    }

    fn sequence_boxed<'a>(
        &'a self,
        input: &'a HandleMap,
        run: &'a RunContext,
        iteration: Option<usize>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<HandleMap>>> + Send + 'a>> {
        Box::pin(self.sequence(input, run, iteration))
    }
}

// ---------------------------------------------------------------------------
// Boxed wrappers
// ---------------------------------------------------------------------------

/// Type-erased simple executor.
pub struct BoxNodeExecutor {
    inner: Box<dyn NodeExecutorDyn>,
}

impl BoxNodeExecutor {
    /// Wrap a concrete [`NodeExecutor`] in a type-erased box.
    pub fn new<T: NodeExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Box::new(executor),
        }
    }

    /// The type tag this executor registers under.
    pub fn node_type(&self) -> &str {
        self.inner.node_type()
    }

    /// Execute the node and produce its output handles.
    pub async fn execute(&self, input: &HandleMap, run: &RunContext) -> anyhow::Result<HandleMap> {
        self.inner.execute_boxed(input, run).await
    }
}

/// Type-erased loop executor.
pub struct BoxLoopExecutor {
    inner: Box<dyn LoopExecutorDyn>,
}

impl BoxLoopExecutor {
    /// Wrap a concrete [`LoopExecutor`] in a type-erased box.
    pub fn new<T: LoopExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Box::new(executor),
        }
    }

    /// The type tag this executor registers under.
    pub fn node_type(&self) -> &str {
        self.inner.node_type()
    }

    /// Generate the per-iteration input overrides for one loop execution.
    pub async fn sequence(
        &self,
        input: &HandleMap,
        run: &RunContext,
        iteration: Option<usize>,
    ) -> anyhow::Result<Vec<HandleMap>> {
        self.inner.sequence_boxed(input, run, iteration).await
    }
}

// ---------------------------------------------------------------------------
// Tagged executor union
// ---------------------------------------------------------------------------

/// Capability tag stored with each registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    /// Runs once per invocation.
    Simple,
    /// Replays its body sub-graph once per generated sequence element.
    Loop,
}

/// A registered executor: the capability tag plus the kind-specific callable.
pub enum Executor {
    /// A single-shot executor.
    Simple(BoxNodeExecutor),
    /// A loop-driving executor.
    Loop(BoxLoopExecutor),
}

impl Executor {
    /// Wrap a [`NodeExecutor`] as a simple registry entry.
    pub fn simple<T: NodeExecutor + 'static>(executor: T) -> Self {
        Executor::Simple(BoxNodeExecutor::new(executor))
    }

    /// Wrap a [`LoopExecutor`] as a loop registry entry.
    pub fn looping<T: LoopExecutor + 'static>(executor: T) -> Self {
        Executor::Loop(BoxLoopExecutor::new(executor))
    }

    /// The type tag this executor registers under.
    pub fn node_type(&self) -> &str {
        match self {
            Executor::Simple(inner) => inner.node_type(),
            Executor::Loop(inner) => inner.node_type(),
        }
    }

    /// The stored capability tag.
    pub fn kind(&self) -> ExecutorKind {
        match self {
            Executor::Simple(_) => ExecutorKind::Simple,
            Executor::Loop(_) => ExecutorKind::Loop,
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutorRegistry
// ---------------------------------------------------------------------------

/// Registry of executors, indexed by node type tag.
///
/// Immutable once the engine is constructed; a single registry instance may
/// be shared by concurrent flow runs.
pub struct ExecutorRegistry {
    entries: HashMap<String, Executor>,
}

impl ExecutorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register an executor under its type tag.
    ///
    /// The last registration for a given tag wins; replacing an earlier
    /// entry is not an error.
    pub fn register(&mut self, executor: Executor) {
        let tag = executor.node_type().to_string();
        if self.entries.insert(tag.clone(), executor).is_some() {
            tracing::debug!(node_type = tag.as_str(), "replacing registered executor");
        }
    }

    /// Look up the executor for a node type tag.
    ///
    /// `None` means no executor is registered under the tag; callers surface
    /// this as an unknown-node-type error carrying the offending node's id.
    pub fn resolve(&self, node_type: &str) -> Option<&Executor> {
        self.entries.get(node_type)
    }

    /// The stored capability tag for a node type.
    pub fn kind(&self, node_type: &str) -> Option<ExecutorKind> {
        self.entries.get(node_type).map(Executor::kind)
    }

    /// Number of registered type tags.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    /// Echoes its resolved input back as output.
    struct Echo;

    impl NodeExecutor for Echo {
        fn node_type(&self) -> &str {
            "echo"
        }

        fn execute(
            &self,
            input: &HandleMap,
            _run: &RunContext,
        ) -> impl Future<Output = anyhow::Result<HandleMap>> + Send {
            let output = input.clone();
            async move { Ok(output) }
        }
    }

    /// Emits a fixed marker so replacement is observable.
    struct Marker(&'static str);

    impl NodeExecutor for Marker {
        fn node_type(&self) -> &str {
            "echo"
        }

        fn execute(
            &self,
            _input: &HandleMap,
            _run: &RunContext,
        ) -> impl Future<Output = anyhow::Result<HandleMap>> + Send {
            let marker = self.0;
            async move {
                let mut out = HandleMap::new();
                out.insert("marker".to_string(), json!(marker));
                Ok(out)
            }
        }
    }

    struct Repeat;

    impl LoopExecutor for Repeat {
        fn node_type(&self) -> &str {
            "repeat"
        }

        fn sequence(
            &self,
            input: &HandleMap,
            _run: &RunContext,
            _iteration: Option<usize>,
        ) -> impl Future<Output = anyhow::Result<Vec<HandleMap>>> + Send {
            let count = input
                .get("count")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as usize;
            async move {
                Ok((0..count)
                    .map(|i| {
                        let mut m = HandleMap::new();
                        m.insert("index".to_string(), json!(i));
                        m
                    })
                    .collect())
            }
        }
    }

    fn test_ctx() -> RunContext {
        RunContext::new(Uuid::now_v7(), serde_json::Value::Null, CancellationToken::new())
    }

    #[test]
    fn register_and_resolve() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Executor::simple(Echo));
        registry.register(Executor::looping(Repeat));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.kind("echo"), Some(ExecutorKind::Simple));
        assert_eq!(registry.kind("repeat"), Some(ExecutorKind::Loop));
        assert!(registry.resolve("missing").is_none());
        assert!(registry.kind("missing").is_none());
    }

    #[test]
    fn duplicate_registration_last_wins() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Executor::simple(Marker("first")));
        registry.register(Executor::simple(Marker("second")));

        // Still a single entry under the shared tag
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.kind("echo"), Some(ExecutorKind::Simple));
    }

    #[tokio::test]
    async fn boxed_executor_delegates() {
        let boxed = BoxNodeExecutor::new(Echo);
        let mut input = HandleMap::new();
        input.insert("value".to_string(), json!([1, 2, 3]));

        let output = boxed.execute(&input, &test_ctx()).await.unwrap();
        assert_eq!(output["value"], json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn boxed_loop_executor_generates_sequence() {
        let boxed = BoxLoopExecutor::new(Repeat);
        let mut input = HandleMap::new();
        input.insert("count".to_string(), json!(3));

        let seq = boxed.sequence(&input, &test_ctx(), None).await.unwrap();
        assert_eq!(seq.len(), 3);
        assert_eq!(seq[2]["index"], json!(2));
    }

    #[tokio::test]
    async fn replaced_executor_is_the_one_invoked() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Executor::simple(Marker("first")));
        registry.register(Executor::simple(Marker("second")));

        let Some(Executor::Simple(exec)) = registry.resolve("echo") else {
            panic!("echo should resolve to a simple executor");
        };
        let output = exec.execute(&HandleMap::new(), &test_ctx()).await.unwrap();
        assert_eq!(output["marker"], json!("second"));
    }
}
