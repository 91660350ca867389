//! Function registry: stable identifiers for the code tasks invoke.
//!
//! Graphs serialize to plain JSON, so tasks cannot carry closures - they
//! carry [`FunctionId`]s, and a [`FunctionRegistry`] supplied at run time
//! resolves each id to an implementation. The registered name is exactly
//! what crosses the serialization boundary; the implementation bound to a
//! name may differ between the process that saved a graph and the process
//! that resumes it, as long as the semantics match.
//!
//! Three callable shapes exist:
//!
//! - **context-taking** - `(context, args, kwargs) -> value`, the general
//!   form for graph-aware logic (callbacks, prompt formatters, parsers).
//! - **context-less** - a plain function; registration wraps it so the
//!   context is discarded.
//! - **api-handler** - `(prompt, params) -> text`, async, used for the LLM
//!   call. Never given a context.
//!
//! [`make_base_registry`] returns the bindings every run starts from; the
//! caller's registry is merged on top of it (caller wins on conflict).

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use llm::OpenAiChatClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::GraphContext;
use crate::error::{GraphError, Result};

/// Boxed future returned by registered callables.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Positional dependency results, in declaration order.
pub type Args = Vec<Value>;

/// Keyword dependency results, in insertion order.
pub type KwArgs = IndexMap<String, Value>;

/// A context-taking callable: `(context, args, kwargs) -> value`.
pub type ContextFn =
    Arc<dyn Fn(GraphContext, Args, KwArgs) -> BoxFuture<Result<Value>> + Send + Sync>;

/// An API handler: `(prompt, params) -> text`.
pub type ApiHandlerFn = Arc<dyn Fn(Value, Value) -> BoxFuture<Result<String>> + Send + Sync>;

#[derive(Clone)]
enum Callable {
    Context(ContextFn),
    ApiHandler(ApiHandlerFn),
}

impl Callable {
    fn shape(&self) -> &'static str {
        match self {
            Callable::Context(_) => "a context function",
            Callable::ApiHandler(_) => "an api handler",
        }
    }
}

/// Identifier of a registered function.
///
/// Equal by name, hashable, and serialized as a bare string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionId(String);

impl FunctionId {
    /// Wrap a name as a function id.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The registered name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FunctionId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for FunctionId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Maps [`FunctionId`]s to callable implementations.
///
/// Cloning a registry is cheap (implementations are behind `Arc`) and
/// produces an independent copy: bindings added to the clone do not leak
/// back into the original.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<FunctionId, Callable>,
}

impl FunctionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async context-taking function under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, function: F) -> FunctionId
    where
        F: Fn(GraphContext, Args, KwArgs) -> BoxFuture<Result<Value>> + Send + Sync + 'static,
    {
        self.insert(name, Callable::Context(Arc::new(function)))
    }

    /// Register a synchronous context-taking function under `name`.
    ///
    /// The function runs inline on the scheduler; it must not block.
    pub fn register_sync<F>(&mut self, name: impl Into<String>, function: F) -> FunctionId
    where
        F: Fn(GraphContext, Args, KwArgs) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(
            name,
            move |context, args, kwargs| -> BoxFuture<Result<Value>> {
                let output = function(context, args, kwargs);
                Box::pin(async move { output })
            },
        )
    }

    /// Register a function that does not take the graph context; the
    /// wrapper discards it.
    pub fn register_no_context<F>(&mut self, name: impl Into<String>, function: F) -> FunctionId
    where
        F: Fn(Args, KwArgs) -> Result<Value> + Send + Sync + 'static,
    {
        self.register_sync(name, move |_context, args, kwargs| function(args, kwargs))
    }

    /// Register an async API handler `(prompt, params) -> text` under
    /// `name`.
    pub fn register_api_handler<F>(&mut self, name: impl Into<String>, function: F) -> FunctionId
    where
        F: Fn(Value, Value) -> BoxFuture<Result<String>> + Send + Sync + 'static,
    {
        self.insert(name, Callable::ApiHandler(Arc::new(function)))
    }

    fn insert(&mut self, name: impl Into<String>, callable: Callable) -> FunctionId {
        let id = FunctionId::new(name);
        self.functions.insert(id.clone(), callable);
        id
    }

    /// Whether a binding exists for the id.
    pub fn contains(&self, id: &FunctionId) -> bool {
        self.functions.contains_key(id)
    }

    /// Number of registered bindings.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether the registry has no bindings.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Look up a context-taking function.
    pub fn lookup_context(&self, id: &FunctionId) -> Result<ContextFn> {
        match self.functions.get(id) {
            Some(Callable::Context(function)) => Ok(function.clone()),
            Some(other) => Err(GraphError::FunctionKind {
                id: id.clone(),
                expected: "a context function",
                actual: other.shape(),
            }),
            None => Err(GraphError::UnknownFunction(id.clone())),
        }
    }

    /// Look up an API handler.
    pub fn lookup_api_handler(&self, id: &FunctionId) -> Result<ApiHandlerFn> {
        match self.functions.get(id) {
            Some(Callable::ApiHandler(function)) => Ok(function.clone()),
            Some(other) => Err(GraphError::FunctionKind {
                id: id.clone(),
                expected: "an api handler",
                actual: other.shape(),
            }),
            None => Err(GraphError::UnknownFunction(id.clone())),
        }
    }

    /// Merge `other` into this registry and return it. Right-biased:
    /// bindings from `other` overwrite bindings already present.
    pub fn merge(mut self, other: &FunctionRegistry) -> Self {
        for (id, callable) in &other.functions {
            self.functions.insert(id.clone(), callable.clone());
        }
        self
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.functions.keys().map(FunctionId::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

/// Names of the functions every base registry carries.
pub mod builtin {
    /// Chat-completion API handler backed by the `llm` crate.
    pub const OPENAI_CHAT: &str = "openai_chat";
    /// Returns its single dependency result unchanged.
    pub const IDENTITY: &str = "identity";
    /// Parses its single dependency result (a JSON string) into a value.
    pub const PARSE_JSON: &str = "parse_json";
    /// Returns the graph-wide input value.
    pub const FORWARD_GRAPH_INPUT: &str = "forward_graph_input";
}

/// Build a fresh registry pre-populated with the builtin bindings.
///
/// Every [`TaskGraph::run`](crate::TaskGraph::run) starts from one of these
/// and merges the caller's registry over it, so callers may shadow any
/// builtin (tests routinely shadow [`builtin::OPENAI_CHAT`] with a stub).
pub fn make_base_registry() -> FunctionRegistry {
    // One process-wide client; configuration is read from the environment
    // the first time an LLM task actually runs.
    static CHAT_CLIENT: OnceLock<OpenAiChatClient> = OnceLock::new();

    let mut registry = FunctionRegistry::new();

    registry.register_api_handler(
        builtin::OPENAI_CHAT,
        |prompt, params| -> BoxFuture<Result<String>> {
            let client = CHAT_CLIENT.get_or_init(OpenAiChatClient::from_env).clone();
            Box::pin(async move {
                client
                    .chat(prompt, params)
                    .await
                    .map_err(|e| GraphError::Execution(e.to_string()))
            })
        },
    );

    registry.register_sync(builtin::IDENTITY, |_context, args, _kwargs| {
        args.into_iter()
            .next()
            .ok_or_else(|| GraphError::execution("identity expects one dependency result"))
    });

    registry.register_sync(builtin::PARSE_JSON, |_context, args, _kwargs| {
        let text = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| GraphError::execution("parse_json expects a string argument"))?;
        serde_json::from_str(text).map_err(GraphError::from)
    });

    registry.register_sync(builtin::FORWARD_GRAPH_INPUT, |context, _args, _kwargs| {
        Ok(context.graph_input())
    });

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_function_id_round_trip() {
        let id = FunctionId::new("join_things");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"join_things\"");
        let back: FunctionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = FunctionRegistry::new();
        let id = registry.register_sync("answer", |_ctx, _args, _kwargs| Ok(json!(42)));

        assert_eq!(id.as_str(), "answer");
        assert!(registry.contains(&id));
        assert!(registry.lookup_context(&id).is_ok());
        assert!(matches!(
            registry.lookup_api_handler(&id),
            Err(GraphError::FunctionKind { .. })
        ));
    }

    #[test]
    fn test_lookup_unknown_function() {
        let registry = FunctionRegistry::new();
        assert!(matches!(
            registry.lookup_context(&FunctionId::from("missing")),
            Err(GraphError::UnknownFunction(_))
        ));
    }

    #[test]
    fn test_merge_is_right_biased() {
        let mut left = FunctionRegistry::new();
        left.register_sync("shared", |_ctx, _args, _kwargs| Ok(json!("left")));
        left.register_sync("only_left", |_ctx, _args, _kwargs| Ok(json!(1)));

        let mut right = FunctionRegistry::new();
        right.register_sync("shared", |_ctx, _args, _kwargs| Ok(json!("right")));

        let merged = left.merge(&right);
        assert_eq!(merged.len(), 2);

        // The right-hand binding won; verified through the graph-level
        // tests that actually invoke it, here we just check presence.
        assert!(merged.contains(&FunctionId::from("shared")));
        assert!(merged.contains(&FunctionId::from("only_left")));
    }

    #[test]
    fn test_copy_is_independent() {
        let mut original = FunctionRegistry::new();
        original.register_sync("a", |_ctx, _args, _kwargs| Ok(json!(1)));

        let mut copy = original.clone();
        copy.register_sync("b", |_ctx, _args, _kwargs| Ok(json!(2)));

        assert_eq!(original.len(), 1);
        assert_eq!(copy.len(), 2);
    }

    #[test]
    fn test_base_registry_bindings() {
        let registry = make_base_registry();
        assert!(registry
            .lookup_api_handler(&FunctionId::from(builtin::OPENAI_CHAT))
            .is_ok());
        assert!(registry
            .lookup_context(&FunctionId::from(builtin::IDENTITY))
            .is_ok());
        assert!(registry
            .lookup_context(&FunctionId::from(builtin::PARSE_JSON))
            .is_ok());
        assert!(registry
            .lookup_context(&FunctionId::from(builtin::FORWARD_GRAPH_INPUT))
            .is_ok());
    }
}
