//! Tools — named, typed callables exposed to the model.
//!
//! Two shapes register into a [`ToolBox`]:
//!
//! - [`Tool`] — a single typed callable; registers under its own name.
//! - [`Toolkit`] — a named group of methods; each method registers under
//!   the canonical dispatch name `<tool>_<method>`.
//!
//! A method's [`TypeSchema`] is the source of truth twice over: it renders
//! the JSON schema the model sees, and the dispatcher validates incoming
//! arguments against it before invocation.

pub mod executor;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolError;
use crate::schema::TypeSchema;

/// A type alias for `Result<T, ToolError>`.
pub type ToolResult<T> = Result<T, ToolError>;

/// Canonical dispatch name for a toolkit method.
#[must_use]
pub fn canonical_name(tool: &str, method: &str) -> String {
    format!("{tool}_{method}")
}

/// Definition of a tool for model function calling.
///
/// Serializes to the function-calling wire format:
/// `{"type": "function", "function": {"name", "description", "parameters"}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolDefinition {
    /// Canonical dispatch name.
    pub name: String,
    /// What the tool does; helps the model decide when to call it.
    pub description: String,
    /// JSON schema of the parameters.
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Returns the tool name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Serialize for ToolDefinition {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        let mut function = serde_json::Map::new();
        function.insert("name".to_owned(), Value::String(self.name.clone()));
        function.insert(
            "description".to_owned(),
            Value::String(self.description.clone()),
        );
        function.insert("parameters".to_owned(), self.parameters.clone());

        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", "function")?;
        map.serialize_entry("function", &function)?;
        map.end()
    }
}

/// One callable method of a [`Toolkit`].
#[derive(Debug, Clone)]
pub struct ToolMethod {
    /// Method name (unprefixed).
    pub name: String,
    /// What the method does.
    pub description: String,
    /// Typed parameter descriptor.
    pub params: TypeSchema,
}

impl ToolMethod {
    /// Declare a method.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        params: TypeSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params,
        }
    }
}

/// A single typed callable.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static name of the tool. Should be unique and snake_case.
    const NAME: &'static str;

    /// Arguments type for the tool.
    type Args: for<'de> Deserialize<'de> + Send;

    /// Output type of the tool.
    type Output: Serialize + Send;

    /// Error type for tool execution.
    type Error: Into<ToolError> + Send;

    /// Get the name of the tool.
    fn name(&self) -> &'static str {
        Self::NAME
    }

    /// Get the description of the tool.
    fn description(&self) -> String;

    /// Typed parameter descriptor; drives both the model-facing schema and
    /// argument validation.
    fn parameters(&self) -> TypeSchema;

    /// Execute the tool with the given arguments.
    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error>;
}

/// A named group of callable methods.
#[async_trait]
pub trait Toolkit: Send + Sync {
    /// The toolkit's name (the `<tool>` half of dispatch names).
    fn name(&self) -> &str;

    /// The methods this toolkit exposes.
    fn methods(&self) -> Vec<ToolMethod>;

    /// Execute a method with raw JSON arguments.
    async fn execute(&self, method: &str, args: Value) -> ToolResult<Value>;
}

/// A shared, thread-safe toolkit.
pub type SharedToolkit = Arc<dyn Toolkit>;

/// Adapter exposing a single [`Tool`] as a one-method toolkit registered
/// under the tool's own name.
struct SingleTool<T> {
    tool: T,
}

#[async_trait]
impl<T: Tool + 'static> Toolkit for SingleTool<T>
where
    T::Output: 'static,
{
    fn name(&self) -> &str {
        self.tool.name()
    }

    fn methods(&self) -> Vec<ToolMethod> {
        vec![ToolMethod::new(
            self.tool.name(),
            self.tool.description(),
            self.tool.parameters(),
        )]
    }

    async fn execute(&self, method: &str, args: Value) -> ToolResult<Value> {
        if method != self.tool.name() {
            return Err(ToolError::not_found(method));
        }
        let typed: T::Args = serde_json::from_value(args)
            .map_err(|e| ToolError::invalid_arguments(self.tool.name(), e.to_string()))?;
        let output = self.tool.call(typed).await.map_err(Into::into)?;
        serde_json::to_value(output)
            .map_err(|e| ToolError::execution(self.tool.name(), e.to_string()))
    }
}

/// Resolution of a canonical dispatch name inside a [`ToolBox`].
#[derive(Clone)]
pub struct ToolBinding {
    /// Toolkit name.
    pub tool: String,
    /// Method name within the toolkit.
    pub method: String,
    /// Method description.
    pub description: String,
    /// Typed parameter descriptor.
    pub params: TypeSchema,
    toolkit: SharedToolkit,
}

impl ToolBinding {
    /// Execute the bound method.
    pub async fn execute(&self, args: Value) -> ToolResult<Value> {
        self.toolkit.execute(&self.method, args).await
    }

    /// Render the model-facing definition.
    #[must_use]
    pub fn definition(&self) -> ToolDefinition {
        let name = if self.tool == self.method {
            self.tool.clone()
        } else {
            canonical_name(&self.tool, &self.method)
        };
        ToolDefinition::new(name, self.description.clone(), self.params.to_json_schema())
    }
}

impl std::fmt::Debug for ToolBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBinding")
            .field("tool", &self.tool)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

/// The catalog of callable tools shared with the model.
///
/// Bindings are keyed by canonical dispatch name. The box itself is cheap to
/// clone; toolkits are shared-immutable references.
#[derive(Clone, Default)]
pub struct ToolBox {
    bindings: HashMap<String, ToolBinding>,
}

impl ToolBox {
    /// Create an empty toolbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single tool under its own name.
    pub fn add<T: Tool + 'static>(&mut self, tool: T)
    where
        T::Output: 'static,
    {
        self.add_toolkit(SingleTool { tool });
    }

    /// Register every method of a toolkit under `<tool>_<method>` names.
    pub fn add_toolkit(&mut self, toolkit: impl Toolkit + 'static) {
        self.add_shared_toolkit(Arc::new(toolkit));
    }

    /// Register an already shared toolkit.
    pub fn add_shared_toolkit(&mut self, toolkit: SharedToolkit) {
        let tool_name = toolkit.name().to_owned();
        for method in toolkit.methods() {
            let key = if method.name == tool_name {
                tool_name.clone()
            } else {
                canonical_name(&tool_name, &method.name)
            };
            self.bindings.insert(
                key,
                ToolBinding {
                    tool: tool_name.clone(),
                    method: method.name,
                    description: method.description,
                    params: method.params,
                    toolkit: Arc::clone(&toolkit),
                },
            );
        }
    }

    /// Resolve a canonical dispatch name.
    #[must_use]
    pub fn binding(&self, name: &str) -> Option<&ToolBinding> {
        self.bindings.get(name)
    }

    /// Check if the toolbox contains a binding with the given name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// All canonical dispatch names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.bindings.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// All model-facing definitions, sorted by name.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .bindings
            .values()
            .map(ToolBinding::definition)
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Call a binding by canonical name with JSON arguments.
    pub async fn call(&self, name: &str, args: Value) -> ToolResult<Value> {
        let binding = self
            .bindings
            .get(name)
            .ok_or_else(|| ToolError::not_found(name))?;
        binding.execute(args).await
    }
}

impl std::fmt::Debug for ToolBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBox")
            .field("tools", &self.names())
            .finish_non_exhaustive()
    }
}
