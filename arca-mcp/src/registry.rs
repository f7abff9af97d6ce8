//! Tool and resource registry.
//!
//! Initialized once at startup with every declaration the MCP transport
//! exposes. The call path validates arguments against the declared input
//! schema before anything reaches the dispatcher: unknown names fail as
//! not-found, schema violations as invalid arguments.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::{Map, Value, json};

use arca::dispatch::Dispatcher;
use arca::error::HostError;

/// Boxed future for dyn-compatible handler signatures.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Handler invoked after schema validation.
pub type ToolHandler =
    for<'a> fn(&'a Dispatcher, &'a Map<String, Value>) -> BoxFuture<'a, Result<Value, HostError>>;

/// Handler producing a resource body.
pub type ResourceHandler = for<'a> fn(&'a Dispatcher) -> BoxFuture<'a, Result<String, HostError>>;

/// JSON type of a declared tool property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    /// JSON string.
    String,
    /// JSON number (integer or float).
    Number,
    /// JSON integer.
    Integer,
    /// JSON boolean.
    Boolean,
}

impl PropertyType {
    const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
        }
    }
}

/// One declared tool property.
#[derive(Debug, Clone)]
pub struct PropertySpec {
    /// Property name.
    pub name: &'static str,
    /// JSON type.
    pub kind: PropertyType,
    /// Human-readable description for `tools/list`.
    pub description: &'static str,
    /// Whether the property must be present.
    pub required: bool,
    /// Closed set of accepted values, when applicable.
    pub enum_values: Option<&'static [&'static str]>,
}

impl PropertySpec {
    /// A required property.
    #[must_use]
    pub const fn required(
        name: &'static str,
        kind: PropertyType,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            kind,
            description,
            required: true,
            enum_values: None,
        }
    }

    /// An optional property.
    #[must_use]
    pub const fn optional(
        name: &'static str,
        kind: PropertyType,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            kind,
            description,
            required: false,
            enum_values: None,
        }
    }

    /// Restricts the property to a closed value set.
    #[must_use]
    pub const fn with_enum(mut self, values: &'static [&'static str]) -> Self {
        self.enum_values = Some(values);
        self
    }
}

/// A declared tool.
pub struct ToolSpec {
    /// Tool name as exposed over `tools/list`.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Input schema properties.
    pub properties: Vec<PropertySpec>,
    /// The handler, invoked after validation.
    pub handler: ToolHandler,
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec").field("name", &self.name).finish_non_exhaustive()
    }
}

/// A declared resource.
pub struct ResourceSpec {
    /// Resource URI (`chains://supported`, ...).
    pub uri: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// MIME type of the body.
    pub mime_type: &'static str,
    /// The handler producing the body.
    pub handler: ResourceHandler,
}

impl std::fmt::Debug for ResourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceSpec").field("uri", &self.uri).finish_non_exhaustive()
    }
}

/// Registry mapping tool names and resource URIs to handlers.
#[derive(Debug)]
pub struct Registry {
    tools: Vec<ToolSpec>,
    tool_index: HashMap<&'static str, usize>,
    resources: Vec<ResourceSpec>,
}

impl Registry {
    /// Builds a registry from declarations. Later duplicates replace
    /// earlier ones.
    #[must_use]
    pub fn new(tools: Vec<ToolSpec>, resources: Vec<ResourceSpec>) -> Self {
        let mut tool_index = HashMap::with_capacity(tools.len());
        for (i, tool) in tools.iter().enumerate() {
            tool_index.insert(tool.name, i);
        }
        Self {
            tools,
            tool_index,
            resources,
        }
    }

    /// The `tools/list` payload.
    #[must_use]
    pub fn list_tools(&self) -> Value {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|tool| {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for prop in &tool.properties {
                    let mut spec = Map::new();
                    spec.insert("type".to_owned(), json!(prop.kind.as_str()));
                    spec.insert("description".to_owned(), json!(prop.description));
                    if let Some(values) = prop.enum_values {
                        spec.insert("enum".to_owned(), json!(values));
                    }
                    properties.insert(prop.name.to_owned(), Value::Object(spec));
                    if prop.required {
                        required.push(prop.name);
                    }
                }
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": {
                        "type": "object",
                        "properties": properties,
                        "required": required,
                    },
                })
            })
            .collect();
        json!(tools)
    }

    /// The `resources/list` payload.
    #[must_use]
    pub fn list_resources(&self) -> Value {
        let resources: Vec<Value> = self
            .resources
            .iter()
            .map(|r| {
                json!({
                    "uri": r.uri,
                    "name": r.name,
                    "description": r.description,
                    "mimeType": r.mime_type,
                })
            })
            .collect();
        json!(resources)
    }

    /// Validates arguments and invokes a tool.
    ///
    /// # Errors
    ///
    /// [`HostError::NotFound`] for unknown tools; schema violations fail
    /// before the dispatcher is reached.
    pub async fn call_tool(
        &self,
        dispatcher: &Dispatcher,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<Value, HostError> {
        let tool = self
            .tool_index
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| HostError::NotFound {
                what: format!("tool {name}"),
            })?;
        Self::validate(tool, arguments)?;
        (tool.handler)(dispatcher, arguments).await
    }

    /// Reads a resource by URI.
    ///
    /// # Errors
    ///
    /// [`HostError::NotFound`] for unknown URIs.
    pub async fn read_resource(
        &self,
        dispatcher: &Dispatcher,
        uri: &str,
    ) -> Result<(&'static str, String), HostError> {
        let resource = self
            .resources
            .iter()
            .find(|r| r.uri == uri)
            .ok_or_else(|| HostError::NotFound {
                what: format!("resource {uri}"),
            })?;
        let body = (resource.handler)(dispatcher).await?;
        Ok((resource.mime_type, body))
    }

    fn validate(tool: &ToolSpec, arguments: &Map<String, Value>) -> Result<(), HostError> {
        for prop in &tool.properties {
            let Some(value) = arguments.get(prop.name) else {
                if prop.required {
                    return Err(HostError::MissingRequiredField {
                        field: prop.name.to_owned(),
                    });
                }
                continue;
            };
            if value.is_null() {
                if prop.required {
                    return Err(HostError::MissingRequiredField {
                        field: prop.name.to_owned(),
                    });
                }
                continue;
            }
            if !prop.kind.accepts(value) {
                return Err(HostError::invalid_args(format!(
                    "{} must be a {}",
                    prop.name,
                    prop.kind.as_str()
                )));
            }
            if let (Some(values), Some(s)) = (prop.enum_values, value.as_str()) {
                if !values.contains(&s) {
                    return Err(HostError::invalid_args_with(
                        format!("{} must be one of the allowed values", prop.name),
                        format!("Allowed values: {}", values.join(", ")),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_handler<'a>(
        _dispatcher: &'a Dispatcher,
        args: &'a Map<String, Value>,
    ) -> BoxFuture<'a, Result<Value, HostError>> {
        Box::pin(async move { Ok(Value::Object(args.clone())) })
    }

    fn test_registry() -> Registry {
        Registry::new(
            vec![ToolSpec {
                name: "echo",
                description: "Echoes its arguments",
                properties: vec![
                    PropertySpec::required("text", PropertyType::String, "Text to echo"),
                    PropertySpec::optional("count", PropertyType::Integer, "Repeat count"),
                    PropertySpec::optional("mode", PropertyType::String, "Echo mode")
                        .with_enum(&["loud", "quiet"]),
                ],
                handler: echo_handler,
            }],
            Vec::new(),
        )
    }

    fn test_dispatcher() -> Dispatcher {
        use std::sync::Arc;
        let broadcaster = Arc::new(arca::broadcast::Broadcaster::new());
        Dispatcher::new(
            Arc::new(arca::keystore::mock::MockKeystore::unlocked()),
            std::collections::HashMap::new(),
            Arc::new(arca::pending::PendingTxStore::new(Arc::clone(&broadcaster))),
            broadcaster,
            arca::config::RunMode::Test,
            std::time::Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_unknown_tool_not_found() {
        let registry = test_registry();
        let dispatcher = test_dispatcher();
        let err = registry
            .call_tool(&dispatcher, "nope", &Map::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_missing_required_field() {
        let registry = test_registry();
        let dispatcher = test_dispatcher();
        let err = registry
            .call_tool(&dispatcher, "echo", &Map::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "missing_required_field");
        assert!(err.to_string().contains("text"));
    }

    #[tokio::test]
    async fn test_type_mismatch_rejected() {
        let registry = test_registry();
        let dispatcher = test_dispatcher();
        let mut args = Map::new();
        args.insert("text".to_owned(), json!(42));
        let err = registry.call_tool(&dispatcher, "echo", &args).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_args");
    }

    #[tokio::test]
    async fn test_enum_membership() {
        let registry = test_registry();
        let dispatcher = test_dispatcher();
        let mut args = Map::new();
        args.insert("text".to_owned(), json!("hi"));
        args.insert("mode".to_owned(), json!("shouting"));
        let err = registry.call_tool(&dispatcher, "echo", &args).await.unwrap_err();
        assert!(err.suggestion().unwrap().contains("loud"));

        args.insert("mode".to_owned(), json!("loud"));
        registry.call_tool(&dispatcher, "echo", &args).await.unwrap();
    }

    #[test]
    fn test_schema_listing() {
        let registry = test_registry();
        let tools = registry.list_tools();
        let tool = &tools[0];
        assert_eq!(tool["name"], "echo");
        assert_eq!(tool["inputSchema"]["properties"]["text"]["type"], "string");
        assert_eq!(tool["inputSchema"]["required"][0], "text");
        assert_eq!(tool["inputSchema"]["properties"]["mode"]["enum"][0], "loud");
    }
}
