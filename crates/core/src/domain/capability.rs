use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// JSON type of a single capability parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParameterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    /// Whether `value` is an acceptable JSON value for this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParameterKind,
    pub description: Option<String>,
    pub required: bool,
    /// Explicit JSON schema used instead of `{"type": kind}` (object and array parameters).
    pub schema: Option<Value>,
}

impl ParameterSpec {
    pub fn required(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self { name: name.into(), kind, description: None, required: true, schema: None }
    }

    pub fn optional(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self { required: false, ..Self::required(name, kind) }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    fn json_schema(&self) -> Value {
        let mut schema = match &self.schema {
            Some(Value::Object(explicit)) => explicit.clone(),
            _ => {
                let mut schema = Map::new();
                schema.insert("type".to_string(), json!(self.kind.as_str()));
                schema
            }
        };
        if let Some(description) = &self.description {
            schema.entry("description").or_insert_with(|| json!(description));
        }
        Value::Object(schema)
    }
}

/// Immutable signature of a registered capability.
///
/// Built once while the registry is assembled and shared read-only for the
/// rest of the session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub plugin: Option<String>,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
}

impl CapabilityDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin: None,
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn in_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    pub fn with_parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Name advertised to the model: `plugin-name`, or the bare name.
    pub fn qualified_name(&self) -> String {
        match &self.plugin {
            Some(plugin) => format!("{plugin}{QUALIFIED_NAME_SEPARATOR}{}", self.name),
            None => self.name.clone(),
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|parameter| parameter.name == name)
    }

    /// OpenAI-style `parameters` object for function declarations.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for parameter in &self.parameters {
            properties.insert(parameter.name.clone(), parameter.json_schema());
            if parameter.required {
                required.push(json!(parameter.name));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

pub const QUALIFIED_NAME_SEPARATOR: char = '-';

/// Splits a qualified name into `(plugin, name)`.
pub fn split_qualified_name(qualified: &str) -> (Option<&str>, &str) {
    match qualified.split_once(QUALIFIED_NAME_SEPARATOR) {
        Some((plugin, name)) if !plugin.is_empty() && !name.is_empty() => (Some(plugin), name),
        _ => (None, qualified),
    }
}
