//! Translation of native tool schemas into model-facing function declarations

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use toolhub_core::{Result, ToolhubError};
use tracing::warn;

use crate::types::McpTool;

const OPAQUE_OBJECT_NOTE: &str = "(provide as encoded text)";

/// Primitive types of the declaration dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl SchemaType {
    /// Map a JSON Schema type name; case-insensitive.
    pub fn from_native(native: &str) -> Option<Self> {
        match native.to_ascii_lowercase().as_str() {
            "string" => Some(SchemaType::String),
            "number" => Some(SchemaType::Number),
            "integer" => Some(SchemaType::Integer),
            "boolean" => Some(SchemaType::Boolean),
            "array" => Some(SchemaType::Array),
            "object" => Some(SchemaType::Object),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub schema_type: SchemaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParametersSchema {
    #[serde(rename = "type")]
    pub schema_type: SchemaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, PropertySchema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

/// `{name, description, parameters}` as handed to a function-calling model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: ParametersSchema,
}

/// Type name of a schema node. A `type` list (`["string", "null"]`) yields
/// its first non-null entry.
fn native_type(schema: &Map<String, Value>) -> Option<&str> {
    match schema.get("type")? {
        Value::String(name) => Some(name.as_str()),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .find(|name| !name.eq_ignore_ascii_case("null")),
        _ => None,
    }
}

fn translate_property(tool: &str, name: &str, schema: &Value) -> Option<PropertySchema> {
    let Some(schema) = schema.as_object() else {
        warn!(
            "Property '{}' in tool '{}' has a non-object schema, skipping property",
            name, tool
        );
        return None;
    };

    let native = native_type(schema).unwrap_or_default();
    let Some(mut schema_type) = SchemaType::from_native(native) else {
        warn!(
            "Property '{}' in tool '{}' has unmappable type '{}', skipping property",
            name, tool, native
        );
        return None;
    };

    let mut description = schema
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let has_sub_properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .is_some_and(|props| !props.is_empty());
    if schema_type == SchemaType::Object && !has_sub_properties {
        warn!(
            "Property '{}' in tool '{}' is an object without sub-properties, mapping to STRING",
            name, tool
        );
        schema_type = SchemaType::String;
        description.push(' ');
        description.push_str(OPAQUE_OBJECT_NOTE);
    }

    let description = description.trim();
    Some(PropertySchema {
        schema_type,
        description: (!description.is_empty()).then(|| description.to_string()),
    })
}

/// Translate one tool.
///
/// `Ok(None)` means the tool cannot be exposed as a function call and was
/// skipped with a warning. `Err` is reserved for structurally malformed
/// schemas; callers skip that tool alone.
pub fn translate_tool(tool: &McpTool) -> Result<Option<FunctionDeclaration>> {
    let malformed = |what: &str| {
        ToolhubError::Protocol(format!("Tool '{}' has a malformed {}", tool.name, what))
    };

    let root_is_object = tool
        .input_schema
        .as_object()
        .and_then(native_type)
        .is_some_and(|t| t.eq_ignore_ascii_case("object"));
    if !root_is_object {
        warn!(
            "Tool '{}' has a non-object input schema, skipping declaration",
            tool.name
        );
        return Ok(None);
    }

    let declared = match tool.input_schema.get("properties") {
        None | Some(Value::Null) => None,
        Some(Value::Object(props)) => Some(props),
        Some(_) => return Err(malformed("'properties' field")),
    };

    let mut properties = BTreeMap::new();
    if let Some(declared) = declared {
        for (name, schema) in declared {
            if let Some(property) = translate_property(&tool.name, name, schema) {
                properties.insert(name.clone(), property);
            }
        }
        if properties.is_empty() && !declared.is_empty() {
            warn!(
                "Skipping tool '{}': no property could be mapped",
                tool.name
            );
            return Ok(None);
        }
    }

    let required = match tool.input_schema.get("required") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(names)) => names
            .iter()
            .map(|n| n.as_str().ok_or_else(|| malformed("'required' entry")))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|n| properties.contains_key(*n))
            .map(str::to_string)
            .collect(),
        Some(_) => return Err(malformed("'required' field")),
    };

    Ok(Some(FunctionDeclaration {
        name: tool.name.clone(),
        description: tool.description.clone(),
        parameters: ParametersSchema {
            schema_type: SchemaType::Object,
            properties: (!properties.is_empty()).then_some(properties),
            required: (!required.is_empty()).then_some(required),
        },
    }))
}

/// Translate a batch; a tool that fails is logged and skipped.
pub fn translate_all<'a>(tools: impl IntoIterator<Item = &'a McpTool>) -> Vec<FunctionDeclaration> {
    tools
        .into_iter()
        .filter_map(|tool| match translate_tool(tool) {
            Ok(declaration) => declaration,
            Err(e) => {
                warn!("Failed to translate tool '{}': {}", tool.name, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, schema: Value) -> McpTool {
        McpTool {
            name: name.to_string(),
            description: format!("{} tool", name),
            input_schema: schema,
        }
    }

    #[test]
    fn test_primitive_mapping() {
        let declaration = translate_tool(&tool(
            "search",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search terms"},
                    "limit": {"type": "integer"},
                    "threshold": {"type": "number"},
                    "exact": {"type": "boolean"},
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "filter": {"type": "object", "properties": {"lang": {"type": "string"}}}
                },
                "required": ["query"]
            }),
        ))
        .unwrap()
        .unwrap();

        let props = declaration.parameters.properties.unwrap();
        assert_eq!(props["query"].schema_type, SchemaType::String);
        assert_eq!(props["query"].description.as_deref(), Some("Search terms"));
        assert_eq!(props["limit"].schema_type, SchemaType::Integer);
        assert_eq!(props["threshold"].schema_type, SchemaType::Number);
        assert_eq!(props["exact"].schema_type, SchemaType::Boolean);
        assert_eq!(props["tags"].schema_type, SchemaType::Array);
        assert_eq!(props["filter"].schema_type, SchemaType::Object);
        assert_eq!(declaration.parameters.required, Some(vec!["query".to_string()]));
    }

    #[test]
    fn test_opaque_object_becomes_string() {
        let declaration = translate_tool(&tool(
            "write",
            json!({
                "type": "object",
                "properties": {"payload": {"type": "object", "description": "Body"}}
            }),
        ))
        .unwrap()
        .unwrap();

        let payload = &declaration.parameters.properties.unwrap()["payload"];
        assert_eq!(payload.schema_type, SchemaType::String);
        assert_eq!(
            payload.description.as_deref(),
            Some("Body (provide as encoded text)")
        );
    }

    #[test]
    fn test_non_object_root_is_skipped() {
        assert!(translate_tool(&tool("raw", json!({"type": "string"})))
            .unwrap()
            .is_none());
        assert!(translate_tool(&tool("empty", Value::Null)).unwrap().is_none());
    }

    #[test]
    fn test_unmappable_properties() {
        // One property survives, so the tool is kept and `required` is trimmed.
        let declaration = translate_tool(&tool(
            "mixed",
            json!({
                "type": "object",
                "properties": {"when": {"type": "date"}, "count": {"type": "integer"}},
                "required": ["when", "count"]
            }),
        ))
        .unwrap()
        .unwrap();
        let props = declaration.parameters.properties.unwrap();
        assert!(!props.contains_key("when"));
        assert_eq!(declaration.parameters.required, Some(vec!["count".to_string()]));

        // Nothing survives.
        assert!(translate_tool(&tool(
            "hopeless",
            json!({"type": "object", "properties": {"when": {"type": "date"}, "x": 3}})
        ))
        .unwrap()
        .is_none());
    }

    #[test]
    fn test_no_properties_is_emitted() {
        let declaration = translate_tool(&tool("ping", json!({"type": "object"})))
            .unwrap()
            .unwrap();
        assert_eq!(declaration.parameters.properties, None);
        assert_eq!(declaration.parameters.required, None);

        let json = serde_json::to_value(&declaration).unwrap();
        assert_eq!(json, json!({
            "name": "ping",
            "description": "ping tool",
            "parameters": {"type": "OBJECT"}
        }));
    }

    #[test]
    fn test_nullable_type_list() {
        let declaration = translate_tool(&tool(
            "opt",
            json!({"type": "object", "properties": {"note": {"type": ["null", "string"]}}}),
        ))
        .unwrap()
        .unwrap();
        assert_eq!(
            declaration.parameters.properties.unwrap()["note"].schema_type,
            SchemaType::String
        );
    }

    #[test]
    fn test_malformed_tool_does_not_abort_batch() {
        let tools = vec![
            tool("bad", json!({"type": "object", "properties": ["a", "b"]})),
            tool("worse", json!({"type": "object", "properties": {}, "required": [1]})),
            tool("good", json!({"type": "object", "properties": {"a": {"type": "string"}}})),
        ];

        assert!(translate_tool(&tools[0]).is_err());
        let declarations = translate_all(&tools);
        assert_eq!(declarations.len(), 1);
        assert_eq!(declarations[0].name, "good");
    }
}
