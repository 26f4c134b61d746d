use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

/// Minimal structural contract for a phase's JSON output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchemaSpec {
    Object {
        #[serde(default)]
        required: Vec<String>,
    },
    Array {
        #[serde(default)]
        min_items: usize,
    },
}

impl SchemaSpec {
    pub fn object(required: &[&str]) -> Self {
        SchemaSpec::Object {
            required: required.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn check(&self, value: &Value) -> Result<(), String> {
        match self {
            SchemaSpec::Object { required } => {
                let Some(map) = value.as_object() else {
                    return Err("expected a JSON object".to_string());
                };
                let missing: Vec<&str> = required
                    .iter()
                    .filter(|k| map.get(k.as_str()).is_none_or(Value::is_null))
                    .map(String::as_str)
                    .collect();
                if missing.is_empty() {
                    Ok(())
                } else {
                    Err(format!("missing required keys: {}", missing.join(", ")))
                }
            }
            SchemaSpec::Array { min_items } => {
                let Some(items) = value.as_array() else {
                    return Err("expected a JSON array".to_string());
                };
                if items.len() < *min_items {
                    Err(format!(
                        "expected at least {} items, got {}",
                        min_items,
                        items.len()
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Body of the first fenced ```json block, if any.
pub(crate) fn extract_json_block(text: &str) -> Option<&str> {
    static FENCE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?is)```json[ \t]*\n?(.*?)```").unwrap());
    let block = FENCE.captures(text)?.get(1)?.as_str().trim();
    if block.is_empty() { None } else { Some(block) }
}

/// Every well-formed JSON object or array embedded in `text`, in order of
/// where it starts. Nested values are not reported separately.
fn embedded_json_values(text: &str) -> Vec<Value> {
    let mut out = Vec::new();
    let mut cursor = 0;
    while cursor < text.len() {
        let Some(offset) = text[cursor..].find(['{', '[']) else {
            break;
        };
        let start = cursor + offset;
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) => {
                out.push(value);
                cursor = start + stream.byte_offset().max(1);
            }
            _ => cursor = start + 1,
        }
    }
    out
}

/// Parse `raw` against `schema`, falling back to a best-effort repair: a
/// fenced ```json block first, then the first embedded object/array that
/// satisfies the schema.
pub fn parse_with_repair(raw: &str, schema: &SchemaSpec) -> Result<Value, String> {
    let mut last_error = match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value) => match schema.check(&value) {
            Ok(()) => return Ok(value),
            Err(reason) => reason,
        },
        Err(e) => format!("not valid JSON: {}", e),
    };

    if let Some(block) = extract_json_block(raw) {
        match serde_json::from_str::<Value>(block) {
            Ok(value) => match schema.check(&value) {
                Ok(()) => return Ok(value),
                Err(reason) => last_error = reason,
            },
            Err(e) => last_error = format!("fenced block is not valid JSON: {}", e),
        }
    }

    for value in embedded_json_values(raw) {
        match schema.check(&value) {
            Ok(()) => return Ok(value),
            Err(reason) => last_error = reason,
        }
    }

    Err(last_error)
}

/// Best-effort JSON extraction without a schema: any object or array will do.
pub fn parse_json_loose(raw: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(raw.trim())
        && (value.is_object() || value.is_array())
    {
        return Some(value);
    }
    if let Some(block) = extract_json_block(raw)
        && let Ok(value) = serde_json::from_str::<Value>(block)
    {
        return Some(value);
    }
    embedded_json_values(raw).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clean_json_passes_directly() {
        let schema = SchemaSpec::object(&["title"]);
        let value = parse_with_repair(r#"{"title":"Hello"}"#, &schema).unwrap();
        assert_eq!(value["title"], "Hello");
    }

    #[test]
    fn fenced_block_is_repaired() {
        let schema = SchemaSpec::object(&["outline"]);
        let raw = "Sure! Here is the outline:\n```json\n{\"outline\": [\"intro\", \"body\"]}\n```\nLet me know.";
        let value = parse_with_repair(raw, &schema).unwrap();
        assert_eq!(value["outline"], json!(["intro", "body"]));
    }

    #[test]
    fn embedded_object_in_prose_is_repaired() {
        let schema = SchemaSpec::object(&["body"]);
        let raw = "Draft follows {\"body\": \"text with } brace\", \"n\": 1} and that's it";
        let value = parse_with_repair(raw, &schema).unwrap();
        assert_eq!(value["body"], "text with } brace");
    }

    #[test]
    fn first_object_matching_schema_wins() {
        let schema = SchemaSpec::object(&["final"]);
        let raw = r#"scratch {"note": 1} then {"final": "yes"}"#;
        let value = parse_with_repair(raw, &schema).unwrap();
        assert_eq!(value["final"], "yes");
    }

    #[test]
    fn missing_required_key_fails_after_repair() {
        let schema = SchemaSpec::object(&["outline", "title"]);
        let err = parse_with_repair(r#"{"outline": []}"#, &schema).unwrap_err();
        assert!(err.contains("title"));
    }

    #[test]
    fn null_required_key_counts_as_missing() {
        let schema = SchemaSpec::object(&["title"]);
        assert!(schema.check(&json!({"title": null})).is_err());
    }

    #[test]
    fn prose_without_json_fails() {
        let schema = SchemaSpec::object(&[]);
        let err = parse_with_repair("I could not do that.", &schema).unwrap_err();
        assert!(err.contains("not valid JSON"));
    }

    #[test]
    fn array_schema_enforces_min_items() {
        let schema = SchemaSpec::Array { min_items: 2 };
        assert!(parse_with_repair("[1]", &schema).is_err());
        assert_eq!(parse_with_repair("x [1,2] y", &schema).unwrap(), json!([1, 2]));
    }

    #[test]
    fn loose_parse_finds_fenced_or_embedded() {
        assert_eq!(
            parse_json_loose("```json\n{\"a\":1}\n```").unwrap(),
            json!({"a": 1})
        );
        assert_eq!(parse_json_loose("ok: {\"b\":2}").unwrap(), json!({"b": 2}));
        assert!(parse_json_loose("plain text").is_none());
        assert!(parse_json_loose("42").is_none());
    }

    #[test]
    fn fence_tag_is_case_insensitive() {
        assert_eq!(
            extract_json_block("see\n```JSON\n[1, 2]\n```"),
            Some("[1, 2]")
        );
        assert_eq!(extract_json_block("```json\n\n```"), None);
        assert_eq!(extract_json_block("```\n{}\n```"), None);
    }

    #[test]
    fn schema_deserializes_from_toml_style_tag() {
        let schema: SchemaSpec =
            serde_json::from_value(json!({"type": "object", "required": ["a"]})).unwrap();
        assert_eq!(schema, SchemaSpec::object(&["a"]));
    }
}
