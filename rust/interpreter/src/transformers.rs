//! Built-in transformers.
//!
//! Reserved pipeline stages for format conversion: `json`, `xml`, `csv`,
//! `md` (with uppercase aliases) plus dotted variants (`json.indent`,
//! `csv.header`) and the pass-throughs `keep` / `keepStructured`. A
//! dotted variant registers as a distinct callable; its parent's value is
//! an object of variants, so field access on the parent returns the
//! variant rather than the parent's general implementation.

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{MlldError, MlldResult};

/// Every reserved transformer name, parents and variants.
pub const TRANSFORMER_NAMES: &[&str] = &[
    "JSON",
    "json",
    "XML",
    "xml",
    "CSV",
    "csv",
    "MD",
    "md",
    "json.indent",
    "JSON.indent",
    "csv.header",
    "CSV.header",
    "keep",
    "keepStructured",
];

/// Whether `name` is a reserved transformer.
#[must_use]
pub fn is_transformer(name: &str) -> bool {
    TRANSFORMER_NAMES.contains(&name)
}

/// Variant map for a transformer parent (`"json"` → `{"indent": "json.indent"}`).
#[must_use]
pub fn variants_of(name: &str) -> Option<IndexMap<String, String>> {
    let variants: &[(&str, &str)] = match name {
        "json" | "JSON" => &[("indent", "json.indent")],
        "csv" | "CSV" => &[("header", "csv.header")],
        _ => return None,
    };
    Some(
        variants
            .iter()
            .map(|(field, target)| ((*field).to_string(), (*target).to_string()))
            .collect(),
    )
}

/// A transformer's input and output: the text view plus an optional
/// structured view.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformValue {
    pub text: String,
    pub structured: Option<Value>,
}

impl TransformValue {
    #[must_use]
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            structured: None,
        }
    }

    /// The structured view, falling back to parsing the text as JSON and
    /// finally to a JSON string of the text.
    #[must_use]
    fn to_structured(&self) -> Value {
        if let Some(value) = &self.structured {
            return value.clone();
        }
        serde_json::from_str(&self.text).unwrap_or(Value::String(self.text.clone()))
    }
}

/// Apply a transformer by name.
///
/// # Errors
///
/// [`MlldError::VariableResolution`] for unknown names; conversion
/// errors for inputs a format cannot represent.
pub fn apply(name: &str, input: &TransformValue) -> MlldResult<TransformValue> {
    match name {
        "json" | "JSON" => {
            let value = input.to_structured();
            Ok(TransformValue {
                text: value.to_string(),
                structured: Some(value),
            })
        }
        "json.indent" | "JSON.indent" => {
            let value = input.to_structured();
            let text = serde_json::to_string_pretty(&value)
                .map_err(|err| MlldError::internal(format!("json.indent failed: {err}")))?;
            Ok(TransformValue {
                text,
                structured: Some(value),
            })
        }
        "csv" | "CSV" => to_csv(&input.to_structured(), false),
        "csv.header" | "CSV.header" => to_csv(&input.to_structured(), true),
        "xml" | "XML" => Ok(TransformValue::text_only(to_xml(&input.to_structured()))),
        "md" | "MD" => Ok(TransformValue::text_only(to_markdown(&input.to_structured()))),
        "keep" => Ok(TransformValue::text_only(input.text.clone())),
        "keepStructured" => Ok(input.clone()),
        other => Err(MlldError::VariableResolution {
            name: other.to_string(),
            context: "unknown transformer".to_string(),
        }),
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn csv_cell(value: &Value) -> String {
    match value {
        Value::String(s) => csv_escape(s),
        other => csv_escape(&other.to_string()),
    }
}

fn to_csv(value: &Value, header: bool) -> MlldResult<TransformValue> {
    let Value::Array(rows) = value else {
        return Err(MlldError::VariableResolution {
            name: "csv".to_string(),
            context: "input is not an array".to_string(),
        });
    };

    let mut lines = Vec::new();
    match rows.first() {
        Some(Value::Object(first)) => {
            let columns: Vec<String> = first.keys().cloned().collect();
            if header {
                lines.push(
                    columns
                        .iter()
                        .map(|c| csv_escape(c))
                        .collect::<Vec<_>>()
                        .join(","),
                );
            }
            for row in rows {
                let Value::Object(map) = row else {
                    return Err(MlldError::VariableResolution {
                        name: "csv".to_string(),
                        context: "mixed row shapes".to_string(),
                    });
                };
                lines.push(
                    columns
                        .iter()
                        .map(|c| map.get(c).map(csv_cell).unwrap_or_default())
                        .collect::<Vec<_>>()
                        .join(","),
                );
            }
        }
        _ => {
            for row in rows {
                match row {
                    Value::Array(cells) => {
                        lines.push(cells.iter().map(csv_cell).collect::<Vec<_>>().join(","));
                    }
                    other => lines.push(csv_cell(other)),
                }
            }
        }
    }

    Ok(TransformValue::text_only(lines.join("\n")))
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn to_xml_inner(value: &Value, tag: &str, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push_str(&format!("<{tag}>"));
            for (key, inner) in map {
                to_xml_inner(inner, key, out);
            }
            out.push_str(&format!("</{tag}>"));
        }
        Value::Array(items) => {
            for item in items {
                to_xml_inner(item, tag, out);
            }
        }
        Value::String(s) => out.push_str(&format!("<{tag}>{}</{tag}>", xml_escape(s))),
        other => out.push_str(&format!("<{tag}>{other}</{tag}>")),
    }
}

fn to_xml(value: &Value) -> String {
    let mut out = String::new();
    to_xml_inner(value, "root", &mut out);
    out
}

fn to_markdown(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| format!("- {}", to_markdown(item)))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(map) => map
            .iter()
            .map(|(key, inner)| format!("**{key}**: {}", to_markdown(inner)))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn json_and_indent_share_a_parent() {
        assert!(is_transformer("json"));
        assert!(is_transformer("json.indent"));
        let variants = variants_of("json").expect("variants");
        assert_eq!(variants.get("indent"), Some(&"json.indent".to_string()));

        let input = TransformValue::text_only("{\"a\":1}");
        let compact = apply("json", &input).expect("json");
        assert_eq!(compact.text, "{\"a\":1}");
        let pretty = apply("json.indent", &input).expect("indent");
        assert!(pretty.text.contains("\n  \"a\": 1"));
    }

    #[test]
    fn csv_with_and_without_header() {
        let input = TransformValue {
            text: String::new(),
            structured: Some(serde_json::json!([
                { "name": "Alice", "n": 3 },
                { "name": "B,ob", "n": 4 }
            ])),
        };
        let plain = apply("csv", &input).expect("csv");
        assert_eq!(plain.text, "Alice,3\n\"B,ob\",4");
        let with_header = apply("csv.header", &input).expect("csv.header");
        assert_eq!(with_header.text, "name,n\nAlice,3\n\"B,ob\",4");
    }

    #[test]
    fn keep_preserves_text_keep_structured_preserves_both() {
        let input = TransformValue {
            text: "raw".to_string(),
            structured: Some(serde_json::json!({"k": 1})),
        };
        assert_eq!(apply("keep", &input).expect("keep").structured, None);
        assert_eq!(apply("keepStructured", &input).expect("ks"), input);
    }

    #[test]
    fn xml_escapes_content() {
        let input = TransformValue {
            text: String::new(),
            structured: Some(serde_json::json!({"msg": "a < b"})),
        };
        assert_eq!(
            apply("xml", &input).expect("xml").text,
            "<root><msg>a &lt; b</msg></root>"
        );
    }
}
