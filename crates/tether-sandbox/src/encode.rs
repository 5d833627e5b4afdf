//! Wire encoding of execution results.

use crate::interpreter::ScriptValue;
use crate::request::ExecutionResult;
use serde_json::json;
use tracing::warn;

/// Serialize a result to its JSON wire form.
///
/// A result whose value has no JSON form is replaced by a `fail` result
/// naming the value's type.
pub fn encode(result: &ExecutionResult) -> String {
    match serde_json::to_string(result) {
        Ok(text) => text,
        Err(err) => {
            let type_name = result.opaque_type().unwrap_or("unknown");
            warn!(type_name = %type_name, error = %err, "result is not encodable");
            json!({
                "status": "fail",
                "description": format!("TypeError: {} is wrong data type", escape_html(type_name)),
            })
            .to_string()
        }
    }
}

/// Debug rendering used by the console: data as compact JSON text (strings
/// quoted), opaque values by their repr, null stays null.
pub fn render_debug(value: &ScriptValue) -> ScriptValue {
    match value {
        ScriptValue::Data(data) if data.is_null() => ScriptValue::null(),
        ScriptValue::Data(data) => ScriptValue::Data(data.to_string().into()),
        ScriptValue::Opaque { repr, .. } => ScriptValue::Data(repr.clone().into()),
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            other => escaped.push(other),
        }
    }
    escaped
}
