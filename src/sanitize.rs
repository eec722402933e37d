use serde_json::{Map, Value};

/// Zero-width characters stripped alongside ASCII/Unicode controls. These
/// arrive through copy-paste from rich-text sources and break exact matching
/// downstream.
const ZERO_WIDTH: [char; 4] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{FEFF}'];

fn clean_str(raw: &str) -> String {
    raw.chars()
        .filter(|c| !(c.is_control() && *c != '\n') && !ZERO_WIDTH.contains(c))
        .collect::<String>()
        .trim()
        .to_string()
}

fn is_dropped(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Recursively clean a payload value: strings lose control and zero-width
/// characters and surrounding whitespace; arrays sanitize elementwise; maps
/// sanitize their values and drop any key whose sanitized value is null or
/// empty-string. Pure and idempotent.
pub fn sanitize(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(clean_str(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize).collect()),
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .map(|(key, value)| (key, sanitize(value)))
                .filter(|(_, value)| !is_dropped(value))
                .collect();
            Value::Object(cleaned)
        }
        other => other,
    }
}

/// Sanitize a node payload, collapsing a now-empty map to `None`.
pub fn sanitize_data(data: Option<Map<String, Value>>) -> Option<Map<String, Value>> {
    let data = data?;
    match sanitize(Value::Object(data)) {
        Value::Object(cleaned) if !cleaned.is_empty() => Some(cleaned),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn strips_controls_and_zero_width_and_trims() {
        let dirty = json!("  hello\u{200B}\u{0007} world\t ");
        assert_eq!(sanitize(dirty), json!("hello world"));
    }

    #[test]
    fn newlines_survive_inside_text() {
        assert_eq!(sanitize(json!("line one\nline two")), json!("line one\nline two"));
    }

    #[test]
    fn maps_drop_null_and_empty_string_values() {
        let dirty = json!({
            "title": "  Question  ",
            "empty": "   ",
            "gone": null,
            "zero": 0,
            "flag": false,
        });
        assert_eq!(
            sanitize(dirty),
            json!({"title": "Question", "zero": 0, "flag": false})
        );
    }

    #[test]
    fn arrays_keep_their_shape() {
        let dirty = json!([" a ", "", {"text": " b "}]);
        assert_eq!(sanitize(dirty), json!(["a", "", {"text": "b"}]));
    }

    #[test]
    fn nested_payloads_are_cleaned_throughout() {
        let dirty = json!({
            "options": [{"text": " Yes\u{FEFF} ", "val": null}],
            "description": "",
        });
        assert_eq!(sanitize(dirty), json!({"options": [{"text": "Yes"}]}));
    }

    #[test]
    fn sanitize_is_idempotent() {
        let inputs = [
            json!("  spaced\u{200D} out  "),
            json!({"a": " x ", "b": null, "c": {"d": "\u{0000}"}}),
            json!([" a ", ["b ", null], {"k": " v "}]),
            json!(42),
        ];
        for input in inputs {
            let once = sanitize(input.clone());
            assert_eq!(sanitize(once.clone()), once, "not idempotent for {input}");
        }
    }

    #[test]
    fn empty_payload_collapses_to_none() {
        let data: Map<String, Value> = [("title".to_string(), json!("  "))].into_iter().collect();
        assert_eq!(sanitize_data(Some(data)), None);
        assert_eq!(sanitize_data(None), None);
    }
}
