//! Lenient parsing of model JSON output

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Drop a surrounding markdown code fence, if any
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // skip the info string ("json")
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a JSON value out of model text, tolerating fences and chatter around it
pub fn parse_payload(raw: &str) -> Result<Value> {
    let text = strip_code_fence(raw);
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Ok(value);
    }

    // outermost object or array embedded in prose, whichever opens first
    let mut delimiters = [('{', '}'), ('[', ']')];
    if let (Some(array), Some(object)) = (text.find('['), text.find('{')) {
        if array < object {
            delimiters.swap(0, 1);
        }
    }
    for (open, close) in delimiters {
        if let (Some(start), Some(end)) = (text.find(open), text.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str::<Value>(&text[start..=end]) {
                    return Ok(value);
                }
            }
        }
    }

    let preview: String = text.chars().take(120).collect();
    Err(Error::model_output(format!("no JSON found in \"{}\"", preview)))
}

/// The entry list of a payload: a bare array, or the first array under one of `keys`
pub fn entry_list(value: Value, keys: &[&str]) -> Result<Vec<Value>> {
    match value {
        Value::Array(entries) => Ok(entries),
        Value::Object(mut map) => {
            for key in keys {
                if let Some(Value::Array(entries)) = map.remove(*key) {
                    return Ok(entries);
                }
            }
            // a single-key wrapper with an unexpected name
            if map.len() == 1 {
                if let Some((_, Value::Array(entries))) = map.into_iter().next() {
                    return Ok(entries);
                }
            }
            Err(Error::model_output(format!(
                "expected an array under one of {:?}",
                keys
            )))
        }
        other => Err(Error::model_output(format!(
            "expected an array or object, got {}",
            other
        ))),
    }
}

/// First non-blank string among `keys`
pub fn string_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .filter_map(|v| match v {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .find(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_fenced_json() {
        let raw = "```json\n{\"questions\": []}\n```";
        assert_eq!(parse_payload(raw).unwrap(), json!({ "questions": [] }));
    }

    #[test]
    fn test_parse_json_inside_prose() {
        let raw = "Here you go:\n[{\"question\": \"Q1\"}]\nLet me know!";
        assert_eq!(parse_payload(raw).unwrap(), json!([{ "question": "Q1" }]));
    }

    #[test]
    fn test_parse_object_inside_prose_keeps_wrapper() {
        let raw = "Sure. {\"questions\": [{\"question\": \"Q1\"}]} Done.";
        assert_eq!(
            parse_payload(raw).unwrap(),
            json!({ "questions": [{ "question": "Q1" }] })
        );
    }

    #[test]
    fn test_parse_single_entry_array_inside_prose_feeds_entry_list() {
        let parsed = parse_payload("Here you go:\n[{\"question\": \"Q1\"}]").unwrap();
        let entries = entry_list(parsed, &["questions"]).unwrap();
        assert_eq!(entries, vec![json!({ "question": "Q1" })]);
    }

    #[test]
    fn test_parse_rejects_text() {
        let err = parse_payload("I could not find any questions.").unwrap_err();
        assert!(matches!(err, Error::ModelOutput(_)));
    }

    #[test]
    fn test_entry_list_shapes() {
        let keys = ["questions", "items"];
        assert_eq!(entry_list(json!([1, 2]), &keys).unwrap().len(), 2);
        assert_eq!(entry_list(json!({ "items": [1] }), &keys).unwrap().len(), 1);
        assert_eq!(entry_list(json!({ "data": [1, 2, 3] }), &keys).unwrap().len(), 3);
        assert!(entry_list(json!({ "a": [1], "b": [2] }), &keys).is_err());
        assert!(entry_list(json!("text"), &keys).is_err());
    }
}
