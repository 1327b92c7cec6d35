//! Canonical JSON extraction from free-form model output.

use serde_json::Value;
use thiserror::Error;

/// Top-level JSON shape expected from a model pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonShape {
    /// A JSON array (`[...]`).
    Array,
    /// A JSON object (`{...}`).
    Object,
}

impl JsonShape {
    fn delimiters(self) -> (char, char) {
        match self {
            JsonShape::Array => ('[', ']'),
            JsonShape::Object => ('{', '}'),
        }
    }
}

/// Reasons a model response did not yield the expected JSON value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    /// No opening/closing delimiter pair was found.
    #[error("no JSON {0:?} found in model output")]
    NotFound(JsonShape),
    /// The delimited range did not parse.
    #[error("JSON {shape:?} in model output failed to parse: {message}")]
    Parse {
        /// Expected shape.
        shape: JsonShape,
        /// Parser message.
        message: String,
    },
}

/// Extract the value spanning the first opening to the last closing delimiter of `shape`.
///
/// Surrounding prose and code fences are ignored. A range that does not parse as the expected
/// shape is an error; there is no further guessing.
pub fn extract_json(text: &str, shape: JsonShape) -> Result<Value, ExtractError> {
    let (open, close) = shape.delimiters();
    let start = text.find(open).ok_or(ExtractError::NotFound(shape))?;
    let end = text.rfind(close).ok_or(ExtractError::NotFound(shape))?;
    if end < start {
        return Err(ExtractError::NotFound(shape));
    }

    let value: Value =
        serde_json::from_str(&text[start..=end]).map_err(|error| ExtractError::Parse {
            shape,
            message: error.to_string(),
        })?;

    let matches = match shape {
        JsonShape::Array => value.is_array(),
        JsonShape::Object => value.is_object(),
    };
    if !matches {
        return Err(ExtractError::Parse {
            shape,
            message: "unexpected top-level type".into(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_array_from_fenced_prose() {
        let text = "Sure! Here you go:\n```json\n[{\"question\": \"q\", \"answer\": \"a [x]\"}]\n```\nDone.";
        let value = extract_json(text, JsonShape::Array).expect("array");
        assert_eq!(value, json!([{ "question": "q", "answer": "a [x]" }]));
    }

    #[test]
    fn extracts_object_with_nested_arrays() {
        let text = "Plan: {\"takeaways\": [{\"statement\": \"s\"}], \"has_equations\": false} end";
        let value = extract_json(text, JsonShape::Object).expect("object");
        assert_eq!(value["has_equations"], json!(false));
    }

    #[test]
    fn reports_missing_delimiters() {
        assert_eq!(
            extract_json("no json here", JsonShape::Array),
            Err(ExtractError::NotFound(JsonShape::Array))
        );
        assert_eq!(
            extract_json("] backwards [", JsonShape::Array),
            Err(ExtractError::NotFound(JsonShape::Array))
        );
    }

    #[test]
    fn parse_failure_in_range_is_an_error() {
        let error = extract_json("[1, 2,, 3]", JsonShape::Array).expect_err("invalid");
        assert!(matches!(error, ExtractError::Parse { shape: JsonShape::Array, .. }));
    }

    #[test]
    fn two_separate_arrays_do_not_parse() {
        let error = extract_json("[1] and [2]", JsonShape::Array).expect_err("ambiguous");
        assert!(matches!(error, ExtractError::Parse { .. }));
    }
}
