//! Filename templating for `template_rename` batches.
//!
//! Templates use `{field}` placeholders, optionally zero-padded with
//! `{field:3}`. Values come from the item's metadata object. Rendered
//! values are sanitized so that a field can never introduce a path
//! separator.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::CoreError;

/// Maximum rendered filename length in bytes.
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Compiled regex for `{field}` and `{field:width}` placeholders.
static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([a-zA-Z_][a-zA-Z0-9_]*)(?::(\d{1,2}))?\}").expect("valid regex")
});

/// Characters that are unsafe in a filename on at least one platform.
const UNSAFE_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Replace unsafe characters and trim trailing dots and spaces.
pub fn sanitize_component(value: &str) -> String {
    let replaced: String = value
        .chars()
        .map(|c| {
            if UNSAFE_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    replaced.trim().trim_end_matches('.').trim_end().to_string()
}

/// Render a filename template against a metadata object.
///
/// Fails when a placeholder has no value or the result is empty.
pub fn render_template(
    template: &str,
    fields: &serde_json::Map<String, serde_json::Value>,
) -> Result<String, CoreError> {
    let mut missing = Vec::new();

    let rendered = PLACEHOLDER_RE.replace_all(template, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        let raw = match fields.get(name) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            Some(serde_json::Value::Bool(b)) => b.to_string(),
            _ => {
                missing.push(name.to_string());
                return String::new();
            }
        };
        let value = match caps.get(2).and_then(|w| w.as_str().parse::<usize>().ok()) {
            Some(width) => format!("{raw:0>width$}"),
            None => raw,
        };
        sanitize_component(&value)
    });

    if !missing.is_empty() {
        return Err(CoreError::Validation(format!(
            "Template references missing fields: {}",
            missing.join(", ")
        )));
    }

    let rendered = rendered.trim().to_string();
    if rendered.is_empty() {
        return Err(CoreError::Validation(
            "Template rendered an empty filename".to_string(),
        ));
    }
    if rendered.len() > MAX_FILENAME_LENGTH {
        return Err(CoreError::Validation(format!(
            "Rendered filename exceeds maximum length of {MAX_FILENAME_LENGTH}"
        )));
    }
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn renders_fields_with_padding() {
        let f = fields(json!({"series": "Saga", "number": 7, "year": 2012}));
        assert_eq!(
            render_template("{series} {number:3} ({year}).cbz", &f).unwrap(),
            "Saga 007 (2012).cbz"
        );
    }

    #[test]
    fn field_values_cannot_introduce_separators() {
        let f = fields(json!({"series": "AC/DC: Live"}));
        assert_eq!(
            render_template("{series}.cbz", &f).unwrap(),
            "AC_DC_ Live.cbz"
        );
    }

    #[test]
    fn missing_fields_are_reported() {
        let f = fields(json!({"series": "Saga"}));
        let err = render_template("{series} {number}.cbz", &f).unwrap_err();
        assert!(err.to_string().contains("number"));
    }

    #[test]
    fn empty_result_rejected() {
        let f = fields(json!({"title": "   "}));
        assert!(render_template("{title}", &f).is_err());
    }

    #[test]
    fn sanitize_trims_trailing_dots() {
        assert_eq!(sanitize_component("Vol. 1..."), "Vol. 1");
        assert_eq!(sanitize_component("a\tb"), "a_b");
    }
}
