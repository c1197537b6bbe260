//! DirParser (spec §4.9): expands `{field}` placeholders inside a directory
//! template against a video's metadata map, one at a time. Pure function;
//! produces an absolute path. Unknown placeholders are errors.

use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub(crate) enum DirParserError {
    #[error("unknown placeholder '{{{0}}}' in directory template")]
    UnknownPlaceholder(String),
    #[error("directory template did not resolve to an absolute path: {0}")]
    NotAbsolute(String),
}

static ALIASES: &[(&str, &str)] = &[
    ("title", "title"),
    ("uploader", "uploader"),
    ("channel", "uploader"),
    ("year", "upload_date"),
    ("upload_date", "upload_date"),
    ("description", "description"),
    ("id", "id"),
    ("ext", "ext"),
];

fn resolve_alias(field: &str) -> &str {
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == field)
        .map_or(field, |(_, key)| *key)
}

fn field_value(metadata: &HashMap<String, serde_json::Value>, field: &str) -> Option<String> {
    if field == "year" {
        return metadata
            .get("upload_date")
            .and_then(|v| v.as_str())
            .and_then(|s| s.get(0..4))
            .map(str::to_string);
    }

    let key = resolve_alias(field);
    metadata.get(key).map(|v| match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// Expands every `{field}` token in `template` against `metadata`. Returns
/// an error on the first unresolvable placeholder, or if the result is not
/// an absolute path.
pub(crate) fn expand(
    template: &str,
    metadata: &HashMap<String, serde_json::Value>,
) -> Result<PathBuf, DirParserError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }
        let Some(end) = template[i..].find('}') else {
            out.push(c);
            continue;
        };
        let field = &template[i + 1..i + end];
        let value = field_value(metadata, field)
            .ok_or_else(|| DirParserError::UnknownPlaceholder(field.to_string()))?;
        out.push_str(&value);

        // Skip past the consumed placeholder, including the closing brace.
        for _ in 0..end {
            chars.next();
        }
    }

    let path = PathBuf::from(out);
    if !path.is_absolute() {
        return Err(DirParserError::NotAbsolute(path.display().to_string()));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata() -> HashMap<String, serde_json::Value> {
        HashMap::from([
            ("title".to_string(), json!("My Video")),
            ("uploader".to_string(), json!("Some Channel")),
            ("upload_date".to_string(), json!("20240115")),
        ])
    }

    #[test]
    fn expands_known_aliases() {
        let path = expand("/videos/{uploader}/{year}/{title}", &metadata()).expect("expand");
        assert_eq!(path, PathBuf::from("/videos/Some Channel/2024/My Video"));
    }

    #[test]
    fn unknown_placeholder_is_error() {
        let err = expand("/videos/{bogus}", &metadata()).unwrap_err();
        assert_eq!(err, DirParserError::UnknownPlaceholder("bogus".to_string()));
    }

    #[test]
    fn relative_template_is_error() {
        let err = expand("videos/{title}", &metadata()).unwrap_err();
        assert!(matches!(err, DirParserError::NotAbsolute(_)));
    }
}
