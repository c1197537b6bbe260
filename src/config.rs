//! `Settings` / `MetarrArgs` — the per-channel and per-channel-URL
//! configuration structs merged by [`crate::merge`], plus the `Validator`
//! collaborator (spec §6) that normalizes and rejects malformed values at
//! the store's read/write boundaries (spec §4.2).
//!
//! Numeric fields use a per-field zero-sentinel (`-1` for "unset", matching
//! spec §4.1) rather than `Option<i64>` so the merge table in
//! [`crate::merge`] can treat every field uniformly without an `Option`
//! unwrap at each site.

use crate::error::CoreError;

pub(crate) const UNSET_I64: i64 = -1;

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub(crate) enum FilterOp {
    Contains,
    Omits,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub(crate) enum FilterKind {
    Must,
    Any,
}

/// One metadata-predicate rule evaluated during the `filtering` pipeline
/// stage (spec §4.6).
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub(crate) struct DLFilter {
    pub(crate) field: String,
    pub(crate) op: FilterOp,
    /// Empty value means "test presence of `field`" (spec §4.6).
    pub(crate) value: String,
    pub(crate) kind: FilterKind,
    /// When set, this rule only applies to the named channel URL.
    pub(crate) channel_url: Option<String>,
}

/// A rule that assigns the video's output directory based on a metadata
/// field's contents (spec GLOSSARY: Move op).
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub(crate) struct MoveOp {
    pub(crate) field: String,
    pub(crate) contains_value: String,
    pub(crate) output_dir: String,
    pub(crate) channel_url: Option<String>,
}

/// A filename/metadata op passed through to `metarr`. `key` is the conflict
/// key used for the dedup/override rules in spec §4.6 (e.g. `"date-tag"` and
/// `"delete-date-tag"` are mutually exclusive and share no key by design —
/// conflicting pairs are modeled via `supersedes`).
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub(crate) struct MetarrOp {
    pub(crate) key: String,
    pub(crate) value: String,
    pub(crate) channel_url: Option<String>,
    /// True if this op only applies when a metadata predicate matched
    /// ("filtered" ops per spec §4.6); filtered ops outrank plain ops
    /// sharing the same key.
    pub(crate) filtered: bool,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub(crate) struct Settings {
    pub(crate) concurrency: i64,
    pub(crate) dl_retries: i64,
    pub(crate) cookies_from_browser: String,
    /// Never inherits (spec §3 invariant 4).
    pub(crate) use_global_cookies: bool,
    pub(crate) from_date: String,
    pub(crate) to_date: String,
    pub(crate) max_filesize: String,
    pub(crate) ytdlp_output_ext: String,
    pub(crate) extra_ytdlp_video_args: Vec<String>,
    pub(crate) external_downloader: String,
    pub(crate) external_downloader_args: Vec<String>,
    pub(crate) json_dir: String,
    /// Never inherits (spec §3 invariant 4).
    pub(crate) paused: bool,
    pub(crate) filters: Vec<DLFilter>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            concurrency: UNSET_I64,
            dl_retries: UNSET_I64,
            cookies_from_browser: String::new(),
            use_global_cookies: false,
            from_date: String::new(),
            to_date: String::new(),
            max_filesize: String::new(),
            ytdlp_output_ext: String::new(),
            extra_ytdlp_video_args: Vec::new(),
            external_downloader: String::new(),
            external_downloader_args: Vec::new(),
            json_dir: String::new(),
            paused: false,
            filters: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub(crate) struct MetarrArgs {
    pub(crate) ext: String,
    pub(crate) rename_style: String,
    pub(crate) min_free_space: String,
    /// Explicitly inheritable boolean: `false` on the child is replaced by
    /// `true` on the parent (spec §4.1).
    pub(crate) use_filename_date: bool,
    pub(crate) transcode_codec: String,
    pub(crate) transcode_video_filter: String,
    pub(crate) transcode_gpu: String,
    pub(crate) transcode_gpu_dir: String,
    /// Directory template consumed by [`crate::dirparser`].
    pub(crate) output_dir: String,
    pub(crate) move_ops: Vec<MoveOp>,
    pub(crate) filename_ops: Vec<MetarrOp>,
    pub(crate) meta_ops: Vec<MetarrOp>,
}

impl Default for MetarrArgs {
    fn default() -> Self {
        MetarrArgs {
            ext: String::new(),
            rename_style: String::new(),
            min_free_space: String::new(),
            use_filename_date: false,
            transcode_codec: String::new(),
            transcode_video_filter: String::new(),
            transcode_gpu: String::new(),
            transcode_gpu_dir: String::new(),
            output_dir: String::new(),
            move_ops: Vec::new(),
            filename_ops: Vec::new(),
            meta_ops: Vec::new(),
        }
    }
}

/// Recognized top-level TOML/flag options (spec §6), loaded once at startup
/// and used to seed a channel's initial `Settings`/`MetarrArgs` on creation.
#[derive(Clone, Debug, Default, serde::Deserialize)]
pub(crate) struct ProgramConfig {
    #[serde(default)]
    pub(crate) concurrency_limit: Option<i64>,
    #[serde(default)]
    pub(crate) crawl_freq: Option<i64>,
    #[serde(default)]
    pub(crate) dl_retries: Option<i64>,
    #[serde(default)]
    pub(crate) skip_initial_wait: bool,
    #[serde(default)]
    pub(crate) skip_all_waits: bool,
    #[serde(default)]
    pub(crate) global_concurrency: Option<i64>,
}

impl ProgramConfig {
    pub(crate) fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

fn normalize_date(field: &str, value: &str) -> Result<String, CoreError> {
    if value.is_empty() {
        return Ok(String::new());
    }
    chrono::NaiveDate::parse_from_str(value, "%Y%m%d")
        .map(|_| value.to_string())
        .map_err(|e| CoreError::Validation(format!("{field} '{value}' is not YYYYMMDD: {e}")))
}

/// Validates and normalizes a single `Settings` value. Invoked at both read
/// and write boundaries in `Store` (spec §4.2).
pub(crate) fn validate_settings(s: &Settings) -> Result<(), CoreError> {
    if s.concurrency != UNSET_I64 && s.concurrency < 1 {
        return Err(CoreError::Validation(
            "concurrency must be >= 1 or unset".into(),
        ));
    }
    if s.dl_retries != UNSET_I64 && s.dl_retries < 0 {
        return Err(CoreError::Validation(
            "dl_retries must be >= 0 or unset".into(),
        ));
    }
    normalize_date("from_date", &s.from_date)?;
    normalize_date("to_date", &s.to_date)?;
    for filter in &s.filters {
        if filter.field.trim().is_empty() {
            return Err(CoreError::Validation("filter field must not be empty".into()));
        }
    }
    Ok(())
}

pub(crate) fn validate_metarr_args(m: &MetarrArgs) -> Result<(), CoreError> {
    for op in m.move_ops.iter() {
        if op.field.trim().is_empty() {
            return Err(CoreError::Validation("move op field must not be empty".into()));
        }
    }
    for op in m.filename_ops.iter().chain(m.meta_ops.iter()) {
        if op.key.trim().is_empty() {
            return Err(CoreError::Validation("metarr op key must not be empty".into()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_date() {
        let mut s = Settings::default();
        s.from_date = "2024-01-01".to_string();
        assert!(validate_settings(&s).is_err());
    }

    #[test]
    fn accepts_unset_numeric_fields() {
        let s = Settings::default();
        assert!(validate_settings(&s).is_ok());
    }

    #[test]
    fn rejects_negative_concurrency_below_unset() {
        let mut s = Settings::default();
        s.concurrency = 0;
        assert!(validate_settings(&s).is_err());
    }
}
