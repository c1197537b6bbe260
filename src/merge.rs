//! ConfigResolver (spec §4.1): a pure, field-level three-way merge of a
//! channel's `Settings`/`MetarrArgs` with a channel URL's optional
//! overrides. No I/O, no persistence — `Store` calls this after loading both
//! rows and before handing the effective config to a pipeline stage.
//!
//! Implemented as a per-field function table rather than via reflection, per
//! the design notes: each field gets its own one-line merge rule so the
//! inheritance behavior is auditable at a glance instead of hidden behind a
//! generic "merge struct" helper.

use crate::config::{MetarrArgs, Settings, UNSET_I64};

fn merge_string(child: &str, parent: &str) -> String {
    if child.is_empty() {
        parent.to_string()
    } else {
        child.to_string()
    }
}

fn merge_i64(child: i64, parent: i64) -> i64 {
    if child == UNSET_I64 { parent } else { child }
}

fn merge_vec<T: Clone>(child: &[T], parent: &[T]) -> Vec<T> {
    if child.is_empty() {
        parent.to_vec()
    } else {
        child.to_vec()
    }
}

/// `false` on the child inherits the parent's `true` only for booleans
/// explicitly marked inheritable elsewhere; this helper implements that rule
/// once so call sites can't accidentally apply it to `paused` or
/// `use_global_cookies`.
fn merge_inheritable_bool(child: bool, parent: bool) -> bool {
    child || parent
}

/// Merge a channel's base `Settings` with a channel URL's override, if any.
/// `child_override: None` means "inherit wholesale" (spec §3 invariant 4);
/// `Some(child)` merges field-by-field.
pub(crate) fn merge_settings(parent: &Settings, child_override: Option<&Settings>) -> Settings {
    let Some(child) = child_override else {
        return parent.clone();
    };

    Settings {
        concurrency: merge_i64(child.concurrency, parent.concurrency),
        dl_retries: merge_i64(child.dl_retries, parent.dl_retries),
        cookies_from_browser: merge_string(&child.cookies_from_browser, &parent.cookies_from_browser),
        // Never inherits.
        use_global_cookies: child.use_global_cookies,
        from_date: merge_string(&child.from_date, &parent.from_date),
        to_date: merge_string(&child.to_date, &parent.to_date),
        max_filesize: merge_string(&child.max_filesize, &parent.max_filesize),
        ytdlp_output_ext: merge_string(&child.ytdlp_output_ext, &parent.ytdlp_output_ext),
        extra_ytdlp_video_args: merge_vec(&child.extra_ytdlp_video_args, &parent.extra_ytdlp_video_args),
        external_downloader: merge_string(&child.external_downloader, &parent.external_downloader),
        external_downloader_args: merge_vec(
            &child.external_downloader_args,
            &parent.external_downloader_args,
        ),
        json_dir: merge_string(&child.json_dir, &parent.json_dir),
        // Never inherits.
        paused: child.paused,
        filters: merge_vec(&child.filters, &parent.filters),
    }
}

pub(crate) fn merge_metarr_args(
    parent: &MetarrArgs,
    child_override: Option<&MetarrArgs>,
) -> MetarrArgs {
    let Some(child) = child_override else {
        return parent.clone();
    };

    MetarrArgs {
        ext: merge_string(&child.ext, &parent.ext),
        rename_style: merge_string(&child.rename_style, &parent.rename_style),
        min_free_space: merge_string(&child.min_free_space, &parent.min_free_space),
        use_filename_date: merge_inheritable_bool(child.use_filename_date, parent.use_filename_date),
        transcode_codec: merge_string(&child.transcode_codec, &parent.transcode_codec),
        transcode_video_filter: merge_string(
            &child.transcode_video_filter,
            &parent.transcode_video_filter,
        ),
        transcode_gpu: merge_string(&child.transcode_gpu, &parent.transcode_gpu),
        transcode_gpu_dir: merge_string(&child.transcode_gpu_dir, &parent.transcode_gpu_dir),
        output_dir: merge_string(&child.output_dir, &parent.output_dir),
        move_ops: merge_vec(&child.move_ops, &parent.move_ops),
        filename_ops: merge_vec(&child.filename_ops, &parent.filename_ops),
        meta_ops: merge_vec(&child.meta_ops, &parent.meta_ops),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DLFilter;
    use crate::config::{FilterKind, FilterOp};

    #[test]
    fn merge_cascade_string_and_noninherit_bool() {
        // Boundary scenario 5 from spec §8.
        let mut parent = Settings::default();
        parent.cookies_from_browser = "firefox".to_string();

        let mut child = Settings::default();
        child.cookies_from_browser = String::new();
        child.paused = true;

        let effective = merge_settings(&parent, Some(&child));
        assert_eq!(effective.cookies_from_browser, "firefox");
        assert!(effective.paused);
    }

    #[test]
    fn nil_override_inherits_wholesale() {
        let mut parent = Settings::default();
        parent.concurrency = 4;
        parent.filters.push(DLFilter {
            field: "title".into(),
            op: FilterOp::Contains,
            value: "x".into(),
            kind: FilterKind::Any,
            channel_url: None,
        });

        let effective = merge_settings(&parent, None);
        assert_eq!(effective, parent);
    }

    #[test]
    fn numeric_sentinel_inherits() {
        let mut parent = Settings::default();
        parent.dl_retries = 5;
        let child = Settings::default();
        let effective = merge_settings(&parent, Some(&child));
        assert_eq!(effective.dl_retries, 5);
    }

    #[test]
    fn empty_vec_inherits_deep_copy() {
        let mut parent = Settings::default();
        parent.extra_ytdlp_video_args = vec!["--foo".to_string()];
        let child = Settings::default();
        let effective = merge_settings(&parent, Some(&child));
        assert_eq!(effective.extra_ytdlp_video_args, vec!["--foo".to_string()]);
    }

    #[test]
    fn merge_is_idempotent() {
        let parent = Settings::default();
        let child = Settings::default();
        let once = merge_settings(&parent, Some(&child));
        let twice = merge_settings(&parent, Some(&once));
        assert_eq!(once, twice);
    }
}
