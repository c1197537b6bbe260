//! Downloader and post-processor collaborators (spec §6): adapters over the
//! external `yt-dlp` and `metarr` binaries. We specify the process contract
//! (spawn, stream, kill-on-cancel, exit-code/stdout parsing) but not their
//! argv construction, which stays out of core scope (spec §1).
//!
//! Process lifetime is tied to the root cancellation token via
//! `kill_on_drop` plus an explicit `select!` against the token, matching the
//! "process-kill semantics" design note (spec §9) and the subprocess
//! wrappers in the pack's yt-dlp-fronting examples (e.g. LocalTube's
//! `ytdlp.rs`, `doradura`'s `ytdlp.rs`).

use crate::config::Settings;
use crate::error::ErrorClass;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

pub(crate) struct FetchMetadataResult {
    pub(crate) json_path: PathBuf,
}

pub(crate) struct FetchVideoResult {
    pub(crate) final_path: PathBuf,
}

/// Runs `yt-dlp` to retrieve a `.json` metadata sidecar for `url` into
/// `cfg.json_dir`, honoring cancellation (spec §6 `FetchMetadata`). Writes to
/// a tempfile and renames atomically on success so a cancelled attempt never
/// leaves a partial sidecar behind (spec §9 design note on retry-with-state).
pub(crate) async fn fetch_metadata(
    url: &str,
    cfg: &Settings,
    cancel: &CancellationToken,
) -> Result<FetchMetadataResult, ErrorClass> {
    let json_dir = if cfg.json_dir.is_empty() {
        std::env::temp_dir()
    } else {
        PathBuf::from(&cfg.json_dir)
    };
    let tmp_path = json_dir.join(format!(".{}.json.partial", uuid::Uuid::new_v4()));

    let mut cmd = tokio::process::Command::new("yt-dlp");
    cmd.kill_on_drop(true)
        .arg("--quiet")
        .arg("--no-warnings")
        .arg("--skip-download")
        .arg("--write-info-json")
        .arg("--output")
        .arg(&tmp_path)
        .arg(url);

    let Ok(mut child) = cmd.spawn() else {
        return Err(ErrorClass::Fatal);
    };

    let status = tokio::select! {
        status = child.wait() => status,
        () = cancel.cancelled() => {
            let _ = child.kill().await;
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(ErrorClass::Transient);
        }
    };

    match status {
        Ok(status) if status.success() => {
            let final_path = json_dir.join(format!("{}.info.json", sanitize_for_filename(url)));
            if tokio::fs::rename(&tmp_path, &final_path).await.is_err() {
                return Err(ErrorClass::Transient);
            }
            Ok(FetchMetadataResult { json_path: final_path })
        }
        Ok(status) if looks_like_bot_block(status.code()) => Err(ErrorClass::BotBlocked),
        Ok(_) => Err(ErrorClass::Transient),
        Err(_) => Err(ErrorClass::Transient),
    }
}

/// Streams a video download via `yt-dlp`, reporting parsed `percent (0-100)`
/// progress lines through `on_progress` as they arrive (spec §4.7 live
/// progress) and resolving the real output path from yt-dlp's own
/// `--print after_move:filepath` line rather than guessing a filename —
/// the `%(id)s.%(ext)s` template means the actual extension isn't known
/// until yt-dlp picks it (spec §6 `FetchVideo`).
pub(crate) async fn fetch_video(
    url: &str,
    cfg: &Settings,
    output_dir: &Path,
    cancel: &CancellationToken,
    mut on_progress: impl FnMut(f64),
) -> Result<FetchVideoResult, ErrorClass> {
    let mut cmd = tokio::process::Command::new("yt-dlp");
    cmd.kill_on_drop(true)
        .arg("--newline")
        .arg("--print")
        .arg("after_move:filepath")
        .arg("--output")
        .arg(output_dir.join("%(id)s.%(ext)s"));

    if !cfg.max_filesize.is_empty() {
        cmd.arg("--max-filesize").arg(&cfg.max_filesize);
    }
    if !cfg.cookies_from_browser.is_empty() {
        cmd.arg("--cookies-from-browser").arg(&cfg.cookies_from_browser);
    }
    if !cfg.external_downloader.is_empty() {
        cmd.arg("--external-downloader").arg(&cfg.external_downloader);
        for arg in &cfg.external_downloader_args {
            cmd.arg("--external-downloader-args").arg(arg);
        }
    }
    if !cfg.ytdlp_output_ext.is_empty() {
        cmd.arg("--merge-output-format").arg(&cfg.ytdlp_output_ext);
    }
    for arg in &cfg.extra_ytdlp_video_args {
        cmd.arg(arg);
    }
    cmd.arg(url).stdout(std::process::Stdio::piped());

    let Ok(mut child) = cmd.spawn() else {
        return Err(ErrorClass::Fatal);
    };

    let Some(stdout) = child.stdout.take() else {
        let _ = child.kill().await;
        return Err(ErrorClass::Fatal);
    };

    use tokio::io::AsyncBufReadExt;
    let mut lines = tokio::io::BufReader::new(stdout).lines();
    let mut final_path: Option<PathBuf> = None;

    let status = loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if let Some(p) = parse_progress_line(&line) {
                            on_progress(p);
                        } else if !line.trim().is_empty() && !line.starts_with('[') {
                            // the `--print after_move:filepath` line: the
                            // last one wins if yt-dlp prints more than once.
                            final_path = Some(PathBuf::from(line.trim()));
                        }
                    }
                    Ok(None) => break child.wait().await,
                    Err(_) => break child.wait().await,
                }
            }
            () = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(ErrorClass::Transient);
            }
        }
    };

    match status {
        Ok(status) if status.success() => match final_path {
            Some(final_path) => Ok(FetchVideoResult { final_path }),
            None => {
                tracing::warn!(url, "yt-dlp exited successfully but never printed its output path");
                Err(ErrorClass::Transient)
            }
        },
        Ok(status) if looks_like_bot_block(status.code()) => Err(ErrorClass::BotBlocked),
        _ => Err(ErrorClass::Transient),
    }
}

fn parse_progress_line(line: &str) -> Option<f64> {
    let idx = line.find('%')?;
    let start = line[..idx].rfind(char::is_whitespace).map_or(0, |i| i + 1);
    line[start..idx].trim().parse::<f64>().ok()
}

fn looks_like_bot_block(code: Option<i32>) -> bool {
    // yt-dlp doesn't have a dedicated exit code for bot detection; treat a
    // specific sentinel (often used by wrapper scripts to signal it) as the
    // bot-blocked case, everything else non-zero as transient.
    code == Some(88)
}

fn sanitize_for_filename(url: &str) -> String {
    url.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

pub(crate) struct MetarrResult {
    pub(crate) final_video_path: Option<PathBuf>,
    pub(crate) final_json_path: Option<PathBuf>,
}

/// Runs `metarr` if present on `PATH` (spec §6 post-processor collaborator).
/// Returns `Ok(None)` when the binary is absent so the pipeline can skip the
/// stage silently; `Ok(Some(..))` on success; `Err` on non-zero exit.
pub(crate) async fn run_metarr(
    args: &[String],
    cancel: &CancellationToken,
) -> Result<Option<MetarrResult>, ErrorClass> {
    if which::which("metarr").is_err() {
        return Ok(None);
    }

    let mut cmd = tokio::process::Command::new("metarr");
    cmd.kill_on_drop(true).args(args).stdout(std::process::Stdio::piped());

    let Ok(mut child) = cmd.spawn() else {
        return Err(ErrorClass::Fatal);
    };

    let mut stdout = String::new();
    if let Some(mut out) = child.stdout.take() {
        use tokio::io::AsyncReadExt;
        let _ = out.read_to_string(&mut stdout).await;
    }

    let status = tokio::select! {
        status = child.wait() => status,
        () = cancel.cancelled() => {
            let _ = child.kill().await;
            return Err(ErrorClass::Transient);
        }
    };

    match status {
        Ok(status) if status.success() => {
            let final_video_path = stdout
                .lines()
                .find_map(|l| l.strip_prefix("final video path: "))
                .map(PathBuf::from);
            let final_json_path = stdout
                .lines()
                .find_map(|l| l.strip_prefix("final json path: "))
                .map(PathBuf::from);
            Ok(Some(MetarrResult {
                final_video_path,
                final_json_path,
            }))
        }
        _ => Err(ErrorClass::Transient),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_progress_line_extracts_percent() {
        assert_eq!(parse_progress_line("[download]  42.0% of 10.00MiB"), Some(42.0));
        assert_eq!(parse_progress_line("no percent here"), None);
    }

    #[test]
    fn metarr_stdout_parses_final_paths() {
        let stdout = "final video path: /videos/a.mp4\nfinal json path: /videos/a.json\n";
        let video = stdout.lines().find_map(|l| l.strip_prefix("final video path: "));
        let json = stdout.lines().find_map(|l| l.strip_prefix("final json path: "));
        assert_eq!(video, Some("/videos/a.mp4"));
        assert_eq!(json, Some("/videos/a.json"));
    }
}
