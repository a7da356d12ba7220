//! External media-tool invocation (spec §6): the FFmpeg-family process
//! C6 spawns as a child to remux or re-encode an assembled/copied
//! resource into something playable. The core never links against a
//! media library; it shells out, the way the example recovery tooling
//! in this corpus invokes `ffmpeg` as a subprocess rather than binding
//! to it.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::ToolError;

/// How many trailing bytes of stderr to keep in an error report.
const STDERR_TAIL_LEN: usize = 4096;

/// Flags shared by every invocation: overwrite without prompting, wide
/// error tolerance on the decode side (spec §6's "generate presentation
/// timestamps + discard corrupt + ignore DTS", "large analyze/probe
/// windows", `err_detect ignore_err`).
fn error_tolerant_input_flags() -> Vec<String> {
    vec![
        "-fflags".into(),
        "+genpts+discardcorrupt+igndts".into(),
        "-analyzeduration".into(),
        "100M".into(),
        "-probesize".into(),
        "100M".into(),
        "-err_detect".into(),
        "ignore_err".into(),
    ]
}

async fn run(tool_path: &str, args: &[String]) -> Result<(), ToolError> {
    tracing::debug!("invoking external media tool: {} {:?}", tool_path, args);
    let output = Command::new(tool_path)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| ToolError::Spawn {
            path: tool_path.to_string(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail_start = stderr.len().saturating_sub(STDERR_TAIL_LEN);
        return Err(ToolError::NonZeroExit {
            status: output.status.to_string(),
            stderr_tail: stderr[tail_start..].to_string(),
        });
    }
    Ok(())
}

/// Remux `input` to `output` via stream copy (`-c copy`), with
/// `+faststart` so the `moov` atom ends up at the front. Mandatory for
/// `mp4_chunked` resources per spec §4.6: re-encoding would silently
/// truncate at the first zero-filled gap, while stream copy preserves
/// every sample either side of a gap.
pub async fn remux(tool_path: &str, input: &Path, output: &Path) -> Result<(), ToolError> {
    let mut args = vec!["-y".to_string(), "-i".to_string(), path_str(input)];
    args.extend(error_tolerant_input_flags());
    args.extend(
        [
            "-c", "copy",
            "-movflags", "+faststart",
            "-max_muxing_queue_size", "4096",
        ]
        .map(String::from),
    );
    args.push(path_str(output));
    run(tool_path, &args).await
}

/// Re-encode `input` to H.264/AAC at `output`, for the error-tolerant
/// playability pass spec §4.6 runs on every non-chunked recovered video:
/// fast preset, CRF 18, `yuv420p`, even-dimension scale (`scale=trunc(iw/2)*2:trunc(ih/2)*2`),
/// AAC at 192 kbps.
pub async fn reencode_video(tool_path: &str, input: &Path, output: &Path) -> Result<(), ToolError> {
    let mut args = vec!["-y".to_string(), "-i".to_string(), path_str(input)];
    args.extend(error_tolerant_input_flags());
    args.extend(
        [
            "-vf", "scale=trunc(iw/2)*2:trunc(ih/2)*2",
            "-c:v", "libx264",
            "-preset", "fast",
            "-crf", "18",
            "-pix_fmt", "yuv420p",
            "-c:a", "aac",
            "-b:a", "192k",
            "-movflags", "+faststart",
            "-max_muxing_queue_size", "4096",
        ]
        .map(String::from),
    );
    args.push(path_str(output));
    run(tool_path, &args).await
}

/// Extract a single JPEG frame near the start of `input` for a sibling
/// `_thumb.jpg` (spec §4.6 optional post-step).
pub async fn generate_thumbnail(tool_path: &str, input: &Path, output: &Path) -> Result<(), ToolError> {
    let args = vec![
        "-y".to_string(),
        "-ss".to_string(),
        "1".to_string(),
        "-i".to_string(),
        path_str(input),
        "-vframes".to_string(),
        "1".to_string(),
        "-q:v".to_string(),
        "3".to_string(),
        path_str(output),
    ];
    run(tool_path, &args).await
}

/// Re-encode an assembled `.webm`/`.mkv` scratch file to `.mp4` (spec
/// §4.6 `webm_mkv` pipeline, `convert_webm_to_mp4` branch).
pub async fn reencode_webm_to_mp4(tool_path: &str, input: &Path, output: &Path) -> Result<(), ToolError> {
    reencode_video(tool_path, input, output).await
}

/// Concatenate already-recovered video files into one joined output via
/// ffmpeg's concat demuxer, listing members in a temp file the caller
/// owns (spec §4.6 `concatenate_videos`).
pub async fn concatenate(tool_path: &str, list_file: &Path, output: &Path) -> Result<(), ToolError> {
    let args = vec![
        "-y".to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        path_str(list_file),
        "-c".to_string(),
        "copy".to_string(),
        path_str(output),
    ];
    run(tool_path, &args).await
}

fn path_str(p: &Path) -> String {
    p.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_tolerant_flags_include_ignore_err() {
        let flags = error_tolerant_input_flags();
        assert!(flags.iter().any(|f| f == "ignore_err"));
        assert!(flags.iter().any(|f| f.contains("genpts")));
    }

    #[tokio::test]
    async fn spawn_failure_on_missing_binary_is_reported() {
        let result = run("definitely-not-a-real-binary-xyz", &[]).await;
        assert!(matches!(result, Err(ToolError::Spawn { .. })));
    }
}
