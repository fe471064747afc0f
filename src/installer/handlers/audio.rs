//! Audio resample and transcode operations.
//!
//! Both shell out to the media tool with the `-nostdin -hide_banner
//! -loglevel error ... -y` framing and a 30-second kill timer. Per-asset
//! parameters arrive as a space-delimited `-key:value` string.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::Path;

use crate::installer::processor::ProcessContext;
use crate::manifest::Asset;
use crate::paths;
use crate::scratch;
use crate::tools;

/// Sample rate applied when a resample asset does not carry `-f:`.
const DEFAULT_RESAMPLE_RATE: &str = "24000";

/// Parse a `-key:value` parameter string. Unknown keys are kept; consumers
/// ignore what they don't recognize. Recognized keys: `f` (sample rate),
/// `c` (channels), `b` (bitrate kbit/s), `fmt` (advisory).
pub fn parse_audio_params(params: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for token in params.split_whitespace() {
        let Some(body) = token.strip_prefix('-') else {
            continue;
        };
        if let Some((key, value)) = body.split_once(':') {
            if !key.is_empty() {
                map.insert(key.to_string(), value.to_string());
            }
        }
    }
    map
}

/// Inverse of [`parse_audio_params`] for well-formed maps; keys sorted for
/// a stable result.
pub fn format_audio_params(map: &HashMap<String, String>) -> String {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    keys.iter()
        .map(|k| format!("-{k}:{}", map[*k]))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resample an ogg stream to the requested (default 24000 Hz) rate.
pub fn handle_resample(ctx: &ProcessContext, asset: &Asset) -> Result<bool> {
    let params = parse_audio_params(&asset.params);
    let rate = params
        .get("f")
        .map(String::as_str)
        .unwrap_or(DEFAULT_RESAMPLE_RATE);

    let Some(data) = ctx.source_bytes(asset)? else {
        ctx.log.missing_file(ctx.describe_source(asset));
        return Ok(false);
    };

    let work = tempfile::Builder::new()
        .prefix(scratch::SCRATCH_PREFIX)
        .tempdir()
        .context("Failed to create audio scratch directory")?;
    let input = work.path().join("in.ogg");
    let output = work.path().join("out.ogg");
    fs::write(&input, &data).context("Failed to materialize audio input")?;

    let mut args = media_tool_prelude(&input);
    args.push("-ar".into());
    args.push(rate.into());
    args.push("-c:a".into());
    args.push("libvorbis".into());
    args.push("-y".into());
    args.push(output.as_os_str().to_os_string());

    run_media_tool(ctx, &args, asset)?;

    let transcoded = fs::read(&output).context("Failed to read resampled output")?;
    ctx.write_output(asset, &transcoded)?;
    Ok(true)
}

/// Transcode to the codec implied by the target extension.
pub fn handle_transcode(ctx: &ProcessContext, asset: &Asset) -> Result<bool> {
    let params = parse_audio_params(&asset.params);
    let source_ext = paths::extension(&asset.source_path).unwrap_or_else(|| "ogg".to_string());
    let target_ext = paths::extension(asset.effective_target())
        .context("Audio transcode target has no extension")?;

    let Some(data) = ctx.source_bytes(asset)? else {
        ctx.log.missing_file(ctx.describe_source(asset));
        return Ok(false);
    };

    let work = tempfile::Builder::new()
        .prefix(scratch::SCRATCH_PREFIX)
        .tempdir()
        .context("Failed to create audio scratch directory")?;
    let input = work.path().join(format!("in.{source_ext}"));
    let output = work.path().join(format!("out.{target_ext}"));
    fs::write(&input, &data).context("Failed to materialize audio input")?;

    let mut args = media_tool_prelude(&input);
    match target_ext.as_str() {
        "wav" => {
            args.push("-c:a".into());
            args.push("pcm_s16le".into());
        }
        "mp3" => {
            args.push("-c:a".into());
            args.push("libmp3lame".into());
            if let Some(bitrate) = params.get("b") {
                args.push("-b:a".into());
                args.push(format!("{bitrate}k").into());
            }
        }
        "ogg" => {
            args.push("-c:a".into());
            args.push("libvorbis".into());
        }
        other => bail!("Unsupported audio target extension: {other}"),
    }
    if let Some(rate) = params.get("f") {
        args.push("-ar".into());
        args.push(rate.into());
    }
    if let Some(channels) = params.get("c") {
        args.push("-ac".into());
        args.push(channels.into());
    }
    args.push("-y".into());
    args.push(output.as_os_str().to_os_string());

    run_media_tool(ctx, &args, asset)?;

    let transcoded = fs::read(&output).context("Failed to read transcoded output")?;
    ctx.write_output(asset, &transcoded)?;
    Ok(true)
}

fn media_tool_prelude(input: &Path) -> Vec<OsString> {
    vec![
        "-nostdin".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        input.as_os_str().to_os_string(),
    ]
}

fn run_media_tool(ctx: &ProcessContext, args: &[OsString], asset: &Asset) -> Result<()> {
    let ffmpeg = ctx.tools.ffmpeg()?;
    let arg_refs: Vec<&OsStr> = args.iter().map(OsString::as_os_str).collect();
    let result = tools::run_tool_with_timeout(ffmpeg, &arg_refs, tools::MEDIA_TOOL_TIMEOUT)
        .with_context(|| format!("media tool failed for {}", asset.source_path))?;
    if !result.success {
        bail!(
            "media tool failed for {}: {}",
            asset.source_path,
            result.failure_text()
        );
    }
    Ok(())
}
