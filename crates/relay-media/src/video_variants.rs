//! Video rendition generation via the FFmpeg CLI.

use std::path::{Path, PathBuf};

use tracing::debug;

use relay_models::{VariantFormat, VariantType};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::generator::{CancelFlag, GeneratedVariant};
use crate::plan::{
    thumbnail_seek, VIDEO_HIGH_AUDIO_KBPS, VIDEO_HIGH_VIDEO_KBPS, VIDEO_PREVIEW_AUDIO_KBPS,
    VIDEO_PREVIEW_MAX_HEIGHT, VIDEO_PREVIEW_VIDEO_KBPS, VIDEO_THUMBNAIL_WIDTH,
};
use crate::probe::probe_video;

/// Generate all three video renditions into `scratch`.
///
/// The thumbnail is a single frame grab; preview and high are always
/// re-encoded to H.264/AAC MP4 so playback does not depend on the
/// uploaded codec or container.
pub async fn generate_video_variants(
    source: &Path,
    scratch: &Path,
    runner: &FfmpegRunner,
    cancel: &CancelFlag,
) -> MediaResult<Vec<GeneratedVariant>> {
    let info = probe_video(source).await?;
    debug!(
        "Probed video source {}x{} {:.1}s codec={}",
        info.width, info.height, info.duration, info.codec
    );

    let thumb_path = scratch.join("thumbnail.jpeg");
    let preview_path = scratch.join("preview.mp4");
    let high_path = scratch.join("high.mp4");

    // The two full encodes dominate job runtime, so the flag is
    // checked before each one. A running FFmpeg process is never
    // killed for cancellation, only for timeout.
    grab_thumbnail(source, &thumb_path, info.duration, runner).await?;
    if cancel.is_set() {
        return Err(MediaError::Cancelled);
    }
    encode_preview(source, &preview_path, runner).await?;
    if cancel.is_set() {
        return Err(MediaError::Cancelled);
    }
    encode_high(source, &high_path, runner).await?;

    let thumb_height = scaled_even_height(info.width, info.height, VIDEO_THUMBNAIL_WIDTH);

    Ok(vec![
        GeneratedVariant {
            variant_type: VariantType::Thumbnail,
            path: thumb_path,
            format: VariantFormat::Jpeg,
            width: Some(VIDEO_THUMBNAIL_WIDTH),
            height: Some(thumb_height),
        },
        GeneratedVariant {
            variant_type: VariantType::Preview,
            path: preview_path,
            format: VariantFormat::Mp4,
            width: None,
            height: None,
        },
        GeneratedVariant {
            variant_type: VariantType::High,
            path: high_path,
            format: VariantFormat::Mp4,
            width: None,
            height: None,
        },
    ])
}

async fn grab_thumbnail(
    source: &Path,
    output: &PathBuf,
    duration: f64,
    runner: &FfmpegRunner,
) -> MediaResult<()> {
    let cmd = FfmpegCommand::new(source, output)
        .seek(thumbnail_seek(duration))
        .single_frame()
        .video_filter(format!("scale={}:-2", VIDEO_THUMBNAIL_WIDTH));
    runner.run(&cmd).await
}

async fn encode_preview(source: &Path, output: &PathBuf, runner: &FfmpegRunner) -> MediaResult<()> {
    runner.run(&preview_command(source, output)).await
}

async fn encode_high(source: &Path, output: &PathBuf, runner: &FfmpegRunner) -> MediaResult<()> {
    runner.run(&high_command(source, output)).await
}

fn preview_command(source: &Path, output: &Path) -> FfmpegCommand {
    // Cap height at 720, keep aspect. Both dimensions must end up
    // even or libx264 rejects the encode: -2 handles the width,
    // ih-mod(ih,2) handles odd-height sources.
    let filter = format!("scale=-2:min({}\\,ih-mod(ih\\,2))", VIDEO_PREVIEW_MAX_HEIGHT);
    FfmpegCommand::new(source, output)
        .video_filter(filter)
        .video_codec("libx264")
        .preset("veryfast")
        .video_bitrate_kbps(VIDEO_PREVIEW_VIDEO_KBPS)
        .audio_codec("aac")
        .audio_bitrate_kbps(VIDEO_PREVIEW_AUDIO_KBPS)
        .output_arg("-movflags")
        .output_arg("+faststart")
}

fn high_command(source: &Path, output: &Path) -> FfmpegCommand {
    FfmpegCommand::new(source, output)
        // Source resolution, rounded down to even for libx264.
        .video_filter("scale=trunc(iw/2)*2:trunc(ih/2)*2")
        .video_codec("libx264")
        .preset("veryfast")
        .video_bitrate_kbps(VIDEO_HIGH_VIDEO_KBPS)
        .audio_codec("aac")
        .audio_bitrate_kbps(VIDEO_HIGH_AUDIO_KBPS)
        .output_arg("-movflags")
        .output_arg("+faststart")
}

/// Height after scaling to `target_width`, rounded down to even to
/// match FFmpeg's `-2` behavior.
fn scaled_even_height(width: u32, height: u32, target_width: u32) -> u32 {
    if width == 0 {
        return 0;
    }
    let h = (height as f64 * target_width as f64 / width as f64).round() as u32;
    h - (h % 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_even_height() {
        assert_eq!(scaled_even_height(1920, 1080, 300), 168);
        assert_eq!(scaled_even_height(300, 300, 300), 300);
        assert_eq!(scaled_even_height(0, 100, 300), 0);
    }

    #[test]
    fn test_preview_filter_caps_height_and_forces_even() {
        let args = preview_command(Path::new("in.mp4"), Path::new("out.mp4")).build_args();
        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert_eq!(args[vf + 1], "scale=-2:min(720\\,ih-mod(ih\\,2))");
    }

    #[test]
    fn test_high_filter_rounds_both_dimensions_to_even() {
        let args = high_command(Path::new("in.mp4"), Path::new("out.mp4")).build_args();
        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert_eq!(args[vf + 1], "scale=trunc(iw/2)*2:trunc(ih/2)*2");
    }
}
