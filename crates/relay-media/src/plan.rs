//! Deterministic variant planning.
//!
//! Pure functions that turn source metadata into the logical specs of
//! the three renditions. The same source metadata always yields the
//! same plan; encoders may produce different bytes across versions but
//! never different specs.

use relay_models::{VariantFormat, VariantType};

/// Max dimension of an image thumbnail, in pixels.
pub const IMAGE_THUMBNAIL_MAX_DIM: u32 = 300;
/// Max dimension of an image preview.
pub const IMAGE_PREVIEW_MAX_DIM: u32 = 1080;
/// JPEG quality per rendition.
pub const IMAGE_THUMBNAIL_QUALITY: u8 = 80;
pub const IMAGE_PREVIEW_QUALITY: u8 = 85;
pub const IMAGE_HIGH_QUALITY: u8 = 95;

/// Video thumbnail frame width.
pub const VIDEO_THUMBNAIL_WIDTH: u32 = 300;
/// Seek point for the thumbnail frame, in seconds.
pub const VIDEO_THUMBNAIL_SEEK_SECS: f64 = 1.0;
/// Preview height cap.
pub const VIDEO_PREVIEW_MAX_HEIGHT: u32 = 720;
/// Bitrates in kbps.
pub const VIDEO_PREVIEW_VIDEO_KBPS: u32 = 1000;
pub const VIDEO_PREVIEW_AUDIO_KBPS: u32 = 128;
pub const VIDEO_HIGH_VIDEO_KBPS: u32 = 4000;
pub const VIDEO_HIGH_AUDIO_KBPS: u32 = 192;

/// Source image formats the pipeline can preserve in the high
/// rendition. Everything else is normalized to JPEG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSourceFormat {
    Jpeg,
    Png,
    Other,
}

/// Planned spec for one image rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageVariantPlan {
    pub variant_type: VariantType,
    pub format: VariantFormat,
    /// Target dimensions after aspect-preserving fit (never upscaled)
    pub width: u32,
    pub height: u32,
    /// JPEG quality; ignored for PNG output
    pub quality: u8,
}

/// Fit `(width, height)` within a square of `max_dim`, preserving
/// aspect ratio and never upscaling.
pub fn fit_within(width: u32, height: u32, max_dim: u32) -> (u32, u32) {
    let largest = width.max(height);
    if largest <= max_dim || largest == 0 {
        return (width, height);
    }
    let scale = max_dim as f64 / largest as f64;
    let w = ((width as f64 * scale).round() as u32).max(1);
    let h = ((height as f64 * scale).round() as u32).max(1);
    (w, h)
}

/// Plan the three image renditions for a decoded source.
pub fn plan_image_variants(
    width: u32,
    height: u32,
    source_format: ImageSourceFormat,
    has_alpha: bool,
) -> Vec<ImageVariantPlan> {
    // Lossy JPEG would flatten transparency, so alpha sources keep PNG
    // for the resized renditions.
    let resized_format = if has_alpha {
        VariantFormat::Png
    } else {
        VariantFormat::Jpeg
    };
    let high_format = match source_format {
        ImageSourceFormat::Jpeg => VariantFormat::Jpeg,
        ImageSourceFormat::Png => VariantFormat::Png,
        ImageSourceFormat::Other => {
            if has_alpha {
                VariantFormat::Png
            } else {
                VariantFormat::Jpeg
            }
        }
    };

    let (tw, th) = fit_within(width, height, IMAGE_THUMBNAIL_MAX_DIM);
    let (pw, ph) = fit_within(width, height, IMAGE_PREVIEW_MAX_DIM);

    vec![
        ImageVariantPlan {
            variant_type: VariantType::Thumbnail,
            format: resized_format,
            width: tw,
            height: th,
            quality: IMAGE_THUMBNAIL_QUALITY,
        },
        ImageVariantPlan {
            variant_type: VariantType::Preview,
            format: resized_format,
            width: pw,
            height: ph,
            quality: IMAGE_PREVIEW_QUALITY,
        },
        ImageVariantPlan {
            variant_type: VariantType::High,
            format: high_format,
            width,
            height,
            quality: IMAGE_HIGH_QUALITY,
        },
    ]
}

/// Seek point for the video thumbnail frame: 1s in, or the start for
/// sources shorter than that.
pub fn thumbnail_seek(duration_secs: f64) -> f64 {
    if duration_secs >= VIDEO_THUMBNAIL_SEEK_SECS {
        VIDEO_THUMBNAIL_SEEK_SECS
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_within_never_upscales() {
        assert_eq!(fit_within(200, 100, 300), (200, 100));
        assert_eq!(fit_within(300, 300, 300), (300, 300));
    }

    #[test]
    fn test_fit_within_preserves_aspect() {
        assert_eq!(fit_within(4000, 3000, 300), (300, 225));
        assert_eq!(fit_within(3000, 4000, 300), (225, 300));
        assert_eq!(fit_within(4000, 3000, 1080), (1080, 810));
    }

    #[test]
    fn test_plan_produces_exactly_three_variants() {
        let plans = plan_image_variants(4000, 3000, ImageSourceFormat::Jpeg, false);
        assert_eq!(plans.len(), 3);
        let types: Vec<_> = plans.iter().map(|p| p.variant_type).collect();
        assert_eq!(
            types,
            vec![VariantType::Thumbnail, VariantType::Preview, VariantType::High]
        );
    }

    #[test]
    fn test_plan_dimension_caps() {
        let plans = plan_image_variants(4000, 3000, ImageSourceFormat::Jpeg, false);
        assert!(plans[0].width.max(plans[0].height) <= IMAGE_THUMBNAIL_MAX_DIM);
        assert!(plans[1].width.max(plans[1].height) <= IMAGE_PREVIEW_MAX_DIM);
        // High keeps original dimensions
        assert_eq!((plans[2].width, plans[2].height), (4000, 3000));
    }

    #[test]
    fn test_small_source_not_upscaled() {
        let plans = plan_image_variants(120, 80, ImageSourceFormat::Png, false);
        for plan in &plans {
            assert_eq!((plan.width, plan.height), (120, 80));
        }
    }

    #[test]
    fn test_alpha_source_plans_png() {
        let plans = plan_image_variants(800, 600, ImageSourceFormat::Png, true);
        assert!(plans.iter().all(|p| p.format == VariantFormat::Png));
    }

    #[test]
    fn test_exotic_source_normalized_to_jpeg() {
        let plans = plan_image_variants(800, 600, ImageSourceFormat::Other, false);
        assert!(plans.iter().all(|p| p.format == VariantFormat::Jpeg));
    }

    #[test]
    fn test_thumbnail_seek_short_source() {
        assert_eq!(thumbnail_seek(0.4), 0.0);
        assert_eq!(thumbnail_seek(12.0), 1.0);
    }
}
