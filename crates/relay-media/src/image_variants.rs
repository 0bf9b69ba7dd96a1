//! Image rendition generation with the `image` crate.
//!
//! Decode and re-encode are CPU-bound, so the whole transform runs
//! under `spawn_blocking`.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageError, ImageFormat};
use tracing::debug;

use relay_models::VariantFormat;

use crate::error::{MediaError, MediaResult};
use crate::generator::{CancelFlag, GeneratedVariant};
use crate::plan::{plan_image_variants, ImageSourceFormat, ImageVariantPlan};

/// Generate all three image renditions into `scratch`.
pub async fn generate_image_variants(
    source: &Path,
    scratch: &Path,
    cancel: &CancelFlag,
) -> MediaResult<Vec<GeneratedVariant>> {
    let source = source.to_path_buf();
    let scratch = scratch.to_path_buf();
    let cancel = cancel.clone();

    tokio::task::spawn_blocking(move || generate_blocking(&source, &scratch, &cancel))
        .await
        .map_err(|e| MediaError::transcode_failed(format!("transform task panicked: {}", e), None, None))?
}

fn generate_blocking(
    source: &Path,
    scratch: &Path,
    cancel: &CancelFlag,
) -> MediaResult<Vec<GeneratedVariant>> {
    if !source.exists() {
        return Err(MediaError::FileNotFound(source.to_path_buf()));
    }

    let reader = image::io::Reader::open(source)?
        .with_guessed_format()
        .map_err(|e| MediaError::corrupt_source(format!("unreadable image: {}", e)))?;

    let source_format = match reader.format() {
        Some(ImageFormat::Jpeg) => ImageSourceFormat::Jpeg,
        Some(ImageFormat::Png) => ImageSourceFormat::Png,
        Some(_) => ImageSourceFormat::Other,
        None => {
            return Err(MediaError::unsupported_format(
                "could not detect image format",
            ))
        }
    };

    let img = reader.decode().map_err(map_decode_error)?;
    let has_alpha = img.color().has_alpha();
    let (width, height) = (img.width(), img.height());

    debug!(
        "Decoded image source {}x{} alpha={} from {}",
        width,
        height,
        has_alpha,
        source.display()
    );

    let plans = plan_image_variants(width, height, source_format, has_alpha);

    let mut variants = Vec::with_capacity(plans.len());
    for plan in plans {
        // Checked once per rendition; an encode in flight finishes.
        if cancel.is_set() {
            return Err(MediaError::Cancelled);
        }
        let path = scratch.join(format!(
            "{}.{}",
            plan.variant_type.as_str(),
            plan.format.extension()
        ));
        encode_variant(&img, &plan, &path)?;
        variants.push(GeneratedVariant {
            variant_type: plan.variant_type,
            path,
            format: plan.format,
            width: Some(plan.width),
            height: Some(plan.height),
        });
    }

    Ok(variants)
}

fn encode_variant(img: &DynamicImage, plan: &ImageVariantPlan, path: &PathBuf) -> MediaResult<()> {
    let resized = if (plan.width, plan.height) == (img.width(), img.height()) {
        img.clone()
    } else {
        img.resize_exact(plan.width, plan.height, FilterType::Lanczos3)
    };

    match plan.format {
        VariantFormat::Jpeg => {
            let file = File::create(path)?;
            let mut encoder = JpegEncoder::new_with_quality(BufWriter::new(file), plan.quality);
            encoder
                .encode_image(&resized.to_rgb8())
                .map_err(map_encode_error)?;
        }
        VariantFormat::Png => {
            resized
                .save_with_format(path, ImageFormat::Png)
                .map_err(map_encode_error)?;
        }
        VariantFormat::Mp4 => {
            // Planner never emits MP4 for image sources.
            return Err(MediaError::unsupported_format("mp4 output for image source"));
        }
    }

    Ok(())
}

fn map_decode_error(e: ImageError) -> MediaError {
    match e {
        ImageError::Unsupported(inner) => MediaError::unsupported_format(inner.to_string()),
        other => MediaError::corrupt_source(other.to_string()),
    }
}

fn map_encode_error(e: ImageError) -> MediaError {
    MediaError::transcode_failed(format!("image encode failed: {}", e), None, None)
}
