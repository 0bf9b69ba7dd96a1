//! Generator dispatch by media kind.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use relay_models::{MediaKind, VariantFormat, VariantType};

use crate::command::FfmpegRunner;
use crate::error::{MediaError, MediaResult};
use crate::{image_variants, video_variants};

/// One rendition written to the scratch directory, not yet uploaded.
#[derive(Debug, Clone)]
pub struct GeneratedVariant {
    pub variant_type: VariantType,
    /// Local path inside the job's scratch directory
    pub path: PathBuf,
    pub format: VariantFormat,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Shared cancellation flag, polled between variant steps.
///
/// The worker raises it when a cancel request lands mid-job; the
/// generators check it between encodes so a long video job stops at
/// the next step boundary instead of running to completion. A single
/// encode in flight is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Variant generation seam. The worker depends on this trait so tests
/// can script successes and failures without codecs installed.
#[async_trait]
pub trait MediaGenerator: Send + Sync {
    /// Produce the thumbnail/preview/high renditions of `source`
    /// inside `scratch`. The caller owns and removes `scratch`.
    /// Bails out with [`MediaError::Cancelled`] at the next step
    /// boundary once `cancel` is raised.
    async fn generate(
        &self,
        source: &Path,
        kind: MediaKind,
        scratch: &Path,
        cancel: &CancelFlag,
    ) -> MediaResult<Vec<GeneratedVariant>>;
}

/// Production generator: `image` crate for images, FFmpeg for video.
pub struct Transcoder {
    runner: FfmpegRunner,
}

impl Transcoder {
    pub fn new() -> Self {
        Self {
            runner: FfmpegRunner::new(),
        }
    }

    /// Bound each FFmpeg invocation; must stay below the queue's
    /// visibility timeout so a live encode is never redelivered.
    pub fn with_ffmpeg_timeout(mut self, secs: u64) -> Self {
        self.runner = FfmpegRunner::new().with_timeout(secs);
        self
    }
}

impl Default for Transcoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaGenerator for Transcoder {
    async fn generate(
        &self,
        source: &Path,
        kind: MediaKind,
        scratch: &Path,
        cancel: &CancelFlag,
    ) -> MediaResult<Vec<GeneratedVariant>> {
        tokio::fs::create_dir_all(scratch).await?;
        if cancel.is_set() {
            return Err(MediaError::Cancelled);
        }
        match kind {
            MediaKind::Image => {
                image_variants::generate_image_variants(source, scratch, cancel).await
            }
            MediaKind::Video => {
                video_variants::generate_video_variants(source, scratch, &self.runner, cancel).await
            }
        }
    }
}
