//! Variant generation for the Relay media pipeline.
//!
//! This crate provides:
//! - Deterministic variant planning (pure, codec-free)
//! - Image transforms via the `image` crate
//! - Video transcodes via the FFmpeg CLI

pub mod command;
pub mod error;
pub mod generator;
pub mod image_variants;
pub mod plan;
pub mod probe;
pub mod video_variants;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use generator::{CancelFlag, GeneratedVariant, MediaGenerator, Transcoder};
pub use probe::{probe_video, VideoInfo};
