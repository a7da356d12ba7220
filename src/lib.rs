//! Recovers images, video, and audio from a Chromium-family browser's
//! on-disk HTTP cache (Blockfile `f_XXXXXX` entries and Simple Cache
//! `{16-hex}_0/_1/_s` triples), without depending on the browser being
//! installed, closed, or even the same OS that wrote the cache.
//!
//! The pipeline is six components, each its own module:
//! [`cache_record`] reads the on-disk record formats, [`signature`]
//! identifies what a blob of bytes actually is, [`mp4box`] walks ISO
//! BMFF box trees, [`grouper`] partitions a directory listing into
//! [`types::Resource`]s, [`assembler`] reconstructs a chunked MP4's
//! byte stream, and [`recovery`] drives the external media tool over
//! the result.

pub mod assembler;
pub mod cache_paths;
pub mod cache_record;
pub mod config;
pub mod error;
pub mod grouper;
pub mod mp4box;
pub mod recovery;
pub mod signature;
pub mod thumbcache;
pub mod tool;
pub mod types;

pub use error::{CacheError, Result, ToolError};
pub use recovery::{RecoveryDriver, RecoveryOutcome};
pub use types::{
    CacheFileEntry, CachePathInfo, ClientName, MediaCategory, MediaKind, RecoveryPhase,
    RecoveryProgress, Resource, ScanPhase, ScanProgress, VideoInfo,
};
