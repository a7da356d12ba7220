//! Data model shared by every component: the file listing the chunk
//! grouper consumes, the closed `MediaKind` enumeration the signature
//! detector and MIME fallback produce, and the `Resource` records the
//! grouper emits for the driver to recover.

use std::path::PathBuf;
use std::time::SystemTime;

/// One file on disk as seen by the directory listing. Immutable — never
/// synthesized; every `CacheFileEntry` the grouper hands out traces back
/// to a `std::fs::read_dir` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheFileEntry {
    /// Filename without directory, e.g. `f_0000a0` or `1234…cdef_s`.
    pub name: String,
    /// Absolute path to the file.
    pub path: PathBuf,
    /// Size on disk in bytes.
    pub size: u64,
    /// Last-modified time as Unix seconds, if the platform reported one.
    pub modified_at: Option<u64>,
}

/// Broad category a `MediaKind` belongs to. Drives output subdirectory
/// placement when `organize_by_type` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaCategory {
    Image,
    Video,
    Audio,
    Other,
}

impl MediaCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaCategory::Image => "images",
            MediaCategory::Video => "videos",
            MediaCategory::Audio => "audio",
            MediaCategory::Other => "other",
        }
    }
}

/// The closed set of media kinds this system recognizes. Every variant
/// carries a fixed `(MediaCategory, default extension)` pair looked up
/// through `category()`/`default_extension()` rather than via per-variant
/// behavior — there are only ~30 of these and they never grow a method
/// table, so a match arm is simpler and cheaper than a trait object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    // images
    Png,
    Jpeg,
    Gif,
    Webp,
    Bmp,
    Tiff,
    Ico,
    Avif,
    Heic,
    // video
    Mp4Complete,
    Mp4Chunked,
    Mp4HeaderOnly,
    Mp4Fragment,
    WebmMkv,
    WebmContinuation,
    Avi,
    Flv,
    MpegTs,
    Wmv,
    Mov,
    // audio
    Mp3,
    Aac,
    Ogg,
    Flac,
    Wav,
    Opus,
    Wma,
    M4a,
    // fallback
    UnknownData,
    RiffUnknown,
    MediaDataChunk,
}

impl MediaKind {
    pub fn category(&self) -> MediaCategory {
        use MediaKind::*;
        match self {
            Png | Jpeg | Gif | Webp | Bmp | Tiff | Ico | Avif | Heic => MediaCategory::Image,
            Mp4Complete | Mp4Chunked | Mp4HeaderOnly | Mp4Fragment | WebmMkv
            | WebmContinuation | Avi | Flv | MpegTs | Wmv | Mov => MediaCategory::Video,
            Mp3 | Aac | Ogg | Flac | Wav | Opus | Wma | M4a => MediaCategory::Audio,
            UnknownData | RiffUnknown | MediaDataChunk => MediaCategory::Other,
        }
    }

    pub fn default_extension(&self) -> &'static str {
        use MediaKind::*;
        match self {
            Png => "png",
            Jpeg => "jpg",
            Gif => "gif",
            Webp => "webp",
            Bmp => "bmp",
            Tiff => "tiff",
            Ico => "ico",
            Avif => "avif",
            Heic => "heic",
            Mp4Complete | Mp4Chunked | Mp4HeaderOnly | Mp4Fragment => "mp4",
            WebmMkv | WebmContinuation => "webm",
            Avi => "avi",
            Flv => "flv",
            MpegTs => "ts",
            Wmv => "wmv",
            Mov => "mov",
            Mp3 => "mp3",
            Aac => "aac",
            Ogg => "ogg",
            Flac => "flac",
            Wav => "wav",
            Opus => "opus",
            Wma => "wma",
            M4a => "m4a",
            UnknownData | RiffUnknown | MediaDataChunk => "bin",
        }
    }

    /// True for the continuation-chunk markers the grouper treats as
    /// "belongs to some preceding header, never a resource on its own".
    pub fn is_continuation_marker(&self) -> bool {
        matches!(
            self,
            MediaKind::Mp4Fragment | MediaKind::WebmContinuation | MediaKind::MediaDataChunk
        )
    }

    /// Audio kinds that can head a Blockfile chunk group (spec §4.4
    /// `AUDIO_HEADER`).
    pub fn is_audio_header(&self) -> bool {
        matches!(
            self,
            MediaKind::Mp3
                | MediaKind::Ogg
                | MediaKind::Aac
                | MediaKind::Flac
                | MediaKind::Wav
                | MediaKind::Opus
                | MediaKind::Wma
                | MediaKind::M4a
        )
    }

    /// Video kinds that can head a Blockfile chunk group (spec §4.4
    /// `VIDEO_HEADER`), excluding `mp4_header_only` which is handled
    /// through the chunked assembler instead.
    pub fn is_video_header(&self) -> bool {
        matches!(
            self,
            MediaKind::WebmMkv
                | MediaKind::Avi
                | MediaKind::Flv
                | MediaKind::MpegTs
                | MediaKind::Mov
        )
    }

    pub fn is_media_header(&self) -> bool {
        *self == MediaKind::Mp4HeaderOnly || self.is_audio_header() || self.is_video_header()
    }
}

/// Extracted MP4 `moov` summary (spec §4.3).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub duration_seconds: f64,
    pub has_video: bool,
    pub has_audio: bool,
}

/// A unit of recoverable media: one or more cache files that together
/// form a single logical response body.
#[derive(Debug, Clone)]
pub struct Resource {
    /// Unique within one scan.
    pub id: String,
    pub kind: MediaKind,
    pub category: MediaCategory,
    /// Index 0 is always the header file for multi-file resources.
    pub files: Vec<CacheFileEntry>,
    pub header_file_name: Option<String>,
    pub total_size: u64,
    pub display_name: String,
    pub video_info: Option<VideoInfo>,
    pub modified_at: Option<u64>,
    pub selected: bool,
}

impl Resource {
    /// Build a `Resource` from its files, computing `total_size` and
    /// `modified_at` per the invariants in spec §8 rather than letting
    /// callers compute them (and risk the two drifting apart).
    pub fn new(
        id: String,
        kind: MediaKind,
        files: Vec<CacheFileEntry>,
        display_name: String,
    ) -> Self {
        let total_size = files.iter().map(|f| f.size).sum();
        let modified_at = files.iter().filter_map(|f| f.modified_at).max();
        let header_file_name = files.first().map(|f| f.name.clone());
        Self {
            id,
            category: kind.category(),
            kind,
            files,
            header_file_name,
            total_size,
            display_name,
            video_info: None,
            modified_at,
            selected: false,
        }
    }

    pub fn with_video_info(mut self, info: VideoInfo) -> Self {
        self.video_info = Some(info);
        self
    }
}

/// Known browser cache owners, per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientName {
    Chrome,
    Brave,
    Edge,
    Opera,
    Discord,
    DiscordPtb,
    DiscordCanary,
    Custom,
}

impl ClientName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientName::Chrome => "chrome",
            ClientName::Brave => "brave",
            ClientName::Edge => "edge",
            ClientName::Opera => "opera",
            ClientName::Discord => "discord",
            ClientName::DiscordPtb => "discord_ptb",
            ClientName::DiscordCanary => "discord_canary",
            ClientName::Custom => "custom",
        }
    }
}

/// Descriptor of a candidate source directory, surfaced to a caller
/// deciding which browser's cache to scan.
#[derive(Debug, Clone)]
pub struct CachePathInfo {
    pub path: PathBuf,
    pub exists: bool,
    pub file_count: u64,
    pub total_size: u64,
    pub client_name: ClientName,
}

/// Progress phases for a directory scan (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Listing,
    Detecting,
    Grouping,
    Thumbnails,
    Done,
}

#[derive(Debug, Clone)]
pub struct ScanProgress {
    pub phase: ScanPhase,
    pub current: usize,
    pub total: usize,
    pub current_file: Option<String>,
}

/// Progress phases for one resource's recovery (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPhase {
    Copying,
    Reconstructing,
    Encoding,
    Validating,
    Complete,
}

#[derive(Debug, Clone, Default)]
pub struct RecoveryProgress {
    pub current: usize,
    pub total: usize,
    pub current_file: Option<String>,
    pub log: Vec<String>,
    pub errors: Vec<String>,
}

impl RecoveryProgress {
    pub fn new(total: usize) -> Self {
        Self {
            current: 0,
            total,
            current_file: None,
            log: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Stamps modified_at into an entry's sort key without pulling in a full
/// chrono dependency — the data model only ever needs Unix seconds.
pub fn system_time_to_unix_secs(t: SystemTime) -> Option<u64> {
    t.duration_since(std::time::UNIX_EPOCH).ok().map(|d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, size: u64, modified_at: Option<u64>) -> CacheFileEntry {
        CacheFileEntry {
            name: name.to_string(),
            path: PathBuf::from(name),
            size,
            modified_at,
        }
    }

    #[test]
    fn resource_total_size_is_sum_of_files() {
        let files = vec![entry("a", 10, Some(1)), entry("b", 20, Some(2))];
        let r = Resource::new("r1".into(), MediaKind::Mp4Chunked, files, "x".into());
        assert_eq!(r.total_size, 30);
    }

    #[test]
    fn resource_modified_at_is_max_of_children() {
        let files = vec![entry("a", 1, Some(5)), entry("b", 1, Some(9)), entry("c", 1, None)];
        let r = Resource::new("r1".into(), MediaKind::Jpeg, files, "x".into());
        assert_eq!(r.modified_at, Some(9));
    }

    #[test]
    fn header_file_name_is_first_file() {
        let files = vec![entry("header", 1, None), entry("tail", 1, None)];
        let r = Resource::new("r1".into(), MediaKind::Mp4Chunked, files, "x".into());
        assert_eq!(r.header_file_name.as_deref(), Some("header"));
    }

    #[test]
    fn category_and_extension_tables_agree_for_m4a() {
        assert_eq!(MediaKind::M4a.category(), MediaCategory::Audio);
        assert_eq!(MediaKind::M4a.default_extension(), "m4a");
    }

    #[test]
    fn unknown_kinds_default_to_bin_extension() {
        assert_eq!(MediaKind::UnknownData.default_extension(), "bin");
        assert_eq!(MediaKind::RiffUnknown.default_extension(), "bin");
    }
}
