//! Recovery configuration (spec SPEC_FULL §D): the knobs a caller sets
//! before kicking off a scan or a recovery batch, plus the closed set of
//! well-known cache directory presets per client (spec §3
//! `CachePathInfo.client_name`).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::ClientName;

/// Caller-settable knobs for the recovery driver (C6) and the grouper's
/// heuristic constants (C4/C5), following the same TOML-round-trippable
/// shape as the teacher's `ServerConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryOptions {
    /// Place outputs under `out_dir/<category>/` instead of flat.
    pub organize_by_type: bool,

    /// Re-encode recovered GIF/WebM groups to `.webm` or `.mp4`.
    pub convert_webm_to_mp4: bool,

    /// Offer a `gif -> mp4` conversion post-step.
    pub gif_to_mp4: bool,

    /// Join all successfully recovered videos into one
    /// `Concatenated_Video.mp4`, sorted by `modified_at`.
    pub concatenate_videos: bool,

    /// Generate a sibling `_thumb.jpg` for every recovered video.
    pub generate_thumbnails: bool,

    /// Soft hex-locality budget for non-MP4 Blockfile groups (spec §4.4).
    /// Exposed because spec §9 flags it as heuristic, not optimal.
    pub hex_group_budget: u32,

    /// The `+5`/`x2` slack constants C5 uses to size its candidate
    /// search window, packaged together so a caller tunes them as a
    /// pair rather than independently.
    pub assembler_slack: AssemblerSlack,

    /// Path (or bare name resolved via `PATH`) to the external
    /// FFmpeg-family tool C6 invokes for remux/re-encode.
    pub external_tool_path: String,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            organize_by_type: false,
            convert_webm_to_mp4: true,
            gif_to_mp4: false,
            concatenate_videos: false,
            generate_thumbnails: false,
            hex_group_budget: 500,
            assembler_slack: AssemblerSlack::default(),
            external_tool_path: "ffmpeg".to_string(),
        }
    }
}

impl RecoveryOptions {
    /// Load options from a TOML file, following the same pattern as the
    /// teacher's `ServerConfig::from_file`.
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let options: RecoveryOptions = toml::from_str(&content)?;
        Ok(options)
    }

    /// Save options to a TOML file.
    pub fn to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// The `+5`/`x2` constants from spec §4.5, kept together and overridable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AssemblerSlack {
    /// Added to `max_chunks` in both branches.
    pub extra_chunks: u64,
    /// Multiplier applied to `max_chunks` to get `hex_range` when the
    /// header already holds the full `mdat` (the `moov`-displaced case).
    pub hex_range_multiplier: u64,
    /// Additive slack applied to `hex_range` in the truncated-`mdat`
    /// case instead of the multiplier.
    pub hex_range_addend: u64,
}

impl Default for AssemblerSlack {
    fn default() -> Self {
        Self {
            extra_chunks: 5,
            hex_range_multiplier: 2,
            hex_range_addend: 10,
        }
    }
}

/// One well-known on-disk cache location for a given browser/client,
/// before it has been probed against the filesystem.
#[derive(Debug, Clone)]
pub struct CachePathPreset {
    pub client_name: ClientName,
    /// Path relative to the platform's user profile/home directory.
    pub relative_path: &'static str,
}

/// The closed set of cache directory presets this system knows about,
/// per spec §3's `CachePathInfo.client_name` enumeration. Platform
/// selection happens at lookup time in `cache_paths::discover_cache_paths`;
/// this table only names the relative layout under the home directory.
pub struct CachePathPresets;

impl CachePathPresets {
    pub fn for_platform() -> Vec<CachePathPreset> {
        if cfg!(target_os = "macos") {
            Self::macos()
        } else if cfg!(target_os = "windows") {
            Self::windows()
        } else {
            Self::linux()
        }
    }

    fn macos() -> Vec<CachePathPreset> {
        vec![
            CachePathPreset {
                client_name: ClientName::Chrome,
                relative_path: "Library/Caches/Google/Chrome/Default/Cache",
            },
            CachePathPreset {
                client_name: ClientName::Brave,
                relative_path: "Library/Caches/BraveSoftware/Brave-Browser/Default/Cache",
            },
            CachePathPreset {
                client_name: ClientName::Edge,
                relative_path: "Library/Caches/Microsoft Edge/Default/Cache",
            },
            CachePathPreset {
                client_name: ClientName::Opera,
                relative_path: "Library/Caches/com.operasoftware.Opera",
            },
            CachePathPreset {
                client_name: ClientName::Discord,
                relative_path: "Library/Application Support/discord/Cache/Cache_Data",
            },
            CachePathPreset {
                client_name: ClientName::DiscordPtb,
                relative_path: "Library/Application Support/discordptb/Cache/Cache_Data",
            },
            CachePathPreset {
                client_name: ClientName::DiscordCanary,
                relative_path: "Library/Application Support/discordcanary/Cache/Cache_Data",
            },
        ]
    }

    fn linux() -> Vec<CachePathPreset> {
        vec![
            CachePathPreset {
                client_name: ClientName::Chrome,
                relative_path: ".cache/google-chrome/Default/Cache",
            },
            CachePathPreset {
                client_name: ClientName::Brave,
                relative_path: ".cache/BraveSoftware/Brave-Browser/Default/Cache",
            },
            CachePathPreset {
                client_name: ClientName::Opera,
                relative_path: ".cache/opera",
            },
            CachePathPreset {
                client_name: ClientName::Discord,
                relative_path: ".config/discord/Cache/Cache_Data",
            },
            CachePathPreset {
                client_name: ClientName::DiscordPtb,
                relative_path: ".config/discordptb/Cache/Cache_Data",
            },
            CachePathPreset {
                client_name: ClientName::DiscordCanary,
                relative_path: ".config/discordcanary/Cache/Cache_Data",
            },
        ]
    }

    fn windows() -> Vec<CachePathPreset> {
        vec![
            CachePathPreset {
                client_name: ClientName::Chrome,
                relative_path: "AppData/Local/Google/Chrome/User Data/Default/Cache",
            },
            CachePathPreset {
                client_name: ClientName::Brave,
                relative_path: "AppData/Local/BraveSoftware/Brave-Browser/User Data/Default/Cache",
            },
            CachePathPreset {
                client_name: ClientName::Edge,
                relative_path: "AppData/Local/Microsoft/Edge/User Data/Default/Cache",
            },
            CachePathPreset {
                client_name: ClientName::Opera,
                relative_path: "AppData/Roaming/Opera Software/Opera Stable",
            },
            CachePathPreset {
                client_name: ClientName::Discord,
                relative_path: "AppData/Roaming/discord/Cache/Cache_Data",
            },
            CachePathPreset {
                client_name: ClientName::DiscordPtb,
                relative_path: "AppData/Roaming/discordptb/Cache/Cache_Data",
            },
            CachePathPreset {
                client_name: ClientName::DiscordCanary,
                relative_path: "AppData/Roaming/discordcanary/Cache/Cache_Data",
            },
        ]
    }
}

/// Resolve a preset's relative path against a home directory, for
/// callers (and tests) that want to avoid the real platform home.
pub fn resolve_preset(home: &std::path::Path, preset: &CachePathPreset) -> PathBuf {
    home.join(preset.relative_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_assembler_slack_matches_spec_constants() {
        let slack = AssemblerSlack::default();
        assert_eq!(slack.extra_chunks, 5);
        assert_eq!(slack.hex_range_multiplier, 2);
        assert_eq!(slack.hex_range_addend, 10);
    }

    #[test]
    fn default_hex_group_budget_is_500() {
        assert_eq!(RecoveryOptions::default().hex_group_budget, 500);
    }

    #[test]
    fn preset_table_is_nonempty_for_every_platform() {
        assert!(!CachePathPresets::macos().is_empty());
        assert!(!CachePathPresets::linux().is_empty());
        assert!(!CachePathPresets::windows().is_empty());
    }

    #[test]
    fn resolve_preset_joins_home_and_relative_path() {
        let preset = CachePathPreset {
            client_name: ClientName::Chrome,
            relative_path: ".cache/google-chrome/Default/Cache",
        };
        let resolved = resolve_preset(std::path::Path::new("/home/alice"), &preset);
        assert_eq!(
            resolved,
            PathBuf::from("/home/alice/.cache/google-chrome/Default/Cache")
        );
    }
}
