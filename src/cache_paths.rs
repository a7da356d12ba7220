//! `CachePathInfo` discovery (spec §3): stat every preset location so a
//! caller can populate a folder picker without hard-coding paths itself.
//! This is the one UI-adjacent convenience kept in the core, grounded in
//! spec §3 naming `CachePathInfo` as a data model entry that would
//! otherwise have no producer.

use std::path::Path;

use crate::config::{resolve_preset, CachePathPresets};
use crate::types::CachePathInfo;

/// Stat every platform preset under `home`, reporting existence and
/// size even for directories that don't exist (so a UI can still show
/// them, greyed out).
pub fn discover_cache_paths_under(home: &Path) -> Vec<CachePathInfo> {
    CachePathPresets::for_platform()
        .into_iter()
        .map(|preset| {
            let path = resolve_preset(home, &preset);
            let (file_count, total_size, exists) = match std::fs::read_dir(&path) {
                Ok(entries) => {
                    let mut count = 0u64;
                    let mut size = 0u64;
                    for entry in entries.flatten() {
                        if let Ok(meta) = entry.metadata() {
                            if meta.is_file() {
                                count += 1;
                                size += meta.len();
                            }
                        }
                    }
                    (count, size, true)
                }
                Err(_) => (0, 0, false),
            };
            CachePathInfo {
                path,
                exists,
                file_count,
                total_size,
                client_name: preset.client_name,
            }
        })
        .collect()
}

/// Discover cache paths under the current platform's home directory.
/// Returns an empty list (rather than erroring) if the home directory
/// cannot be determined — a UI embedder falls back to manual folder
/// selection in that case.
pub fn discover_cache_paths() -> Vec<CachePathInfo> {
    match home_dir() {
        Some(home) => discover_cache_paths_under(&home),
        None => Vec::new(),
    }
}

fn home_dir() -> Option<std::path::PathBuf> {
    if cfg!(target_os = "windows") {
        std::env::var_os("USERPROFILE").map(std::path::PathBuf::from)
    } else {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClientName;

    #[test]
    fn nonexistent_preset_dirs_report_exists_false() {
        let dir = tempfile::tempdir().unwrap();
        let infos = discover_cache_paths_under(dir.path());
        assert!(!infos.is_empty());
        assert!(infos.iter().all(|i| !i.exists));
        assert!(infos.iter().any(|i| i.client_name == ClientName::Chrome));
    }

    #[test]
    fn existing_preset_dir_counts_files_and_bytes() {
        let dir = tempfile::tempdir().unwrap();
        // Linux preset relative path for Chrome.
        let chrome_cache = dir.path().join(".cache/google-chrome/Default/Cache");
        std::fs::create_dir_all(&chrome_cache).unwrap();
        std::fs::write(chrome_cache.join("f_000001"), b"abcd").unwrap();

        let infos = discover_cache_paths_under(dir.path());
        if let Some(chrome) = infos.iter().find(|i| i.client_name == ClientName::Chrome) {
            if cfg!(not(target_os = "macos")) && !cfg!(target_os = "windows") {
                assert!(chrome.exists);
                assert_eq!(chrome.file_count, 1);
                assert_eq!(chrome.total_size, 4);
            }
        }
    }
}
