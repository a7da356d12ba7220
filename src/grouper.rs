//! Chunk grouping (spec §4.4): turn a flat directory listing into the
//! ordered list of `Resource`s the recovery driver will act on. This is
//! the component with the most heuristics in the system — hex-locality
//! budgets, signature-then-MIME fallback, and the Simple-Cache-vs-
//! Blockfile split — so it is deliberately written as a sequence of
//! named phases rather than one dense loop, mirroring the phases the
//! design calls out.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::cache_record::{self, simple_cache_hash};
use crate::config::RecoveryOptions;
use crate::error::Result;
use crate::mp4box;
use crate::signature;
use crate::types::{
    CacheFileEntry, MediaKind, Resource, ScanPhase, ScanProgress, system_time_to_unix_secs,
};

const HEADER_PEEK_BYTES: usize = 256;

/// Soft upper bound on hex distance between a non-MP4 media header and
/// its continuation chunks (spec §4.4), used when the caller hasn't
/// overridden it via `RecoveryOptions::hex_group_budget`. Chosen to span
/// the expected worst case of ~500 1 MiB tail chunks while still
/// rejecting unrelated media that happens to land nearby in the hex
/// space.
const DEFAULT_HEX_GROUP_BUDGET: u32 = 500;

fn list_directory(dir: &Path) -> Result<Vec<CacheFileEntry>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        entries.push(CacheFileEntry {
            name,
            path: entry.path(),
            size: metadata.len(),
            modified_at: metadata.modified().ok().and_then(system_time_to_unix_secs),
        });
    }
    Ok(entries)
}

pub(crate) fn parse_blockfile_hex(name: &str) -> Option<u32> {
    let hex = name.strip_prefix("f_")?;
    if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(hex, 16).ok()
}

/// An entry carried through phases 2b–5 of the Blockfile walk, tagged
/// with its detected kind (`None` for unidentified data chunks) and,
/// for MP4 header candidates, the full buffer C5 will need.
struct BlockfileEntry {
    file: CacheFileEntry,
    hex: u32,
    kind: Option<MediaKind>,
    mp4_buffer: Option<Vec<u8>>,
}

#[derive(Default)]
struct SimpleCacheGroup {
    file0: Option<CacheFileEntry>,
    file1: Option<CacheFileEntry>,
    file_s: Option<CacheFileEntry>,
}

/// Walk a directory and emit the `Resource`s it describes. `cancel` is
/// polled between phases; setting it aborts the scan early, returning
/// whatever was collected so far rather than an error (cancellation is
/// not a failure).
pub fn scan_directory(
    dir: &Path,
    cancel: &AtomicBool,
    progress: impl FnMut(ScanProgress),
) -> Result<Vec<Resource>> {
    scan_directory_with_options(dir, &RecoveryOptions::default(), cancel, progress)
}

/// Same as [`scan_directory`], but honoring the caller's hex-locality
/// budget and assembler slack constants instead of the defaults.
pub fn scan_directory_with_options(
    dir: &Path,
    options: &RecoveryOptions,
    cancel: &AtomicBool,
    mut progress: impl FnMut(ScanProgress),
) -> Result<Vec<Resource>> {
    let hex_group_budget = options.hex_group_budget;
    let slack = &options.assembler_slack;
    progress(ScanProgress {
        phase: ScanPhase::Listing,
        current: 0,
        total: 0,
        current_file: None,
    });
    let all_files = list_directory(dir)?;
    let total = all_files.len();

    // Phase 1: partition.
    let mut simple_groups: HashMap<String, SimpleCacheGroup> = HashMap::new();
    let mut blockfile_files: Vec<CacheFileEntry> = Vec::new();
    for file in all_files {
        match simple_cache_hash(&file.name) {
            Some((hash, suffix)) => {
                let group = simple_groups.entry(hash.to_string()).or_default();
                match suffix {
                    '0' => group.file0 = Some(file),
                    '1' => group.file1 = Some(file),
                    's' => group.file_s = Some(file),
                    _ => unreachable!(),
                }
            }
            None => blockfile_files.push(file),
        }
    }

    if cancel.load(Ordering::Relaxed) {
        return Ok(Vec::new());
    }

    progress(ScanProgress {
        phase: ScanPhase::Detecting,
        current: 0,
        total,
        current_file: None,
    });

    // Phase 2a: Simple Cache detection, one resource per hash group
    // (map-iteration order — spec §5 only guarantees an order within
    // each bucket, not across them).
    let mut simple_cache_resources = Vec::new();
    for group in simple_groups.into_values() {
        if let Some(resource) = detect_simple_cache_group(group)? {
            simple_cache_resources.push(resource);
        }
    }

    if cancel.load(Ordering::Relaxed) {
        return Ok(simple_cache_resources);
    }

    // Phase 2b: Blockfile detection.
    let mut mp4_header_files: Vec<BlockfileEntry> = Vec::new();
    let mut standalone_files: Vec<(CacheFileEntry, MediaKind)> = Vec::new();
    let mut data_chunk_files: Vec<CacheFileEntry> = Vec::new();

    for file in blockfile_files {
        progress(ScanProgress {
            phase: ScanPhase::Detecting,
            current: 0,
            total,
            current_file: Some(file.name.clone()),
        });
        let header = cache_record::read_header(&file.path, HEADER_PEEK_BYTES)?;
        match signature::detect(&header) {
            Some(MediaKind::Mp4Complete) => {
                let buf = cache_record::read_all(&file.path)?;
                let boxes = mp4box::parse_boxes(&buf, 0, buf.len());
                let has_moov = !mp4box::find_all(&boxes, b"moov").is_empty();
                let has_mdat = !mp4box::find_all(&boxes, b"mdat").is_empty();
                if has_moov && has_mdat {
                    standalone_files.push((file, MediaKind::Mp4Complete));
                } else {
                    let hex = parse_blockfile_hex(&file.name);
                    if let Some(hex) = hex {
                        mp4_header_files.push(BlockfileEntry {
                            file,
                            hex,
                            kind: Some(MediaKind::Mp4HeaderOnly),
                            mp4_buffer: Some(buf),
                        });
                    }
                }
            }
            Some(kind) => standalone_files.push((file, kind)),
            None => data_chunk_files.push(file),
        }
    }

    // Phase 3: group split. mp4_fragment/webm_continuation entries cannot
    // stand alone, and audio/video *header* kinds may still have
    // continuation chunks trailing them at a later hex offset — both
    // move into the unified walk pool so Phase 4 can decide. Only kinds
    // that are neither a header nor a continuation marker (images, a
    // genuinely complete standalone file) resolve immediately here.
    let mut blockfile_group_pool: Vec<BlockfileEntry> = Vec::new();
    let mut standalone_resources: Vec<(u32, Resource)> = Vec::new();
    for (file, kind) in standalone_files {
        let joins_unified_walk = kind.is_continuation_marker() || kind.is_media_header();
        let hex = parse_blockfile_hex(&file.name);
        if joins_unified_walk {
            if let Some(hex) = hex {
                blockfile_group_pool.push(BlockfileEntry {
                    file,
                    hex,
                    kind: Some(kind),
                    mp4_buffer: None,
                });
                continue;
            }
        }
        let sort_key = hex.unwrap_or(0);
        let display_name = file.name.clone();
        let resource = Resource::new(
            resource_id(&file.name),
            kind,
            vec![file],
            display_name,
        );
        standalone_resources.push((sort_key, resource));
    }

    if cancel.load(Ordering::Relaxed) {
        simple_cache_resources.extend(standalone_resources.into_iter().map(|(_, r)| r));
        return Ok(simple_cache_resources);
    }

    progress(ScanProgress {
        phase: ScanPhase::Grouping,
        current: 0,
        total,
        current_file: None,
    });

    // Phase 4: unified Blockfile walk.
    let mut entries: Vec<BlockfileEntry> = Vec::new();
    entries.extend(mp4_header_files);
    for file in data_chunk_files {
        if let Some(hex) = parse_blockfile_hex(&file.name) {
            entries.push(BlockfileEntry {
                file,
                hex,
                kind: None,
                mp4_buffer: None,
            });
        }
    }
    entries.extend(blockfile_group_pool);
    entries.sort_by_key(|e| e.hex);

    let mut claimed = vec![false; entries.len()];
    let mut walked_resources: Vec<(u32, Resource)> = Vec::new();

    for i in 0..entries.len() {
        if claimed[i] {
            continue;
        }
        let is_header = entries[i].kind.map(|k| k.is_media_header()).unwrap_or(false);
        if !is_header {
            continue;
        }
        let header_hex = entries[i].hex;

        if entries[i].kind == Some(MediaKind::Mp4HeaderOnly) {
            let header_file = entries[i].file.clone();
            let header_buffer = entries[i].mp4_buffer.clone().unwrap_or_default();
            let candidates: Vec<(usize, u32, &CacheFileEntry)> = entries
                .iter()
                .enumerate()
                .filter(|(j, e)| *j != i && !claimed[*j] && is_continuation(e.kind))
                .map(|(j, e)| (j, e.hex, &e.file))
                .collect();

            let assembly = crate::assembler::assemble_chunked_mp4(
                &header_file,
                &header_buffer,
                &candidates
                    .iter()
                    .map(|(_, hex, file)| (*hex, (*file).clone()))
                    .collect::<Vec<_>>(),
                slack,
            );

            claimed[i] = true;
            match assembly {
                crate::assembler::AssemblyResult::Chunked { files } => {
                    for claimed_file in &files[1..] {
                        if let Some((j, ..)) =
                            candidates.iter().find(|(_, _, f)| f.name == claimed_file.name)
                        {
                            claimed[*j] = true;
                        }
                    }
                    let display_name = header_file.name.clone();
                    let resource = Resource::new(
                        resource_id(&header_file.name),
                        MediaKind::Mp4Chunked,
                        files,
                        display_name,
                    );
                    walked_resources.push((header_hex, resource));
                }
                crate::assembler::AssemblyResult::HeaderOnly => {
                    let display_name = header_file.name.clone();
                    let resource = Resource::new(
                        resource_id(&header_file.name),
                        MediaKind::Mp4HeaderOnly,
                        vec![header_file],
                        display_name,
                    );
                    walked_resources.push((header_hex, resource));
                }
            }
            continue;
        }

        // Non-MP4 media header: accumulate continuation-class
        // successors within the hex-locality budget.
        let header_kind = entries[i].kind.unwrap();
        let mut accumulated = vec![entries[i].file.clone()];
        claimed[i] = true;
        let mut j = i + 1;
        while j < entries.len() {
            if claimed[j] {
                j += 1;
                continue;
            }
            if entries[j].kind.map(|k| k.is_media_header()).unwrap_or(false) {
                break;
            }
            let delta = entries[j].hex.saturating_sub(header_hex);
            if delta > hex_group_budget {
                break;
            }
            accumulated.push(entries[j].file.clone());
            claimed[j] = true;
            j += 1;
        }
        let display_name = entries[i].file.name.clone();
        let resource = Resource::new(
            resource_id(&display_name),
            header_kind,
            accumulated,
            display_name,
        );
        walked_resources.push((header_hex, resource));
    }

    // Phase 5: unidentified tail.
    let leftovers: Vec<CacheFileEntry> = entries
        .iter()
        .enumerate()
        .filter(|(i, _)| !claimed[*i])
        .map(|(_, e)| e.file.clone())
        .collect();

    let mut result = simple_cache_resources;
    let mut blockfile_resources: Vec<(u32, Resource)> = standalone_resources;
    blockfile_resources.extend(walked_resources);
    blockfile_resources.sort_by_key(|(hex, _)| *hex);
    result.extend(blockfile_resources.into_iter().map(|(_, r)| r));

    if !leftovers.is_empty() {
        let total_files = leftovers.len();
        tracing::debug!("{} unclaimed Blockfile entries in unknown_data tail", total_files);
        result.push(Resource::new(
            "unknown_data".to_string(),
            MediaKind::UnknownData,
            leftovers,
            "Unidentified Data".to_string(),
        ));
    }

    progress(ScanProgress {
        phase: ScanPhase::Done,
        current: total,
        total,
        current_file: None,
    });
    tracing::info!("scan of {} produced {} resources", dir.display(), result.len());

    Ok(result)
}

fn is_continuation(kind: Option<MediaKind>) -> bool {
    match kind {
        None => true,
        Some(k) => k.is_continuation_marker(),
    }
}

fn resource_id(seed: &str) -> String {
    format!("res_{}", seed)
}

/// Classify one Simple Cache hash group (spec §4.4 Phase 2a). Returns
/// `None` when neither stream yields a detectable body — such files are
/// dropped entirely, never landing in the unidentified tail.
fn detect_simple_cache_group(group: SimpleCacheGroup) -> Result<Option<Resource>> {
    if let Some(file_s) = &group.file_s {
        if file_s.size > 0 {
            let (header, _total) = cache_record::read_sparse_header(&file_s.path, HEADER_PEEK_BYTES)?;
            if let Some(resource) = classify_sparse_or_fallback(file_s, &header, group.file0.as_ref())? {
                return Ok(Some(resource));
            }
            return Ok(None);
        }
    }
    if let Some(file0) = &group.file0 {
        let header = cache_record::read_header(&file0.path, HEADER_PEEK_BYTES)?;
        if let Some(kind) = signature::detect(&header) {
            return Ok(Some(build_simple_cache_resource(file0, kind, None)?));
        }
        if let Some(content_type) = cache_record::read_content_type(&file0.path)? {
            if let Some(kind) = signature::detect_by_mime(&content_type) {
                return Ok(Some(build_simple_cache_resource(file0, kind, None)?));
            }
        }
    }
    Ok(None)
}

fn classify_sparse_or_fallback(
    file_s: &CacheFileEntry,
    header: &[u8],
    file0: Option<&CacheFileEntry>,
) -> Result<Option<Resource>> {
    if let Some(kind) = signature::detect(header) {
        return Ok(Some(build_simple_cache_resource(file_s, kind, Some(true))?));
    }
    if let Some(file0) = file0 {
        if let Some(content_type) = cache_record::read_content_type(&file0.path)? {
            if let Some(kind) = signature::detect_by_mime(&content_type) {
                return Ok(Some(build_simple_cache_resource(file_s, kind, Some(true))?));
            }
        }
    }
    Ok(None)
}

/// Build the resource for a Simple Cache group once a kind is known.
/// `from_sparse` selects whether full materialization goes through
/// `read_sparse_all`/`sparse_total_size` (the `_s` stream) or a plain
/// file read (`_0` body).
fn build_simple_cache_resource(
    source: &CacheFileEntry,
    kind: MediaKind,
    from_sparse: Option<bool>,
) -> Result<Resource> {
    let sparse = from_sparse.unwrap_or(false);
    if kind == MediaKind::Mp4Complete {
        let buf = if sparse {
            cache_record::read_sparse_all(&source.path)?
        } else {
            cache_record::read_all(&source.path)?
        };
        let boxes = mp4box::parse_boxes(&buf, 0, buf.len());
        let has_moov = !mp4box::find_all(&boxes, b"moov").is_empty();
        let has_mdat = !mp4box::find_all(&boxes, b"mdat").is_empty();
        let resolved_kind = if has_moov && has_mdat {
            MediaKind::Mp4Complete
        } else {
            MediaKind::Mp4HeaderOnly
        };
        let mut entry = source.clone();
        entry.size = buf.len() as u64;
        return Ok(Resource::new(
            resource_id(&source.name),
            resolved_kind,
            vec![entry],
            source.name.clone(),
        ));
    }

    let mut entry = source.clone();
    if sparse {
        entry.size = cache_record::sparse_total_size(&source.path)?;
    }
    Ok(Resource::new(
        resource_id(&source.name),
        kind,
        vec![entry],
        source.name.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_blockfile_hex() {
        assert_eq!(parse_blockfile_hex("f_0000a0"), Some(0xa0));
    }

    #[test]
    fn rejects_short_hex() {
        assert_eq!(parse_blockfile_hex("f_a0"), None);
    }

    #[test]
    fn rejects_non_blockfile_name() {
        assert_eq!(parse_blockfile_hex("random.txt"), None);
    }

    #[test]
    fn hex_budget_of_500_is_inclusive() {
        assert!(500u32.saturating_sub(0) <= DEFAULT_HEX_GROUP_BUDGET);
        assert!(501u32.saturating_sub(0) > DEFAULT_HEX_GROUP_BUDGET);
    }
}
