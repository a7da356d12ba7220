//! Cache record reading (spec §4.1): read an HTTP body out of either a
//! Blockfile `f_XXXXXX` file (raw bytes, no framing) or a Simple Cache
//! `{16-hex}_0/_1/_s` stream (skip the preamble, reassemble sparse
//! ranges). Everything here is synchronous — these are bounded reads of
//! on-disk files, not network I/O, so there is nothing to `.await`.

use std::fs;
use std::io::Read;
use std::path::Path;

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{CacheError, Result};

fn simple_cache_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9a-f]{16}_([01s])$").unwrap())
}

/// Which Simple Cache stream a filename names, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimpleCacheStream {
    Zero,
    One,
    Sparse,
}

/// Split a Simple Cache filename into its 16-hex-char hash and stream
/// suffix, or `None` if `name` doesn't match the pattern. Used by the
/// chunk grouper to key `_0`/`_1`/`_s` triples together.
pub fn simple_cache_hash(name: &str) -> Option<(&str, char)> {
    let caps = simple_cache_name_re().captures(name)?;
    let suffix = caps[1].chars().next()?;
    Some((&name[..16], suffix))
}

fn classify_filename(path: &Path) -> Option<SimpleCacheStream> {
    let name = path.file_name()?.to_str()?;
    let caps = simple_cache_name_re().captures(name)?;
    match &caps[1] {
        "0" => Some(SimpleCacheStream::Zero),
        "1" => Some(SimpleCacheStream::One),
        "s" => Some(SimpleCacheStream::Sparse),
        _ => unreachable!("regex only captures 0/1/s"),
    }
}

/// A parsed Simple Cache `_0`/`_1` preamble: where the HTTP headers
/// start and where the HTTP body (stream 1, carried inline in the same
/// file for `_0`) starts.
struct PreambleLayout {
    headers_start: usize,
    body_start: usize,
}

/// Locate the end of the Simple Cache preamble. The exact binary layout
/// (magic, version, key-length width) is version-dependent and
/// unspecified here; this walks the fixed header fields Chromium's
/// Simple Cache backend writes — magic (u64), version (u32), key
/// length (u32), then the key bytes themselves — and treats whatever
/// follows as the HTTP headers block.
fn parse_preamble(buf: &[u8]) -> Option<PreambleLayout> {
    // magic(8) + version(4) + key_len(4) = 16 bytes fixed header.
    if buf.len() < 16 {
        return None;
    }
    let key_len = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]) as usize;
    let headers_start = 16usize.checked_add(key_len)?;
    if headers_start > buf.len() {
        return None;
    }
    Some(PreambleLayout {
        headers_start,
        body_start: headers_start,
    })
}

/// Find the end of the ASCII HTTP headers block (`\r\n\r\n`) starting at
/// `from`, returning the offset of the first body byte.
fn find_headers_end(buf: &[u8], from: usize) -> Option<usize> {
    let haystack = buf.get(from..)?;
    haystack
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|rel| from + rel + 4)
}

/// Read the first `n` bytes of the HTTP body named by `path`. Blockfile
/// names and anything that doesn't match the Simple Cache pattern
/// return raw bytes from offset 0.
pub fn read_header(path: &Path, n: usize) -> Result<Vec<u8>> {
    match classify_filename(path) {
        None => read_raw_prefix(path, n),
        Some(SimpleCacheStream::One) => read_raw_prefix(path, n),
        Some(SimpleCacheStream::Sparse) => {
            let (bytes, _total) = read_sparse_header(path, n)?;
            Ok(bytes)
        }
        Some(SimpleCacheStream::Zero) => {
            let raw = fs::read(path).map_err(|e| io_err(path, e))?;
            match locate_body(&raw) {
                Some(start) => Ok(raw[start..raw.len().min(start + n)].to_vec()),
                None => {
                    tracing::warn!(
                        "malformed Simple Cache preamble in {}, falling back to raw read",
                        path.display()
                    );
                    Ok(raw[..raw.len().min(n)].to_vec())
                }
            }
        }
    }
}

/// Read the entire HTTP body named by `path`.
pub fn read_all(path: &Path) -> Result<Vec<u8>> {
    match classify_filename(path) {
        None => fs::read(path).map_err(|e| io_err(path, e)),
        Some(SimpleCacheStream::One) => fs::read(path).map_err(|e| io_err(path, e)),
        Some(SimpleCacheStream::Sparse) => read_sparse_all(path),
        Some(SimpleCacheStream::Zero) => {
            let raw = fs::read(path).map_err(|e| io_err(path, e))?;
            match locate_body(&raw) {
                Some(start) => Ok(raw[start..].to_vec()),
                None => {
                    tracing::warn!(
                        "malformed Simple Cache preamble in {}, falling back to raw read",
                        path.display()
                    );
                    Ok(raw)
                }
            }
        }
    }
}

/// Parse the `Content-Type` header out of a Simple Cache `_0` stream's
/// HTTP response headers, returning the value before any `;` parameter.
/// Returns `None` for non-Simple-Cache files or when the header is
/// absent.
pub fn read_content_type(path: &Path) -> Result<Option<String>> {
    if classify_filename(path) != Some(SimpleCacheStream::Zero) {
        return Ok(None);
    }
    let raw = fs::read(path).map_err(|e| io_err(path, e))?;
    let layout = match parse_preamble(&raw) {
        Some(l) => l,
        None => return Ok(None),
    };
    let headers_end = match find_headers_end(&raw, layout.headers_start) {
        Some(end) => end,
        None => return Ok(None),
    };
    let headers_text = String::from_utf8_lossy(&raw[layout.headers_start..headers_end]);
    for line in headers_text.split("\r\n") {
        if let Some(value) = line
            .strip_prefix("Content-Type:")
            .or_else(|| line.strip_prefix("content-type:"))
        {
            let value = value.split(';').next().unwrap_or(value).trim();
            if !value.is_empty() {
                return Ok(Some(value.to_string()));
            }
        }
    }
    Ok(None)
}

/// Resolve the preamble and header block for a `_0` file, returning the
/// offset of the first HTTP body byte, or `None` if either stage fails
/// to parse (caller falls back to raw-file semantics).
fn locate_body(raw: &[u8]) -> Option<usize> {
    let layout = parse_preamble(raw)?;
    find_headers_end(raw, layout.headers_start)
}

fn read_raw_prefix(path: &Path, n: usize) -> Result<Vec<u8>> {
    let file = fs::File::open(path).map_err(|e| io_err(path, e))?;
    let mut buf = vec![0u8; n];
    let mut handle = file.take(n as u64);
    let read = handle.read(&mut buf).map_err(|e| io_err(path, e))?;
    buf.truncate(read);
    Ok(buf)
}

fn io_err(path: &Path, err: std::io::Error) -> CacheError {
    crate::error::classify_permission_error(path, &err).unwrap_or(CacheError::Io(err))
}

// --- Sparse (`_s`) reassembly --------------------------------------------

/// One `(offset, length)` range record from a sparse stream, with its
/// body bytes.
struct SparseRecord {
    offset: u64,
    data: Vec<u8>,
}

/// Walk every range record in a sparse file. Each record is a fixed
/// `(offset: u64 LE, length: u32 LE)` header followed by `length` bytes
/// of body. Stops (without error) at the first record whose header
/// doesn't fit in the remaining bytes — a truncated trailing record is
/// simply dropped.
fn walk_sparse_records(raw: &[u8]) -> Vec<SparseRecord> {
    let mut records = Vec::new();
    let mut pos = 0usize;
    while pos + 12 <= raw.len() {
        let offset = u64::from_le_bytes([
            raw[pos], raw[pos + 1], raw[pos + 2], raw[pos + 3],
            raw[pos + 4], raw[pos + 5], raw[pos + 6], raw[pos + 7],
        ]);
        let length = u32::from_le_bytes([raw[pos + 8], raw[pos + 9], raw[pos + 10], raw[pos + 11]]) as usize;
        let data_start = pos + 12;
        let data_end = data_start.saturating_add(length);
        if data_end > raw.len() {
            break;
        }
        records.push(SparseRecord {
            offset,
            data: raw[data_start..data_end].to_vec(),
        });
        pos = data_end;
    }
    records
}

/// Reassemble records into a contiguous zero-filled buffer, capped at
/// the first `n` bytes (or as many as are available).
pub fn read_sparse_header(path: &Path, n: usize) -> Result<(Vec<u8>, u64)> {
    let raw = fs::read(path).map_err(|e| io_err(path, e))?;
    let records = walk_sparse_records(&raw);
    let total = records
        .iter()
        .map(|r| r.offset + r.data.len() as u64)
        .max()
        .unwrap_or(0);
    let cap = (total as usize).min(n);
    let mut buf = vec![0u8; cap];
    for record in &records {
        let start = record.offset as usize;
        if start >= cap {
            continue;
        }
        let end = (start + record.data.len()).min(cap);
        if end > start {
            buf[start..end].copy_from_slice(&record.data[..end - start]);
        }
    }
    Ok((buf, total))
}

/// Reassemble every record into one contiguous buffer sized
/// `max(offset+length)` across all records. Gaps are zero-filled.
pub fn read_sparse_all(path: &Path) -> Result<Vec<u8>> {
    let raw = fs::read(path).map_err(|e| io_err(path, e))?;
    let records = walk_sparse_records(&raw);
    let total = records
        .iter()
        .map(|r| r.offset + r.data.len() as u64)
        .max()
        .unwrap_or(0) as usize;
    let mut buf = vec![0u8; total];
    for record in &records {
        let start = record.offset as usize;
        let end = (start + record.data.len()).min(total);
        if end > start {
            buf[start..end].copy_from_slice(&record.data[..end - start]);
        }
    }
    Ok(buf)
}

/// Report the reassembled stream size without materializing it, falling
/// back to full reassembly when the computed size looks implausible
/// (smaller than the file actually occupies on disk) — self-healing
/// against a malformed preamble that undercounts records.
pub fn sparse_total_size(path: &Path) -> Result<u64> {
    let on_disk_size = fs::metadata(path).map_err(|e| io_err(path, e))?.len();
    let raw = fs::read(path).map_err(|e| io_err(path, e))?;
    let records = walk_sparse_records(&raw);
    let computed = records
        .iter()
        .map(|r| r.offset + r.data.len() as u64)
        .max()
        .unwrap_or(0);
    if computed < on_disk_size {
        tracing::warn!(
            "sparse total size {} implausibly small for {} ({} bytes on disk), materializing",
            computed,
            path.display(),
            on_disk_size
        );
        let full = read_sparse_all(path)?;
        return Ok(full.len() as u64);
    }
    Ok(computed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_sparse_record(buf: &mut Vec<u8>, offset: u64, data: &[u8]) {
        buf.extend_from_slice(&offset.to_le_bytes());
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(data);
    }

    /// Write `bytes` to a file named exactly `name` inside a fresh temp
    /// directory, so filename-pattern matching (Simple Cache vs
    /// Blockfile) behaves the same as it would on a real cache
    /// directory. The `TempDir` must outlive the returned path.
    fn named_file(dir: &TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn blockfile_read_header_returns_raw_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let f = named_file(&dir, "f_000001", b"\xFF\xD8\xFFrest-of-file");
        let got = read_header(&f, 3).unwrap();
        assert_eq!(got, vec![0xFF, 0xD8, 0xFF]);
    }

    #[test]
    fn read_header_zero_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let f = named_file(&dir, "f_000001", b"hello");
        assert_eq!(read_header(&f, 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn read_header_past_eof_returns_available_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let f = named_file(&dir, "f_000001", b"hi");
        assert_eq!(read_header(&f, 100).unwrap(), b"hi".to_vec());
    }

    #[test]
    fn sparse_single_record_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw = Vec::new();
        write_sparse_record(&mut raw, 0, b"0123456789");
        let f = named_file(&dir, "1234567890abcdef_s", &raw);
        let all = read_sparse_all(&f).unwrap();
        assert_eq!(all, b"0123456789".to_vec());
        assert_eq!(sparse_total_size(&f).unwrap(), 10);
    }

    #[test]
    fn sparse_gap_is_zero_filled() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw = Vec::new();
        write_sparse_record(&mut raw, 0, b"AAAA");
        write_sparse_record(&mut raw, 8, b"BBBB");
        let f = named_file(&dir, "1234567890abcdef_s", &raw);
        let all = read_sparse_all(&f).unwrap();
        assert_eq!(all, b"AAAA\x00\x00\x00\x00BBBB".to_vec());
    }

    #[test]
    fn sparse_records_out_of_order_reassemble_correctly() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw = Vec::new();
        write_sparse_record(&mut raw, 4, b"late");
        write_sparse_record(&mut raw, 0, b"0123");
        let f = named_file(&dir, "1234567890abcdef_s", &raw);
        assert_eq!(read_sparse_all(&f).unwrap(), b"0123late".to_vec());
    }

    #[test]
    fn sparse_header_caps_at_n() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw = Vec::new();
        write_sparse_record(&mut raw, 0, b"0123456789");
        let f = named_file(&dir, "1234567890abcdef_s", &raw);
        let (bytes, total) = read_sparse_header(&f, 4).unwrap();
        assert_eq!(bytes, b"0123".to_vec());
        assert_eq!(total, 10);
    }

    #[test]
    fn content_type_stripped_at_semicolon() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw: Vec<u8> = Vec::new();
        raw.extend_from_slice(&0u64.to_le_bytes()); // magic, unused by this reader
        raw.extend_from_slice(&1u32.to_le_bytes()); // version
        raw.extend_from_slice(&3u32.to_le_bytes()); // key_len
        raw.extend_from_slice(b"key");
        raw.extend_from_slice(b"HTTP/1.1 200 OK\r\nContent-Type: video/mp4; charset=binary\r\n\r\n");
        let f = named_file(&dir, "1234567890abcdef_0", &raw);
        let ct = read_content_type(&f).unwrap();
        assert_eq!(ct.as_deref(), Some("video/mp4"));
    }

    #[test]
    fn content_type_absent_for_blockfile_names() {
        let dir = tempfile::tempdir().unwrap();
        let f = named_file(&dir, "f_000001", b"anything");
        assert_eq!(read_content_type(&f).unwrap(), None);
    }
}
