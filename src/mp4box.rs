//! ISO Base Media File Format box walker (spec §4.3). A zero-copy
//! visitor over a byte slice: `MP4Box` records only offsets and sizes,
//! never a parsed copy of the payload, so callers can re-slice `buf`
//! themselves for whatever field they need next.

use crate::types::VideoInfo;

/// Box types that nest other boxes. Anything outside this set is a leaf
/// as far as the walker is concerned, even if its payload happens to
/// contain more length-prefixed records (e.g. `stsd`, which this module
/// reads directly by offset instead of recursing into).
const CONTAINER_SET: &[&[u8; 4]] = &[
    b"moov", b"trak", b"mdia", b"minf", b"stbl", b"edts", b"mvex", b"dinf", b"udta", b"moof",
    b"traf", b"sinf", b"schi",
];

fn is_container(box_type: &[u8; 4]) -> bool {
    CONTAINER_SET.contains(&box_type)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MP4Box {
    /// Offset of the box header within the buffer it was parsed from.
    pub offset: usize,
    /// Total size including the header.
    pub size: usize,
    pub box_type: [u8; 4],
    /// Present only for container box types.
    pub children: Option<Vec<MP4Box>>,
}

impl MP4Box {
    pub fn type_str(&self) -> &str {
        std::str::from_utf8(&self.box_type).unwrap_or("????")
    }
}

fn is_printable_ascii(c: u8) -> bool {
    (0x20..=0x7E).contains(&c)
}

/// Parse a run of sibling boxes in `buf[start..end]`. Stops early
/// (returning whatever was collected) on any malformed header — a short
/// read, an unreasonable size, or a non-ASCII type — rather than
/// erroring, since a truncated tail chunk is the expected case, not an
/// exceptional one.
pub fn parse_boxes(buf: &[u8], start: usize, end: usize) -> Vec<MP4Box> {
    let mut boxes = Vec::new();
    let mut pos = start;
    let end = end.min(buf.len());

    while pos + 8 <= end {
        let raw_size = u32::from_be_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]) as u64;
        let box_type = [buf[pos + 4], buf[pos + 5], buf[pos + 6], buf[pos + 7]];
        if !box_type.iter().all(|&c| is_printable_ascii(c)) {
            break;
        }

        let (size, header_size): (u64, usize) = if raw_size == 1 {
            if pos + 16 > end {
                break;
            }
            let ext = u64::from_be_bytes([
                buf[pos + 8], buf[pos + 9], buf[pos + 10], buf[pos + 11],
                buf[pos + 12], buf[pos + 13], buf[pos + 14], buf[pos + 15],
            ]);
            (ext, 16)
        } else if raw_size == 0 {
            ((end - pos) as u64, 8)
        } else {
            (raw_size, 8)
        };

        if size < 8 {
            break;
        }
        let box_end = match pos.checked_add(size as usize) {
            Some(v) if v <= end => v,
            _ => break,
        };

        let children = if is_container(&box_type) {
            Some(parse_boxes(buf, pos + header_size, box_end))
        } else {
            None
        };

        boxes.push(MP4Box {
            offset: pos,
            size: size as usize,
            box_type,
            children,
        });

        pos = box_end;
    }

    boxes
}

/// Depth-first collection of every box matching `box_type`.
pub fn find_all<'a>(boxes: &'a [MP4Box], box_type: &[u8; 4]) -> Vec<&'a MP4Box> {
    let mut found = Vec::new();
    for b in boxes {
        if &b.box_type == box_type {
            found.push(b);
        }
        if let Some(children) = &b.children {
            found.extend(find_all(children, box_type));
        }
    }
    found
}

/// Salvage scan for a `moov` box when the outer box chain is broken —
/// Chromium writes `moov` at the tail of a streamable MP4, and a
/// truncated header chunk may carry only half of the box preceding it.
/// Scans linearly for the ASCII `moov` substring; for each hit, treats
/// the four bytes immediately before it as a candidate big-endian size
/// and accepts it only if that size is plausible and the candidate
/// range also contains `mvhd` and `trak`.
pub fn scan_for_moov(buf: &[u8]) -> Vec<(usize, usize)> {
    let mut hits = Vec::new();
    let needle = b"moov";
    let mut search_from = 0usize;

    while search_from + 4 <= buf.len() {
        let rel = match buf[search_from..].windows(4).position(|w| w == needle) {
            Some(r) => r,
            None => break,
        };
        let i = search_from + rel;
        search_from = i + 1;

        if i < 4 {
            continue;
        }
        let size_offset = i - 4;
        let size = u32::from_be_bytes([
            buf[size_offset], buf[size_offset + 1], buf[size_offset + 2], buf[size_offset + 3],
        ]) as usize;
        if !(500..=2_000_000).contains(&size) {
            continue;
        }
        let candidate_end = match size_offset.checked_add(size) {
            Some(end) if end <= buf.len() => end,
            _ => continue,
        };
        let candidate = &buf[size_offset..candidate_end];
        let has = |needle: &[u8]| candidate.windows(needle.len()).any(|w| w == needle);
        if has(b"mvhd") && has(b"trak") {
            hits.push((size_offset, size));
        }
    }

    hits
}

/// Extract `moov` summary fields: duration/timescale from `mvhd`, and
/// codec/dimensions from the first video and audio `trak`'s `stsd`.
/// Every read is bounds-checked; a field that doesn't fit is left at
/// its default rather than aborting the whole extraction.
pub fn extract_video_info(buf: &[u8], moov_offset: usize, moov_size: usize) -> VideoInfo {
    let mut info = VideoInfo::default();
    let moov_end = moov_offset.saturating_add(moov_size).min(buf.len());
    if moov_offset >= moov_end {
        return info;
    }
    let boxes = parse_boxes(buf, moov_offset + 8, moov_end);

    if let Some(mvhd) = find_all(&boxes, b"mvhd").into_iter().next() {
        read_mvhd(buf, mvhd, &mut info);
    }

    for trak in find_all(&boxes, b"trak") {
        let children = match &trak.children {
            Some(c) => c,
            None => continue,
        };
        let hdlr_kind = find_all(children, b"hdlr")
            .into_iter()
            .next()
            .and_then(|hdlr| read_handler_type(buf, hdlr));

        let stsd = find_all(children, b"stsd").into_iter().next();
        match hdlr_kind.as_deref() {
            Some("vide") => {
                info.has_video = true;
                if let Some(stsd) = stsd {
                    if let Some((codec, w, h)) = read_video_sample_entry(buf, stsd) {
                        info.video_codec = Some(codec);
                        info.width = w;
                        info.height = h;
                    }
                }
            }
            Some("soun") => {
                info.has_audio = true;
                if let Some(stsd) = stsd {
                    if let Some(codec) = read_sample_entry_type(buf, stsd) {
                        info.audio_codec = Some(codec);
                    }
                }
            }
            _ => {}
        }
    }

    info
}

fn read_bytes<'a>(buf: &'a [u8], offset: usize, len: usize) -> Option<&'a [u8]> {
    buf.get(offset..offset.checked_add(len)?)
}

fn read_u32_at(buf: &[u8], offset: usize) -> Option<u32> {
    read_bytes(buf, offset, 4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_u64_at(buf: &[u8], offset: usize) -> Option<u64> {
    read_bytes(buf, offset, 8).map(|b| {
        u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
    })
}

fn read_u16_at(buf: &[u8], offset: usize) -> Option<u16> {
    read_bytes(buf, offset, 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn read_mvhd(buf: &[u8], mvhd: &MP4Box, info: &mut VideoInfo) {
    let version = match buf.get(mvhd.offset + 8) {
        Some(v) => *v,
        None => return,
    };
    let (timescale, duration) = if version == 1 {
        (read_u32_at(buf, mvhd.offset + 28), read_u64_at(buf, mvhd.offset + 32))
    } else {
        (
            read_u32_at(buf, mvhd.offset + 20),
            read_u32_at(buf, mvhd.offset + 24).map(|d| d as u64),
        )
    };
    if let (Some(timescale), Some(duration)) = (timescale, duration) {
        if timescale > 0 {
            info.duration_seconds = duration as f64 / timescale as f64;
        }
    }
}

fn read_handler_type(buf: &[u8], hdlr: &MP4Box) -> Option<String> {
    read_bytes(buf, hdlr.offset + 16, 4).map(|b| String::from_utf8_lossy(b).to_string())
}

fn read_sample_entry_type(buf: &[u8], stsd: &MP4Box) -> Option<String> {
    read_bytes(buf, stsd.offset + 16 + 4, 4).map(|b| String::from_utf8_lossy(b).to_string())
}

fn read_video_sample_entry(buf: &[u8], stsd: &MP4Box) -> Option<(String, u32, u32)> {
    let codec = read_sample_entry_type(buf, stsd)?;
    let width = read_u16_at(buf, stsd.offset + 16 + 24)? as u32;
    let height = read_u16_at(buf, stsd.offset + 16 + 26)? as u32;
    Some((codec, width, height))
}
