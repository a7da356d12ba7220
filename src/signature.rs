//! Signature-based type detection (spec §4.2).
//!
//! `detect` maps a prefix buffer to one of the ~30 `MediaKind` values. The
//! steps are evaluated in a fixed order — first match wins — because a
//! few entries would otherwise shadow each other: the MP3 sync-byte table
//! entries must be checked before the ADTS AAC fallback, and a bare
//! `ftyp` box must be checked before the fragment-marker fallback.

use crate::types::MediaKind;

/// Exact byte-prefix matches at offset 0, scanned in order. A handful of
/// matches here (RIFF, the MPEG-TS candidate) need extra validation
/// before they can be trusted, so they return a placeholder kind that
/// `detect` refines immediately after the table scan.
const SIGNATURE_TABLE: &[(&[u8], MediaKind)] = &[
    (&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A], MediaKind::Png),
    (&[0xFF, 0xD8, 0xFF], MediaKind::Jpeg),
    (b"GIF87a", MediaKind::Gif),
    (b"GIF89a", MediaKind::Gif),
    (&[0x49, 0x49, 0x2A, 0x00], MediaKind::Tiff),
    (&[0x4D, 0x4D, 0x00, 0x2A], MediaKind::Tiff),
    (&[0x00, 0x00, 0x01, 0x00], MediaKind::Ico),
    (b"RIFF", MediaKind::RiffUnknown),
    (&[0x1A, 0x45, 0xDF, 0xA3], MediaKind::WebmMkv),
    (&[0x46, 0x4C, 0x56, 0x01], MediaKind::Flv),
    (&[0x47], MediaKind::MpegTs),
    (b"ID3", MediaKind::Mp3),
    (&[0xFF, 0xFB], MediaKind::Mp3),
    (&[0xFF, 0xF3], MediaKind::Mp3),
    (&[0xFF, 0xF2], MediaKind::Mp3),
    (&[0xFF, 0xFE], MediaKind::Mp3),
    (b"OggS", MediaKind::Ogg),
    (b"fLaC", MediaKind::Flac),
    // ASF/WMA GUID: 30 26 B2 75 8E 66 CF 11 A6 D9 00 AA 00 62 CE 6C
    (
        &[
            0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62,
            0xCE, 0x6C,
        ],
        MediaKind::Wma,
    ),
    // "BM" is two bytes and would otherwise shadow longer prefixes that
    // happen to start with the same bytes, so it's checked last.
    (b"BM", MediaKind::Bmp),
];

/// Detect the media kind of a byte buffer. `buf` should be at least 256
/// bytes when available (spec recommends >=16B minimum, >=256B
/// preferred); shorter buffers simply fail more of the bounds checks and
/// fall through to `None`.
pub fn detect(buf: &[u8]) -> Option<MediaKind> {
    if buf.len() < 4 {
        return None;
    }

    // Step 1: fixed-prefix table scan, first match wins.
    for (pattern, kind) in SIGNATURE_TABLE {
        if buf.len() >= pattern.len() && &buf[..pattern.len()] == *pattern {
            return match kind {
                MediaKind::RiffUnknown => Some(disambiguate_riff(buf)),
                MediaKind::MpegTs => validate_mpeg_ts(buf).then_some(MediaKind::MpegTs),
                other => Some(*other),
            };
        }
    }

    // Step 4: ADTS AAC fallback — checked after the table (so the exact
    // MP3 sync bytes above still win) and before ISO BMFF.
    if let Some(kind) = detect_adts_aac(buf) {
        return Some(kind);
    }

    // Step 5: ISO Base Media File Format (ftyp-led).
    if let Some(kind) = detect_isobmff(buf) {
        return Some(kind);
    }

    // Step 6: MP4 fragment markers with no leading ftyp.
    if let Some(kind) = detect_fragment_marker(buf) {
        return Some(kind);
    }

    // Step 7: WebM Cluster continuation.
    if buf.len() >= 4 && buf[..4] == [0x1F, 0x43, 0xB6, 0x75] {
        return Some(MediaKind::WebmContinuation);
    }

    None
}

/// Step 2: RIFF subtype disambiguation from bytes [8..12].
fn disambiguate_riff(buf: &[u8]) -> MediaKind {
    if buf.len() < 12 {
        return MediaKind::RiffUnknown;
    }
    match &buf[8..12] {
        b"WAVE" => MediaKind::Wav,
        b"AVI " => MediaKind::Avi,
        b"WEBP" => MediaKind::Webp,
        _ => MediaKind::RiffUnknown,
    }
}

/// Step 3: MPEG-TS validation — require a second sync byte at offset 188.
fn validate_mpeg_ts(buf: &[u8]) -> bool {
    buf.len() > 188 && buf[188] == 0x47
}

/// Step 4: ADTS AAC syncword. `byte0 == 0xFF`, top nibble of `byte1` is
/// the sync continuation, and the ADTS layer field (always `00` for AAC,
/// unlike MP3's nonzero layer value) is encoded in `byte1 & 0x06`.
fn detect_adts_aac(buf: &[u8]) -> Option<MediaKind> {
    if buf.len() < 2 {
        return None;
    }
    let (b0, b1) = (buf[0], buf[1]);
    if b0 == 0xFF && (b1 & 0xF0) == 0xF0 && (b1 & 0x06) == 0x00 {
        Some(MediaKind::Aac)
    } else {
        None
    }
}

/// Step 5: `ftyp`-led ISO BMFF brand dispatch.
fn detect_isobmff(buf: &[u8]) -> Option<MediaKind> {
    if buf.len() < 12 || &buf[4..8] != b"ftyp" {
        return None;
    }
    let box_size = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if !(8..=512).contains(&box_size) {
        return None;
    }
    let brand = &buf[8..12];
    let trimmed = std::str::from_utf8(brand).unwrap_or("").trim_end();
    Some(match trimmed {
        "avif" | "avis" => MediaKind::Avif,
        "heic" | "hevc" | "mif1" | "msf1" => MediaKind::Heic,
        "M4A" | "m4a" | "M4B" | "M4P" => MediaKind::M4a,
        "qt" => MediaKind::Mov,
        _ => MediaKind::Mp4Complete,
    })
}

/// Step 6: a bare continuation-chunk marker box with no leading `ftyp`.
fn detect_fragment_marker(buf: &[u8]) -> Option<MediaKind> {
    if buf.len() < 8 {
        return None;
    }
    let box_size = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if !(8..=50_000_000).contains(&box_size) {
        return None;
    }
    match &buf[4..8] {
        b"styp" | b"moof" | b"sidx" | b"mdat" => Some(MediaKind::Mp4Fragment),
        _ => None,
    }
}

/// MIME type → MediaKind fallback table (spec §4.4, authoritative).
/// Content-Type is only consulted when signature detection fails.
pub fn detect_by_mime(mime: &str) -> Option<MediaKind> {
    let mime = mime.split(';').next().unwrap_or(mime).trim();
    Some(match mime {
        "video/mp4" => MediaKind::Mp4Complete,
        "video/webm" | "video/x-matroska" => MediaKind::WebmMkv,
        "video/x-flv" => MediaKind::Flv,
        "video/x-msvideo" => MediaKind::Avi,
        "video/quicktime" => MediaKind::Mov,
        "video/mp2t" => MediaKind::MpegTs,
        "audio/mpeg" | "audio/mp3" => MediaKind::Mp3,
        "audio/aac" => MediaKind::Aac,
        "audio/ogg" => MediaKind::Ogg,
        "audio/flac" => MediaKind::Flac,
        "audio/wav" | "audio/x-wav" => MediaKind::Wav,
        "audio/mp4" | "audio/x-m4a" => MediaKind::M4a,
        "audio/x-ms-wma" => MediaKind::Wma,
        "image/png" => MediaKind::Png,
        "image/jpeg" => MediaKind::Jpeg,
        "image/gif" => MediaKind::Gif,
        "image/webp" => MediaKind::Webp,
        "image/bmp" => MediaKind::Bmp,
        "image/tiff" => MediaKind::Tiff,
        "image/x-icon" | "image/vnd.microsoft.icon" => MediaKind::Ico,
        "image/avif" => MediaKind::Avif,
        "image/heic" | "image/heif" => MediaKind::Heic,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded(prefix: &[u8]) -> Vec<u8> {
        let mut v = prefix.to_vec();
        v.resize(256, 0);
        v
    }

    #[test]
    fn detects_png() {
        let buf = padded(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]);
        assert_eq!(detect(&buf), Some(MediaKind::Png));
    }

    #[test]
    fn detects_jpeg() {
        let buf = padded(&[0xFF, 0xD8, 0xFF, 0xE0]);
        assert_eq!(detect(&buf), Some(MediaKind::Jpeg));
    }

    #[test]
    fn riff_wave_disambiguates_to_wav() {
        let mut buf = b"RIFF".to_vec();
        buf.extend_from_slice(&[0u8; 4]); // size field, unchecked by detector
        buf.extend_from_slice(b"WAVE");
        buf.resize(256, 0);
        assert_eq!(detect(&buf), Some(MediaKind::Wav));
    }

    #[test]
    fn riff_webp_disambiguates_to_webp() {
        let mut buf = b"RIFF".to_vec();
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(b"WEBP");
        buf.resize(256, 0);
        assert_eq!(detect(&buf), Some(MediaKind::Webp));
    }

    #[test]
    fn riff_unknown_subtype_falls_back() {
        let mut buf = b"RIFF".to_vec();
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(b"XXXX");
        buf.resize(256, 0);
        assert_eq!(detect(&buf), Some(MediaKind::RiffUnknown));
    }

    #[test]
    fn mpeg_ts_requires_second_sync_at_188() {
        let mut buf = vec![0u8; 256];
        buf[0] = 0x47;
        buf[188] = 0x47;
        assert_eq!(detect(&buf), Some(MediaKind::MpegTs));
    }

    #[test]
    fn mpeg_ts_rejected_without_second_sync() {
        let mut buf = vec![0u8; 256];
        buf[0] = 0x47;
        buf[188] = 0x00;
        assert_eq!(detect(&buf), None);
    }

    #[test]
    fn adts_aac_takes_precedence_over_mp3_for_non_table_bytes() {
        // FF F1: not one of the exact MP3 table entries (FB/F3/F2/FE),
        // layer bits clear -> ADTS AAC per spec property/test #6.
        let buf = padded(&[0xFF, 0xF1]);
        assert_eq!(detect(&buf), Some(MediaKind::Aac));
    }

    #[test]
    fn exact_mp3_sync_wins_over_aac_fallback() {
        let buf = padded(&[0xFF, 0xFB]);
        assert_eq!(detect(&buf), Some(MediaKind::Mp3));
    }

    #[test]
    fn ftyp_mp4_default_brand() {
        let mut buf = vec![0u8; 32];
        buf[0..4].copy_from_slice(&20u32.to_be_bytes());
        buf[4..8].copy_from_slice(b"ftyp");
        buf[8..12].copy_from_slice(b"isom");
        assert_eq!(detect(&buf), Some(MediaKind::Mp4Complete));
    }

    #[test]
    fn ftyp_heic_brand() {
        let mut buf = vec![0u8; 32];
        buf[0..4].copy_from_slice(&24u32.to_be_bytes());
        buf[4..8].copy_from_slice(b"ftyp");
        buf[8..12].copy_from_slice(b"heic");
        assert_eq!(detect(&buf), Some(MediaKind::Heic));
    }

    #[test]
    fn bare_mdat_is_fragment_marker() {
        let mut buf = vec![0u8; 32];
        buf[0..4].copy_from_slice(&5_000_000u32.to_be_bytes());
        buf[4..8].copy_from_slice(b"mdat");
        assert_eq!(detect(&buf), Some(MediaKind::Mp4Fragment));
    }

    #[test]
    fn webm_cluster_continuation() {
        let buf = padded(&[0x1F, 0x43, 0xB6, 0x75]);
        assert_eq!(detect(&buf), Some(MediaKind::WebmContinuation));
    }

    #[test]
    fn detection_depends_only_on_prefix() {
        let mut a = padded(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]);
        let mut b = a.clone();
        a.extend_from_slice(b"tail-one");
        b.extend_from_slice(b"a-totally-different-tail");
        assert_eq!(detect(&a), detect(&b));
    }

    #[test]
    fn mime_table_round_trips_extension() {
        let kind = detect_by_mime("audio/mp4").unwrap();
        assert_eq!(kind, MediaKind::M4a);
        assert_eq!(kind.default_extension(), "m4a");
    }

    #[test]
    fn mime_with_charset_suffix_is_stripped() {
        assert_eq!(detect_by_mime("video/mp4; charset=binary"), Some(MediaKind::Mp4Complete));
    }

    #[test]
    fn unknown_buffer_returns_none() {
        let buf = vec![0u8; 256];
        assert_eq!(detect(&buf), None);
    }
}
