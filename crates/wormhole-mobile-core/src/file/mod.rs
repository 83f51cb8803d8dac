//! File helpers for received and sent files.
//!
//! This module handles:
//! - Human-readable byte counts for status lines
//! - Sanitizing names declared by the sender
//! - Content-type sniffing of completed files

use std::path::{Component, Path, PathBuf};

/// Number of leading bytes inspected when sniffing a content type.
pub const SNIFF_LEN: usize = 512;

/// Content type reported for received directories.
pub const ZIP_CONTENT_TYPE: &str = "application/zip";

/// Fallback content type.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Content type reported for plain text.
pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Name used when the sender declares nothing usable.
pub const FALLBACK_NAME: &str = "received";

/// Magic-number signatures, checked in order.
const SIGNATURES: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"PK\x03\x04", ZIP_CONTENT_TYPE),
    (b"\x1f\x8b\x08", "application/x-gzip"),
    (b"OggS\x00", "application/ogg"),
    (b"ID3", "audio/mpeg"),
    (b"\x1aE\xdf\xa3", "video/webm"),
    (b"BM", "image/bmp"),
    (b"\x00\x00\x01\x00", "image/x-icon"),
    (b"\xef\xbb\xbf", TEXT_PLAIN),
];

/// Format a byte count with SI (1000-based) units.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1000;
    const PREFIXES: [char; 6] = ['k', 'M', 'G', 'T', 'P', 'E'];

    if bytes < UNIT {
        return format!("{bytes} B");
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    format!("{:.1} {}B", bytes as f64 / div as f64, PREFIXES[exp])
}

/// Reduce a sender-declared name to a single safe file name.
///
/// Directory components are stripped, so the result can always be joined
/// onto the data directory without escaping it.
#[must_use]
pub fn sanitize_file_name(declared: &str) -> String {
    let unified = declared.replace('\\', "/");
    let name = Path::new(&unified)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .next_back()
        .unwrap_or_default();

    let cleaned: String = name.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Final path for a received file named `declared` inside `data_dir`.
#[must_use]
pub fn destination_path(data_dir: &Path, declared: &str) -> PathBuf {
    data_dir.join(sanitize_file_name(declared))
}

/// Sniff the content type of a file from its first bytes.
///
/// Known signatures win, then printable text, then the file extension.
#[must_use]
pub fn detect_content_type(header: &[u8], name: &str) -> String {
    let header = &header[..header.len().min(SNIFF_LEN)];

    if let Some(mime) = sniff_signature(header) {
        return mime.to_string();
    }

    if !header.is_empty() && looks_like_text(header) {
        return if looks_like_html(header) {
            "text/html; charset=utf-8".to_string()
        } else {
            TEXT_PLAIN.to_string()
        };
    }

    mime_guess::from_path(name)
        .first()
        .map_or_else(|| OCTET_STREAM.to_string(), |m| m.to_string())
}

fn sniff_signature(header: &[u8]) -> Option<&'static str> {
    if let Some(mime) = SIGNATURES
        .iter()
        .find(|(magic, _)| header.starts_with(magic))
        .map(|(_, mime)| *mime)
    {
        return Some(mime);
    }

    if header.len() >= 12 && &header[..4] == b"RIFF" {
        match &header[8..12] {
            b"WEBP" => return Some("image/webp"),
            b"WAVE" => return Some("audio/wave"),
            b"AVI " => return Some("video/avi"),
            _ => {}
        }
    }

    if header.len() >= 12 && &header[4..8] == b"ftyp" {
        return Some("video/mp4");
    }

    None
}

fn looks_like_text(header: &[u8]) -> bool {
    // The sniff window may cut a multi-byte character in half.
    let valid = match std::str::from_utf8(header) {
        Ok(text) => text,
        Err(e) if e.error_len().is_none() => {
            std::str::from_utf8(&header[..e.valid_up_to()]).unwrap_or_default()
        }
        Err(_) => return false,
    };

    valid
        .chars()
        .all(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t' | '\x0c'))
}

fn looks_like_html(header: &[u8]) -> bool {
    let start = header
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(header.len());
    let prefix: Vec<u8> = header[start..]
        .iter()
        .take(14)
        .map(u8::to_ascii_lowercase)
        .collect();

    prefix.starts_with(b"<!doctype html") || prefix.starts_with(b"<html")
}
