//! Parsers and serializers for the protocol header grammars.

use crate::error::{Error, Result};
use crate::info::{FileInfo, MetaData};
use base64::{Engine as _, engine::general_purpose};

/// Parse the `Upload-Metadata` header as defined by the creation extension,
/// e.g. `name bHVucmpzLnBuZw==,type aW1hZ2UvcG5n`.
///
/// Malformed entries (more than two parts, empty key, undecodable base64)
/// are dropped without failing the whole header. An entry without a value
/// decodes to the empty string.
pub fn parse_metadata(header: &str) -> MetaData {
    let mut meta = MetaData::new();

    for element in header.split(',') {
        let element = element.trim();
        let mut parts = element.split(' ');

        let key = parts.next().unwrap_or("");
        if key.is_empty() {
            continue;
        }

        let value = parts.next();
        if parts.next().is_some() {
            // More than two space-separated parts.
            continue;
        }

        let decoded = match value {
            Some(raw) => match general_purpose::STANDARD.decode(raw) {
                Ok(bytes) => match String::from_utf8(bytes) {
                    Ok(s) => s,
                    Err(_) => continue,
                },
                Err(_) => continue,
            },
            None => String::new(),
        };

        meta.insert(key.to_string(), decoded);
    }

    meta
}

/// Serialize a metadata map into the `Upload-Metadata` header format used in
/// HEAD responses.
pub fn serialize_metadata(meta: &MetaData) -> String {
    let mut pairs: Vec<_> = meta.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    pairs
        .into_iter()
        .map(|(key, value)| format!("{key} {}", general_purpose::STANDARD.encode(value)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Outcome of parsing the `Upload-Concat` request header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConcatHeader {
    /// Header absent or empty: a regular upload.
    None,
    /// `Upload-Concat: partial`
    Partial,
    /// `Upload-Concat: final;<url>( <url>)*` with the extracted upload IDs.
    Final(Vec<String>),
}

/// Parse the `Upload-Concat` header, e.g. `partial` or
/// `final;http://example.com/files/a /files/b/`.
///
/// A `final;` value from which no upload ID can be extracted is an error;
/// no partial/final classification is reported in that case.
pub fn parse_concat(header: &str) -> Result<ConcatHeader> {
    if header.is_empty() {
        return Ok(ConcatHeader::None);
    }

    if header == "partial" {
        return Ok(ConcatHeader::Partial);
    }

    let Some(list) = header.strip_prefix("final;") else {
        return Err(Error::InvalidConcat(header.to_string()));
    };

    let mut ids = Vec::new();
    for value in list.split(' ') {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        ids.push(extract_id_from_path(value)?);
    }

    if ids.is_empty() {
        return Err(Error::InvalidConcat(header.to_string()));
    }

    Ok(ConcatHeader::Final(ids))
}

/// Pull the upload ID out of a URL or path: the last path segment, with an
/// optional trailing slash.
pub fn extract_id_from_path(path: &str) -> Result<String> {
    let trimmed = path.trim_end_matches('/');
    let id = trimmed.rsplit('/').next().unwrap_or("");
    if id.is_empty() {
        return Err(Error::InvalidUploadPath(path.to_string()));
    }
    Ok(id.to_string())
}

/// Host and protocol overrides extracted from a `Forwarded` header value,
/// e.g. `for=192.0.2.60;proto=https;host=upload.example.com`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Forwarded {
    pub host: Option<String>,
    pub proto: Option<String>,
}

/// Parse the `Forwarded` header (RFC 7239), extracting only the `host` and
/// `proto` directives. Unknown directives are ignored; `proto` is accepted
/// only as `http` or `https`.
pub fn parse_forwarded(header: &str) -> Forwarded {
    let mut fwd = Forwarded::default();

    // Only the first forwarded element (the closest proxy) is considered.
    let element = header.split(',').next().unwrap_or("");
    for pair in element.split(';') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        match key.trim().to_ascii_lowercase().as_str() {
            "host" if !value.is_empty() => fwd.host = Some(value.to_string()),
            "proto" if value == "http" || value == "https" => {
                fwd.proto = Some(value.to_string());
            }
            _ => {}
        }
    }

    fwd
}

/// Parse a MIME-style header value (`Content-Type`, `Content-Disposition`)
/// into its leading token and parameters. Parameter values may be quoted.
/// Returns `None` when the leading token is empty.
pub fn parse_media_type(value: &str) -> Option<(String, std::collections::HashMap<String, String>)> {
    let mut parts = value.split(';');
    let token = parts.next()?.trim().to_ascii_lowercase();
    if token.is_empty() {
        return None;
    }

    let mut params = std::collections::HashMap::new();
    for part in parts {
        let Some((key, raw)) = part.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let raw = raw.trim();
        let value = raw.strip_prefix('"').and_then(|v| v.strip_suffix('"')).unwrap_or(raw);
        if !key.is_empty() {
            params.insert(key, value.to_string());
        }
    }

    Some((token, params))
}

/// MIME types which may be rendered inline by browsers. Everything else is
/// forced to be downloaded, since e.g. HTML or SVG can carry scripts and PDF
/// parsers are a common exploit target.
const MIME_INLINE_WHITELIST: &[&str] = &[
    "text/plain",
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/bmp",
    "image/webp",
    "audio/wave",
    "audio/wav",
    "audio/x-wav",
    "audio/x-pn-wav",
    "audio/webm",
    "video/webm",
    "audio/ogg",
    "video/ogg",
    "application/ogg",
];

fn is_well_formed_mime(s: &str) -> bool {
    let Some((ty, subty)) = s.split_once('/') else {
        return false;
    };
    !ty.is_empty()
        && !subty.is_empty()
        && ty.chars().all(|c| c.is_ascii_lowercase())
        && subty
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "-+.".contains(c))
}

/// Compute the `Content-Type` and `Content-Disposition` values for serving
/// an upload's content, based on the `filetype` and `filename` metadata.
pub fn filter_content_type(info: &FileInfo) -> (String, String) {
    let filetype = info.metadata.get("filetype").map(String::as_str).unwrap_or("");

    let (content_type, mut disposition) = if is_well_formed_mime(filetype) {
        if MIME_INLINE_WHITELIST.contains(&filetype) {
            (filetype.to_string(), "inline".to_string())
        } else {
            (filetype.to_string(), "attachment".to_string())
        }
    } else {
        ("application/octet-stream".to_string(), "attachment".to_string())
    };

    if let Some(filename) = info.metadata.get("filename") {
        disposition.push_str(&format!(";filename={:?}", filename));
    }

    (content_type, disposition)
}
