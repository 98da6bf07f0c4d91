//! Body codec: decide whether a payload is shown as text or as base64.

use std::borrow::Cow;

use base64::Engine;
use encoding_rs::Encoding;

use super::resource_type::clean_mime_type;

const BINARY_MIME_PREFIXES: &[&str] = &[
    "image/",
    "audio/",
    "video/",
    "application/octet-stream",
    "application/zip",
    "application/gzip",
    "application/x-gzip",
    "application/x-tar",
    "application/pdf",
    "application/x-protobuf",
    "application/protobuf",
    "application/grpc",
];

/// Bytes inspected by the content sniffing heuristic.
const SNIFF_LEN: usize = 8192;

/// Returns true when `data` should be treated as binary.
///
/// A known binary content type is trusted. Anything else, including types
/// that claim to be text, is sniffed: a NUL byte or more than 10% control
/// characters (other than tab, LF, CR) in the first 8 KiB marks it binary.
/// Bytes above 0x7e are not counted since they may be UTF-8 sequences.
pub fn is_binary_content(data: &[u8], content_type: &str) -> bool {
    if data.is_empty() {
        return false;
    }

    let mime = clean_mime_type(content_type).to_lowercase();
    if BINARY_MIME_PREFIXES.iter().any(|p| mime.starts_with(p)) {
        return true;
    }

    contains_binary_markers(data)
}

fn contains_binary_markers(data: &[u8]) -> bool {
    let sample = &data[..data.len().min(SNIFF_LEN)];

    if sample.contains(&0) {
        return true;
    }

    let non_printable = sample
        .iter()
        .filter(|&&b| b < 32 && !matches!(b, b'\t' | b'\n' | b'\r'))
        .count();

    non_printable * 10 > sample.len()
}

/// Encode a body for display.
///
/// Returns the text and whether it is base64. Text decoding tries UTF-8,
/// then the `charset=` named in the content type, then Latin-1.
pub fn encode_body(data: &[u8], content_type: &str) -> (String, bool) {
    if data.is_empty() {
        return (String::new(), false);
    }

    if is_binary_content(data, content_type) {
        return (base64_encode(data), true);
    }

    if let Ok(text) = std::str::from_utf8(data) {
        return (text.to_string(), false);
    }

    if let Some(text) = extract_charset(content_type).and_then(|c| decode_with_charset(data, &c)) {
        return (text, false);
    }

    // Latin-1 maps every byte to a code point, so this cannot fail.
    (decode_latin1(data), false)
}

pub fn base64_encode(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Decode bytes as ISO-8859-1: each byte becomes the code point of equal value.
pub fn decode_latin1(data: &[u8]) -> String {
    data.iter().map(|&b| b as char).collect()
}

/// UTF-8 when valid, otherwise Latin-1.
pub fn decode_utf8_or_latin1(data: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(data) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => Cow::Owned(decode_latin1(data)),
    }
}

fn decode_with_charset(data: &[u8], charset: &str) -> Option<String> {
    let encoding = Encoding::for_label(charset.as_bytes())?;
    encoding
        .decode_without_bom_handling_and_without_replacement(data)
        .map(Cow::into_owned)
}

/// Charset parameter of a content type, lowercased and unquoted.
pub fn extract_charset(content_type: &str) -> Option<String> {
    let lower = content_type.to_lowercase();
    lower
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("charset="))
        .map(|c| c.trim().trim_matches(|ch| ch == '"' || ch == '\'').to_string())
        .filter(|c| !c.is_empty())
}
