//! Classification of captured responses into DevTools-style resource kinds.
//!
//! The inference looks at the response content type first, then falls back
//! to the URL path extension. Request headers carrying a WebSocket upgrade or
//! the `X-Requested-With: XMLHttpRequest` marker take precedence over both.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

/// Resource kinds as shown by a browser network panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Document,
    Stylesheet,
    Image,
    Script,
    #[serde(rename = "XHR")]
    Xhr,
    Font,
    Media,
    WebSocket,
    Other,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Document => "Document",
            ResourceType::Stylesheet => "Stylesheet",
            ResourceType::Image => "Image",
            ResourceType::Script => "Script",
            ResourceType::Xhr => "XHR",
            ResourceType::Font => "Font",
            ResourceType::Media => "Media",
            ResourceType::WebSocket => "WebSocket",
            ResourceType::Other => "Other",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    /// Case-insensitive; unknown names are an error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = [
            ResourceType::Document,
            ResourceType::Stylesheet,
            ResourceType::Image,
            ResourceType::Script,
            ResourceType::Xhr,
            ResourceType::Font,
            ResourceType::Media,
            ResourceType::WebSocket,
            ResourceType::Other,
        ];
        all.into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown resource type: {}", s))
    }
}

const DOCUMENT_EXTENSIONS: &[&str] = &[".html", ".htm", ".asp", ".php", ".jsp"];
const IMAGE_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".svg", ".webp", ".ico", ".bmp",
];
const MEDIA_EXTENSIONS: &[&str] = &[
    ".mp4", ".mp3", ".webm", ".ogg", ".wav", ".m4a", ".avi", ".mov",
];
const FONT_EXTENSIONS: &[&str] = &[".woff", ".woff2", ".ttf", ".otf", ".eot"];
const SCRIPT_EXTENSIONS: &[&str] = &[".js", ".mjs", ".jsx", ".ts", ".tsx"];
const API_MIME_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "text/xml",
    "text/json",
];

/// Infer the resource kind of one transaction.
///
/// `headers` is searched case-insensitively, so both request and response
/// header maps can be passed as captured.
pub fn infer_resource_type(
    content_type: &str,
    url: &str,
    headers: &HashMap<String, String>,
) -> ResourceType {
    let mime = clean_mime_type(content_type).to_lowercase();
    let ext = url_extension(url);
    let ext = ext.as_deref().unwrap_or("");

    if header_equals(headers, "upgrade", "websocket") {
        return ResourceType::WebSocket;
    }
    if header_equals(headers, "x-requested-with", "xmlhttprequest") {
        return ResourceType::Xhr;
    }

    if mime.contains("text/html") || DOCUMENT_EXTENSIONS.contains(&ext) {
        return ResourceType::Document;
    }
    if mime.contains("text/css") || ext == ".css" {
        return ResourceType::Stylesheet;
    }
    if mime.starts_with("image/") || IMAGE_EXTENSIONS.contains(&ext) {
        return ResourceType::Image;
    }
    if mime.starts_with("audio/") || mime.starts_with("video/") || MEDIA_EXTENSIONS.contains(&ext)
    {
        return ResourceType::Media;
    }
    if mime.contains("font") || FONT_EXTENSIONS.contains(&ext) {
        return ResourceType::Font;
    }
    if mime.contains("javascript") || mime.contains("ecmascript") || SCRIPT_EXTENSIONS.contains(&ext)
    {
        return ResourceType::Script;
    }
    if API_MIME_TYPES.contains(&mime.as_str()) || ext == ".json" || ext == ".xml" {
        return ResourceType::Xhr;
    }
    if mime.starts_with("application/") && !mime.contains("octet-stream") {
        return ResourceType::Xhr;
    }

    ResourceType::Other
}

/// Strip parameters such as `charset=` from a content type.
pub fn clean_mime_type(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or("").trim()
}

/// Case-insensitive lookup of a header value.
pub fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn header_equals(headers: &HashMap<String, String>, name: &str, expected: &str) -> bool {
    header_value(headers, name)
        .map(|v| v.trim().eq_ignore_ascii_case(expected))
        .unwrap_or(false)
}

/// Lowercased extension of the URL path including the leading dot.
///
/// Anything longer than six characters is not treated as an extension.
fn url_extension(url: &str) -> Option<String> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        // Relative references like "/logo.png?x=1" carry no scheme.
        Err(_) => url.split(['?', '#']).next().unwrap_or("").to_string(),
    };
    let (_, ext) = path.rsplit_once('.')?;
    let ext = format!(".{}", ext.to_lowercase());
    if ext.chars().count() <= 6 {
        Some(ext)
    } else {
        None
    }
}
