use crate::prelude::*;
use base64::{engine::general_purpose, Engine as _};
use url::Url;

/// Components of a parsed URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    pub scheme: String,
    pub host: String,
    pub port: u16, // the scheme's default when none is given, 0 if it has none
    pub path: String,
    pub query: Option<String>,
    pub fragment: Option<String>,
}

/// Parses `url`, assuming `http` when no scheme is given
pub fn url_parse(url: &str) -> Result<ParsedUrl> {
    if url.is_empty() {
        return Err(NetError::invalid("empty URL"));
    }
    let full = match url.contains("://") {
        true => url.to_string(),
        false => format!("http://{url}"),
    };
    let parsed = Url::parse(&full).map_err(|e| NetError::invalid(format!("malformed URL {url:?}: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| NetError::invalid(format!("URL {url:?} has no host")))?;
    let path = match parsed.path() {
        "" => "/".to_string(),
        p => p.to_string(),
    };
    Ok(ParsedUrl {
        scheme: parsed.scheme().to_string(),
        host: host.to_string(),
        port: parsed.port_or_known_default().unwrap_or(0),
        path,
        query: parsed.query().map(str::to_string),
        fragment: parsed.fragment().map(str::to_string),
    })
}

const MIME_TYPES: [(&str, &str); 10] = [
    ("html", "text/html"),
    ("css", "text/css"),
    ("js", "application/javascript"),
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("txt", "text/plain"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("gif", "image/gif"),
    ("pdf", "application/pdf"),
];

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// MIME type for a file name, by extension
pub fn mime_type(filename: &str) -> &'static str {
    let Some((_, ext)) = filename.rsplit_once('.') else {
        return DEFAULT_MIME_TYPE;
    };
    let ext = match ext {
        "htm" => "html",
        "jpeg" => "jpg",
        other => other,
    };
    MIME_TYPES
        .iter()
        .find(|(e, _)| *e == ext)
        .map_or(DEFAULT_MIME_TYPE, |(_, mime)| *mime)
}

pub fn mime_extension(mime: &str) -> Option<&'static str> {
    MIME_TYPES.iter().find(|(_, m)| *m == mime).map(|(ext, _)| *ext)
}

pub fn base64_encode(data: &[u8]) -> String {
    general_purpose::STANDARD.encode(data)
}

pub fn base64_decode(encoded: &str) -> Result<Vec<u8>> {
    general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| NetError::invalid(format!("malformed base64: {e}")))
}

/// Percent-encodes everything except ASCII alphanumerics and `-_.~`
pub fn url_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Decodes `%XX` escapes; a `%` not followed by two hex digits is kept as is
pub fn url_decode(s: &str) -> Result<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).map_err(|_| NetError::invalid("percent-decoded text is not UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_with_and_without_scheme() {
        let u = url_parse("https://example.org:8443/a/b?x=1#top").unwrap();
        assert_eq!((u.scheme.as_str(), u.host.as_str(), u.port), ("https", "example.org", 8443));
        assert_eq!(u.path, "/a/b");
        assert_eq!(u.query.as_deref(), Some("x=1"));
        assert_eq!(u.fragment.as_deref(), Some("top"));

        let u = url_parse("example.org").unwrap();
        assert_eq!((u.scheme.as_str(), u.port, u.path.as_str()), ("http", 80, "/"));
        assert!(u.query.is_none());
        assert!(url_parse("").is_err());
    }

    #[test]
    fn mime_lookups() {
        assert_eq!(mime_type("index.htm"), "text/html");
        assert_eq!(mime_type("photo.jpeg"), "image/jpeg");
        assert_eq!(mime_type("archive.tar.gz"), DEFAULT_MIME_TYPE);
        assert_eq!(mime_type("README"), DEFAULT_MIME_TYPE);
        assert_eq!(mime_extension("application/json"), Some("json"));
        assert_eq!(mime_extension("video/mp4"), None);
    }

    #[test]
    fn base64_known_vectors() {
        assert_eq!(base64_encode(b"foobar"), "Zm9vYmFy");
        assert_eq!(base64_encode(b"fo"), "Zm8=");
        assert_eq!(base64_decode("Zm8=").unwrap(), b"fo");
        assert!(base64_decode("!!!").is_err());
    }

    #[test]
    fn percent_encoding() {
        assert_eq!(url_encode("a b/c~d"), "a%20b%2Fc~d");
        assert_eq!(url_decode("a%20b%2Fc~d").unwrap(), "a b/c~d");
        assert_eq!(url_decode("100%").unwrap(), "100%");
        assert_eq!(url_decode("%zz").unwrap(), "%zz");
    }
}
