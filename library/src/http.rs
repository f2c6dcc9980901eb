use crate::prelude::*;
use crate::socket_manager::{ByteStream, SocketId};
use crate::utils::*;
use std::str::FromStr;

pub const HTTP_VERSION: &str = "HTTP/1.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Trace,
}

impl FromStr for HttpMethod {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "GET" => HttpMethod::Get,
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            "DELETE" => HttpMethod::Delete,
            "HEAD" => HttpMethod::Head,
            "OPTIONS" => HttpMethod::Options,
            "PATCH" => HttpMethod::Patch,
            "TRACE" => HttpMethod::Trace,
            other => return Err(NetError::invalid(format!("unknown HTTP method {other:?}"))),
        })
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Trace => "TRACE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpHeader {
    pub name: String,
    pub value: String,
}

fn find_header<'a>(headers: &'a [HttpHeader], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub uri: String,
    pub version: String,
    pub headers: Vec<HttpHeader>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
    pub fn method_kind(&self) -> Option<HttpMethod> {
        self.method.parse().ok()
    }
}

/// Parses the request line, the headers up to the first blank line, and whatever body follows
pub fn parse_request(data: &[u8]) -> Result<HttpRequest> {
    if data.is_empty() {
        return Err(NetError::invalid("empty HTTP request"));
    }
    let (head, body) = match data.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(end) => (&data[..end], &data[end + 4..]),
        None => (data, &data[data.len()..]),
    };
    let head = std::str::from_utf8(head).map_err(|_| NetError::violation("HTTP head is not UTF-8"))?;
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split(' ').filter(|p| !p.is_empty());
    let (Some(method), Some(uri), Some(version)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(NetError::violation(format!("malformed request line {request_line:?}")));
    };

    let headers: Vec<HttpHeader> = lines
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| HttpHeader { name: name.to_string(), value: value.trim_start_matches(' ').to_string() })
        .collect();

    let mut body = body.to_vec();
    if let Some(len) = find_header(&headers, "Content-Length").and_then(|v| v.trim().parse::<usize>().ok()) {
        body.truncate(len);
    }
    debug!("http request parsed: {method} {uri} {version}");
    Ok(HttpRequest {
        method: method.to_string(),
        uri: uri.to_string(),
        version: version.to_string(),
        headers,
        body,
    })
}

pub fn status_text(status_code: u16) -> &'static str {
    match status_code {
        200 => "OK",
        201 => "Created",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub version: String,
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<HttpHeader>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push(HttpHeader { name: name.to_string(), value: value.to_string() });
    }
    /// Status line, headers, blank line, body
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = format!("{} {} {}\r\n", self.version, self.status_code, self.status_text);
        for header in &self.headers {
            out.push_str(&format!("{}: {}\r\n", header.name, header.value));
        }
        out.push_str("\r\n");
        let mut out = out.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

/// HTTP/1.1 response with a Content-Length header for `body`
pub fn create_response(status_code: u16, body: &[u8]) -> HttpResponse {
    let mut response = HttpResponse {
        version: HTTP_VERSION.to_string(),
        status_code,
        status_text: status_text(status_code).to_string(),
        headers: Vec::new(),
        body: body.to_vec(),
    };
    response.add_header("Content-Length", &body.len().to_string());
    debug!("http response created: {} {}", status_code, response.status_text);
    response
}

/// Writes the serialized response through the stream's send primitive
pub fn send_response<S: ByteStream + ?Sized>(stream: &S, conn: SocketId, response: &HttpResponse) -> Result<usize> {
    let bytes = response.serialize();
    let sent = stream.send(conn, &bytes)?;
    debug!("http response sent: {sent} bytes");
    Ok(sent)
}

/// Registry of HTTP servers bound on this node
#[derive(Debug, Default)]
pub struct HttpLayer {
    init: InitFlag,
    servers: Mutex<Vec<SocketAddrV4>>,
}

impl HttpLayer {
    pub fn new() -> HttpLayer {
        HttpLayer::default()
    }
    pub fn init(&self) -> Result<()> {
        self.init.raise("http")?;
        self.servers.lock().clear();
        info!("http stack initialized");
        Ok(())
    }
    pub fn shutdown(&self) -> Result<()> {
        self.init.lower("http")?;
        self.servers.lock().clear();
        Ok(())
    }
    pub fn start_server(&self, bind: SocketAddrV4) -> Result<()> {
        self.init.check("http")?;
        let mut servers = self.servers.lock();
        if servers.contains(&bind) {
            return Err(NetError::invalid(format!("http server already running on {bind}")));
        }
        servers.push(bind);
        info!("http server started: {bind}");
        Ok(())
    }
    pub fn stop_server(&self, bind: SocketAddrV4) -> Result<()> {
        self.init.check("http")?;
        let mut servers = self.servers.lock();
        match servers.iter().position(|s| *s == bind) {
            Some(i) => {
                servers.remove(i);
                info!("http server stopped: {bind}");
                Ok(())
            }
            None => Err(NetError::not_found(format!("http server on {bind}"))),
        }
    }
    pub fn servers(&self) -> Vec<SocketAddrV4> {
        self.servers.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Capture(RefCell<Vec<u8>>);

    impl ByteStream for Capture {
        fn send(&self, _conn: SocketId, data: &[u8]) -> Result<usize> {
            self.0.borrow_mut().extend_from_slice(data);
            Ok(data.len())
        }
        fn recv(&self, _conn: SocketId, _buf: &mut [u8]) -> Result<usize> {
            Ok(0)
        }
    }

    #[test]
    fn parses_request_line_headers_and_body() {
        let raw = b"POST /api/items HTTP/1.1\r\nHost: example.org\r\ncontent-length: 5\r\nX-Empty:\r\n\r\nhello-extra";
        let req = parse_request(raw).unwrap();
        assert_eq!((req.method.as_str(), req.uri.as_str(), req.version.as_str()), ("POST", "/api/items", "HTTP/1.1"));
        assert_eq!(req.method_kind(), Some(HttpMethod::Post));
        assert_eq!(req.header("HOST"), Some("example.org"));
        assert_eq!(req.header("x-empty"), Some(""));
        assert_eq!(req.body, b"hello");
    }

    #[test]
    fn rejects_incomplete_request_lines() {
        assert!(parse_request(b"GET /\r\n\r\n").is_err());
        assert!(matches!(parse_request(b""), Err(NetError::InvalidArgument(_))));
    }

    #[test]
    fn not_found_response_has_zero_length() {
        let resp = create_response(404, b"");
        assert_eq!(resp.status_text, "Not Found");
        assert_eq!(resp.header("Content-Length"), Some("0"));
        assert_eq!(create_response(201, b"").status_text, "Created");
        assert_eq!(create_response(418, b"").status_text, "Unknown");
    }

    #[test]
    fn send_response_serializes_through_the_stream() {
        let cap = Capture(RefCell::new(Vec::new()));
        let resp = create_response(200, b"hi");
        assert_eq!(send_response(&cap, 7, &resp).unwrap(), 40);
        assert_eq!(cap.0.borrow().as_slice(), b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi");
    }

    #[test]
    fn server_registry() {
        let http = HttpLayer::new();
        let bind: SocketAddrV4 = "10.0.0.1:80".parse().unwrap();
        assert!(matches!(http.start_server(bind), Err(NetError::NotInitialized("http"))));
        http.init().unwrap();
        http.start_server(bind).unwrap();
        assert!(http.start_server(bind).is_err());
        http.stop_server(bind).unwrap();
        assert!(matches!(http.stop_server(bind), Err(NetError::NotFound(_))));
    }
}
