//! HTTP/1.x request-head parsing and response formatting.
//!
//! The parser is incremental: it is re-invoked on a connection's
//! accumulated bytes after every recv until the head is complete or
//! malformed. All slices in a parsed [`Request`] borrow the input and are
//! valid only until the reassembly buffer is reset.

use thiserror::Error;

/// Maximum number of request headers.
pub const MAX_HEADERS: usize = 32;
/// Maximum request-URI length in bytes.
pub const MAX_URI_LEN: usize = 8192;

// Longest method token is OPTIONS / CONNECT.
const MAX_METHOD_LEN: usize = 7;

/// 400 response for malformed request heads.
pub const BAD_REQUEST: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Trace,
    Connect,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
        }
    }

    fn from_token(token: &str) -> Result<Method, ParseError> {
        if token.len() > MAX_METHOD_LEN {
            return Err(ParseError::MethodTooLong);
        }
        match token {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "PATCH" => Ok(Method::Patch),
            "HEAD" => Ok(Method::Head),
            "OPTIONS" => Ok(Method::Options),
            "TRACE" => Ok(Method::Trace),
            "CONNECT" => Ok(Method::Connect),
            _ => Err(ParseError::InvalidRequest),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn as_str(self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

/// A parsed request head. Borrows the reassembly buffer.
#[derive(Debug)]
pub struct Request<'a> {
    pub method: Method,
    pub uri: &'a str,
    pub version: Version,
    pub headers: Vec<Header<'a>>,
    /// Always empty: the loop responds without awaiting a body.
    pub body: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed request")]
    InvalidRequest,
    #[error("unsupported HTTP version")]
    UnsupportedVersion,
    #[error("more than {MAX_HEADERS} headers")]
    TooManyHeaders,
    #[error("invalid Content-Length value")]
    BadContentLength,
    #[error("request URI too long")]
    UriTooLong,
    #[error("method token too long")]
    MethodTooLong,
}

#[derive(Debug)]
pub enum ParseOutcome<'a> {
    /// No `\r\n\r\n` yet; wait for more bytes.
    Incomplete,
    Complete(Request<'a>),
}

/// Offset just past the first `\r\n\r\n`, or `None` if absent.
pub fn find_head_end(input: &[u8]) -> Option<usize> {
    input.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Parse the accumulated bytes of a connection.
pub fn parse(input: &[u8]) -> Result<ParseOutcome<'_>, ParseError> {
    let Some(head_end) = find_head_end(input) else {
        return Ok(ParseOutcome::Incomplete);
    };
    let head =
        std::str::from_utf8(&input[..head_end - 4]).map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut tokens = request_line.split(' ');
    let method_token = tokens.next().ok_or(ParseError::InvalidRequest)?;
    let uri = tokens.next().ok_or(ParseError::InvalidRequest)?;
    let version_token = tokens.next().ok_or(ParseError::InvalidRequest)?;
    if tokens.next().is_some() {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::from_token(method_token)?;
    if uri.is_empty() {
        return Err(ParseError::InvalidRequest);
    }
    if uri.len() > MAX_URI_LEN {
        return Err(ParseError::UriTooLong);
    }
    let version = match version_token {
        "HTTP/1.1" => Version::Http11,
        "HTTP/1.0" => Version::Http10,
        _ => return Err(ParseError::UnsupportedVersion),
    };

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if headers.len() == MAX_HEADERS {
            return Err(ParseError::TooManyHeaders);
        }
        let (name, value) = line.split_once(':').ok_or(ParseError::InvalidRequest)?;
        let value = value.trim_start_matches(' ');
        if name.eq_ignore_ascii_case("content-length") && value.parse::<u64>().is_err() {
            return Err(ParseError::BadContentLength);
        }
        headers.push(Header { name, value });
    }

    Ok(ParseOutcome::Complete(Request {
        method,
        uri,
        version,
        headers,
        body: &[],
    }))
}

/// Format the 200 response: a JSON echo of the parsed head plus the raw
/// request bytes.
pub fn format_ok_json(req: &Request<'_>, raw: &[u8]) -> Vec<u8> {
    let headers: Vec<serde_json::Value> = req
        .headers
        .iter()
        .map(|h| serde_json::json!({ "name": h.name, "value": h.value }))
        .collect();
    let body = serde_json::json!({
        "method": req.method.as_str(),
        "uri": req.uri,
        "version": req.version.as_str(),
        "headers": headers,
        "raw_request": String::from_utf8_lossy(raw),
    })
    .to_string();

    let mut out = Vec::with_capacity(body.len() + 96);
    out.extend_from_slice(b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: ");
    out.extend_from_slice(body.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\nConnection: close\r\n\r\n");
    out.extend_from_slice(body.as_bytes());
    out
}
