//! EGWTTP: the HTTP-like wire format of the short-packet provisioning
//! transport.
//!
//! Requests arrive as one characteristic write:
//!
//! ```text
//! METHOD PATH EGWTTP/1.1\r\n
//! [Offset: N\r\n]
//! \r\n
//! <body>
//! ```
//!
//! Responses go out on the response characteristic, truncated to the MTU;
//! a caller fetches the tail of a long body by retrying the request with an
//! `Offset` header:
//!
//! ```text
//! EGWTP/1.1 200 OK\r\n
//! Location: <path>\r\n
//! Method: <verb>\r\n
//! Content-Type: text/json\r\n
//! Content-Length: <n>\r\n
//! [Offset: <k>\r\n]
//! \r\n
//! <body from offset>
//! ```

use crate::Verb;

/// Maximum bytes in one frame on the wireless transport.
pub const MAX_PACKET_SIZE: usize = 512;

const REQUEST_SUFFIX: &str = " EGWTTP/1.1";
const RESPONSE_PROTO: &str = "EGWTP/1.1";

/// Why a request write failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("missing header terminator")]
    NoHeaderEnd,
    #[error("request line is not EGWTTP/1.1")]
    BadRequestLine,
}

/// A parsed provisioning request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EgwttpRequest {
    pub method: Verb,
    pub path: String,
    pub body: String,
    pub offset: usize,
}

/// Parse one raw characteristic write into a request.
pub fn parse_request(raw: &str) -> Result<EgwttpRequest, ParseError> {
    let header_end = raw.find("\r\n\r\n").ok_or(ParseError::NoHeaderEnd)?;
    let header = &raw[..header_end];
    let body = &raw[header_end + 4..];

    let first_line = header.lines().next().unwrap_or("");
    let stripped = first_line
        .strip_suffix(REQUEST_SUFFIX)
        .ok_or(ParseError::BadRequestLine)?;
    let (method, path) = stripped
        .split_once(' ')
        .ok_or(ParseError::BadRequestLine)?;

    let mut offset = 0;
    for line in header.lines().skip(1) {
        if let Some(value) = line.strip_prefix("Offset: ") {
            offset = value.trim().parse().unwrap_or(0);
        }
    }

    Ok(EgwttpRequest {
        method: Verb::parse(method),
        path: path.trim().to_owned(),
        body: body.to_owned(),
        offset,
    })
}

/// Render one response frame for `data`, starting at `offset`, fitted to
/// `mtu` bytes. `Content-Length` always carries the full body length so the
/// caller knows how much remains to fetch.
///
/// The body chunk is trimmed to the space left after the header, on a UTF-8
/// character boundary, so a frame never splits a codepoint and the caller's
/// next `Offset` always lands on a boundary of the full body.
pub fn build_response(
    status: u16,
    reason: &str,
    location: &str,
    method: Verb,
    data: &str,
    offset: usize,
    mtu: usize,
) -> String {
    let mtu = mtu.min(MAX_PACKET_SIZE);

    let mut response = format!(
        "{RESPONSE_PROTO} {status} {reason}\r\nLocation: {location}\r\nMethod: {}\r\nContent-Type: text/json\r\nContent-Length: {}\r\n",
        method.as_str(),
        data.len(),
    );
    if offset > 0 {
        response.push_str(&format!("Offset: {offset}\r\n"));
    }
    response.push_str("\r\n");

    let body = data.get(offset.min(data.len())..).unwrap_or("");
    let mut chunk_len = body.len().min(mtu.saturating_sub(response.len()));
    while !body.is_char_boundary(chunk_len) {
        chunk_len -= 1;
    }
    response.push_str(&body[..chunk_len]);

    // A header alone can exceed a tiny negotiated MTU; headers are ASCII,
    // but floor to a character boundary regardless.
    let mut cut = response.len().min(mtu);
    while !response.is_char_boundary(cut) {
        cut -= 1;
    }
    response.truncate(cut);
    response
}
