//! The CFW wire grammar: line-oriented, CRLF-terminated, case-insensitive
//! methods (§4.3, §6). Grounded on `CfwStack.cxx`'s `parseMessage`
//! (header/body framing, `Content-Length` handling) and `CfwStack.h`'s
//! `CfwMessage`.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Error, Result};

/// First-line method of a CFW request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Sync,
    Control,
    Report,
    KAlive,
}

impl Method {
    fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "SYNC" => Some(Method::Sync),
            "CONTROL" => Some(Method::Control),
            "REPORT" => Some(Method::Report),
            "K-ALIVE" => Some(Method::KAlive),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Method::Sync => "SYNC",
            Method::Control => "CONTROL",
            Method::Report => "REPORT",
            Method::KAlive => "K-ALIVE",
        }
    }
}

/// Whether a parsed first line is a request, a response, or a request
/// whose method this stack doesn't recognize.
#[derive(Debug, Clone)]
pub enum FrameKind {
    Request(Method),
    Response { code: u16, reason: String },
    /// First-line method token is neither a known [`Method`] nor a numeric
    /// status code. The tid still parsed, so the caller can respond `405`
    /// to this one transaction instead of closing the connection (§4.3).
    UnknownMethod(String),
}

/// Known response codes (§6). Not exhaustive of every conceivable 3-digit
/// value — these are the ones this stack ever emits or interprets.
pub mod status {
    pub const OK: u16 = 200;
    pub const ACCEPTED: u16 = 202;
    pub const BAD_REQUEST: u16 = 400;
    pub const FORBIDDEN: u16 = 403;
    pub const METHOD_NOT_ALLOWED: u16 = 405;
    pub const UNKNOWN_PACKAGE: u16 = 420;
    pub const MISSING_AUDIO_MIXING: u16 = 421;
    pub const UNSUPPORTED_SYNC: u16 = 422;
    pub const DUPLICATE_TID: u16 = 423;
    pub const UNAUTHORIZED: u16 = 481;
    pub const SERVER_ERROR: u16 = 500;
}

/// A single parsed (or about-to-be-serialized) CFW message.
#[derive(Debug, Clone)]
pub struct Frame {
    pub tid: String,
    pub kind: FrameKind,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl Frame {
    pub fn request(tid: impl Into<String>, method: Method) -> Self {
        Self {
            tid: tid.into(),
            kind: FrameKind::Request(method),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn response(tid: impl Into<String>, code: u16, reason: impl Into<String>) -> Self {
        Self {
            tid: tid.into(),
            kind: FrameKind::Response {
                code,
                reason: reason.into(),
            },
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, content_type: impl Into<String>, body: Bytes) -> Self {
        self.headers
            .push(("Content-Length".to_string(), body.len().to_string()));
        self.headers
            .push(("Content-Type".to_string(), content_type.into()));
        self.body = Some(body);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Serializes into the exact on-wire byte sequence, writing
    /// `Seq, Status, Timeout, Content-Type, Content-Length` first (in that
    /// order) when present, then any remaining headers, then the body.
    pub fn serialize(&self) -> Bytes {
        let mut out = String::new();
        match &self.kind {
            FrameKind::Request(method) => {
                out.push_str(&format!("CFW {} {}\r\n", self.tid, method.as_str()))
            }
            FrameKind::Response { code, reason } => {
                if reason.is_empty() {
                    out.push_str(&format!("CFW {} {}\r\n", self.tid, code))
                } else {
                    out.push_str(&format!("CFW {} {} {}\r\n", self.tid, code, reason))
                }
            }
        }

        const ORDERED: [&str; 5] = ["Seq", "Status", "Timeout", "Content-Type", "Content-Length"];
        for name in ORDERED {
            if let Some(value) = self.header(name) {
                out.push_str(&format!("{}: {}\r\n", name, value));
            }
        }
        for (name, value) in &self.headers {
            if ORDERED.iter().any(|h| h.eq_ignore_ascii_case(name)) {
                continue;
            }
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        out.push_str("\r\n");

        let mut bytes = BytesMut::from(out.as_bytes());
        if let Some(body) = &self.body {
            bytes.extend_from_slice(body);
        }
        bytes.freeze()
    }
}

/// Parses one complete `(header, body)` pair, as delivered by
/// [`FrameReader`], into a [`Frame`].
pub fn parse_frame(header: &str, body: Option<Bytes>) -> Result<Frame> {
    let mut lines = header.split("\r\n").filter(|l| !l.is_empty());
    let first_line = lines
        .next()
        .ok_or_else(|| Error::Malformed("empty frame".into()))?;

    let mut parts = first_line.splitn(3, ' ');
    let cfw = parts
        .next()
        .ok_or_else(|| Error::Malformed("missing CFW token".into()))?;
    if cfw != "CFW" {
        return Err(Error::Malformed(format!("expected CFW, got {:?}", cfw)));
    }
    let tid = parts
        .next()
        .ok_or_else(|| Error::Malformed("missing tid".into()))?
        .to_string();
    if tid.is_empty() || !tid.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::Malformed(format!("invalid tid {:?}", tid)));
    }
    let rest = parts.next().unwrap_or_default();

    let first_token = rest
        .split_whitespace()
        .next()
        .ok_or_else(|| Error::Malformed("missing method or status".into()))?;
    let single_token = rest.split_whitespace().count() == 1;

    let kind = if let Some(method) = Method::parse(first_token).filter(|_| single_token) {
        FrameKind::Request(method)
    } else if let Ok(code) = first_token.parse::<u16>() {
        let reason = rest.splitn(2, ' ').nth(1).unwrap_or_default().to_string();
        FrameKind::Response { code, reason }
    } else {
        // Neither a known method nor a numeric status: the tid was parsed
        // successfully, so this is scoped to one transaction (§4.3 "Unknown
        // method -> transaction 405"), not a connection-fatal parse error.
        FrameKind::UnknownMethod(first_token.to_string())
    };

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::Malformed(format!("malformed header line {:?}", line)))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(Frame {
        tid,
        kind,
        headers,
        body,
    })
}

/// Incremental reader over a growing byte buffer: accumulates bytes until
/// the header terminator `\r\n\r\n` appears, then (if `Content-Length` was
/// declared) waits for that many additional bytes before yielding a frame.
///
/// Mirrors the read loop in §4.2: "reads exact bytes into a growing
/// buffer until the header terminator appears; then... reads exactly N
/// additional bytes as body."
#[derive(Default)]
pub struct FrameReader {
    buf: BytesMut,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns the next complete frame, if the buffer currently holds one.
    /// Call repeatedly after each `feed` until it returns `None`.
    pub fn try_next(&mut self) -> Result<Option<Frame>> {
        let header_end = match find_header_terminator(&self.buf) {
            Some(pos) => pos,
            None => return Ok(None),
        };
        let header_text = std::str::from_utf8(&self.buf[..header_end])
            .map_err(|e| Error::Malformed(format!("non-utf8 header: {e}")))?
            .to_string();

        let content_length = find_content_length(&header_text)?;
        let body_start = header_end + 4;

        if let Some(len) = content_length {
            if self.buf.len() < body_start + len {
                return Ok(None);
            }
            let mut taken = self.buf.split_to(body_start + len);
            taken.advance(body_start);
            let body = taken.freeze();
            let frame = parse_frame(&header_text, Some(body))?;
            Ok(Some(frame))
        } else {
            self.buf.advance(body_start);
            let frame = parse_frame(&header_text, None)?;
            Ok(Some(frame))
        }
    }
}

fn find_header_terminator(buf: &BytesMut) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn find_content_length(header_text: &str) -> Result<Option<usize>> {
    for line in header_text.split("\r\n").skip(1) {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("Content-Length") {
                let len: usize = value
                    .trim()
                    .parse()
                    .map_err(|_| Error::Malformed(format!("bad Content-Length {:?}", value)))?;
                return Ok(Some(len));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_bodyless_sync_request() {
        let header = "CFW a1b2 SYNC\r\nDialog-ID: d9\r\nKeep-Alive: 30\r\nPackages: msc-ivr/1.0\r\n\r\n";
        let frame = parse_frame(header, None).unwrap();
        assert_eq!(frame.tid, "a1b2");
        assert!(matches!(frame.kind, FrameKind::Request(Method::Sync)));
        assert_eq!(frame.header("Dialog-ID"), Some("d9"));
    }

    #[test]
    fn parses_a_status_response_with_reason() {
        let header = "CFW a1b2 422 unsupported package\r\n\r\n";
        let frame = parse_frame(header, None).unwrap();
        match frame.kind {
            FrameKind::Response { code, reason } => {
                assert_eq!(code, 422);
                assert_eq!(reason, "unsupported package");
            }
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn unknown_method_parses_with_tid_intact_for_transaction_scoped_405() {
        let header = "CFW a1b2 BOGUS\r\n\r\n";
        let frame = parse_frame(header, None).unwrap();
        assert_eq!(frame.tid, "a1b2");
        assert!(matches!(frame.kind, FrameKind::UnknownMethod(ref m) if m == "BOGUS"));
    }

    #[test]
    fn serialize_orders_known_headers_before_custom_ones() {
        let frame = Frame::response("t1", 200, "")
            .with_header("X-Custom", "z")
            .with_header("Seq", "1")
            .with_header("Status", "update");
        let wire = frame.serialize();
        let text = std::str::from_utf8(&wire).unwrap();
        let seq_pos = text.find("Seq:").unwrap();
        let status_pos = text.find("Status:").unwrap();
        let custom_pos = text.find("X-Custom:").unwrap();
        assert!(seq_pos < status_pos);
        assert!(status_pos < custom_pos);
    }

    #[test]
    fn frame_reader_waits_for_declared_content_length() {
        let mut reader = FrameReader::new();
        reader.feed(b"CFW t1 CONTROL\r\nControl-Package: msc-ivr/1.0\r\nContent-Length: 5\r\n\r\n");
        assert!(reader.try_next().unwrap().is_none());
        reader.feed(b"hello");
        let frame = reader.try_next().unwrap().unwrap();
        assert_eq!(frame.body.unwrap(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn frame_reader_yields_bodyless_frame_immediately() {
        let mut reader = FrameReader::new();
        reader.feed(b"CFW t1 K-ALIVE\r\n\r\n");
        let frame = reader.try_next().unwrap().unwrap();
        assert!(frame.body.is_none());
        assert!(matches!(frame.kind, FrameKind::Request(Method::KAlive)));
    }
}
