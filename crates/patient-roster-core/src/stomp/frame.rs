//! STOMP 1.2 frame codec.
//!
//! A frame is `COMMAND EOL *(header EOL) EOL body NUL`. A bare EOL between
//! frames is a heart-beat. WebSocket messages may carry several frames, or a
//! frame split across messages, so decoding is incremental.

use std::fmt;
use std::str::FromStr;

use super::{StompError, StompResult};

/// Frame commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    // client
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    // server
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Connected => "CONNECTED",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    /// CONNECT and CONNECTED headers are not escaped, for 1.0 compatibility.
    fn escapes_headers(self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = StompError;

    fn from_str(s: &str) -> StompResult<Self> {
        Ok(match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "DISCONNECT" => Command::Disconnect,
            "CONNECTED" => Command::Connected,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => return Err(StompError::UnknownCommand(other.to_string())),
        })
    }
}

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Append a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header; repeated headers after the first are ignored.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> StompResult<&str> {
        std::str::from_utf8(&self.body).map_err(|_| StompError::InvalidUtf8)
    }

    /// Serialize, adding `content-length` when the body is non-empty.
    pub fn encode(&self) -> Vec<u8> {
        let escape = self.command.escapes_headers();
        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(self.command.as_str().as_bytes());
        out.push(b'\n');

        for (name, value) in &self.headers {
            if escape {
                out.extend_from_slice(escape_header(name).as_bytes());
                out.push(b':');
                out.extend_from_slice(escape_header(value).as_bytes());
            } else {
                out.extend_from_slice(name.as_bytes());
                out.push(b':');
                out.extend_from_slice(value.as_bytes());
            }
            out.push(b'\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.extend_from_slice(format!("content-length:{}\n", self.body.len()).as_bytes());
        }
        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(raw: &str) -> StompResult<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(StompError::BadEscape(format!(
                    "\\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

/// Anything read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Frame(Frame),
    HeartBeat,
}

/// Largest frame accepted by default (head and body).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Incremental decoder fed with WebSocket message payloads.
///
/// Frames larger than the limit, by declared `content-length` or by bytes
/// buffered without a terminator, fail with [`StompError::FrameTooLarge`].
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_frame_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame_size,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes received but not yet decoded.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Decode the next complete frame or heart-beat, if buffered.
    pub fn decode_next(&mut self) -> StompResult<Option<Incoming>> {
        match self.buf.first() {
            None => return Ok(None),
            Some(b'\n') => {
                self.buf.drain(..1);
                return Ok(Some(Incoming::HeartBeat));
            }
            Some(b'\r') if self.buf.get(1) == Some(&b'\n') => {
                self.buf.drain(..2);
                return Ok(Some(Incoming::HeartBeat));
            }
            Some(b'\r') if self.buf.len() == 1 => return Ok(None),
            _ => {}
        }

        let Some(head_end) = find_head_end(&self.buf) else {
            self.check_buffered()?;
            return Ok(None);
        };
        let (command, headers) = parse_head(&self.buf[..head_end.start])?;

        let body_start = head_end.end;
        let content_length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .map(|(_, v)| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| StompError::BadContentLength(v.clone()))
            })
            .transpose()?;

        let (body_end, frame_end) = match content_length {
            Some(len) => {
                let body_end = body_start
                    .checked_add(len)
                    .filter(|&end| end < self.max_frame_size)
                    .ok_or(StompError::FrameTooLarge {
                        size: len,
                        limit: self.max_frame_size,
                    })?;
                match self.buf.get(body_end) {
                    None => return Ok(None),
                    Some(0) => (body_end, body_end + 1),
                    Some(_) => return Err(StompError::MissingTerminator),
                }
            }
            None => match self.buf[body_start..].iter().position(|&b| b == 0) {
                Some(pos) => (body_start + pos, body_start + pos + 1),
                None => {
                    self.check_buffered()?;
                    return Ok(None);
                }
            },
        };

        let frame = Frame {
            command,
            headers,
            body: self.buf[body_start..body_end].to_vec(),
        };
        self.buf.drain(..frame_end);
        Ok(Some(Incoming::Frame(frame)))
    }

    /// An incomplete frame must still fit the limit.
    fn check_buffered(&self) -> StompResult<()> {
        if self.buf.len() > self.max_frame_size {
            return Err(StompError::FrameTooLarge {
                size: self.buf.len(),
                limit: self.max_frame_size,
            });
        }
        Ok(())
    }
}

/// Locate the blank line that ends the frame head.
fn find_head_end(buf: &[u8]) -> Option<std::ops::Range<usize>> {
    let mut i = 0;
    while i < buf.len() {
        if buf[i] == b'\n' {
            match buf.get(i + 1) {
                Some(b'\n') => return Some(i..i + 2),
                Some(b'\r') if buf.get(i + 2) == Some(&b'\n') => return Some(i..i + 3),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

fn parse_head(head: &[u8]) -> StompResult<(Command, Vec<(String, String)>)> {
    let head = std::str::from_utf8(head).map_err(|_| StompError::InvalidUtf8)?;
    let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

    let command: Command = lines.next().unwrap_or_default().parse()?;
    let escaped = command.escapes_headers();

    let mut headers = Vec::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| StompError::BadHeader(line.to_string()))?;
        if escaped {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }
    Ok((command, headers))
}

/// Heart-beat intervals in milliseconds (`heart-beat: cx,cy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    /// Smallest interval at which this side can send
    pub outgoing: u32,
    /// Desired interval at which this side wants to receive
    pub incoming: u32,
}

impl HeartBeat {
    pub fn new(outgoing: u32, incoming: u32) -> Self {
        Self { outgoing, incoming }
    }

    pub fn header_value(&self) -> String {
        format!("{},{}", self.outgoing, self.incoming)
    }

    /// Parse a `heart-beat` header; a missing header means `0,0`.
    pub fn parse(value: Option<&str>) -> StompResult<Self> {
        let Some(value) = value else {
            return Ok(Self::default());
        };
        let bad = || StompError::BadHeader(format!("heart-beat:{value}"));
        let (x, y) = value.split_once(',').ok_or_else(bad)?;
        Ok(Self {
            outgoing: x.trim().parse().map_err(|_| bad())?,
            incoming: y.trim().parse().map_err(|_| bad())?,
        })
    }

    /// Effective `(send_every, expect_every)` for the client, given the
    /// server's CONNECTED value. Zero disables the direction.
    pub fn negotiate(&self, server: HeartBeat) -> (u32, u32) {
        let send = if self.outgoing == 0 || server.incoming == 0 {
            0
        } else {
            self.outgoing.max(server.incoming)
        };
        let expect = if self.incoming == 0 || server.outgoing == 0 {
            0
        } else {
            self.incoming.max(server.outgoing)
        };
        (send, expect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<Incoming> {
        let mut decoder = FrameDecoder::new();
        decoder.push(bytes);
        let mut out = Vec::new();
        while let Some(item) = decoder.decode_next().unwrap() {
            out.push(item);
        }
        assert_eq!(decoder.pending(), 0);
        out
    }

    fn only_frame(bytes: &[u8]) -> Frame {
        match decode_all(bytes).as_slice() {
            [Incoming::Frame(f)] => f.clone(),
            other => panic!("expected one frame, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_connect_unescaped() {
        let frame = Frame::new(Command::Connect)
            .header("accept-version", "1.2,1.1,1.0")
            .header("host", "localhost:8081")
            .header("heart-beat", "4000,4000");
        let text = String::from_utf8(frame.encode()).unwrap();
        assert_eq!(
            text,
            "CONNECT\naccept-version:1.2,1.1,1.0\nhost:localhost:8081\nheart-beat:4000,4000\n\n\0"
        );
    }

    #[test]
    fn test_encode_escapes_and_content_length() {
        let frame = Frame::new(Command::Send)
            .header("destination", "/topic/a:b")
            .body("hi");
        let text = String::from_utf8(frame.encode()).unwrap();
        assert_eq!(text, "SEND\ndestination:/topic/a\\cb\ncontent-length:2\n\nhi\0");
    }

    #[test]
    fn test_decode_message_with_content_length() {
        let body = r#"[{"id":1}]"#;
        let raw = format!(
            "MESSAGE\ndestination:/topic/patients\nsubscription:sub-0\nmessage-id:1\ncontent-length:{}\n\n{}\0",
            body.len(),
            body
        );
        let frame = only_frame(raw.as_bytes());
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.get("subscription"), Some("sub-0"));
        assert_eq!(frame.body_text().unwrap(), body);
    }

    #[test]
    fn test_decode_body_with_nul_uses_content_length() {
        let raw = b"MESSAGE\ncontent-length:3\n\na\0b\0";
        let frame = only_frame(raw);
        assert_eq!(frame.body, b"a\0b");
    }

    #[test]
    fn test_decode_without_content_length_reads_to_nul() {
        let frame = only_frame(b"RECEIPT\nreceipt-id:77\n\n\0");
        assert_eq!(frame.command, Command::Receipt);
        assert_eq!(frame.get("receipt-id"), Some("77"));
        assert!(frame.body.is_empty());
    }

    #[test]
    fn test_decode_crlf_and_heartbeats() {
        let items = decode_all(b"\n\r\nCONNECTED\r\nversion:1.2\r\nheart-beat:0,0\r\n\r\n\0\n");
        assert_eq!(items.len(), 4);
        assert_eq!(items[0], Incoming::HeartBeat);
        assert_eq!(items[1], Incoming::HeartBeat);
        match &items[2] {
            Incoming::Frame(f) => {
                assert_eq!(f.command, Command::Connected);
                assert_eq!(f.get("version"), Some("1.2"));
            }
            other => panic!("expected frame, got {other:?}"),
        }
        assert_eq!(items[3], Incoming::HeartBeat);
    }

    #[test]
    fn test_decode_split_across_pushes() {
        let raw = b"MESSAGE\nsubscription:sub-1\ncontent-length:5\n\nhello\0";
        let mut decoder = FrameDecoder::new();
        for chunk in raw.chunks(4) {
            assert!(decoder.decode_next().unwrap().is_none());
            decoder.push(chunk);
        }
        let Some(Incoming::Frame(frame)) = decoder.decode_next().unwrap() else {
            panic!("frame not decoded");
        };
        assert_eq!(frame.body, b"hello");
        assert!(decoder.decode_next().unwrap().is_none());
    }

    #[test]
    fn test_decode_unescapes_headers_and_first_wins() {
        let frame = only_frame(b"MESSAGE\nkey:a\\cb\\\\c\\nd\nkey:second\n\n\0");
        assert_eq!(frame.get("key"), Some("a:b\\c\nd"));
    }

    #[test]
    fn test_escape_round_trip() {
        let frame = Frame::new(Command::Message).header("weird", "x:y\\z\r\nw");
        let decoded = only_frame(&frame.encode());
        assert_eq!(decoded.get("weird"), Some("x:y\\z\r\nw"));
    }

    #[test]
    fn test_decode_errors() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"BOGUS\n\n\0");
        assert!(matches!(decoder.decode_next(), Err(StompError::UnknownCommand(_))));

        let mut decoder = FrameDecoder::new();
        decoder.push(b"MESSAGE\nno-colon\n\n\0");
        assert!(matches!(decoder.decode_next(), Err(StompError::BadHeader(_))));

        let mut decoder = FrameDecoder::new();
        decoder.push(b"MESSAGE\ncontent-length:2\n\nabc\0");
        assert!(matches!(decoder.decode_next(), Err(StompError::MissingTerminator)));

        let mut decoder = FrameDecoder::new();
        decoder.push(b"MESSAGE\nk:\\t\n\n\0");
        assert!(matches!(decoder.decode_next(), Err(StompError::BadEscape(_))));
    }

    #[test]
    fn test_decode_rejects_overflowing_content_length() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"MESSAGE\nsubscription:sub-0\ncontent-length:18446744073709551615\n\n[]\0");
        assert!(matches!(
            decoder.decode_next(),
            Err(StompError::FrameTooLarge { size: usize::MAX, .. })
        ));
    }

    #[test]
    fn test_decode_rejects_content_length_over_limit() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"MESSAGE\nsubscription:sub-0\ncontent-length:999999999999\n\n[]");
        assert!(matches!(decoder.decode_next(), Err(StompError::FrameTooLarge { .. })));

        let mut decoder = FrameDecoder::with_max_frame_size(64);
        decoder.push(b"MESSAGE\ncontent-length:10\n\n0123456789\0");
        assert!(decoder.decode_next().unwrap().is_some());
        decoder.push(b"MESSAGE\ncontent-length:64\n\n");
        assert!(matches!(
            decoder.decode_next(),
            Err(StompError::FrameTooLarge { size: 64, limit: 64 })
        ));
    }

    #[test]
    fn test_decode_rejects_unterminated_buffer_over_limit() {
        // No blank line ever arrives
        let mut decoder = FrameDecoder::with_max_frame_size(32);
        decoder.push(b"MESSAGE\nsubscription:sub-0");
        assert!(decoder.decode_next().unwrap().is_none());
        decoder.push(&[b'x'; 32]);
        assert!(matches!(decoder.decode_next(), Err(StompError::FrameTooLarge { .. })));

        // Head complete, body never terminated
        let mut decoder = FrameDecoder::with_max_frame_size(32);
        decoder.push(b"MESSAGE\n\n");
        decoder.push(&[b'y'; 32]);
        assert!(matches!(decoder.decode_next(), Err(StompError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_heartbeat_negotiation() {
        let client = HeartBeat::new(4000, 4000);
        assert_eq!(client.negotiate(HeartBeat::new(10000, 10000)), (10000, 10000));
        assert_eq!(client.negotiate(HeartBeat::new(0, 0)), (0, 0));
        assert_eq!(client.negotiate(HeartBeat::new(1000, 0)), (0, 4000));
        assert_eq!(HeartBeat::new(0, 4000).negotiate(HeartBeat::new(2000, 2000)), (0, 4000));
    }

    #[test]
    fn test_heartbeat_header() {
        assert_eq!(HeartBeat::parse(Some("0, 10000")).unwrap(), HeartBeat::new(0, 10000));
        assert_eq!(HeartBeat::parse(None).unwrap(), HeartBeat::default());
        assert!(HeartBeat::parse(Some("fast")).is_err());
        assert_eq!(HeartBeat::new(4000, 4000).header_value(), "4000,4000");
    }
}
