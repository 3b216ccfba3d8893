//! Frame decoder: raw socket bytes to discrete ESL frames.
//!
//! A frame is a block of `Name: Value` lines terminated by a blank line,
//! optionally followed by exactly `Content-Length` bytes of body. The decoder
//! is incremental: feed it whatever the socket returned and pull complete
//! frames out. Output does not depend on how the input was chunked.

use bytes::Bytes;
use std::fmt;

use crate::{
    buffer::EslBuffer,
    connection::ConnectionMode,
    constants::{
        HEADER_TERMINATOR, LINE_TERMINATOR, MAX_HEADER_BLOCK_INBOUND, MAX_HEADER_BLOCK_OUTBOUND,
        MAX_MESSAGE_SIZE,
    },
    error::FramingError,
    headers::FrameHeader,
};

/// One decoded frame: ordered headers plus an optional body.
///
/// Header names are kept exactly as they appeared on the wire and duplicates
/// are preserved in order. `body` is `Some` if and only if the frame carried a
/// `Content-Length` header (an explicit `Content-Length: 0` yields an empty body).
#[derive(Clone, PartialEq, Eq)]
pub struct RawFrame {
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
}

impl RawFrame {
    /// Build a frame from parts. Used by tests and by fake peers.
    pub fn new(headers: Vec<(String, String)>, body: Option<Bytes>) -> Self {
        Self { headers, body }
    }

    /// All headers in wire order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First value for `name` (case-sensitive).
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        let name = name.as_ref();
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in wire order.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Raw body bytes, if the frame had a `Content-Length`.
    pub fn body(&self) -> Option<&[u8]> {
        self.body
            .as_deref()
    }

    /// Serialize back to wire format.
    ///
    /// Headers are emitted as stored, so a frame whose `Content-Length` header
    /// disagrees with its body will not re-decode to itself.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(LINE_TERMINATOR.as_bytes());
        }
        out.extend_from_slice(LINE_TERMINATOR.as_bytes());
        if let Some(body) = &self.body {
            out.extend_from_slice(body);
        }
        out
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFrame")
            .field("headers", &self.headers)
            .field(
                "body",
                &self
                    .body
                    .as_ref()
                    .map(|b| String::from_utf8_lossy(b)),
            )
            .finish()
    }
}

/// Limits applied by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Largest header block accepted before a terminator is seen.
    pub max_header_block: usize,
    /// Largest `Content-Length` accepted.
    pub max_body_size: usize,
}

impl DecoderConfig {
    /// Limits appropriate for a connection role.
    ///
    /// Outbound sessions receive the whole channel snapshot as a header-only
    /// `connect` reply, so their header block limit is much larger. Framing
    /// rules are otherwise identical for both roles.
    pub fn for_mode(mode: ConnectionMode) -> Self {
        let max_header_block = match mode {
            ConnectionMode::Inbound => MAX_HEADER_BLOCK_INBOUND,
            ConnectionMode::Outbound => MAX_HEADER_BLOCK_OUTBOUND,
        };
        Self {
            max_header_block,
            max_body_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self::for_mode(ConnectionMode::Inbound)
    }
}

#[derive(Debug)]
enum DecodeState {
    WaitingForHeaders,
    WaitingForBody {
        headers: Vec<(String, String)>,
        body_length: usize,
    },
}

/// Incremental ESL frame decoder.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: EslBuffer,
    state: DecodeState,
    config: DecoderConfig,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_config(DecoderConfig::default())
    }

    pub fn with_config(config: DecoderConfig) -> Self {
        Self {
            buffer: EslBuffer::new(),
            state: DecodeState::WaitingForHeaders,
            config,
        }
    }

    /// Append bytes read from the socket.
    pub fn add_data(&mut self, data: &[u8]) {
        self.buffer
            .extend_from_slice(data);
    }

    /// Bytes buffered but not yet returned as part of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer
            .len()
    }

    /// Pull the next complete frame out of the buffer.
    ///
    /// `Ok(None)` means more bytes are needed. An `Err` leaves the decoder in
    /// an unspecified state; the connection must be torn down.
    pub fn next_frame(&mut self) -> Result<Option<RawFrame>, FramingError> {
        loop {
            let pending_body = match &self.state {
                DecodeState::WaitingForHeaders => None,
                DecodeState::WaitingForBody { body_length, .. } => Some(*body_length),
            };

            if let Some(body_length) = pending_body {
                let Some(body) = self
                    .buffer
                    .extract_bytes(body_length)
                else {
                    return Ok(None);
                };
                let state = std::mem::replace(&mut self.state, DecodeState::WaitingForHeaders);
                if let DecodeState::WaitingForBody { headers, .. } = state {
                    return Ok(Some(RawFrame::new(headers, Some(body))));
                }
                continue;
            }

            let limit = self
                .config
                .max_header_block;
            let Some(block) = self
                .buffer
                .extract_until_pattern(HEADER_TERMINATOR.as_bytes())
            else {
                // The buffered bytes may already hold the first byte of the
                // terminator.
                if self
                    .buffer
                    .len()
                    > limit + HEADER_TERMINATOR.len() - 1
                {
                    return Err(FramingError::HeaderBlockTooLarge { limit });
                }
                return Ok(None);
            };
            if block.len() > limit {
                return Err(FramingError::HeaderBlockTooLarge { limit });
            }

            let headers = parse_header_block(&block)?;
            if headers.is_empty() {
                // Stray blank line between frames.
                continue;
            }

            let length = headers
                .iter()
                .find(|(k, _)| FrameHeader::ContentLength.matches(k))
                .map(|(_, v)| parse_content_length(v))
                .transpose()?;

            let Some(length) = length else {
                return Ok(Some(RawFrame::new(headers, None)));
            };
            if length
                > self
                    .config
                    .max_body_size
            {
                return Err(FramingError::BodyTooLarge {
                    length,
                    limit: self
                        .config
                        .max_body_size,
                });
            }
            self.state = DecodeState::WaitingForBody {
                headers,
                body_length: length,
            };
        }
    }

    /// Feed `data` and drain every frame it completes.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<RawFrame>, FramingError> {
        self.add_data(data);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_header_block(block: &[u8]) -> Result<Vec<(String, String)>, FramingError> {
    let text = std::str::from_utf8(block).map_err(|_| FramingError::InvalidUtf8)?;
    let mut headers = Vec::new();

    for line in text.split('\n') {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(FramingError::MalformedHeader {
                line: line.to_string(),
            });
        };
        headers.push((
            name.trim()
                .to_string(),
            value
                .trim()
                .to_string(),
        ));
    }

    Ok(headers)
}

fn parse_content_length(value: &str) -> Result<usize, FramingError> {
    let invalid = || FramingError::InvalidContentLength {
        value: value.to_string(),
    };
    if value.is_empty()
        || !value
            .bytes()
            .all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }
    value
        .parse()
        .map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decode_all(data: &[u8]) -> Vec<RawFrame> {
        FrameDecoder::new()
            .decode(data)
            .unwrap()
    }

    #[test]
    fn header_only_frame() {
        let frames = decode_all(b"Content-Type: auth/request\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header("Content-Type"), Some("auth/request"));
        assert!(frames[0]
            .body()
            .is_none());
    }

    #[test]
    fn frame_with_body() {
        let frames = decode_all(b"Content-Type: api/response\nContent-Length: 2\n\nOK");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].body(), Some(&b"OK"[..]));
    }

    #[test]
    fn zero_length_body_is_present_but_empty() {
        let frames = decode_all(b"Content-Type: api/response\nContent-Length: 0\n\n");
        assert_eq!(frames[0].body(), Some(&b""[..]));
    }

    #[test]
    fn incomplete_body_waits() {
        let mut decoder = FrameDecoder::new();
        decoder.add_data(b"Content-Type: api/response\nContent-Length: 10\n\ntest");
        assert!(decoder
            .next_frame()
            .unwrap()
            .is_none());
        decoder.add_data(b"123456");
        let frame = decoder
            .next_frame()
            .unwrap()
            .unwrap();
        assert_eq!(frame.body(), Some(&b"test123456"[..]));
    }

    #[test]
    fn duplicate_headers_preserved_in_order() {
        let frames = decode_all(b"Content-Type: command/reply\nX-Dup: a\nX-Dup: b\n\n");
        let values: Vec<_> = frames[0]
            .header_values("X-Dup")
            .collect();
        assert_eq!(values, vec!["a", "b"]);
        assert_eq!(frames[0].header("X-Dup"), Some("a"));
    }

    #[test]
    fn header_names_are_case_sensitive() {
        let frames = decode_all(b"content-type: command/reply\n\n");
        assert!(frames[0]
            .header("Content-Type")
            .is_none());
        assert_eq!(frames[0].header("content-type"), Some("command/reply"));
    }

    #[test]
    fn values_are_trimmed_and_may_contain_colons() {
        let frames = decode_all(b"Content-Type:   command/reply  \nReply-Text: +OK Job-UUID: abc\n\n");
        assert_eq!(frames[0].header("Content-Type"), Some("command/reply"));
        assert_eq!(frames[0].header("Reply-Text"), Some("+OK Job-UUID: abc"));
    }

    #[test]
    fn crlf_line_endings_are_trimmed() {
        // \r\n\r\n is not a terminator, but \r\n\n is: the \r is trimmed from the line.
        let frames = decode_all(b"Content-Type: auth/request\r\n\n");
        assert_eq!(frames[0].header("Content-Type"), Some("auth/request"));
    }

    #[test]
    fn missing_colon_is_framing_error() {
        let err = FrameDecoder::new()
            .decode(b"Content-Type auth/request\n\n")
            .unwrap_err();
        assert!(matches!(err, FramingError::MalformedHeader { .. }));
    }

    #[test]
    fn bad_content_length_is_framing_error() {
        for bad in ["abc", "-1", "+5", "1.5", ""] {
            let data = format!("Content-Type: api/response\nContent-Length: {}\n\n", bad);
            let err = FrameDecoder::new()
                .decode(data.as_bytes())
                .unwrap_err();
            assert!(
                matches!(err, FramingError::InvalidContentLength { .. }),
                "accepted Content-Length {:?}",
                bad
            );
        }
    }

    #[test]
    fn oversized_body_is_framing_error() {
        let mut decoder = FrameDecoder::with_config(DecoderConfig {
            max_header_block: 1024,
            max_body_size: 8,
        });
        let err = decoder
            .decode(b"Content-Type: api/response\nContent-Length: 9\n\n")
            .unwrap_err();
        assert_eq!(
            err,
            FramingError::BodyTooLarge {
                length: 9,
                limit: 8
            }
        );
    }

    #[test]
    fn oversized_header_block_is_framing_error() {
        let mut decoder = FrameDecoder::with_config(DecoderConfig {
            max_header_block: 32,
            max_body_size: 1024,
        });
        decoder.add_data(b"Content-Type: command/reply\nX-Padding: ");
        decoder.add_data(&[b'x'; 64]);
        assert_eq!(
            decoder
                .next_frame()
                .unwrap_err(),
            FramingError::HeaderBlockTooLarge { limit: 32 }
        );
    }

    fn limited(max_header_block: usize) -> FrameDecoder {
        FrameDecoder::with_config(DecoderConfig {
            max_header_block,
            max_body_size: 1024,
        })
    }

    fn decode_bytewise(decoder: &mut FrameDecoder, data: &[u8]) -> Result<usize, FramingError> {
        let mut count = 0;
        for byte in data {
            count += decoder
                .decode(std::slice::from_ref(byte))?
                .len();
        }
        Ok(count)
    }

    #[test]
    fn header_block_at_limit_decodes_in_any_chunking() {
        let block = "Content-Type: command/reply\nReply-Text: +OK";
        let wire = format!("{}\n\n", block);

        let whole = limited(block.len())
            .decode(wire.as_bytes())
            .unwrap();
        assert_eq!(whole.len(), 1);

        let bytewise = decode_bytewise(&mut limited(block.len()), wire.as_bytes());
        assert_eq!(bytewise, Ok(1));
    }

    #[test]
    fn header_block_over_limit_fails_in_any_chunking() {
        let block = "Content-Type: command/reply\nReply-Text: +OK";
        let wire = format!("{}\n\n", block);
        let limit = block.len() - 1;

        assert_eq!(
            limited(limit)
                .decode(wire.as_bytes())
                .unwrap_err(),
            FramingError::HeaderBlockTooLarge { limit }
        );
        assert_eq!(
            decode_bytewise(&mut limited(limit), wire.as_bytes()),
            Err(FramingError::HeaderBlockTooLarge { limit })
        );
    }

    #[test]
    fn outbound_mode_accepts_large_header_only_block() {
        let mut block = String::from("Content-Type: command/reply\nReply-Text: +OK\n");
        for i in 0..4000 {
            block.push_str(&format!("variable_test_{}: some%20value%20{}\n", i, i));
        }
        block.push('\n');
        assert!(block.len() > MAX_HEADER_BLOCK_INBOUND);

        assert!(FrameDecoder::with_config(DecoderConfig::for_mode(ConnectionMode::Inbound))
            .decode(block.as_bytes())
            .is_err());

        let frames =
            FrameDecoder::with_config(DecoderConfig::for_mode(ConnectionMode::Outbound))
                .decode(block.as_bytes())
                .unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0]
            .body()
            .is_none());
        assert_eq!(frames[0].header("variable_test_3999"), Some("some%20value%203999"));
    }

    #[test]
    fn body_containing_blank_lines_is_not_split() {
        let body = "Event-Name: HEARTBEAT\n\nextra\n\n";
        let data = format!(
            "Content-Length: {}\nContent-Type: text/event-plain\n\n{}Content-Type: auth/request\n\n",
            body.len(),
            body
        );
        let frames = decode_all(data.as_bytes());
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].body(), Some(body.as_bytes()));
        assert_eq!(frames[1].header("Content-Type"), Some("auth/request"));
    }

    #[test]
    fn stray_blank_lines_between_frames_are_skipped() {
        let frames = decode_all(b"Content-Type: auth/request\n\n\n\nContent-Type: command/reply\n\n");
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn to_wire_round_trip() {
        let frame = RawFrame::new(
            vec![
                ("Content-Type".into(), "api/response".into()),
                ("Content-Length".into(), "5".into()),
            ],
            Some(Bytes::from_static(b"+OK\n\n")),
        );
        assert_eq!(decode_all(&frame.to_wire()), vec![frame]);
    }

    fn arb_frame() -> impl Strategy<Value = RawFrame> {
        let header = ("[A-Za-z][A-Za-z0-9-]{0,15}", "[ -~]{0,24}").prop_map(|(k, v)| {
            let v = v
                .trim()
                .to_string();
            (k, v)
        });
        (
            prop::collection::vec(header, 0..6),
            prop::option::of(prop::collection::vec(any::<u8>(), 0..64)),
        )
            .prop_map(|(mut headers, body)| {
                headers.retain(|(k, _)| k != "Content-Length");
                headers.insert(0, ("Content-Type".to_string(), "command/reply".to_string()));
                let body = body.map(|b| {
                    headers.push(("Content-Length".to_string(), b.len().to_string()));
                    Bytes::from(b)
                });
                RawFrame::new(headers, body)
            })
    }

    proptest! {
        #[test]
        fn chunking_does_not_change_frames(
            frames in prop::collection::vec(arb_frame(), 1..5),
            chunk in 1usize..17,
        ) {
            let wire: Vec<u8> = frames.iter().flat_map(|f| f.to_wire()).collect();

            let whole = FrameDecoder::new().decode(&wire).unwrap();

            let mut decoder = FrameDecoder::new();
            let mut chunked = Vec::new();
            for piece in wire.chunks(chunk) {
                chunked.extend(decoder.decode(piece).unwrap());
            }

            let mut byte_at_a_time = Vec::new();
            let mut decoder = FrameDecoder::new();
            for b in &wire {
                byte_at_a_time.extend(decoder.decode(std::slice::from_ref(b)).unwrap());
            }

            prop_assert_eq!(&whole, &frames);
            prop_assert_eq!(&chunked, &frames);
            prop_assert_eq!(&byte_at_a_time, &frames);
        }
    }
}
