//! Message classification and event decoding.
//!
//! A [`RawFrame`] from the decoder becomes an [`EslMessage`] once its
//! `Content-Type` is recognised. Event payloads are only decoded on request,
//! so routing a reply never pays for event parsing.

use std::borrow::Cow;
use std::fmt;

use percent_encoding::percent_decode_str;

use crate::{
    constants::{
        CHANNEL_DATA_EVENT, CONTENT_TYPE_API_RESPONSE, CONTENT_TYPE_AUTH_REQUEST,
        CONTENT_TYPE_COMMAND_REPLY, CONTENT_TYPE_DISCONNECT_NOTICE, CONTENT_TYPE_LOG_DATA,
        CONTENT_TYPE_RUDE_REJECTION, HEADER_TERMINATOR,
    },
    error::{EslError, EslResult},
    event::{EslEvent, EslEventType, EventFormat},
    frame::RawFrame,
    headers::{EventHeader, FrameHeader},
};

/// Classification of a frame by its `Content-Type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    /// `auth/request`: the switch wants a password (inbound only).
    AuthRequest,
    /// `command/reply`: answer to a socket command.
    CommandReply,
    /// `api/response`: answer to an `api` command, result in the body.
    ApiResponse,
    /// `text/disconnect-notice`: the switch is about to close the socket.
    DisconnectNotice,
    /// `text/rude-rejection`: the switch refused the connection (ACL).
    RudeRejection,
    /// `text/event-plain`, `text/event-json` or `text/event-xml`.
    Event(EventFormat),
    /// `log/data`: a forwarded log line, sent after `log <level>`.
    LogData,
}

impl ContentType {
    /// Classify a `Content-Type` value.
    pub fn parse(value: &str) -> EslResult<Self> {
        let content_type = match value {
            CONTENT_TYPE_AUTH_REQUEST => ContentType::AuthRequest,
            CONTENT_TYPE_COMMAND_REPLY => ContentType::CommandReply,
            CONTENT_TYPE_API_RESPONSE => ContentType::ApiResponse,
            CONTENT_TYPE_DISCONNECT_NOTICE => ContentType::DisconnectNotice,
            CONTENT_TYPE_RUDE_REJECTION => ContentType::RudeRejection,
            CONTENT_TYPE_LOG_DATA => ContentType::LogData,
            other => match EventFormat::from_content_type(other) {
                Some(format) => ContentType::Event(format),
                None => {
                    return Err(EslError::UnknownContentType {
                        content_type: other.to_string(),
                    })
                }
            },
        };
        Ok(content_type)
    }

    /// Wire value of this content type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::AuthRequest => CONTENT_TYPE_AUTH_REQUEST,
            ContentType::CommandReply => CONTENT_TYPE_COMMAND_REPLY,
            ContentType::ApiResponse => CONTENT_TYPE_API_RESPONSE,
            ContentType::DisconnectNotice => CONTENT_TYPE_DISCONNECT_NOTICE,
            ContentType::RudeRejection => CONTENT_TYPE_RUDE_REJECTION,
            ContentType::Event(format) => format.content_type(),
            ContentType::LogData => CONTENT_TYPE_LOG_DATA,
        }
    }

    /// `true` for frames that answer the oldest pending command.
    pub fn is_reply(&self) -> bool {
        matches!(self, ContentType::CommandReply | ContentType::ApiResponse)
    }

    /// `true` for frames delivered to listeners rather than to a caller.
    pub fn is_event(&self) -> bool {
        matches!(self, ContentType::Event(_) | ContentType::LogData)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified frame.
///
/// Created by the reader task, never modified, consumed once by the
/// correlator (which may hand it on to a command caller).
#[derive(Debug, Clone, PartialEq)]
pub struct EslMessage {
    content_type: ContentType,
    frame: RawFrame,
}

impl EslMessage {
    /// Classify a decoded frame.
    ///
    /// A frame without `Content-Type` means the stream is out of step
    /// (typically a wrong `Content-Length` earlier) and is a protocol
    /// violation. An unrecognised value is [`EslError::UnknownContentType`].
    pub fn from_frame(frame: RawFrame) -> EslResult<Self> {
        let raw = frame
            .header(FrameHeader::ContentType)
            .ok_or_else(|| EslError::protocol_violation("frame has no Content-Type header"))?;
        let content_type = ContentType::parse(&decode_value(raw))?;
        Ok(Self {
            content_type,
            frame,
        })
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    /// The underlying frame, headers exactly as received.
    pub fn frame(&self) -> &RawFrame {
        &self.frame
    }

    pub fn into_frame(self) -> RawFrame {
        self.frame
    }

    /// First value of a frame header, as received.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.frame
            .header(name)
    }

    /// First value of a frame header with percent-encoding removed.
    pub fn decoded_header(&self, name: impl AsRef<str>) -> Option<Cow<'_, str>> {
        self.header(name)
            .map(decode_value)
    }

    /// `Reply-Text` header, percent-decoded.
    pub fn reply_text(&self) -> Option<Cow<'_, str>> {
        self.decoded_header(FrameHeader::ReplyText)
    }

    /// Job identifier carried by a `bgapi` acknowledgement.
    ///
    /// Read from the `Job-UUID` header, or from a `+OK Job-UUID: <id>`
    /// reply text when the header is absent.
    pub fn job_uuid(&self) -> Option<&str> {
        self.header(FrameHeader::JobUuid)
            .or_else(|| {
                self.header(FrameHeader::ReplyText)?
                    .strip_prefix("+OK Job-UUID:")
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
            })
    }

    /// `Content-Disposition` header (`linger` on a disconnect notice).
    pub fn disposition(&self) -> Option<&str> {
        self.header(FrameHeader::ContentDisposition)
    }

    /// Raw body bytes.
    pub fn body(&self) -> Option<&[u8]> {
        self.frame
            .body()
    }

    /// Body as text. Invalid UTF-8 is replaced rather than rejected.
    pub fn body_text(&self) -> Option<Cow<'_, str>> {
        self.body()
            .map(String::from_utf8_lossy)
    }

    /// Decode the payload of an event message.
    pub fn to_event(&self) -> EslResult<EslEvent> {
        if self.content_type == ContentType::LogData {
            return Ok(self.to_log_event());
        }
        let ContentType::Event(format) = self.content_type else {
            return Err(EslError::protocol_violation(format!(
                "{} is not an event",
                self.content_type
            )));
        };
        let body = self
            .body()
            .ok_or_else(|| EslError::protocol_violation(format!("{} without body", format)))?;
        let body = std::str::from_utf8(body)
            .map_err(|_| EslError::protocol_violation("event body is not valid UTF-8"))?;

        match format {
            EventFormat::Plain => Ok(parse_plain_event(body)),
            EventFormat::Json => parse_json_event(body),
            EventFormat::Xml => parse_xml_event(body),
        }
    }

    /// A `log/data` frame as a `LOG` event: the frame headers (`Log-Level`,
    /// `Text-Channel`, `Log-File`, ...) become event headers and the log line
    /// is the body.
    fn to_log_event(&self) -> EslEvent {
        let mut event = EslEvent::with_type(EslEventType::Log);
        for (name, value) in self
            .frame
            .headers()
        {
            if FrameHeader::ContentType.matches(name) || FrameHeader::ContentLength.matches(name) {
                continue;
            }
            event.set_header(name, value.as_str());
        }
        if let Some(text) = self.body_text() {
            event.set_body(text.into_owned());
        }
        event
    }

    /// Reinterpret the `connect` reply of an outbound session as a
    /// `CHANNEL_DATA` event.
    ///
    /// The switch serialises the whole channel into the reply's own header
    /// block with percent-encoded values, so the frame headers are decoded
    /// into the event map. Any body is ignored.
    pub fn to_channel_data(&self) -> EslEvent {
        let mut event = EslEvent::new();
        for (name, value) in self
            .frame
            .headers()
        {
            if FrameHeader::ContentType.matches(name) || FrameHeader::ContentLength.matches(name) {
                continue;
            }
            event.set_header(name, decode_value(value));
        }
        if event
            .event_name()
            .is_none()
        {
            event.set_header(EventHeader::EventName, CHANNEL_DATA_EVENT);
        }
        event
    }
}

impl TryFrom<RawFrame> for EslMessage {
    type Error = EslError;

    fn try_from(frame: RawFrame) -> EslResult<Self> {
        Self::from_frame(frame)
    }
}

fn decode_value(raw: &str) -> Cow<'_, str> {
    percent_decode_str(raw)
        .decode_utf8()
        .unwrap_or(Cow::Borrowed(raw))
}

/// Parse a `text/event-plain` body.
///
/// The body is itself a header block (`Name: value` lines with
/// percent-encoded values) terminated by a blank line. Whatever follows is
/// the event's own body, e.g. the result text of a `BACKGROUND_JOB`.
fn parse_plain_event(body: &str) -> EslEvent {
    let (header_section, inner_body) = match body.split_once(HEADER_TERMINATOR) {
        Some((headers, rest)) => (headers, Some(rest)),
        None => (body, None),
    };

    let mut event = EslEvent::new();
    for line in header_section.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            event.set_header(name.trim(), decode_value(value.trim()));
        }
    }

    if let Some(inner) = inner_body {
        // An inner Content-Length bounds the body; the rest is padding.
        let inner = event
            .header(FrameHeader::ContentLength)
            .and_then(|v| {
                v.parse::<usize>()
                    .ok()
            })
            .and_then(|len| inner.get(..len))
            .unwrap_or(inner);
        if !inner.is_empty() {
            event.set_body(inner);
        }
    }

    event
}

/// Parse a `text/event-json` body. Non-string values are kept as their JSON
/// text; `_body` carries the event body.
fn parse_json_event(body: &str) -> EslResult<EslEvent> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    let object = value
        .as_object()
        .ok_or_else(|| EslError::protocol_violation("JSON event is not an object"))?;

    let mut event = EslEvent::new();
    for (key, value) in object {
        let text = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if key == "_body" {
            event.set_body(text);
        } else {
            event.set_header(key, text);
        }
    }
    Ok(event)
}

/// Parse a `text/event-xml` body.
///
/// ```xml
/// <event>
///   <headers>
///     <Event-Name>HEARTBEAT</Event-Name>
///     <Core-UUID>abc-123</Core-UUID>
///   </headers>
///   <body>...</body>
/// </event>
/// ```
fn parse_xml_event(body: &str) -> EslResult<EslEvent> {
    use quick_xml::events::Event as XmlEvent;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(body);
    let mut event = EslEvent::new();
    let mut in_headers = false;
    let mut in_body = false;
    let mut current_tag: Option<String> = None;

    loop {
        match reader.read_event()? {
            XmlEvent::Start(ref e) => {
                let tag = String::from_utf8_lossy(
                    e.name()
                        .as_ref(),
                )
                .into_owned();
                match tag.as_str() {
                    "headers" => in_headers = true,
                    "body" => in_body = true,
                    _ if in_headers => current_tag = Some(tag),
                    _ => {}
                }
            }
            XmlEvent::End(ref e) => match e
                .name()
                .as_ref()
            {
                b"headers" => in_headers = false,
                b"body" => in_body = false,
                _ if in_headers => current_tag = None,
                _ => {}
            },
            XmlEvent::Text(ref e) => {
                let text = e.unescape()?;
                if in_body {
                    event.set_body(text.into_owned());
                } else if let Some(tag) = &current_tag {
                    event.set_header(tag, decode_value(&text));
                }
            }
            XmlEvent::Eof => break,
            _ => {}
        }
    }

    Ok(event)
}
