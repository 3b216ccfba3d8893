//! ESL event types and structures

use crate::constants::{
    BACKGROUND_JOB_EVENT, CONTENT_TYPE_TEXT_EVENT_JSON, CONTENT_TYPE_TEXT_EVENT_PLAIN, CONTENT_TYPE_TEXT_EVENT_XML,
};
use crate::headers::EventHeader;
use percent_encoding::{percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Event format types supported by FreeSWITCH ESL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum EventFormat {
    /// Plain text format (default)
    Plain,
    /// JSON format
    Json,
    /// XML format
    Xml,
}

impl EventFormat {
    /// Event format for an event Content-Type, `None` for anything else.
    pub fn from_content_type(ct: &str) -> Option<Self> {
        match ct {
            CONTENT_TYPE_TEXT_EVENT_PLAIN => Some(Self::Plain),
            CONTENT_TYPE_TEXT_EVENT_JSON => Some(Self::Json),
            CONTENT_TYPE_TEXT_EVENT_XML => Some(Self::Xml),
            _ => None,
        }
    }

    /// Content-Type the switch uses for events in this format.
    pub fn content_type(&self) -> &'static str {
        match self {
            EventFormat::Plain => CONTENT_TYPE_TEXT_EVENT_PLAIN,
            EventFormat::Json => CONTENT_TYPE_TEXT_EVENT_JSON,
            EventFormat::Xml => CONTENT_TYPE_TEXT_EVENT_XML,
        }
    }
}

impl fmt::Display for EventFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventFormat::Plain => write!(f, "plain"),
            EventFormat::Json => write!(f, "json"),
            EventFormat::Xml => write!(f, "xml"),
        }
    }
}

impl FromStr for EventFormat {
    type Err = ParseEventFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(Self::Plain),
            "json" => Ok(Self::Json),
            "xml" => Ok(Self::Xml),
            _ => Err(ParseEventFormatError(s.to_string())),
        }
    }
}

/// Error returned when parsing an invalid event format string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEventFormatError(pub String);

impl fmt::Display for ParseEventFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event format: {}", self.0)
    }
}

impl std::error::Error for ParseEventFormatError {}

/// Generates `EslEventType` with `Display`, `FromStr` and `parse_event_type`.
macro_rules! esl_event_types {
    ($( $(#[$attr:meta])* $variant:ident => $wire:literal ),+ $(,)?) => {
        /// FreeSWITCH event names, as carried in the `Event-Name` header and
        /// used in `event` / `nixevent` subscriptions.
        ///
        /// Events whose name is not listed here still decode; their
        /// [`EslEvent::event_type`] is `None` and [`EslEvent::event_name`] holds the raw name.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[non_exhaustive]
        #[allow(missing_docs)]
        pub enum EslEventType {
            $( $(#[$attr])* $variant, )+
        }

        impl EslEventType {
            /// Wire name (`CHANNEL_ANSWER`).
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( EslEventType::$variant => $wire, )+
                }
            }

            /// Parse event type from wire name (case-insensitive).
            pub fn parse_event_type(s: &str) -> Option<Self> {
                match s.to_uppercase().as_str() {
                    $( $wire => Some(EslEventType::$variant), )+
                    _ => None,
                }
            }
        }

        impl fmt::Display for EslEventType {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for EslEventType {
            type Err = ParseEventTypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse_event_type(s).ok_or_else(|| ParseEventTypeError(s.to_string()))
            }
        }
    };
}

esl_event_types! {
    Custom => "CUSTOM",
    Clone => "CLONE",
    ChannelCreate => "CHANNEL_CREATE",
    ChannelDestroy => "CHANNEL_DESTROY",
    ChannelState => "CHANNEL_STATE",
    ChannelCallstate => "CHANNEL_CALLSTATE",
    ChannelAnswer => "CHANNEL_ANSWER",
    ChannelHangup => "CHANNEL_HANGUP",
    ChannelHangupComplete => "CHANNEL_HANGUP_COMPLETE",
    ChannelExecute => "CHANNEL_EXECUTE",
    ChannelExecuteComplete => "CHANNEL_EXECUTE_COMPLETE",
    ChannelHold => "CHANNEL_HOLD",
    ChannelUnhold => "CHANNEL_UNHOLD",
    ChannelBridge => "CHANNEL_BRIDGE",
    ChannelUnbridge => "CHANNEL_UNBRIDGE",
    ChannelProgress => "CHANNEL_PROGRESS",
    ChannelProgressMedia => "CHANNEL_PROGRESS_MEDIA",
    ChannelOutgoing => "CHANNEL_OUTGOING",
    ChannelPark => "CHANNEL_PARK",
    ChannelUnpark => "CHANNEL_UNPARK",
    ChannelApplication => "CHANNEL_APPLICATION",
    ChannelOriginate => "CHANNEL_ORIGINATE",
    ChannelUuid => "CHANNEL_UUID",
    Api => "API",
    Log => "LOG",
    InboundChan => "INBOUND_CHAN",
    OutboundChan => "OUTBOUND_CHAN",
    Startup => "STARTUP",
    Shutdown => "SHUTDOWN",
    Publish => "PUBLISH",
    Unpublish => "UNPUBLISH",
    Talk => "TALK",
    Notalk => "NOTALK",
    SessionCrash => "SESSION_CRASH",
    ModuleLoad => "MODULE_LOAD",
    ModuleUnload => "MODULE_UNLOAD",
    Dtmf => "DTMF",
    Message => "MESSAGE",
    PresenceIn => "PRESENCE_IN",
    NotifyIn => "NOTIFY_IN",
    PresenceOut => "PRESENCE_OUT",
    PresenceProbe => "PRESENCE_PROBE",
    MessageWaiting => "MESSAGE_WAITING",
    MessageQuery => "MESSAGE_QUERY",
    Roster => "ROSTER",
    Codec => "CODEC",
    BackgroundJob => "BACKGROUND_JOB",
    DetectedSpeech => "DETECTED_SPEECH",
    DetectedTone => "DETECTED_TONE",
    PrivateCommand => "PRIVATE_COMMAND",
    Heartbeat => "HEARTBEAT",
    Trap => "TRAP",
    AddSchedule => "ADD_SCHEDULE",
    DelSchedule => "DEL_SCHEDULE",
    ExeSchedule => "EXE_SCHEDULE",
    ReSchedule => "RE_SCHEDULE",
    ReloadXml => "RELOADXML",
    Notify => "NOTIFY",
    PhoneFeature => "PHONE_FEATURE",
    PhoneFeatureSubscribe => "PHONE_FEATURE_SUBSCRIBE",
    SendMessage => "SEND_MESSAGE",
    RecvMessage => "RECV_MESSAGE",
    RequestParams => "REQUEST_PARAMS",
    ChannelData => "CHANNEL_DATA",
    General => "GENERAL",
    Command => "COMMAND",
    SessionHeartbeat => "SESSION_HEARTBEAT",
    ClientDisconnected => "CLIENT_DISCONNECTED",
    ServerDisconnected => "SERVER_DISCONNECTED",
    SendInfo => "SEND_INFO",
    RecvInfo => "RECV_INFO",
    RecvRtcpMessage => "RECV_RTCP_MESSAGE",
    SendRtcpMessage => "SEND_RTCP_MESSAGE",
    CallSecure => "CALL_SECURE",
    Nat => "NAT",
    RecordStart => "RECORD_START",
    RecordStop => "RECORD_STOP",
    PlaybackStart => "PLAYBACK_START",
    PlaybackStop => "PLAYBACK_STOP",
    CallUpdate => "CALL_UPDATE",
    Failure => "FAILURE",
    SocketData => "SOCKET_DATA",
    MediaBugStart => "MEDIA_BUG_START",
    MediaBugStop => "MEDIA_BUG_STOP",
    ConferenceDataQuery => "CONFERENCE_DATA_QUERY",
    ConferenceData => "CONFERENCE_DATA",
    CallSetupReq => "CALL_SETUP_REQ",
    CallSetupResult => "CALL_SETUP_RESULT",
    CallDetail => "CALL_DETAIL",
    DeviceState => "DEVICE_STATE",
    Text => "TEXT",
    ShutdownRequested => "SHUTDOWN_REQUESTED",
    StartRecording => "START_RECORDING",
    /// Subscribe to all events
    All => "ALL",
}

/// Error returned when parsing an unknown event type string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEventTypeError(pub String);

impl fmt::Display for ParseEventTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event type: {}", self.0)
    }
}

impl std::error::Error for ParseEventTypeError {}


/// A decoded ESL event: header map plus optional body.
///
/// Built once by the protocol layer and treated as read-only from then on;
/// cloning is the way to hand the same event to several listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EslEvent {
    event_type: Option<EslEventType>,
    headers: HashMap<String, String>,
    body: Option<String>,
}

impl EslEvent {
    /// Create a new empty event
    pub fn new() -> Self {
        Self {
            event_type: None,
            headers: HashMap::new(),
            body: None,
        }
    }

    /// Create an event of the given type with its `Event-Name` header set.
    pub fn with_type(event_type: EslEventType) -> Self {
        let mut event = Self::new();
        event.set_header(EventHeader::EventName, event_type.as_str());
        event
    }

    /// Parsed event type, if the name is one this crate knows.
    pub fn event_type(&self) -> Option<EslEventType> {
        self.event_type
    }

    /// Raw `Event-Name` header.
    pub fn event_name(&self) -> Option<&str> {
        self.header(EventHeader::EventName)
    }

    /// Look up a header by name (case-sensitive).
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .map(|s| s.as_str())
    }

    /// All headers as a map.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Set or overwrite a header. Setting `Event-Name` also updates [`event_type`](Self::event_type).
    pub fn set_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let name = name.as_ref();
        let value = value.into();
        if EventHeader::EventName.matches(name) {
            self.event_type = EslEventType::parse_event_type(&value);
        }
        self.headers
            .insert(name.to_string(), value);
    }

    /// Remove a header, returning its value if it existed.
    pub fn del_header(&mut self, name: &str) -> Option<String> {
        if EventHeader::EventName.matches(name) {
            self.event_type = None;
        }
        self.headers
            .remove(name)
    }

    /// Event body (the content after the event's own header block).
    pub fn body(&self) -> Option<&str> {
        self.body
            .as_deref()
    }

    /// Set the event body.
    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = Some(body.into());
    }

    /// Body split into lines, in order. Empty when there is no body.
    ///
    /// `bgapi` results and `getvar`-style replies are read this way.
    pub fn body_lines(&self) -> impl Iterator<Item = &str> {
        self.body
            .as_deref()
            .unwrap_or("")
            .lines()
    }

    /// `Unique-ID` header, falling back to `Caller-Unique-ID`.
    pub fn unique_id(&self) -> Option<&str> {
        self.header(EventHeader::UniqueId)
            .or_else(|| self.header(EventHeader::CallerUniqueId))
    }

    /// `Job-UUID` header from `bgapi` `BACKGROUND_JOB` events.
    pub fn job_uuid(&self) -> Option<&str> {
        self.header(EventHeader::JobUuid)
    }

    /// `true` for `bgapi` completion events.
    pub fn is_background_job(&self) -> bool {
        self.event_name() == Some(BACKGROUND_JOB_EVENT)
    }

    /// `Channel-Name` header (e.g. `sofia/internal/1000@domain`).
    pub fn channel_name(&self) -> Option<&str> {
        self.header(EventHeader::ChannelName)
    }

    pub fn caller_id_number(&self) -> Option<&str> {
        self.header(EventHeader::CallerCallerIdNumber)
    }

    pub fn caller_id_name(&self) -> Option<&str> {
        self.header(EventHeader::CallerCallerIdName)
    }

    /// `Hangup-Cause` header (e.g. `NORMAL_CLEARING`, `USER_BUSY`).
    pub fn hangup_cause(&self) -> Option<&str> {
        self.header(EventHeader::HangupCause)
    }

    /// `Event-Subclass` header for `CUSTOM` events (e.g. `sofia::register`).
    pub fn event_subclass(&self) -> Option<&str> {
        self.header(EventHeader::EventSubclass)
    }

    /// Look up a channel variable by name (`variable_{name}` header).
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.header(format!("variable_{}", name))
    }

    /// Check whether this event matches the given type.
    pub fn is_event_type(&self, event_type: EslEventType) -> bool {
        self.event_type == Some(event_type)
    }

    /// Serialize to ESL plain text wire format with percent-encoded header values.
    ///
    /// This is the body of a `text/event-plain` frame and the inverse of plain
    /// event decoding. `Event-Name` comes first, remaining headers are sorted
    /// for deterministic output, and `Content-Length` is recomputed from the body.
    pub fn to_plain_format(&self) -> String {
        self.write_plain(true)
    }

    /// Header lines, then either a blank line or `Content-Length` and the body.
    ///
    /// With `encode` off, values are written verbatim (the `sendevent` form);
    /// callers must have rejected line terminators.
    pub(crate) fn write_plain(&self, encode: bool) -> String {
        use std::fmt::Write;
        let value_of = |value: &str| -> String {
            if encode {
                percent_encode(value.as_bytes(), NON_ALPHANUMERIC).to_string()
            } else {
                value.to_string()
            }
        };
        let mut result = String::new();

        if let Some(event_name) = self.event_name() {
            let _ = writeln!(result, "{}: {}", EventHeader::EventName, value_of(event_name));
        }

        for (key, value) in self.sorted_headers() {
            let _ = writeln!(result, "{}: {}", key, value_of(value));
        }

        if let Some(body) = &self.body {
            let _ = writeln!(result, "Content-Length: {}", body.len());
            result.push('\n');
            result.push_str(body);
        } else {
            result.push('\n');
        }

        result
    }

    /// Headers other than `Event-Name` and `Content-Length`, sorted by name.
    fn sorted_headers(&self) -> Vec<(&str, &str)> {
        let mut headers: Vec<_> = self
            .headers
            .iter()
            .filter(|(k, _)| !EventHeader::EventName.matches(k) && k.as_str() != "Content-Length")
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        headers.sort_by_key(|(k, _)| *k);
        headers
    }
}

impl Default for EslEvent {
    fn default() -> Self {
        Self::new()
    }
}
