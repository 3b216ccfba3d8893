//! Typed header names: protocol framing headers and event payload headers.

/// Error returned when parsing an unrecognized header name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseHeaderError(pub String);

impl std::fmt::Display for ParseHeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown header: {}", self.0)
    }
}

impl std::error::Error for ParseHeaderError {}

define_header_enum! {
    error_type: ParseHeaderError,
    /// Headers on the outer frame that the engine itself interprets.
    ///
    /// Everything else in a frame's header block is opaque to the decoder.
    pub enum FrameHeader {
        ContentType => "Content-Type",
        ContentLength => "Content-Length",
        ContentDisposition => "Content-Disposition",
        ReplyText => "Reply-Text",
        JobUuid => "Job-UUID",
        SocketMode => "Socket-Mode",
        Control => "Control",
    }
}

define_header_enum! {
    error_type: ParseHeaderError,
    /// Header names that appear on decoded events.
    ///
    /// Use with [`EslEvent::header()`](crate::EslEvent::header) for typed lookups.
    pub enum EventHeader {
        EventName => "Event-Name",
        EventSubclass => "Event-Subclass",
        UniqueId => "Unique-ID",
        CallerUniqueId => "Caller-Unique-ID",
        JobUuid => "Job-UUID",
        JobCommand => "Job-Command",
        JobCommandArg => "Job-Command-Arg",
        ChannelName => "Channel-Name",
        ChannelState => "Channel-State",
        CallerCallerIdName => "Caller-Caller-ID-Name",
        CallerCallerIdNumber => "Caller-Caller-ID-Number",
        CallerDestinationNumber => "Caller-Destination-Number",
        HangupCause => "Hangup-Cause",
        CoreUuid => "Core-UUID",
    }
}
