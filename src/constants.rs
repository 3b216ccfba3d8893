//! Protocol constants and configuration values

/// Default FreeSWITCH ESL port for inbound connections
pub const DEFAULT_ESL_PORT: u16 = 8021;

/// Default port FreeSWITCH dials for `socket` dialplan applications
pub const DEFAULT_OUTBOUND_PORT: u16 = 8084;

/// Socket buffer size for reading from TCP stream (64KB) - standard TCP receive window
pub const SOCKET_BUF_SIZE: usize = 65536;

/// Buffer allocation size (64KB) - used for both initial allocation and growth increments
pub const BUF_CHUNK: usize = 64 * 1024;

/// Maximum header block for inbound connections (64KB).
/// Ordinary replies and event envelopes carry a handful of headers.
pub const MAX_HEADER_BLOCK_INBOUND: usize = 64 * 1024;

/// Maximum header block for outbound connections (1MB).
/// The `connect` reply carries every channel variable as a header, with no
/// `Content-Length`, so the whole session snapshot lives in the header block.
pub const MAX_HEADER_BLOCK_OUTBOUND: usize = 1024 * 1024;

/// Maximum single message body (8MB) - validates Content-Length header
/// No legitimate ESL message should exceed this (largest is sofia status ~1-2MB)
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Protocol message terminators
pub const HEADER_TERMINATOR: &str = "\n\n";
pub const LINE_TERMINATOR: &str = "\n";

/// Content-Type header values
pub const CONTENT_TYPE_AUTH_REQUEST: &str = "auth/request";
pub const CONTENT_TYPE_COMMAND_REPLY: &str = "command/reply";
pub const CONTENT_TYPE_API_RESPONSE: &str = "api/response";
pub const CONTENT_TYPE_DISCONNECT_NOTICE: &str = "text/disconnect-notice";
pub const CONTENT_TYPE_RUDE_REJECTION: &str = "text/rude-rejection";
pub const CONTENT_TYPE_TEXT_EVENT_PLAIN: &str = "text/event-plain";
pub const CONTENT_TYPE_TEXT_EVENT_JSON: &str = "text/event-json";
pub const CONTENT_TYPE_TEXT_EVENT_XML: &str = "text/event-xml";
pub const CONTENT_TYPE_LOG_DATA: &str = "log/data";

/// `Content-Disposition` value on a disconnect notice that keeps the socket open.
pub const DISPOSITION_LINGER: &str = "linger";

/// Event name carried by `bgapi` completion events.
pub const BACKGROUND_JOB_EVENT: &str = "BACKGROUND_JOB";

/// Event name given to the outbound `connect` reply once reinterpreted as an event.
pub const CHANNEL_DATA_EVENT: &str = "CHANNEL_DATA";

/// Connection timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Maximum number of queued events per listener before dropping
pub const MAX_EVENT_QUEUE_SIZE: usize = 1000;

/// Upper bound on listener callbacks running at once across one outbound server.
pub const DEFAULT_CALLBACK_CONCURRENCY: usize = 32;
