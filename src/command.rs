//! Command wire builders and reply interpretation

use std::borrow::Cow;
use std::fmt;

use crate::{
    constants::LINE_TERMINATOR,
    error::{EslError, EslResult},
    event::{EslEvent, EventFormat},
    protocol::{ContentType, EslMessage},
};

/// Reject user-supplied strings containing line terminators.
///
/// ESL commands are line-delimited; an embedded newline would let a caller
/// smuggle a second command onto the wire and desynchronise the reply queue.
fn validate_no_newlines(s: &str, context: &str) -> EslResult<()> {
    if s.contains('\n') || s.contains('\r') {
        return Err(EslError::invalid_argument(format!(
            "{} must not contain newlines",
            context
        )));
    }
    Ok(())
}

/// Verdict derived from a reply.
///
/// FreeSWITCH answers `+OK …` on success and `-ERR …` on failure. A handful
/// of commands (`getvar`, most `api` calls) return bare text instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReplyStatus {
    /// Verdict line starts with `+OK`.
    Ok,
    /// Verdict line starts with `-ERR`, or there is no verdict line at all.
    Err,
    /// Verdict line present but neither `+OK` nor `-ERR`.
    Other,
}

impl ReplyStatus {
    fn classify(verdict: Option<&str>) -> Self {
        match verdict {
            Some(t) if t.starts_with("+OK") => ReplyStatus::Ok,
            Some(t) if t.starts_with("-ERR") => ReplyStatus::Err,
            None => ReplyStatus::Err,
            Some(_) => ReplyStatus::Other,
        }
    }
}

/// A command paired with the message that answered it.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse {
    command: String,
    message: EslMessage,
    status: ReplyStatus,
}

impl CommandResponse {
    /// Pair `command` with its reply.
    ///
    /// The verdict line is `Reply-Text` for `command/reply` frames and the
    /// first body line for `api/response` frames.
    pub fn new(command: impl Into<String>, message: EslMessage) -> Self {
        let status = ReplyStatus::classify(verdict_line(&message).as_deref());
        Self {
            command: command.into(),
            message,
            status,
        }
    }

    /// The command text as sent, without terminator.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn message(&self) -> &EslMessage {
        &self.message
    }

    pub fn into_message(self) -> EslMessage {
        self.message
    }

    pub fn status(&self) -> ReplyStatus {
        self.status
    }

    /// `true` only for a `+OK` verdict.
    pub fn is_ok(&self) -> bool {
        self.status == ReplyStatus::Ok
    }

    /// The full verdict line (e.g. `+OK accepted`, `-ERR invalid`).
    pub fn reply_text(&self) -> Option<Cow<'_, str>> {
        verdict_line(&self.message)
    }

    /// Verdict line with the `+OK`/`-ERR` marker stripped.
    pub fn reason(&self) -> String {
        let Some(text) = self.reply_text() else {
            return String::new();
        };
        text.strip_prefix("+OK")
            .or_else(|| text.strip_prefix("-ERR"))
            .unwrap_or(&text)
            .trim()
            .to_string()
    }

    /// Body text of the reply, empty when there is none.
    pub fn body(&self) -> String {
        self.message
            .body_text()
            .map(Cow::into_owned)
            .unwrap_or_default()
    }

    /// Body split into lines.
    pub fn body_lines(&self) -> Vec<String> {
        self.body()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// `Job-UUID` of a `bgapi` acknowledgement.
    pub fn job_uuid(&self) -> Option<&str> {
        self.message
            .job_uuid()
    }

    /// `Ok(self)` for a `+OK` verdict, otherwise the matching error.
    pub fn into_result(self) -> EslResult<Self> {
        match self.status {
            ReplyStatus::Ok => Ok(self),
            ReplyStatus::Err => {
                let reply_text = self
                    .reply_text()
                    .map(Cow::into_owned)
                    .unwrap_or_else(|| "-ERR".to_string());
                Err(EslError::CommandFailed { reply_text })
            }
            ReplyStatus::Other => {
                let reply_text = self
                    .reply_text()
                    .map(Cow::into_owned)
                    .unwrap_or_default();
                Err(EslError::UnexpectedReply { reply_text })
            }
        }
    }
}

fn verdict_line(message: &EslMessage) -> Option<Cow<'_, str>> {
    match message.content_type() {
        ContentType::ApiResponse => {
            let body = message.body_text()?;
            let first = body
                .lines()
                .next()
                .unwrap_or("")
                .trim_end()
                .to_string();
            Some(Cow::Owned(first))
        }
        _ => message.reply_text(),
    }
}

/// Single-line socket commands.
///
/// [`command_line`](Self::command_line) produces the text without
/// terminator; the correlator appends the blank-line delimiter.
#[derive(Clone)]
pub enum EslCommand {
    /// Authenticate with the socket password
    Auth { password: String },
    /// Authenticate as a directory user (`user@domain`)
    UserAuth { user: String, password: String },
    /// Run an API command synchronously
    Api { command: String },
    /// Run an API command in the background
    BgApi { command: String },
    /// Subscribe to events
    Events { format: EventFormat, events: String },
    /// Unsubscribe from specific events
    NixEvent { events: String },
    /// Unsubscribe from all events
    NoEvents,
    /// Add an event filter
    Filter { header: String, value: String },
    /// Remove event filters
    FilterDelete {
        header: String,
        value: Option<String>,
    },
    /// Subscribe to a single session's events
    MyEvents {
        format: EventFormat,
        uuid: Option<String>,
    },
    /// Redirect session events to the socket (outbound)
    DivertEvents { on: bool },
    /// Keep the socket open after hangup
    Linger { timeout: Option<u32> },
    NoLinger,
    /// Continue the dialplan when the socket closes
    Resume,
    /// Forward log lines at the given level
    Log { level: String },
    NoLog,
    /// Read a channel variable (outbound)
    GetVar { name: String },
    /// Outbound session handshake
    Connect,
    Exit,
}

impl fmt::Debug for EslCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EslCommand::Auth { .. } => f
                .debug_struct("Auth")
                .field("password", &"[REDACTED]")
                .finish(),
            EslCommand::UserAuth { user, .. } => f
                .debug_struct("UserAuth")
                .field("user", user)
                .field("password", &"[REDACTED]")
                .finish(),
            EslCommand::Api { command } => f
                .debug_struct("Api")
                .field("command", command)
                .finish(),
            EslCommand::BgApi { command } => f
                .debug_struct("BgApi")
                .field("command", command)
                .finish(),
            EslCommand::Events { format, events } => f
                .debug_struct("Events")
                .field("format", format)
                .field("events", events)
                .finish(),
            EslCommand::NixEvent { events } => f
                .debug_struct("NixEvent")
                .field("events", events)
                .finish(),
            EslCommand::NoEvents => write!(f, "NoEvents"),
            EslCommand::Filter { header, value } => f
                .debug_struct("Filter")
                .field("header", header)
                .field("value", value)
                .finish(),
            EslCommand::FilterDelete { header, value } => f
                .debug_struct("FilterDelete")
                .field("header", header)
                .field("value", value)
                .finish(),
            EslCommand::MyEvents { format, uuid } => f
                .debug_struct("MyEvents")
                .field("format", format)
                .field("uuid", uuid)
                .finish(),
            EslCommand::DivertEvents { on } => f
                .debug_struct("DivertEvents")
                .field("on", on)
                .finish(),
            EslCommand::Linger { timeout } => f
                .debug_struct("Linger")
                .field("timeout", timeout)
                .finish(),
            EslCommand::NoLinger => write!(f, "NoLinger"),
            EslCommand::Resume => write!(f, "Resume"),
            EslCommand::Log { level } => f
                .debug_struct("Log")
                .field("level", level)
                .finish(),
            EslCommand::NoLog => write!(f, "NoLog"),
            EslCommand::GetVar { name } => f
                .debug_struct("GetVar")
                .field("name", name)
                .finish(),
            EslCommand::Connect => write!(f, "Connect"),
            EslCommand::Exit => write!(f, "Exit"),
        }
    }
}

impl EslCommand {
    fn join(cmd: &str, args: &[&str]) -> String {
        let mut result = String::from(cmd);
        for arg in args {
            result.push(' ');
            result.push_str(arg);
        }
        result
    }

    /// Validate user-supplied fields and render the command line.
    pub fn command_line(&self) -> EslResult<String> {
        match self {
            EslCommand::Auth { password } => {
                validate_no_newlines(password, "password")?;
                Ok(Self::join("auth", &[password]))
            }
            EslCommand::UserAuth { user, password } => {
                validate_no_newlines(user, "user")?;
                validate_no_newlines(password, "password")?;
                if !user.contains('@') {
                    return Err(EslError::invalid_argument(
                        "userauth user must be in user@domain form",
                    ));
                }
                Ok(Self::join("userauth", &[&format!("{}:{}", user, password)]))
            }
            EslCommand::Api { command } => {
                validate_no_newlines(command, "api command")?;
                Ok(Self::join("api", &[command]))
            }
            EslCommand::BgApi { command } => {
                validate_no_newlines(command, "bgapi command")?;
                Ok(Self::join("bgapi", &[command]))
            }
            EslCommand::Events { format, events } => {
                validate_no_newlines(events, "event list")?;
                Ok(Self::join("event", &[&format.to_string(), events]))
            }
            EslCommand::NixEvent { events } => {
                validate_no_newlines(events, "nixevent list")?;
                Ok(Self::join("nixevent", &[events]))
            }
            EslCommand::NoEvents => Ok("noevents".to_string()),
            EslCommand::Filter { header, value } => {
                validate_no_newlines(header, "filter header")?;
                validate_no_newlines(value, "filter value")?;
                Ok(Self::join("filter", &[header, value]))
            }
            EslCommand::FilterDelete { header, value } => {
                validate_no_newlines(header, "filter delete header")?;
                match value {
                    Some(v) => {
                        validate_no_newlines(v, "filter delete value")?;
                        Ok(Self::join("filter", &["delete", header, v]))
                    }
                    None => Ok(Self::join("filter", &["delete", header])),
                }
            }
            EslCommand::MyEvents { format, uuid } => {
                let format = format.to_string();
                match uuid {
                    Some(u) => {
                        validate_no_newlines(u, "myevents uuid")?;
                        Ok(Self::join("myevents", &[u, &format]))
                    }
                    None => Ok(Self::join("myevents", &[&format])),
                }
            }
            EslCommand::DivertEvents { on } => {
                let arg = if *on { "on" } else { "off" };
                Ok(Self::join("divert_events", &[arg]))
            }
            EslCommand::Linger { timeout } => Ok(match timeout {
                Some(n) => Self::join("linger", &[&n.to_string()]),
                None => "linger".to_string(),
            }),
            EslCommand::NoLinger => Ok("nolinger".to_string()),
            EslCommand::Resume => Ok("resume".to_string()),
            EslCommand::Log { level } => {
                validate_no_newlines(level, "log level")?;
                Ok(Self::join("log", &[level]))
            }
            EslCommand::NoLog => Ok("nolog".to_string()),
            EslCommand::GetVar { name } => {
                validate_no_newlines(name, "getvar name")?;
                Ok(Self::join("getvar", &[name]))
            }
            EslCommand::Connect => Ok("connect".to_string()),
            EslCommand::Exit => Ok("exit".to_string()),
        }
    }
}

/// Multi-line `sendmsg` command.
///
/// Each attribute becomes one `name: value` line after the `sendmsg` line;
/// send with [`EslClient::send_msg`](crate::EslClient::send_msg).
///
/// ```
/// use freeswitch_esl_engine::SendMsg;
///
/// let lines = SendMsg::for_uuid("abc-123")
///     .execute("playback", "/tmp/hello.wav")
///     .event_lock(true)
///     .to_lines()
///     .unwrap();
/// assert_eq!(lines[0], "sendmsg abc-123");
/// assert_eq!(lines[1], "call-command: execute");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendMsg {
    uuid: Option<String>,
    lines: Vec<String>,
}

impl SendMsg {
    /// Message for the session this socket controls (outbound).
    pub fn new() -> Self {
        Self::default()
    }

    /// Message for a specific channel (inbound).
    pub fn for_uuid(uuid: impl Into<String>) -> Self {
        Self {
            uuid: Some(uuid.into()),
            lines: Vec::new(),
        }
    }

    pub fn call_command(self, command: &str) -> Self {
        self.line("call-command", command)
    }

    pub fn execute_app_name(self, app: &str) -> Self {
        self.line("execute-app-name", app)
    }

    pub fn execute_app_arg(self, arg: &str) -> Self {
        self.line("execute-app-arg", arg)
    }

    /// `call-command: execute` with the application and its argument.
    pub fn execute(self, app: &str, arg: &str) -> Self {
        self.call_command("execute")
            .execute_app_name(app)
            .execute_app_arg(arg)
    }

    pub fn loops(self, count: u32) -> Self {
        self.line("loops", &count.to_string())
    }

    pub fn hangup_cause(self, cause: &str) -> Self {
        self.line("hangup-cause", cause)
    }

    /// Queue the application behind any already executing on the channel.
    pub fn event_lock(self, on: bool) -> Self {
        self.line("event-lock", if on { "true" } else { "false" })
    }

    /// Arbitrary `name: value` line.
    pub fn line(mut self, name: &str, value: &str) -> Self {
        self.lines
            .push(format!("{}: {}", name, value));
        self
    }

    /// Render the command, first line `sendmsg [uuid]`, one attribute per line.
    pub fn to_lines(&self) -> EslResult<Vec<String>> {
        let first = match &self.uuid {
            Some(uuid) => {
                validate_no_newlines(uuid, "sendmsg uuid")?;
                format!("sendmsg {}", uuid)
            }
            None => "sendmsg".to_string(),
        };
        let mut out = Vec::with_capacity(
            self.lines
                .len()
                + 1,
        );
        out.push(first);
        for line in &self.lines {
            validate_no_newlines(line, "sendmsg line")?;
            out.push(line.clone());
        }
        Ok(out)
    }
}

/// Wire text of `sendevent <name>` carrying `event`, terminator included.
///
/// Headers and body go out as-is (not percent-encoded). An event without a
/// name is sent as `CUSTOM`.
pub(crate) fn sendevent_wire(event: &EslEvent) -> EslResult<String> {
    let name = event
        .event_name()
        .unwrap_or("CUSTOM");
    validate_no_newlines(name, "event name")?;
    for (key, value) in event.headers() {
        validate_no_newlines(key, "event header name")?;
        validate_no_newlines(value, "event header value")?;
    }
    Ok(format!(
        "sendevent {}{}{}",
        name,
        LINE_TERMINATOR,
        event.write_plain(false)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameDecoder, RawFrame};

    fn reply(headers: &[(&str, &str)], body: Option<&str>) -> EslMessage {
        let headers = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let body = body.map(|b| bytes::Bytes::copy_from_slice(b.as_bytes()));
        EslMessage::from_frame(RawFrame::new(headers, body)).unwrap()
    }

    fn command_reply(reply_text: &str) -> CommandResponse {
        CommandResponse::new(
            "test",
            reply(
                &[
                    ("Content-Type", "command/reply"),
                    ("Reply-Text", reply_text),
                ],
                None,
            ),
        )
    }

    #[test]
    fn test_command_lines() {
        let cases = [
            (
                EslCommand::Auth {
                    password: "ClueCon".into(),
                },
                "auth ClueCon",
            ),
            (
                EslCommand::Api {
                    command: "status".into(),
                },
                "api status",
            ),
            (
                EslCommand::BgApi {
                    command: "originate user/1000 &park".into(),
                },
                "bgapi originate user/1000 &park",
            ),
            (
                EslCommand::Events {
                    format: EventFormat::Plain,
                    events: "ALL".into(),
                },
                "event plain ALL",
            ),
            (
                EslCommand::NixEvent {
                    events: "CHANNEL_CREATE CHANNEL_DESTROY".into(),
                },
                "nixevent CHANNEL_CREATE CHANNEL_DESTROY",
            ),
            (EslCommand::NoEvents, "noevents"),
            (
                EslCommand::MyEvents {
                    format: EventFormat::Json,
                    uuid: Some("abc-123".into()),
                },
                "myevents abc-123 json",
            ),
            (
                EslCommand::MyEvents {
                    format: EventFormat::Plain,
                    uuid: None,
                },
                "myevents plain",
            ),
            (EslCommand::Linger { timeout: None }, "linger"),
            (EslCommand::Linger { timeout: Some(600) }, "linger 600"),
            (EslCommand::NoLinger, "nolinger"),
            (EslCommand::Resume, "resume"),
            (EslCommand::DivertEvents { on: true }, "divert_events on"),
            (EslCommand::DivertEvents { on: false }, "divert_events off"),
            (
                EslCommand::Log {
                    level: "debug".into(),
                },
                "log debug",
            ),
            (EslCommand::NoLog, "nolog"),
            (
                EslCommand::GetVar {
                    name: "caller_id_name".into(),
                },
                "getvar caller_id_name",
            ),
            (EslCommand::Connect, "connect"),
            (EslCommand::Exit, "exit"),
        ];
        for (cmd, expected) in cases {
            assert_eq!(
                cmd.command_line()
                    .unwrap(),
                expected
            );
        }
    }

    #[test]
    fn test_filter_commands() {
        let add = EslCommand::Filter {
            header: "Event-Name".into(),
            value: "CHANNEL_CREATE".into(),
        };
        assert_eq!(
            add.command_line()
                .unwrap(),
            "filter Event-Name CHANNEL_CREATE"
        );

        let delete = EslCommand::FilterDelete {
            header: "Event-Name".into(),
            value: Some("CHANNEL_CREATE".into()),
        };
        assert_eq!(
            delete
                .command_line()
                .unwrap(),
            "filter delete Event-Name CHANNEL_CREATE"
        );

        let delete_all = EslCommand::FilterDelete {
            header: "all".into(),
            value: None,
        };
        assert_eq!(
            delete_all
                .command_line()
                .unwrap(),
            "filter delete all"
        );
    }

    #[test]
    fn test_userauth_requires_domain() {
        let ok = EslCommand::UserAuth {
            user: "1000@default".into(),
            password: "secret".into(),
        };
        assert_eq!(
            ok.command_line()
                .unwrap(),
            "userauth 1000@default:secret"
        );

        let bad = EslCommand::UserAuth {
            user: "1000".into(),
            password: "secret".into(),
        };
        assert!(matches!(
            bad.command_line(),
            Err(EslError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_newline_injection_rejected() {
        let api = EslCommand::Api {
            command: "status\n\nevent plain ALL".into(),
        };
        assert!(matches!(
            api.command_line(),
            Err(EslError::InvalidArgument { .. })
        ));

        let auth = EslCommand::Auth {
            password: "test\napi status".into(),
        };
        assert!(auth
            .command_line()
            .is_err());

        let filter = EslCommand::Filter {
            header: "Event-Name\r\n".into(),
            value: "CHANNEL_CREATE".into(),
        };
        assert!(filter
            .command_line()
            .is_err());

        let msg = SendMsg::new().execute("playback", "a.wav\nexit");
        assert!(msg
            .to_lines()
            .is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let auth = EslCommand::Auth {
            password: "secret".into(),
        };
        let debug_str = format!("{:?}", auth);
        assert!(!debug_str.contains("secret"));
        assert!(debug_str.contains("REDACTED"));

        let user_auth = EslCommand::UserAuth {
            user: "admin@default".into(),
            password: "secret".into(),
        };
        let debug_str = format!("{:?}", user_auth);
        assert!(!debug_str.contains("secret"));
        assert!(debug_str.contains("admin@default"));
    }

    #[test]
    fn test_sendmsg_lines() {
        let lines = SendMsg::new()
            .execute("bridge", "user/1000")
            .loops(2)
            .event_lock(true)
            .hangup_cause("NORMAL_CLEARING")
            .to_lines()
            .unwrap();
        assert_eq!(
            lines,
            vec![
                "sendmsg",
                "call-command: execute",
                "execute-app-name: bridge",
                "execute-app-arg: user/1000",
                "loops: 2",
                "event-lock: true",
                "hangup-cause: NORMAL_CLEARING",
            ]
        );
    }

    #[test]
    fn test_sendmsg_line_order_survives_framing() {
        let lines = SendMsg::for_uuid("abc-123")
            .call_command("execute")
            .execute_app_name("playback")
            .execute_app_arg("/tmp/a.wav")
            .line("X-Dup", "1")
            .line("X-Dup", "2")
            .to_lines()
            .unwrap();

        // What a peer sees: the first line is the command, the rest parse as headers.
        let mut wire = String::from("Content-Type: command/reply\n");
        for line in &lines[1..] {
            wire.push_str(line);
            wire.push('\n');
        }
        wire.push('\n');
        let frames = FrameDecoder::new()
            .decode(wire.as_bytes())
            .unwrap();

        let echoed: Vec<String> = frames[0]
            .headers()
            .iter()
            .skip(1)
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect();
        assert_eq!(echoed, lines[1..].to_vec());
    }

    #[test]
    fn test_reply_status_ok() {
        let resp = command_reply("+OK accepted");
        assert_eq!(resp.status(), ReplyStatus::Ok);
        assert!(resp.is_ok());
        assert_eq!(resp.reason(), "accepted");
        assert!(resp
            .into_result()
            .is_ok());
    }

    #[test]
    fn test_reply_status_err() {
        let resp = command_reply("-ERR invalid command");
        assert_eq!(resp.status(), ReplyStatus::Err);
        assert!(!resp.is_ok());
        assert_eq!(resp.reason(), "invalid command");
        let err = resp
            .into_result()
            .unwrap_err();
        assert!(
            matches!(err, EslError::CommandFailed { ref reply_text } if reply_text == "-ERR invalid command")
        );
    }

    #[test]
    fn test_reply_status_missing_header_is_err() {
        let resp = CommandResponse::new(
            "noevents",
            reply(&[("Content-Type", "command/reply")], None),
        );
        assert_eq!(resp.status(), ReplyStatus::Err);
        assert_eq!(resp.reason(), "");
        assert!(matches!(
            resp.into_result(),
            Err(EslError::CommandFailed { .. })
        ));
    }

    #[test]
    fn test_reply_status_other_getvar() {
        let resp = command_reply("sip_from_user");
        assert_eq!(resp.status(), ReplyStatus::Other);
        assert_eq!(
            resp.reply_text()
                .as_deref(),
            Some("sip_from_user")
        );
        let err = resp
            .into_result()
            .unwrap_err();
        assert!(
            matches!(err, EslError::UnexpectedReply { ref reply_text } if reply_text == "sip_from_user")
        );
    }

    #[test]
    fn test_api_response_verdict_from_body() {
        let ok = CommandResponse::new(
            "api reloadxml",
            reply(
                &[("Content-Type", "api/response")],
                Some("+OK [Success]\n"),
            ),
        );
        assert!(ok.is_ok());
        assert_eq!(ok.reason(), "[Success]");

        let err = CommandResponse::new(
            "api bogus",
            reply(
                &[("Content-Type", "api/response")],
                Some("-ERR bogus Command not found!\n"),
            ),
        );
        assert_eq!(err.status(), ReplyStatus::Err);

        let status = CommandResponse::new(
            "api status",
            reply(
                &[("Content-Type", "api/response")],
                Some("UP 0 years, 0 days\nready\n"),
            ),
        );
        assert_eq!(status.status(), ReplyStatus::Other);
        assert_eq!(status.body_lines(), vec!["UP 0 years, 0 days", "ready"]);
    }

    #[test]
    fn test_bgapi_ack_job_uuid() {
        let resp = CommandResponse::new(
            "bgapi status",
            reply(
                &[
                    ("Content-Type", "command/reply"),
                    ("Reply-Text", "+OK Job-UUID: abc123"),
                    ("Job-UUID", "abc123"),
                ],
                None,
            ),
        );
        assert!(resp.is_ok());
        assert_eq!(resp.job_uuid(), Some("abc123"));
        assert_eq!(resp.command(), "bgapi status");
    }

    #[test]
    fn sendevent_wire_format() {
        let mut event = EslEvent::with_type(crate::event::EslEventType::Custom);
        event.set_header("Event-Subclass", "myapp::alert");
        event.set_header("Alert-Text", "disk 90% full");
        event.set_body("line one\nline two\n");

        assert_eq!(
            sendevent_wire(&event).unwrap(),
            "sendevent CUSTOM\n\
             Event-Name: CUSTOM\n\
             Alert-Text: disk 90% full\n\
             Event-Subclass: myapp::alert\n\
             Content-Length: 18\n\
             \n\
             line one\nline two\n"
        );

        let bare = EslEvent::with_type(crate::event::EslEventType::Heartbeat);
        assert_eq!(
            sendevent_wire(&bare).unwrap(),
            "sendevent HEARTBEAT\nEvent-Name: HEARTBEAT\n\n"
        );
    }

    #[test]
    fn sendevent_rejects_newline_in_header() {
        let mut event = EslEvent::with_type(crate::event::EslEventType::Custom);
        event.set_header("Alert-Text", "two\nlines");
        assert!(matches!(
            sendevent_wire(&event),
            Err(EslError::InvalidArgument { .. })
        ));
    }
}
