//! Connection management for ESL
//!
//! Every connection runs two tasks: a reader that owns the frame decoder and
//! routes each message through the [`Correlator`], and a writer that drains
//! the correlator's outgoing queue onto the socket. [`EslClient`] is a cheap
//! handle over the state they share.

use std::borrow::Cow;
use std::fmt;
use std::ops::ControlFlow;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    command::{sendevent_wire, CommandResponse, EslCommand, SendMsg},
    constants::{
        DEFAULT_TIMEOUT_MS, HEADER_TERMINATOR, LINE_TERMINATOR, MAX_EVENT_QUEUE_SIZE,
        SOCKET_BUF_SIZE,
    },
    correlation::{Correlator, PendingSlot, Routed, SendGate},
    dispatch::{EslEventStream, EventFilter, EventListener, ListenerId, ListenerRegistry},
    error::{EslError, EslResult},
    event::{EslEvent, EslEventType, EventFormat},
    frame::{DecoderConfig, FrameDecoder, RawFrame},
    protocol::EslMessage,
};

/// Connection mode for ESL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Inbound connection - client connects to FreeSWITCH
    Inbound,
    /// Outbound connection - FreeSWITCH connects to client
    Outbound,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionMode::Inbound => f.write_str("inbound"),
            ConnectionMode::Outbound => f.write_str("outbound"),
        }
    }
}

/// Lifecycle of one connection.
///
/// Inbound: `Connecting -> AwaitingAuthRequest -> Authenticating -> Ready`.
/// Outbound: `Connecting -> Handshaking -> Ready`. Either ends in `Closing ->
/// Closed`, or in `Failed` from any state before `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ConnectionState {
    Connecting,
    AwaitingAuthRequest,
    Authenticating,
    Handshaking,
    Ready,
    Closing,
    Closed,
    Failed,
}

impl ConnectionState {
    /// `true` once the connection can no longer carry commands.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Closing | ConnectionState::Closed | ConnectionState::Failed
        )
    }

    fn is_handshake(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::AwaitingAuthRequest
                | ConnectionState::Authenticating
                | ConnectionState::Handshaking
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingAuthRequest => "awaiting-auth-request",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Ready => "ready",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Reason for disconnection
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// Server sent a text/disconnect-notice without the linger disposition
    ServerNotice,
    /// Server sent text/rude-rejection (ACL denied the connection)
    RudeRejection,
    /// Clean EOF on the TCP connection
    ConnectionClosed,
    /// TCP I/O error (io::Error is not Clone, so we store the message)
    IoError(String),
    /// Framing error or protocol violation on the decode path
    ProtocolError(String),
    /// Authentication or outbound `connect` did not succeed
    HandshakeFailed(String),
    /// Client called disconnect()
    ClientRequested,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ServerNotice => write!(f, "server sent disconnect notice"),
            DisconnectReason::RudeRejection => write!(f, "server rejected the connection"),
            DisconnectReason::ConnectionClosed => write!(f, "connection closed"),
            DisconnectReason::IoError(msg) => write!(f, "I/O error: {}", msg),
            DisconnectReason::ProtocolError(msg) => write!(f, "protocol error: {}", msg),
            DisconnectReason::HandshakeFailed(msg) => write!(f, "handshake failed: {}", msg),
            DisconnectReason::ClientRequested => write!(f, "client requested disconnect"),
        }
    }
}

/// Options for inbound connections.
///
/// Use [`Default::default()`] for standard settings.
#[derive(Debug, Clone)]
pub struct EslConnectOptions {
    /// Bound on TCP connect plus authentication. Default: 2s.
    pub connect_timeout: Duration,
    /// Capacity of each listener's event queue. Default: 1000.
    pub event_queue_size: usize,
    pub decoder: DecoderConfig,
}

impl Default for EslConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            event_queue_size: MAX_EVENT_QUEUE_SIZE,
            decoder: DecoderConfig::for_mode(ConnectionMode::Inbound),
        }
    }
}

/// Authentication method for inbound connections.
enum AuthMethod<'a> {
    Password(&'a str),
    User { user: &'a str, password: &'a str },
}

/// State shared by the client handles and the connection's tasks.
pub(crate) struct SharedState {
    mode: ConnectionMode,
    correlator: Correlator,
    listeners: ListenerRegistry,
    shutdown: CancellationToken,
}

impl SharedState {
    /// End the connection exactly once.
    ///
    /// Pending commands and jobs fail with `ConnectionClosed(reason)`, both
    /// tasks stop, and listeners are notified after their queued events.
    /// A connection that never reached `Ready` always ends `Failed`.
    pub(crate) fn terminate(&self, reason: DisconnectReason, final_state: ConnectionState) {
        let final_state = if self
            .correlator
            .state()
            .is_handshake()
        {
            ConnectionState::Failed
        } else {
            final_state
        };
        let graceful = final_state == ConnectionState::Closed;
        if !self
            .correlator
            .close(reason.clone(), graceful)
        {
            return;
        }

        if graceful {
            info!("[STATE] {} connection closed: {}", self.mode, reason);
        } else {
            warn!("[STATE] {} connection failed: {}", self.mode, reason);
        }
        self.shutdown
            .cancel();
        self.correlator
            .finish(final_state);
        self.listeners
            .close(reason);
    }
}

/// ESL client handle (Clone + Send)
///
/// Any number of tasks may issue commands concurrently; replies are matched
/// to callers in send order.
#[derive(Clone)]
pub struct EslClient {
    shared: Arc<SharedState>,
}

impl fmt::Debug for EslClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EslClient")
            .field("mode", &self.shared.mode)
            .field("state", &self.state())
            .finish()
    }
}

/// Background reader loop
async fn reader_loop<R>(
    reader: ReadHalf<R>,
    decoder: FrameDecoder,
    shared: Arc<SharedState>,
    auth_tx: Option<oneshot::Sender<()>>,
) where
    R: AsyncRead + AsyncWrite + Send + 'static,
{
    let result = AssertUnwindSafe(reader_loop_inner(reader, decoder, shared.clone(), auth_tx));
    if result
        .catch_unwind()
        .await
        .is_err()
    {
        error!("[RECV] reader task panicked");
        shared.terminate(
            DisconnectReason::IoError("reader task panicked".to_string()),
            ConnectionState::Failed,
        );
    }
}

async fn reader_loop_inner<R>(
    mut reader: ReadHalf<R>,
    mut decoder: FrameDecoder,
    shared: Arc<SharedState>,
    mut auth_tx: Option<oneshot::Sender<()>>,
) where
    R: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut read_buffer = vec![0u8; SOCKET_BUF_SIZE];

    loop {
        // Route everything already buffered before reading again
        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => {
                    if handle_frame(frame, &shared, &mut auth_tx).is_break() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("[RECV] framing error: {}", e);
                    shared.terminate(
                        DisconnectReason::ProtocolError(e.to_string()),
                        ConnectionState::Failed,
                    );
                    return;
                }
            }
        }

        let read_result = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => {
                trace!("[RECV] shutdown requested, reader exiting");
                return;
            }
            r = reader.read(&mut read_buffer) => r,
        };

        match read_result {
            Ok(0) => {
                info!("[RECV] connection closed by peer (EOF)");
                shared.terminate(DisconnectReason::ConnectionClosed, ConnectionState::Closed);
                return;
            }
            Ok(n) => {
                trace!("[RECV] read {} bytes from socket", n);
                decoder.add_data(&read_buffer[..n]);
            }
            Err(e) => {
                warn!("[RECV] read error: {}", e);
                shared.terminate(DisconnectReason::IoError(e.to_string()), ConnectionState::Failed);
                return;
            }
        }
    }
}

/// Classify and route one frame. `Break` means the connection is over.
fn handle_frame(
    frame: RawFrame,
    shared: &SharedState,
    auth_tx: &mut Option<oneshot::Sender<()>>,
) -> ControlFlow<()> {
    let message = match EslMessage::from_frame(frame) {
        Ok(message) => message,
        Err(EslError::UnknownContentType { content_type }) => {
            warn!("[RECV] skipping frame with unknown Content-Type {:?}", content_type);
            return ControlFlow::Continue(());
        }
        Err(e) => {
            warn!("[RECV] {}", e);
            shared.terminate(
                DisconnectReason::ProtocolError(e.to_string()),
                ConnectionState::Failed,
            );
            return ControlFlow::Break(());
        }
    };
    trace!("[RECV] {}", message.content_type());

    match shared
        .correlator
        .route(message)
    {
        Ok(Routed::Consumed) => {}
        Ok(Routed::Event(event)) => shared
            .listeners
            .dispatch(&event),
        Ok(Routed::AuthRequest) => match auth_tx.take() {
            Some(tx) => {
                debug!("[AUTH] auth request received");
                let _ = tx.send(());
            }
            None => warn!(
                "[RECV] unexpected auth/request on {} connection ignored",
                shared.mode
            ),
        },
        Ok(Routed::DisconnectNotice { linger: true }) => {
            debug!("[RECV] disconnect notice with linger disposition, staying connected");
        }
        Ok(Routed::DisconnectNotice { linger: false }) => {
            info!("[RECV] disconnect notice from server");
            shared.terminate(DisconnectReason::ServerNotice, ConnectionState::Closed);
            return ControlFlow::Break(());
        }
        Ok(Routed::RudeRejection) => {
            warn!("[RECV] connection rejected by server");
            shared.terminate(DisconnectReason::RudeRejection, ConnectionState::Failed);
            return ControlFlow::Break(());
        }
        Err(e) => {
            warn!("[RECV] {}", e);
            shared.terminate(
                DisconnectReason::ProtocolError(e.to_string()),
                ConnectionState::Failed,
            );
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}

/// Background writer loop; the only task that touches the write half.
async fn writer_loop<W>(
    mut writer: WriteHalf<W>,
    mut rx: mpsc::UnboundedReceiver<String>,
    shared: Arc<SharedState>,
) where
    W: AsyncRead + AsyncWrite + Send + 'static,
{
    loop {
        let wire = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(wire) => wire,
                None => break,
            },
        };
        if let Err(e) = writer
            .write_all(wire.as_bytes())
            .await
        {
            warn!("[SEND] write failed: {}", e);
            shared.terminate(DisconnectReason::IoError(e.to_string()), ConnectionState::Failed);
            break;
        }
    }
    trace!("[SEND] writer exiting");
    let _ = writer
        .shutdown()
        .await;
}

/// Command line as it may appear in logs.
fn loggable(command: &EslCommand, line: &str) -> String {
    match command {
        EslCommand::Auth { .. } => "auth [REDACTED]".to_string(),
        EslCommand::UserAuth { user, .. } => format!("userauth {}:[REDACTED]", user),
        _ => line.to_string(),
    }
}

fn validate_command_text(command: &str) -> EslResult<()> {
    if command
        .trim()
        .is_empty()
    {
        return Err(EslError::invalid_argument("command must not be empty"));
    }
    if command.contains(['\n', '\r']) {
        return Err(EslError::invalid_argument(
            "command must be a single line; use send_multiline_command",
        ));
    }
    Ok(())
}

fn event_types_to_string(events: &[EslEventType]) -> String {
    if events.contains(&EslEventType::All) {
        return EslEventType::All
            .as_str()
            .to_string();
    }
    events
        .iter()
        .map(|e| e.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

impl EslClient {
    /// Connect to FreeSWITCH (inbound mode) with password authentication
    ///
    /// ```rust,no_run
    /// # async fn example() -> Result<(), freeswitch_esl_engine::EslError> {
    /// use freeswitch_esl_engine::EslClient;
    ///
    /// let client = EslClient::connect("127.0.0.1", 8021, "ClueCon").await?;
    /// let status = client.api("status").await?;
    /// println!("{}", status.body());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(host: &str, port: u16, password: &str) -> EslResult<Self> {
        Self::connect_inner(
            host,
            port,
            AuthMethod::Password(password),
            EslConnectOptions::default(),
        )
        .await
    }

    /// Connect to FreeSWITCH (inbound mode) with password authentication and custom options
    pub async fn connect_with_options(
        host: &str,
        port: u16,
        password: &str,
        options: EslConnectOptions,
    ) -> EslResult<Self> {
        Self::connect_inner(host, port, AuthMethod::Password(password), options).await
    }

    /// Connect with user authentication
    ///
    /// The user must be in the format `user@domain` (e.g., `admin@default`).
    pub async fn connect_with_user(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
    ) -> EslResult<Self> {
        Self::connect_inner(
            host,
            port,
            AuthMethod::User { user, password },
            EslConnectOptions::default(),
        )
        .await
    }

    /// Connect with user authentication and custom options
    pub async fn connect_with_user_and_options(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        options: EslConnectOptions,
    ) -> EslResult<Self> {
        Self::connect_inner(host, port, AuthMethod::User { user, password }, options).await
    }

    async fn connect_inner(
        host: &str,
        port: u16,
        method: AuthMethod<'_>,
        options: EslConnectOptions,
    ) -> EslResult<Self> {
        let auth = match method {
            AuthMethod::Password(password) => EslCommand::Auth {
                password: password.to_string(),
            },
            AuthMethod::User { user, password } => EslCommand::UserAuth {
                user: user.to_string(),
                password: password.to_string(),
            },
        };
        // Reject bad credentials before touching the network
        let auth_line = auth.command_line()?;

        let timeout_ms = options
            .connect_timeout
            .as_millis() as u64;
        let deadline = Instant::now() + options.connect_timeout;

        info!("[CONNECT] connecting to FreeSWITCH at {}:{}", host, port);
        let stream = match timeout_at(deadline, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => {
                debug!("[CONNECT] TCP connection established");
                stream
            }
            Ok(Err(e)) => {
                warn!("[CONNECT] TCP connect failed: {}", e);
                return Err(EslError::Io(e));
            }
            Err(_) => {
                warn!("[CONNECT] TCP connect timed out after {}ms", timeout_ms);
                return Err(EslError::Timeout { timeout_ms });
            }
        };

        let (auth_tx, auth_rx) = oneshot::channel();
        let client = Self::spawn(
            stream,
            ConnectionMode::Inbound,
            options.event_queue_size,
            options.decoder,
            Some(auth_tx),
        );
        client
            .shared
            .correlator
            .set_state(ConnectionState::AwaitingAuthRequest);

        let outcome = timeout_at(
            deadline,
            client.authenticate(auth_rx, auth_line, loggable(&auth, "")),
        )
        .await
        .unwrap_or_else(|_| {
            warn!("[AUTH] no authentication result within {}ms", timeout_ms);
            Err(EslError::auth_failed(format!(
                "authentication timed out after {}ms",
                timeout_ms
            )))
        });

        match outcome {
            Ok(()) => {
                info!("[CONNECT] connected and authenticated to {}:{}", host, port);
                Ok(client)
            }
            Err(e) => {
                client
                    .shared
                    .terminate(
                        DisconnectReason::HandshakeFailed(e.to_string()),
                        ConnectionState::Failed,
                    );
                Err(e)
            }
        }
    }

    async fn authenticate(
        &self,
        auth_rx: oneshot::Receiver<()>,
        auth_line: String,
        redacted: String,
    ) -> EslResult<()> {
        debug!("[AUTH] waiting for auth request from FreeSWITCH");
        if auth_rx
            .await
            .is_err()
        {
            return Err(self.closed_error());
        }

        self.shared
            .correlator
            .set_state(ConnectionState::Authenticating);
        debug!("[SEND] {}", redacted);
        let message = self
            .request(format!("{}{}", auth_line, HEADER_TERMINATOR), SendGate::Handshake)
            .await?;
        let response = CommandResponse::new(redacted, message);
        if !response.is_ok() {
            let reply_text = response
                .reply_text()
                .map(Cow::into_owned)
                .unwrap_or_else(|| "no Reply-Text".to_string());
            warn!("[AUTH] rejected: {}", reply_text);
            return Err(EslError::auth_failed(reply_text));
        }

        debug!("[AUTH] authentication successful");
        self.shared
            .correlator
            .set_state(ConnectionState::Ready);
        Ok(())
    }

    /// Split `stream` and start the reader and writer tasks.
    pub(crate) fn spawn<S>(
        stream: S,
        mode: ConnectionMode,
        event_queue_size: usize,
        decoder: DecoderConfig,
        auth_tx: Option<oneshot::Sender<()>>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(SharedState {
            mode,
            correlator: Correlator::new(outgoing_tx),
            listeners: ListenerRegistry::new(event_queue_size),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(reader_loop(
            read_half,
            FrameDecoder::with_config(decoder),
            shared.clone(),
            auth_tx,
        ));
        tokio::spawn(writer_loop(write_half, outgoing_rx, shared.clone()));

        EslClient { shared }
    }

    /// Outbound handshake: send `connect` and return the channel data.
    ///
    /// Must be the first command on an accepted socket.
    pub(crate) async fn connect_session(&self, handshake_timeout: Duration) -> EslResult<EslEvent> {
        self.shared
            .correlator
            .set_state(ConnectionState::Handshaking);
        debug!("[SEND] connect");

        let wire = format!("{}{}", EslCommand::Connect.command_line()?, HEADER_TERMINATOR);
        let outcome = match timeout(handshake_timeout, self.request(wire, SendGate::Handshake)).await
        {
            Ok(Ok(message)) => {
                let response = CommandResponse::new("connect", message);
                match response.reply_text() {
                    Some(text) if text.starts_with("-ERR") => Err(EslError::CommandFailed {
                        reply_text: text.into_owned(),
                    }),
                    _ => Ok(response
                        .message()
                        .to_channel_data()),
                }
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EslError::Timeout {
                timeout_ms: handshake_timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(channel_data) => {
                self.shared
                    .correlator
                    .set_state(ConnectionState::Ready);
                debug!(
                    "[OUTBOUND] session {} established",
                    channel_data
                        .unique_id()
                        .unwrap_or("<unknown>")
                );
                Ok(channel_data)
            }
            Err(e) => {
                warn!("[OUTBOUND] connect handshake failed: {}", e);
                self.shared
                    .terminate(
                        DisconnectReason::HandshakeFailed(e.to_string()),
                        ConnectionState::Failed,
                    );
                Err(e)
            }
        }
    }

    fn closed_error(&self) -> EslError {
        EslError::ConnectionClosed(
            self.shared
                .correlator
                .close_reason()
                .unwrap_or(DisconnectReason::ConnectionClosed),
        )
    }

    /// Queue `wire` behind every earlier command and wait for its reply.
    async fn request(&self, wire: String, gate: SendGate) -> EslResult<EslMessage> {
        let (tx, rx) = oneshot::channel();
        self.shared
            .correlator
            .submit(wire, PendingSlot::Reply(tx), gate)?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(self.closed_error()),
        }
    }

    async fn send_line(&self, line: String, log_line: String) -> EslResult<CommandResponse> {
        debug!("[SEND] {}", log_line);
        let message = self
            .request(format!("{}{}", line, HEADER_TERMINATOR), SendGate::Ready)
            .await?;
        let response = CommandResponse::new(log_line, message);
        debug!(
            "[RECV] reply to {:?}: {:?}",
            response.command(),
            response.status()
        );
        Ok(response)
    }

    /// Send one command line and wait for its reply.
    ///
    /// The blank-line terminator is appended here. Replies are matched to
    /// commands strictly in send order, so this may be called from many
    /// tasks at once. There is no per-command timeout: the future resolves
    /// with the reply or with [`EslError::ConnectionClosed`].
    pub async fn send_command(&self, command: &str) -> EslResult<CommandResponse> {
        validate_command_text(command)?;
        self.send_line(command.to_string(), command.to_string())
            .await
    }

    /// Send a command spanning several lines (e.g. `sendmsg`) and wait for its reply.
    ///
    /// Each line is written followed by `\n`, then one blank line ends the
    /// command. Lines must be non-empty and free of line terminators.
    pub async fn send_multiline_command<S: AsRef<str>>(
        &self,
        lines: &[S],
    ) -> EslResult<CommandResponse> {
        let Some(first) = lines.first() else {
            return Err(EslError::invalid_argument("command has no lines"));
        };
        let mut wire = String::new();
        for line in lines {
            let line = line.as_ref();
            if line.is_empty() || line.contains(['\n', '\r']) {
                return Err(EslError::invalid_argument(format!(
                    "invalid command line {:?}",
                    line
                )));
            }
            wire.push_str(line);
            wire.push_str(LINE_TERMINATOR);
        }
        wire.push_str(LINE_TERMINATOR);

        let command = first
            .as_ref()
            .to_string();
        debug!("[SEND] {} ({} lines)", command, lines.len());
        let message = self
            .request(wire, SendGate::Ready)
            .await?;
        Ok(CommandResponse::new(command, message))
    }

    /// Send a background command and wait for its completion event.
    ///
    /// The synchronous reply must carry a `Job-UUID`; the returned future
    /// resolves with the `BACKGROUND_JOB` event bearing the same id, however
    /// many other events arrive in between. A `-ERR` reply fails with
    /// [`EslError::CommandFailed`]. Dropping the future abandons the job
    /// locally; the switch keeps running it.
    pub async fn send_background_command(&self, command: &str) -> EslResult<EslEvent> {
        validate_command_text(command)?;
        debug!("[SEND] {}", command);
        let (tx, rx) = oneshot::channel();
        self.shared
            .correlator
            .submit(
                format!("{}{}", command, HEADER_TERMINATOR),
                PendingSlot::Background(tx),
                SendGate::Ready,
            )?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(self.closed_error()),
        }
    }

    /// Send a typed command and wait for its reply.
    pub async fn execute(&self, command: EslCommand) -> EslResult<CommandResponse> {
        let line = command.command_line()?;
        let log_line = loggable(&command, &line);
        self.send_line(line, log_line)
            .await
    }

    /// Send a typed command and require a `+OK` reply.
    async fn execute_ok(&self, command: EslCommand) -> EslResult<()> {
        self.execute(command)
            .await?
            .into_result()
            .map(|_| ())
    }

    /// Execute API command. Blocks until FreeSWITCH completes the command.
    ///
    /// FreeSWITCH blocks the ESL socket during `api`; no events are delivered
    /// until it returns. Use [`bgapi`](Self::bgapi) for long-running commands.
    pub async fn api(&self, command: &str) -> EslResult<CommandResponse> {
        self.execute(EslCommand::Api {
            command: command.to_string(),
        })
        .await
    }

    /// Run `bgapi <command>` and wait for the `BACKGROUND_JOB` event.
    ///
    /// ```rust,no_run
    /// # async fn example(client: &freeswitch_esl_engine::EslClient) -> Result<(), freeswitch_esl_engine::EslError> {
    /// let done = client.bgapi("status").await?;
    /// println!("{}", done.body().unwrap_or(""));
    /// # Ok(())
    /// # }
    /// ```
    pub async fn bgapi(&self, command: &str) -> EslResult<EslEvent> {
        let line = EslCommand::BgApi {
            command: command.to_string(),
        }
        .command_line()?;
        self.send_background_command(&line)
            .await
    }

    /// Subscribe to events by typed enum variants.
    ///
    /// For `CUSTOM` event subclasses (e.g., `sofia::register`), use
    /// [`subscribe_events_raw`](Self::subscribe_events_raw) instead.
    pub async fn subscribe_events(
        &self,
        format: EventFormat,
        events: &[EslEventType],
    ) -> EslResult<()> {
        self.subscribe_events_raw(format, &event_types_to_string(events))
            .await
    }

    /// Subscribe to events using raw event name strings.
    ///
    /// ```rust,no_run
    /// # async fn example(client: &freeswitch_esl_engine::EslClient) -> Result<(), freeswitch_esl_engine::EslError> {
    /// use freeswitch_esl_engine::EventFormat;
    /// client.subscribe_events_raw(EventFormat::Plain, "CUSTOM sofia::register").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn subscribe_events_raw(&self, format: EventFormat, events: &str) -> EslResult<()> {
        self.execute_ok(EslCommand::Events {
            format,
            events: events.to_string(),
        })
        .await?;
        info!("[SEND] subscribed to '{}' ({})", events, format);
        Ok(())
    }

    /// Unsubscribe from specific events.
    pub async fn nixevent(&self, events: &[EslEventType]) -> EslResult<()> {
        self.execute_ok(EslCommand::NixEvent {
            events: event_types_to_string(events),
        })
        .await
    }

    /// Unsubscribe from all events.
    pub async fn noevents(&self) -> EslResult<()> {
        self.execute_ok(EslCommand::NoEvents)
            .await
    }

    /// Set event filter
    pub async fn filter_events(&self, header: &str, value: &str) -> EslResult<()> {
        self.execute_ok(EslCommand::Filter {
            header: header.to_string(),
            value: value.to_string(),
        })
        .await?;
        debug!("[SEND] filter set: {} = {}", header, value);
        Ok(())
    }

    /// Remove an event filter for a specific header.
    ///
    /// Without a value, removes all filters for the given header.
    pub async fn filter_delete(&self, header: &str, value: Option<&str>) -> EslResult<()> {
        self.execute_ok(EslCommand::FilterDelete {
            header: header.to_string(),
            value: value.map(str::to_string),
        })
        .await
    }

    /// Remove all event filters.
    pub async fn filter_delete_all(&self) -> EslResult<()> {
        self.filter_delete("all", None)
            .await
    }

    /// Subscribe to the attached session's events (outbound mode).
    pub async fn myevents(&self, format: EventFormat) -> EslResult<()> {
        self.execute_ok(EslCommand::MyEvents { format, uuid: None })
            .await
    }

    /// Subscribe to one session's events by UUID (inbound mode).
    pub async fn myevents_uuid(&self, uuid: &str, format: EventFormat) -> EslResult<()> {
        self.execute_ok(EslCommand::MyEvents {
            format,
            uuid: Some(uuid.to_string()),
        })
        .await
    }

    /// Redirect session events to this socket (outbound mode).
    pub async fn divert_events(&self, on: bool) -> EslResult<()> {
        self.execute_ok(EslCommand::DivertEvents { on })
            .await
    }

    /// Keep the socket open after the channel hangs up (outbound mode).
    ///
    /// The switch then sends a `text/disconnect-notice` with
    /// `Content-Disposition: linger`, which does not close this connection.
    /// Pass `None` for indefinite linger, or `Some(seconds)` for a timeout.
    pub async fn linger(&self, timeout: Option<u32>) -> EslResult<()> {
        self.execute_ok(EslCommand::Linger { timeout })
            .await
    }

    pub async fn nolinger(&self) -> EslResult<()> {
        self.execute_ok(EslCommand::NoLinger)
            .await
    }

    /// Continue the dialplan when this socket goes away (outbound mode).
    pub async fn resume(&self) -> EslResult<()> {
        self.execute_ok(EslCommand::Resume)
            .await
    }

    /// Enable FreeSWITCH log forwarding at the given level.
    pub async fn log(&self, level: &str) -> EslResult<CommandResponse> {
        self.execute(EslCommand::Log {
            level: level.to_string(),
        })
        .await
    }

    /// Disable log forwarding.
    pub async fn nolog(&self) -> EslResult<CommandResponse> {
        self.execute(EslCommand::NoLog)
            .await
    }

    /// Read a channel variable (outbound mode).
    ///
    /// `getvar` answers with the bare value in `Reply-Text`, no `+OK`
    /// prefix; a missing variable yields an empty string.
    pub async fn getvar(&self, name: &str) -> EslResult<String> {
        let response = self
            .execute(EslCommand::GetVar {
                name: name.to_string(),
            })
            .await?;
        Ok(response
            .reply_text()
            .map(Cow::into_owned)
            .unwrap_or_default())
    }

    /// Send a call-control message built with [`SendMsg`].
    pub async fn send_msg(&self, msg: SendMsg) -> EslResult<CommandResponse> {
        let lines = msg.to_lines()?;
        self.send_multiline_command(&lines)
            .await
    }

    /// Fire an event into FreeSWITCH's event bus.
    ///
    /// Headers and body are sent as-is (not percent-encoded). If the event
    /// has a `Unique-ID` header, FreeSWITCH also queues it to that session.
    pub async fn sendevent(&self, event: &EslEvent) -> EslResult<CommandResponse> {
        let wire = sendevent_wire(event)?;
        let command = wire
            .lines()
            .next()
            .unwrap_or_default()
            .to_string();
        debug!("[SEND] {}", command);
        let message = self
            .request(wire, SendGate::Ready)
            .await?;
        Ok(CommandResponse::new(command, message))
    }

    /// Ask the switch to end the session; it answers `+OK bye` and then
    /// sends a disconnect notice.
    pub async fn exit(&self) -> EslResult<CommandResponse> {
        self.execute(EslCommand::Exit)
            .await
    }

    /// Register a callback listener for events matching `filter`.
    ///
    /// The listener runs on its own task and sees its events in wire order.
    pub fn add_listener<L: EventListener>(
        &self,
        filter: impl Into<EventFilter>,
        listener: L,
    ) -> ListenerId {
        let id = self
            .shared
            .listeners
            .add_listener(filter.into(), Arc::new(listener));
        debug!("[DISPATCH] {} registered", id);
        id
    }

    /// Unregister a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared
            .listeners
            .remove(id)
    }

    /// Stream of events matching `filter`, ending when the connection closes.
    pub fn event_stream(&self, filter: impl Into<EventFilter>) -> EslEventStream {
        self.shared
            .listeners
            .add_stream(
                filter.into(),
                self.shared
                    .correlator
                    .subscribe(),
            )
    }

    /// Number of events dropped due to a full listener queue.
    pub fn dropped_event_count(&self) -> u64 {
        self.shared
            .listeners
            .dropped_count()
    }

    pub fn mode(&self) -> ConnectionMode {
        self.shared.mode
    }

    /// Current connection state snapshot.
    pub fn state(&self) -> ConnectionState {
        self.shared
            .correlator
            .state()
    }

    /// Receiver notified on every state change.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.shared
            .correlator
            .subscribe()
    }

    /// Whether the connection accepts commands.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Why the connection ended, once it has.
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.shared
            .correlator
            .close_reason()
    }

    /// Close the connection locally.
    ///
    /// Pending commands fail with `ConnectionClosed(ClientRequested)`.
    pub fn disconnect(&self) {
        info!("[STATE] client requested disconnect");
        self.shared
            .terminate(DisconnectReason::ClientRequested, ConnectionState::Closed);
    }
}
