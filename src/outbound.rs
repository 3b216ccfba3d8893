//! Outbound mode: FreeSWITCH dials us.
//!
//! A dialplan `socket` application opens one TCP connection per call. Each
//! accepted socket gets a fresh [`OutboundHandler`] from the factory, sends
//! `connect`, and hands the channel data to
//! [`on_connect`](OutboundHandler::on_connect). Later events and the final
//! disconnect are delivered to the same handler, one call at a time.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    connection::{ConnectionMode, DisconnectReason, EslClient},
    constants::{DEFAULT_CALLBACK_CONCURRENCY, DEFAULT_TIMEOUT_MS, MAX_EVENT_QUEUE_SIZE},
    dispatch::{EslEventStream, EventFilter},
    error::EslResult,
    event::EslEvent,
    frame::DecoderConfig,
};

const ACCEPT_BACKOFF_INITIAL: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Per-call callbacks for outbound sessions.
///
/// Calls for one session never overlap: `on_connect` completes before the
/// first `on_event`, and `on_disconnect` comes last. The handler may issue
/// commands through the client at any point, including from `on_connect`.
#[async_trait]
pub trait OutboundHandler: Send + Sync + 'static {
    /// The `connect` handshake succeeded; `channel_data` describes the call.
    async fn on_connect(&self, client: EslClient, channel_data: EslEvent);

    async fn on_event(&self, _client: &EslClient, _event: EslEvent) {}

    /// The session ended, or the handshake failed.
    async fn on_disconnect(&self, _reason: DisconnectReason) {}
}

/// Builds one handler per accepted connection.
pub trait HandlerFactory: Send + Sync + 'static {
    type Handler: OutboundHandler;

    fn build(&self) -> Self::Handler;
}

impl<F, H> HandlerFactory for F
where
    F: Fn() -> H + Send + Sync + 'static,
    H: OutboundHandler,
{
    type Handler = H;

    fn build(&self) -> H {
        self()
    }
}

/// Options for the outbound listener.
#[derive(Debug, Clone)]
pub struct OutboundOptions {
    /// Bound on the `connect` handshake. Default: 2s.
    pub handshake_timeout: Duration,
    /// Capacity of each session's event queue. Default: 1000.
    pub event_queue_size: usize,
    /// Handler callbacks allowed to run at once across all sessions. Default: 32.
    pub callback_concurrency: usize,
    pub decoder: DecoderConfig,
}

impl Default for OutboundOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            event_queue_size: MAX_EVENT_QUEUE_SIZE,
            callback_concurrency: DEFAULT_CALLBACK_CONCURRENCY,
            decoder: DecoderConfig::for_mode(ConnectionMode::Outbound),
        }
    }
}

/// An established outbound session, for callers driving the socket by hand.
#[derive(Debug)]
pub struct OutboundSession {
    pub client: EslClient,
    /// The `connect` reply as a `CHANNEL_DATA` event.
    pub channel_data: EslEvent,
    /// Every event received after the handshake.
    pub events: EslEventStream,
}

impl EslClient {
    /// Accept one outbound connection and perform the `connect` handshake.
    ///
    /// ```rust,no_run
    /// # async fn example() -> Result<(), freeswitch_esl_engine::EslError> {
    /// use freeswitch_esl_engine::{EslClient, OutboundOptions};
    /// use tokio::net::TcpListener;
    ///
    /// let listener = TcpListener::bind("0.0.0.0:8084").await?;
    /// let session = EslClient::accept_outbound(&listener, &OutboundOptions::default()).await?;
    /// println!("call from {:?}", session.channel_data.caller_id_number());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn accept_outbound(
        listener: &TcpListener,
        options: &OutboundOptions,
    ) -> EslResult<OutboundSession> {
        info!("[OUTBOUND] waiting for connection from FreeSWITCH");
        let (stream, addr) = listener
            .accept()
            .await?;
        info!("[OUTBOUND] accepted connection from {}", addr);

        let (client, events) = spawn_session_client(stream, options);
        let channel_data = client
            .connect_session(options.handshake_timeout)
            .await?;
        Ok(OutboundSession {
            client,
            channel_data,
            events,
        })
    }
}

/// Start the client tasks for an accepted socket, with an event stream
/// registered before anything is sent.
fn spawn_session_client(stream: TcpStream, options: &OutboundOptions) -> (EslClient, EslEventStream) {
    let client = EslClient::spawn(
        stream,
        ConnectionMode::Outbound,
        options.event_queue_size,
        options.decoder,
        None,
    );
    let events = client.event_stream(EventFilter::All);
    (client, events)
}

/// Handle for stopping a running [`OutboundServer`].
#[derive(Debug, Clone)]
pub struct OutboundShutdown {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl OutboundShutdown {
    /// Stop accepting and wait for every session task to finish.
    pub async fn shutdown(&self) {
        self.token
            .cancel();
        self.tracker
            .close();
        self.tracker
            .wait()
            .await;
    }
}

/// Listening endpoint for outbound sessions.
#[derive(Debug)]
pub struct OutboundServer {
    listener: TcpListener,
    options: OutboundOptions,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl OutboundServer {
    pub async fn bind(addr: impl ToSocketAddrs) -> EslResult<Self> {
        Self::bind_with_options(addr, OutboundOptions::default()).await
    }

    pub async fn bind_with_options(
        addr: impl ToSocketAddrs,
        options: OutboundOptions,
    ) -> EslResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, options))
    }

    /// Wrap an already bound listener.
    pub fn from_listener(listener: TcpListener, options: OutboundOptions) -> Self {
        Self {
            listener,
            options,
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn local_addr(&self) -> EslResult<SocketAddr> {
        Ok(self
            .listener
            .local_addr()?)
    }

    pub fn shutdown_handle(&self) -> OutboundShutdown {
        OutboundShutdown {
            token: self
                .token
                .clone(),
            tracker: self
                .tracker
                .clone(),
        }
    }

    /// Accept connections until shut down, one handler per connection.
    ///
    /// Returns after shutdown once every session task has finished.
    pub async fn run<F: HandlerFactory>(self, factory: F) {
        let OutboundServer {
            listener,
            options,
            token,
            tracker,
        } = self;
        if let Ok(addr) = listener.local_addr() {
            info!("[OUTBOUND] listening on {}", addr);
        }

        let options = Arc::new(options);
        let permits = Arc::new(Semaphore::new(
            options
                .callback_concurrency
                .max(1),
        ));
        let mut delay = ACCEPT_BACKOFF_INITIAL;

        loop {
            let accepted: io::Result<(TcpStream, SocketAddr)> = tokio::select! {
                biased;
                () = token.cancelled() => break,
                res = listener.accept() => res,
            };
            match accepted {
                Ok((stream, peer)) => {
                    delay = ACCEPT_BACKOFF_INITIAL;
                    info!("[OUTBOUND] accepted connection from {}", peer);
                    let handler = factory.build();
                    let session = AssertUnwindSafe(run_session(
                        stream,
                        peer,
                        handler,
                        options.clone(),
                        permits.clone(),
                    ))
                    .catch_unwind();
                    tracker.spawn(async move {
                        if session
                            .await
                            .is_err()
                        {
                            error!("[OUTBOUND] session task for {} panicked", peer);
                        }
                    });
                }
                Err(e) => {
                    warn!("[OUTBOUND] accept error: {}", e);
                    sleep(delay).await;
                    delay = (delay * 2).min(ACCEPT_BACKOFF_MAX);
                }
            }
        }

        debug!("[OUTBOUND] accept loop stopped, waiting for sessions");
        tracker.close();
        tracker
            .wait()
            .await;
    }
}

/// One handler callback.
enum Delivery {
    Connect(EslEvent),
    Event(EslEvent),
    Disconnect(DisconnectReason),
}

async fn guarded<F: Future<Output = ()>>(callback: &str, call: F) {
    if AssertUnwindSafe(call)
        .catch_unwind()
        .await
        .is_err()
    {
        error!("[OUTBOUND] handler panicked in {}", callback);
    }
}

async fn deliver<H: OutboundHandler>(
    handler: &H,
    client: &EslClient,
    permits: &Semaphore,
    delivery: Delivery,
) {
    // The semaphore is never closed
    let Ok(_permit) = permits
        .acquire()
        .await
    else {
        return;
    };
    match delivery {
        Delivery::Connect(channel_data) => {
            guarded("on_connect", handler.on_connect(client.clone(), channel_data)).await
        }
        Delivery::Event(event) => guarded("on_event", handler.on_event(client, event)).await,
        Delivery::Disconnect(reason) => {
            guarded("on_disconnect", handler.on_disconnect(reason)).await
        }
    }
}

async fn run_session<H: OutboundHandler>(
    stream: TcpStream,
    peer: SocketAddr,
    handler: H,
    options: Arc<OutboundOptions>,
    permits: Arc<Semaphore>,
) {
    let (client, mut events) = spawn_session_client(stream, &options);

    match client
        .connect_session(options.handshake_timeout)
        .await
    {
        Ok(channel_data) => {
            info!(
                "[OUTBOUND] session {} from {} ready",
                channel_data
                    .unique_id()
                    .unwrap_or("<unknown>"),
                peer
            );
            deliver(&handler, &client, &permits, Delivery::Connect(channel_data)).await;
            while let Some(event) = events
                .recv()
                .await
            {
                deliver(&handler, &client, &permits, Delivery::Event(event)).await;
            }
        }
        Err(e) => warn!("[OUTBOUND] handshake with {} failed: {}", peer, e),
    }

    let reason = client
        .disconnect_reason()
        .unwrap_or(DisconnectReason::ConnectionClosed);
    debug!("[OUTBOUND] session from {} ended: {}", peer, reason);
    deliver(&handler, &client, &permits, Delivery::Disconnect(reason)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;

    #[derive(Debug, PartialEq)]
    enum Seen {
        Connect(Option<String>),
        Event(String),
        Disconnect(DisconnectReason),
    }

    struct Recorder(mpsc::UnboundedSender<Seen>);

    #[async_trait]
    impl OutboundHandler for Recorder {
        async fn on_connect(&self, _client: EslClient, channel_data: EslEvent) {
            let _ = self
                .0
                .send(Seen::Connect(channel_data.unique_id().map(str::to_string)));
        }

        async fn on_event(&self, _client: &EslClient, event: EslEvent) {
            let _ = self
                .0
                .send(Seen::Event(event.event_name().unwrap_or("").to_string()));
        }

        async fn on_disconnect(&self, reason: DisconnectReason) {
            let _ = self
                .0
                .send(Seen::Disconnect(reason));
        }
    }

    async fn read_command(stream: &mut TcpStream) -> String {
        let mut collected = Vec::new();
        let mut byte = [0u8; 1];
        while !collected.ends_with(b"\n\n") {
            stream
                .read_exact(&mut byte)
                .await
                .unwrap();
            collected.push(byte[0]);
        }
        String::from_utf8(collected).unwrap()
    }

    async fn start_server() -> (SocketAddr, OutboundShutdown, mpsc::UnboundedReceiver<Seen>) {
        let server = OutboundServer::bind("127.0.0.1:0")
            .await
            .unwrap();
        let addr = server
            .local_addr()
            .unwrap();
        let shutdown = server.shutdown_handle();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(server.run(move || Recorder(tx.clone())));
        (addr, shutdown, rx)
    }

    #[test]
    fn default_options_use_outbound_decoder() {
        let options = OutboundOptions::default();
        assert_eq!(
            options.decoder,
            DecoderConfig::for_mode(ConnectionMode::Outbound)
        );
        assert_eq!(options.callback_concurrency, DEFAULT_CALLBACK_CONCURRENCY);
    }

    #[tokio::test]
    async fn session_lifecycle_reaches_handler_in_order() {
        let (addr, shutdown, mut seen) = start_server().await;
        let mut switch = TcpStream::connect(addr)
            .await
            .unwrap();

        assert_eq!(read_command(&mut switch).await, "connect\n\n");
        switch
            .write_all(
                b"Content-Type: command/reply\nReply-Text: +OK\nUnique-ID: call-1\nChannel-Name: sofia/internal/1000\n\n",
            )
            .await
            .unwrap();
        let body = "Event-Name: CHANNEL_ANSWER\nUnique-ID: call-1\n\n";
        switch
            .write_all(
                format!(
                    "Content-Type: text/event-plain\nContent-Length: {}\n\n{}",
                    body.len(),
                    body
                )
                .as_bytes(),
            )
            .await
            .unwrap();
        switch
            .write_all(b"Content-Type: text/disconnect-notice\nContent-Length: 0\n\n")
            .await
            .unwrap();

        assert_eq!(seen.recv().await, Some(Seen::Connect(Some("call-1".into()))));
        assert_eq!(seen.recv().await, Some(Seen::Event("CHANNEL_ANSWER".into())));
        assert_eq!(
            seen.recv().await,
            Some(Seen::Disconnect(DisconnectReason::ServerNotice))
        );

        shutdown
            .shutdown()
            .await;
    }

    #[tokio::test]
    async fn rejected_handshake_only_reports_disconnect() {
        let (addr, shutdown, mut seen) = start_server().await;
        let mut switch = TcpStream::connect(addr)
            .await
            .unwrap();

        read_command(&mut switch).await;
        switch
            .write_all(b"Content-Type: command/reply\nReply-Text: -ERR no session\n\n")
            .await
            .unwrap();

        match seen.recv().await {
            Some(Seen::Disconnect(DisconnectReason::HandshakeFailed(msg))) => {
                assert!(msg.contains("no session"), "{}", msg)
            }
            other => panic!("unexpected delivery: {:?}", other),
        }
        shutdown
            .shutdown()
            .await;
    }

    #[tokio::test]
    async fn accept_outbound_returns_session() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let addr = listener
            .local_addr()
            .unwrap();

        let switch = tokio::spawn(async move {
            let mut switch = TcpStream::connect(addr)
                .await
                .unwrap();
            read_command(&mut switch).await;
            switch
                .write_all(b"Content-Type: command/reply\nReply-Text: +OK\nUnique-ID: call-9\n\n")
                .await
                .unwrap();
            switch
        });

        let session = EslClient::accept_outbound(&listener, &OutboundOptions::default())
            .await
            .unwrap();
        assert_eq!(session.channel_data.unique_id(), Some("call-9"));
        assert_eq!(session.client.state(), ConnectionState::Ready);
        assert_eq!(session.client.mode(), ConnectionMode::Outbound);
        drop(switch.await);
    }

    #[tokio::test]
    async fn auth_request_after_handshake_is_ignored() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let addr = listener
            .local_addr()
            .unwrap();

        let switch = tokio::spawn(async move {
            let mut switch = TcpStream::connect(addr)
                .await
                .unwrap();
            assert_eq!(read_command(&mut switch).await, "connect\n\n");
            switch
                .write_all(b"Content-Type: command/reply\nReply-Text: +OK\nUnique-ID: call-7\n\n")
                .await
                .unwrap();
            switch
                .write_all(b"Content-Type: auth/request\n\n")
                .await
                .unwrap();
            assert_eq!(read_command(&mut switch).await, "linger\n\n");
            switch
                .write_all(b"Content-Type: command/reply\nReply-Text: +OK will linger\n\n")
                .await
                .unwrap();
            switch
        });

        let session = EslClient::accept_outbound(&listener, &OutboundOptions::default())
            .await
            .unwrap();
        let response = session
            .client
            .send_command("linger")
            .await
            .unwrap();
        assert!(response.is_ok());
        assert_eq!(response.reason(), "will linger");
        assert_eq!(session.client.state(), ConnectionState::Ready);
        let _switch = switch
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_accepting() {
        let (addr, shutdown, _seen) = start_server().await;
        shutdown
            .shutdown()
            .await;
        // Listener is dropped with the accept loop
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(TcpStream::connect(addr)
            .await
            .is_err());
    }
}
