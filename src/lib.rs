//! FreeSWITCH Event Socket (ESL) protocol engine for Rust
//!
//! This crate speaks the Event Socket protocol in both directions: it dials
//! FreeSWITCH and authenticates (inbound mode), or accepts the connections
//! FreeSWITCH opens from the `socket` dialplan application (outbound mode).
//!
//! # Architecture
//!
//! - [`FrameDecoder`] turns an arbitrarily chunked byte stream into [`RawFrame`]s.
//! - [`EslMessage`] classifies a frame by `Content-Type`; [`EslEvent`] is the
//!   normalized view of an event frame in any of the plain, JSON or XML formats.
//! - Each connection has one reader task that owns the decoder and routes
//!   every message, and one writer task. Commands are matched to replies in
//!   send order; `bgapi` jobs are matched to their completion event by `Job-UUID`.
//! - [`EslClient`] (Clone + Send) issues commands from any task. Unsolicited
//!   events go to registered [`EventListener`]s or [`EslEventStream`]s, each
//!   with its own bounded queue.
//!
//! # Examples
//!
//! ## Inbound Connection
//!
//! ```rust,no_run
//! use freeswitch_esl_engine::{EslClient, EslError, EslEventType, EventFormat};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EslError> {
//!     let client = EslClient::connect("localhost", 8021, "ClueCon").await?;
//!     let mut events = client.event_stream(EslEventType::ChannelAnswer);
//!
//!     client.subscribe_events(EventFormat::Plain, &[EslEventType::ChannelAnswer]).await?;
//!
//!     let status = client.api("status").await?;
//!     println!("{}", status.body());
//!
//!     let job = client.bgapi("originate user/1000 &park").await?;
//!     println!("originate finished: {}", job.body().unwrap_or(""));
//!
//!     while let Some(event) = events.recv().await {
//!         println!("answered: {:?}", event.unique_id());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Outbound Mode
//!
//! ```rust,no_run
//! use freeswitch_esl_engine::{
//!     EslClient, EslEvent, EslError, OutboundHandler, OutboundServer, SendMsg,
//! };
//!
//! struct Answer;
//!
//! #[async_trait::async_trait]
//! impl OutboundHandler for Answer {
//!     async fn on_connect(&self, client: EslClient, channel_data: EslEvent) {
//!         println!("call from {:?}", channel_data.caller_id_number());
//!         let _ = client.send_msg(SendMsg::new().execute("playback", "ivr/ivr-welcome.wav")).await;
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EslError> {
//!     let server = OutboundServer::bind("0.0.0.0:8084").await?;
//!     server.run(|| Answer).await;
//!     Ok(())
//! }
//! ```
//!
//! Configure FreeSWITCH to connect to your app:
//! ```xml
//! <action application="socket" data="127.0.0.1:8084 async full"/>
//! ```

#[macro_use]
mod macros;

mod buffer;
pub mod command;
pub mod connection;
pub mod constants;
mod correlation;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod frame;
pub mod headers;
pub mod outbound;
pub mod protocol;

pub use command::{CommandResponse, EslCommand, ReplyStatus, SendMsg};
pub use connection::{
    ConnectionMode, ConnectionState, DisconnectReason, EslClient, EslConnectOptions,
};
pub use constants::{DEFAULT_ESL_PORT, DEFAULT_OUTBOUND_PORT};
pub use dispatch::{EslEventStream, EventFilter, EventListener, ListenerId};
pub use error::{EslError, EslResult, FramingError};
pub use event::{EslEvent, EslEventType, EventFormat, ParseEventFormatError, ParseEventTypeError};
pub use frame::{DecoderConfig, FrameDecoder, RawFrame};
pub use headers::{EventHeader, FrameHeader, ParseHeaderError};
pub use outbound::{
    HandlerFactory, OutboundHandler, OutboundOptions, OutboundServer, OutboundSession,
    OutboundShutdown,
};
pub use protocol::{ContentType, EslMessage};
