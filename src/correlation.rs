//! Matching replies to commands and completion events to background jobs.
//!
//! The switch answers commands strictly in the order it received them and
//! puts no identifier on a reply, so pending commands live in a FIFO queue.
//! Registering a slot and handing its bytes to the writer happen under one
//! lock; the reader routes replies under the same lock, so a reply can never
//! be matched against the wrong slot.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, trace, warn};

use crate::{
    connection::{ConnectionState, DisconnectReason},
    constants::DISPOSITION_LINGER,
    error::{EslError, EslResult},
    event::EslEvent,
    protocol::{ContentType, EslMessage},
};

/// Result slot for one in-flight command.
#[derive(Debug)]
pub(crate) enum PendingSlot {
    /// Resolved with the reply frame itself.
    Reply(oneshot::Sender<EslResult<EslMessage>>),
    /// Resolved with the completion event of the job the reply announces.
    Background(oneshot::Sender<EslResult<EslEvent>>),
}

impl PendingSlot {
    fn fail(self, err: EslError) {
        match self {
            PendingSlot::Reply(tx) => {
                let _ = tx.send(Err(err));
            }
            PendingSlot::Background(tx) => {
                let _ = tx.send(Err(err));
            }
        }
    }
}

/// Which connection states accept a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendGate {
    /// Application commands: only once the connection is ready.
    Ready,
    /// `auth` / `connect` issued by the lifecycle itself.
    Handshake,
}

impl SendGate {
    fn admits(self, state: ConnectionState) -> bool {
        match self {
            SendGate::Ready => state == ConnectionState::Ready,
            SendGate::Handshake => matches!(
                state,
                ConnectionState::Authenticating | ConnectionState::Handshaking
            ),
        }
    }
}

/// What the reader should do with a routed message.
#[derive(Debug)]
pub(crate) enum Routed {
    /// Resolved a pending slot, or was deliberately dropped.
    Consumed,
    /// Unsolicited event for the listeners.
    Event(EslEvent),
    AuthRequest,
    DisconnectNotice { linger: bool },
    RudeRejection,
}

#[derive(Debug)]
struct Inner {
    outgoing: Option<mpsc::UnboundedSender<String>>,
    pending: VecDeque<PendingSlot>,
    jobs: HashMap<String, oneshot::Sender<EslResult<EslEvent>>>,
    closed: Option<DisconnectReason>,
}

/// Per-connection correlation state.
#[derive(Debug)]
pub(crate) struct Correlator {
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Correlator {
    pub(crate) fn new(outgoing: mpsc::UnboundedSender<String>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        Self {
            inner: Mutex::new(Inner {
                outgoing: Some(outgoing),
                pending: VecDeque::new(),
                jobs: HashMap::new(),
                closed: None,
            }),
            state_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self
            .state_tx
            .borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx
            .subscribe()
    }

    /// Move to `state` unless the connection has already been torn down.
    pub(crate) fn set_state(&self, state: ConnectionState) {
        let inner = self.lock();
        if inner
            .closed
            .is_some()
        {
            return;
        }
        self.transition(state);
    }

    fn transition(&self, state: ConnectionState) {
        let previous = self
            .state_tx
            .send_replace(state);
        if previous != state {
            debug!("[STATE] {} -> {}", previous, state);
        }
    }

    /// Why the connection ended, if it has.
    pub(crate) fn close_reason(&self) -> Option<DisconnectReason> {
        self.lock()
            .closed
            .clone()
    }

    /// Register `slot` at the tail of the queue and hand `wire` to the writer,
    /// as one atomic step.
    pub(crate) fn submit(&self, wire: String, slot: PendingSlot, gate: SendGate) -> EslResult<()> {
        let mut inner = self.lock();
        if inner
            .closed
            .is_some()
            || !gate.admits(self.state())
        {
            return Err(EslError::NotConnected);
        }
        let Some(outgoing) = inner
            .outgoing
            .clone()
        else {
            return Err(EslError::NotConnected);
        };

        inner
            .pending
            .push_back(slot);
        if outgoing
            .send(wire)
            .is_err()
        {
            // Writer already gone; nothing reached the socket.
            inner
                .pending
                .pop_back();
            return Err(EslError::NotConnected);
        }
        trace!(
            "[SEND] queued, {} command(s) awaiting reply",
            inner
                .pending
                .len()
        );
        Ok(())
    }

    /// Route one classified message from the decode path.
    ///
    /// An `Err` is a protocol violation that the caller must treat as fatal.
    pub(crate) fn route(&self, message: EslMessage) -> EslResult<Routed> {
        match message.content_type() {
            ContentType::CommandReply | ContentType::ApiResponse => self.resolve_reply(message),
            ContentType::Event(_) | ContentType::LogData => {
                let event = match message.to_event() {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("[RECV] dropping undecodable event: {}", e);
                        return Ok(Routed::Consumed);
                    }
                };
                if event.is_background_job() {
                    self.resolve_job(event);
                    return Ok(Routed::Consumed);
                }
                Ok(Routed::Event(event))
            }
            ContentType::AuthRequest => Ok(Routed::AuthRequest),
            ContentType::DisconnectNotice => Ok(Routed::DisconnectNotice {
                linger: message.disposition() == Some(DISPOSITION_LINGER),
            }),
            ContentType::RudeRejection => Ok(Routed::RudeRejection),
        }
    }

    fn resolve_reply(&self, message: EslMessage) -> EslResult<Routed> {
        let mut inner = self.lock();
        let Some(slot) = inner
            .pending
            .pop_front()
        else {
            return Err(EslError::protocol_violation(format!(
                "{} received with no command pending",
                message.content_type()
            )));
        };

        match slot {
            PendingSlot::Reply(tx) => {
                if tx
                    .send(Ok(message))
                    .is_err()
                {
                    debug!("[RECV] reply for abandoned command discarded");
                }
                Ok(Routed::Consumed)
            }
            PendingSlot::Background(tx) => {
                if let Some(job_uuid) = message.job_uuid() {
                    if tx.is_closed() {
                        debug!("[RECV] job {} abandoned before acknowledgement", job_uuid);
                    } else {
                        debug!("[RECV] background job {} registered", job_uuid);
                        inner
                            .jobs
                            .insert(job_uuid.to_string(), tx);
                    }
                    return Ok(Routed::Consumed);
                }

                let reply_text = message
                    .reply_text()
                    .map(|t| t.into_owned())
                    .unwrap_or_default();
                if reply_text.starts_with("-ERR") {
                    let _ = tx.send(Err(EslError::CommandFailed { reply_text }));
                    return Ok(Routed::Consumed);
                }
                let _ = tx.send(Err(EslError::protocol_violation(
                    "background command reply carries no Job-UUID",
                )));
                Err(EslError::protocol_violation(format!(
                    "background command reply carries no Job-UUID (Reply-Text: {:?})",
                    reply_text
                )))
            }
        }
    }

    fn resolve_job(&self, event: EslEvent) {
        let Some(job_uuid) = event.job_uuid() else {
            warn!("[RECV] BACKGROUND_JOB event without Job-UUID dropped");
            return;
        };
        let waiter = self
            .lock()
            .jobs
            .remove(job_uuid);
        match waiter {
            Some(tx) => {
                debug!("[RECV] background job {} completed", job_uuid);
                let _ = tx.send(Ok(event));
            }
            None => debug!("[RECV] no pending job for Job-UUID {}, dropped", job_uuid),
        }
    }

    /// Tear down: refuse new sends, drop the writer handle and resolve every
    /// pending slot and job with `ConnectionClosed`.
    ///
    /// Returns `false` if the connection was already closed.
    pub(crate) fn close(&self, reason: DisconnectReason, closing: bool) -> bool {
        let mut inner = self.lock();
        if inner
            .closed
            .is_some()
        {
            return false;
        }
        inner.closed = Some(reason.clone());
        if closing {
            self.transition(ConnectionState::Closing);
        }
        inner.outgoing = None;

        let pending: Vec<_> = inner
            .pending
            .drain(..)
            .collect();
        let jobs: Vec<_> = inner
            .jobs
            .drain()
            .collect();
        drop(inner);

        if !pending.is_empty() || !jobs.is_empty() {
            debug!(
                "[STATE] failing {} pending command(s) and {} background job(s): {}",
                pending.len(),
                jobs.len(),
                reason
            );
        }
        for slot in pending {
            slot.fail(EslError::ConnectionClosed(reason.clone()));
        }
        for (_, tx) in jobs {
            let _ = tx.send(Err(EslError::ConnectionClosed(reason.clone())));
        }
        true
    }

    /// Final state after [`close`](Self::close).
    pub(crate) fn finish(&self, state: ConnectionState) {
        self.transition(state);
    }

    #[cfg(test)]
    fn pending_len(&self) -> (usize, usize) {
        let inner = self.lock();
        (
            inner
                .pending
                .len(),
            inner
                .jobs
                .len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameDecoder;

    fn message(data: &str) -> EslMessage {
        let mut frames = FrameDecoder::new()
            .decode(data.as_bytes())
            .unwrap();
        EslMessage::from_frame(frames.remove(0)).unwrap()
    }

    fn ok_reply(text: &str) -> EslMessage {
        message(&format!(
            "Content-Type: command/reply\nReply-Text: {}\n\n",
            text
        ))
    }

    fn bg_ack(job: &str) -> EslMessage {
        message(&format!(
            "Content-Type: command/reply\nReply-Text: +OK Job-UUID: {}\nJob-UUID: {}\n\n",
            job, job
        ))
    }

    fn job_event(job: &str, result: &str) -> EslMessage {
        let body = format!(
            "Event-Name: BACKGROUND_JOB\nJob-UUID: {}\nContent-Length: {}\n\n{}",
            job,
            result.len(),
            result
        );
        message(&format!(
            "Content-Length: {}\nContent-Type: text/event-plain\n\n{}",
            body.len(),
            body
        ))
    }

    fn ready() -> (Correlator, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let correlator = Correlator::new(tx);
        correlator.set_state(ConnectionState::Ready);
        (correlator, rx)
    }

    fn submit_reply(correlator: &Correlator, wire: &str) -> oneshot::Receiver<EslResult<EslMessage>> {
        let (tx, rx) = oneshot::channel();
        correlator
            .submit(wire.to_string(), PendingSlot::Reply(tx), SendGate::Ready)
            .unwrap();
        rx
    }

    #[test]
    fn replies_resolve_in_send_order() {
        let (correlator, mut wire) = ready();
        let first = submit_reply(&correlator, "api one\n\n");
        let second = submit_reply(&correlator, "api two\n\n");
        let third = submit_reply(&correlator, "api three\n\n");

        assert_eq!(wire.try_recv().unwrap(), "api one\n\n");
        assert_eq!(wire.try_recv().unwrap(), "api two\n\n");
        assert_eq!(wire.try_recv().unwrap(), "api three\n\n");

        for text in ["+OK 1", "+OK 2", "+OK 3"] {
            assert!(matches!(
                correlator.route(ok_reply(text)).unwrap(),
                Routed::Consumed
            ));
        }

        let texts: Vec<String> = [first, second, third]
            .into_iter()
            .map(|mut rx| {
                rx.try_recv()
                    .unwrap()
                    .unwrap()
                    .reply_text()
                    .unwrap()
                    .into_owned()
            })
            .collect();
        assert_eq!(texts, vec!["+OK 1", "+OK 2", "+OK 3"]);
    }

    #[test]
    fn reply_without_pending_command_is_violation() {
        let (correlator, _wire) = ready();
        let err = correlator
            .route(ok_reply("+OK"))
            .unwrap_err();
        assert!(matches!(err, EslError::ProtocolViolation { .. }));
    }

    #[test]
    fn sends_rejected_outside_ready() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let correlator = Correlator::new(tx);

        let (slot, _) = oneshot::channel();
        let err = correlator
            .submit("api status\n\n".into(), PendingSlot::Reply(slot), SendGate::Ready)
            .unwrap_err();
        assert!(matches!(err, EslError::NotConnected));

        correlator.set_state(ConnectionState::Authenticating);
        let (slot, _) = oneshot::channel();
        assert!(correlator
            .submit("auth x\n\n".into(), PendingSlot::Reply(slot), SendGate::Handshake)
            .is_ok());
        let (slot, _) = oneshot::channel();
        assert!(correlator
            .submit("api status\n\n".into(), PendingSlot::Reply(slot), SendGate::Ready)
            .is_err());
    }

    #[test]
    fn background_job_resolves_on_matching_completion() {
        let (correlator, _wire) = ready();
        let (tx, mut rx) = oneshot::channel();
        correlator
            .submit("bgapi status\n\n".into(), PendingSlot::Background(tx), SendGate::Ready)
            .unwrap();

        correlator
            .route(bg_ack("abc123"))
            .unwrap();
        assert_eq!(correlator.pending_len(), (0, 1));
        assert!(rx
            .try_recv()
            .is_err());

        // Unrelated completion and an ordinary event in between.
        correlator
            .route(job_event("other", "+OK other\n"))
            .unwrap();
        let heartbeat = "Event-Name: HEARTBEAT\n\n";
        let routed = correlator
            .route(message(&format!(
                "Content-Length: {}\nContent-Type: text/event-plain\n\n{}",
                heartbeat.len(),
                heartbeat
            )))
            .unwrap();
        assert!(matches!(routed, Routed::Event(_)));
        assert!(rx
            .try_recv()
            .is_err());

        correlator
            .route(job_event("abc123", "+OK UP 0 years\n"))
            .unwrap();
        let event = rx
            .try_recv()
            .unwrap()
            .unwrap();
        assert_eq!(event.body(), Some("+OK UP 0 years\n"));
        assert_eq!(correlator.pending_len(), (0, 0));
    }

    #[test]
    fn background_reply_without_job_uuid_is_fatal() {
        let (correlator, _wire) = ready();
        let (tx, mut rx) = oneshot::channel();
        correlator
            .submit("bgapi status\n\n".into(), PendingSlot::Background(tx), SendGate::Ready)
            .unwrap();

        let err = correlator
            .route(ok_reply("+OK"))
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            rx.try_recv()
                .unwrap(),
            Err(EslError::ProtocolViolation { .. })
        ));
    }

    #[test]
    fn background_error_reply_fails_only_that_call() {
        let (correlator, _wire) = ready();
        let (tx, mut rx) = oneshot::channel();
        correlator
            .submit("bgapi bogus\n\n".into(), PendingSlot::Background(tx), SendGate::Ready)
            .unwrap();

        assert!(correlator
            .route(ok_reply("-ERR bogus"))
            .is_ok());
        assert!(matches!(
            rx.try_recv()
                .unwrap(),
            Err(EslError::CommandFailed { .. })
        ));
    }

    #[test]
    fn close_fails_everything_exactly_once() {
        let (correlator, _wire) = ready();
        let reply = submit_reply(&correlator, "api status\n\n");
        let (tx, acked_job) = oneshot::channel();
        correlator
            .submit("bgapi status\n\n".into(), PendingSlot::Background(tx), SendGate::Ready)
            .unwrap();
        let (tx, queued_job) = oneshot::channel();
        correlator
            .submit("bgapi status\n\n".into(), PendingSlot::Background(tx), SendGate::Ready)
            .unwrap();

        // Replies resolve the first two slots in order: api reply, then the first bgapi ack.
        let mut reply = reply;
        correlator
            .route(ok_reply("+OK"))
            .unwrap();
        assert!(reply
            .try_recv()
            .unwrap()
            .is_ok());
        correlator
            .route(bg_ack("j1"))
            .unwrap();
        assert_eq!(correlator.pending_len(), (1, 1));

        assert!(correlator.close(DisconnectReason::ServerNotice, true));
        assert!(!correlator.close(DisconnectReason::ConnectionClosed, true));
        assert_eq!(correlator.state(), ConnectionState::Closing);

        for mut rx in [acked_job, queued_job] {
            assert!(matches!(
                rx.try_recv()
                    .unwrap(),
                Err(EslError::ConnectionClosed(DisconnectReason::ServerNotice))
            ));
        }
        assert_eq!(correlator.pending_len(), (0, 0));

        let (slot, _) = oneshot::channel();
        assert!(matches!(
            correlator.submit("api status\n\n".into(), PendingSlot::Reply(slot), SendGate::Ready),
            Err(EslError::NotConnected)
        ));
    }

    #[test]
    fn abandoned_command_keeps_queue_aligned() {
        let (correlator, _wire) = ready();
        let first = submit_reply(&correlator, "api one\n\n");
        let mut second = submit_reply(&correlator, "api two\n\n");
        drop(first);

        correlator
            .route(ok_reply("+OK 1"))
            .unwrap();
        assert!(second
            .try_recv()
            .is_err());

        correlator
            .route(ok_reply("+OK 2"))
            .unwrap();
        let reply = second
            .try_recv()
            .unwrap()
            .unwrap();
        assert_eq!(reply.reply_text().as_deref(), Some("+OK 2"));
        assert_eq!(correlator.pending_len(), (0, 0));
    }

    #[test]
    fn abandoned_background_job_is_not_registered() {
        let (correlator, _wire) = ready();
        let (tx, rx) = oneshot::channel();
        correlator
            .submit("bgapi status\n\n".into(), PendingSlot::Background(tx), SendGate::Ready)
            .unwrap();
        drop(rx);

        correlator
            .route(bg_ack("abc123"))
            .unwrap();
        assert_eq!(correlator.pending_len(), (0, 0));

        let routed = correlator
            .route(job_event("abc123", "+OK UP\n"))
            .unwrap();
        assert!(matches!(routed, Routed::Consumed));
        assert_eq!(correlator.pending_len(), (0, 0));
    }

    #[test]
    fn linger_notice_is_flagged() {
        let (correlator, _wire) = ready();
        let routed = correlator
            .route(message(
                "Content-Type: text/disconnect-notice\nContent-Disposition: linger\n\n",
            ))
            .unwrap();
        assert!(matches!(routed, Routed::DisconnectNotice { linger: true }));

        let routed = correlator
            .route(message("Content-Type: text/disconnect-notice\n\n"))
            .unwrap();
        assert!(matches!(routed, Routed::DisconnectNotice { linger: false }));
    }
}
