//! One live WebSocket: bounded outbound queue, close signal, read and write loops.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message};
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ConnectionSettings;
use crate::models::{ChatId, ClientEventKind, ClientMessage, Event, UserId};

use super::hub::Hub;

pub type ConnectionId = Uuid;

/// Receiving half of a connection's outbound queue, drained by its write loop.
pub type OutboundQueue = mpsc::Receiver<Arc<Event>>;

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    /// Chats the user belonged to at connect time, adjusted by hub subscribe/unsubscribe.
    chat_ids: RwLock<HashSet<ChatId>>,
    outbound: mpsc::Sender<Arc<Event>>,
    closed: watch::Sender<bool>,
    state: AtomicU8,
}

impl Connection {
    /// Create a connection for `user_id` with an outbound queue of `capacity` events.
    pub fn new(
        user_id: UserId,
        chat_ids: impl IntoIterator<Item = ChatId>,
        capacity: usize,
    ) -> (Arc<Self>, OutboundQueue) {
        let (outbound, queue) = mpsc::channel(capacity);
        let (closed, _) = watch::channel(false);
        let connection = Self {
            id: Uuid::new_v4(),
            user_id,
            chat_ids: RwLock::new(chat_ids.into_iter().collect()),
            outbound,
            closed,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
        };
        (Arc::new(connection), queue)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Sorted snapshot of the chats this connection listens to.
    pub fn chat_ids(&self) -> Vec<ChatId> {
        let mut ids: Vec<ChatId> = self.chat_ids.read().iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_member(&self, chat_id: ChatId) -> bool {
        self.chat_ids.read().contains(&chat_id)
    }

    pub(crate) fn join_chat(&self, chat_id: ChatId) -> bool {
        self.chat_ids.write().insert(chat_id)
    }

    pub(crate) fn leave_chat(&self, chat_id: ChatId) -> bool {
        self.chat_ids.write().remove(&chat_id)
    }

    /// Queue an event without waiting. `false` when the connection is closed or
    /// its queue is full; the event is then dropped for this connection only.
    pub fn send(&self, event: Arc<Event>) -> bool {
        if self.is_closed() {
            return false;
        }
        self.outbound.try_send(event).is_ok()
    }

    /// Signal both loops to stop. Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        let first = self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        });
        if first {
            self.advance(ConnectionState::Closing);
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn mark_open(&self) {
        let _ = self.state.compare_exchange(
            ConnectionState::Connecting as u8,
            ConnectionState::Open as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn advance(&self, next: ConnectionState) {
        self.state.fetch_max(next as u8, Ordering::AcqRel);
    }

    /// Drive the socket until either loop stops. Both loops unregister from the
    /// hub on exit; the return value is `true` when that removed the user's
    /// last connection.
    pub async fn run<S>(
        self: Arc<Self>,
        socket: S,
        outbound: OutboundQueue,
        hub: &Hub,
        settings: &ConnectionSettings,
    ) -> bool
    where
        S: Stream<Item = Result<Message, axum::Error>> + Sink<Message, Error = axum::Error>,
    {
        let (sink, stream) = socket.split();
        let (read_offline, write_offline) = tokio::join!(
            read_loop(&self, stream, hub, settings),
            write_loop(&self, sink, outbound, hub, settings),
        );
        self.advance(ConnectionState::Closed);
        read_offline || write_offline
    }
}

async fn read_loop<R>(
    conn: &Arc<Connection>,
    mut stream: R,
    hub: &Hub,
    settings: &ConnectionSettings,
) -> bool
where
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut closed = conn.closed.subscribe();

    loop {
        let next = tokio::select! {
            _ = wait_closed(&mut closed) => break,
            next = time::timeout(settings.pong_wait, stream.next()) => next,
        };

        match next {
            Err(_) => {
                info!(user_id = conn.user_id, connection_id = %conn.id, "read timed out");
                break;
            }
            Ok(None) => {
                debug!(user_id = conn.user_id, connection_id = %conn.id, "socket stream ended");
                break;
            }
            Ok(Some(Err(e))) => {
                info!(user_id = conn.user_id, connection_id = %conn.id, error = %e, "read error");
                break;
            }
            Ok(Some(Ok(Message::Text(text)))) => handle_text(conn, &text, hub),
            Ok(Some(Ok(Message::Close(frame)))) => {
                log_close(conn, frame.as_ref());
                break;
            }
            Ok(Some(Ok(_))) => {}
        }
    }

    conn.advance(ConnectionState::Closing);
    hub.unregister(conn).await
}

async fn write_loop<W>(
    conn: &Arc<Connection>,
    mut sink: W,
    mut outbound: OutboundQueue,
    hub: &Hub,
    settings: &ConnectionSettings,
) -> bool
where
    W: Sink<Message, Error = axum::Error> + Unpin,
{
    let period = settings.ping_period();
    let mut ping = time::interval_at(Instant::now() + period, period);
    let mut closed = conn.closed.subscribe();

    loop {
        tokio::select! {
            _ = wait_closed(&mut closed) => break,
            event = outbound.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(event.as_ref()) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(event = %event.kind(), error = %e, "failed to encode event");
                        continue;
                    }
                };
                if let Err(e) = write_frame(&mut sink, Message::Text(text), settings.write_wait).await {
                    info!(user_id = conn.user_id, connection_id = %conn.id, error = %e, "write error");
                    break;
                }
            }
            _ = ping.tick() => {
                if let Err(e) = write_frame(&mut sink, Message::Ping(Vec::new()), settings.write_wait).await {
                    info!(user_id = conn.user_id, connection_id = %conn.id, error = %e, "ping error");
                    break;
                }
            }
        }
    }

    conn.advance(ConnectionState::Closing);
    outbound.close();
    let close = Message::Close(Some(CloseFrame {
        code: close_code::NORMAL,
        reason: "connection closed".into(),
    }));
    let _ = write_frame(&mut sink, close, settings.write_wait).await;

    hub.unregister(conn).await
}

/// Resolves once the connection is closed. Returns `()` so no watch guard is held across awaits.
async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

async fn write_frame<W>(sink: &mut W, message: Message, wait: Duration) -> anyhow::Result<()>
where
    W: Sink<Message, Error = axum::Error> + Unpin,
{
    time::timeout(wait, sink.send(message))
        .await
        .map_err(|_| anyhow::anyhow!("write timed out after {:?}", wait))??;
    Ok(())
}

fn handle_text(conn: &Connection, text: &str, hub: &Hub) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(user_id = conn.user_id, error = %e, "ignoring malformed client message");
            return;
        }
    };

    match msg.kind {
        ClientEventKind::TypingStart => handle_typing(conn, true, msg.payload.chat_id, hub),
        ClientEventKind::TypingStop => handle_typing(conn, false, msg.payload.chat_id, hub),
        ClientEventKind::Unknown => {
            debug!(user_id = conn.user_id, "unknown message type");
        }
    }
}

/// Relay a typing indicator to the other members of a chat the sender belongs to.
fn handle_typing(conn: &Connection, started: bool, chat_id: Option<ChatId>, hub: &Hub) {
    let Some(chat_id) = chat_id.filter(|&id| id != 0) else {
        return;
    };

    if !conn.is_member(chat_id) {
        warn!(user_id = conn.user_id, chat_id, "user not participant in chat");
        return;
    }

    let event = Event::typing(started, chat_id, conn.user_id);
    hub.broadcast_to_chat(chat_id, event, Some(conn.user_id));
}

fn log_close(conn: &Connection, frame: Option<&CloseFrame<'static>>) {
    match frame {
        Some(frame) if frame.code != close_code::NORMAL && frame.code != close_code::AWAY => {
            info!(
                user_id = conn.user_id,
                connection_id = %conn.id,
                code = frame.code,
                reason = %frame.reason,
                "client closed connection"
            );
        }
        _ => debug!(user_id = conn.user_id, connection_id = %conn.id, "client disconnected normally"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> Arc<Event> {
        Arc::new(Event::message_delete(7, 1))
    }

    #[test]
    fn new_connection_is_connecting_with_snapshot() {
        let (conn, _queue) = Connection::new(1, [9, 7, 7], 4);
        assert_eq!(conn.user_id(), 1);
        assert_eq!(conn.chat_ids(), vec![7, 9]);
        assert!(conn.is_member(9));
        assert!(!conn.is_member(8));
        assert_eq!(conn.state(), ConnectionState::Connecting);
    }

    #[test]
    fn send_enqueues_in_order() {
        let (conn, mut queue) = Connection::new(1, [7], 4);
        assert!(conn.send(Arc::new(Event::message_delete(7, 1))));
        assert!(conn.send(Arc::new(Event::message_delete(7, 2))));
        assert_eq!(*queue.try_recv().unwrap(), Event::message_delete(7, 1));
        assert_eq!(*queue.try_recv().unwrap(), Event::message_delete(7, 2));
    }

    #[test]
    fn send_fails_when_queue_full() {
        let (conn, _queue) = Connection::new(1, [7], 1);
        assert!(conn.send(event()));
        assert!(!conn.send(event()));
        assert!(!conn.is_closed());
    }

    #[test]
    fn close_is_idempotent() {
        let (conn, _queue) = Connection::new(1, [7], 4);
        assert!(conn.close());
        assert!(!conn.close());
        assert!(conn.is_closed());
        assert!(!conn.send(event()));
        assert_eq!(conn.state(), ConnectionState::Closing);
    }

    #[test]
    fn state_only_moves_forward() {
        let (conn, _queue) = Connection::new(1, [7], 4);
        conn.mark_open();
        assert_eq!(conn.state(), ConnectionState::Open);
        conn.close();
        conn.mark_open();
        assert_eq!(conn.state(), ConnectionState::Closing);
    }

    #[test]
    fn join_and_leave_chat_update_membership() {
        let (conn, _queue) = Connection::new(1, [7], 4);
        assert!(conn.join_chat(8));
        assert!(!conn.join_chat(8));
        assert!(conn.leave_chat(7));
        assert_eq!(conn.chat_ids(), vec![8]);
    }

    #[tokio::test]
    async fn typing_for_foreign_chat_is_dropped() {
        let (hub, mut runner) = Hub::new();
        let (sender, _sender_queue) = Connection::new(1, [7], 4);
        let (other, mut other_queue) = Connection::new(2, [7, 8], 4);
        runner.registry_mut().register(Arc::clone(&sender));
        runner.registry_mut().register(Arc::clone(&other));

        handle_text(&sender, r#"{"type":"typing.start","payload":{"chat_id":8}}"#, &hub);
        handle_text(&sender, r#"{"type":"typing.start","payload":{"chat_id":0}}"#, &hub);
        handle_text(&sender, "not json", &hub);
        handle_text(&sender, r#"{"type":"presence.online"}"#, &hub);
        handle_text(&sender, r#"{"type":"typing.stop","payload":{"chat_id":7}}"#, &hub);

        assert_eq!(runner.process_pending(), 1);
        assert_eq!(*other_queue.try_recv().unwrap(), Event::typing(false, 7, 1));
        assert!(other_queue.try_recv().is_err());
    }
}
