//! Hub: the single authority over live connections and chat subscriptions.
//!
//! `Hub` is a cheap, cloneable handle. Every operation is funneled as a
//! command into one control loop (`HubRunner::run`) which owns the
//! [`Registry`]; register, unregister and broadcasts therefore never interleave.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::models::{ChatId, Event, UserId};

use super::connection::Connection;
use super::presence::{announce_offline, announce_online};
use super::registry::{HubStats, Registry};

/// Control queue depth. Broadcasts beyond this are dropped rather than stalling producers.
const COMMAND_QUEUE_CAPACITY: usize = 1024;

enum Command {
    Register {
        connection: Arc<Connection>,
        reply: oneshot::Sender<bool>,
    },
    Unregister {
        connection: Arc<Connection>,
        reply: oneshot::Sender<bool>,
    },
    BroadcastToChat {
        chat_id: ChatId,
        event: Arc<Event>,
        exclude: Option<UserId>,
    },
    BroadcastToUser {
        user_id: UserId,
        event: Arc<Event>,
    },
    Subscribe {
        chat_id: ChatId,
        user_id: UserId,
        reply: oneshot::Sender<bool>,
    },
    Unsubscribe {
        chat_id: ChatId,
        user_id: UserId,
        reply: oneshot::Sender<()>,
    },
    IsOnline {
        user_id: UserId,
        reply: oneshot::Sender<bool>,
    },
    OnlineUsers {
        candidates: Vec<UserId>,
        reply: oneshot::Sender<Vec<UserId>>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

/// Handle to the hub control loop.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<Command>,
}

/// The control loop half; consumed by [`HubRunner::run`].
pub struct HubRunner {
    commands: mpsc::Receiver<Command>,
    registry: Registry,
}

impl Hub {
    pub fn new() -> (Hub, HubRunner) {
        Self::with_capacity(COMMAND_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Hub, HubRunner) {
        let (commands, receiver) = mpsc::channel(capacity);
        let runner = HubRunner {
            commands: receiver,
            registry: Registry::new(),
        };
        (Hub { commands }, runner)
    }

    /// Register a connection. Resolves once broadcasts can reach it; the
    /// value is `true` for the user's first open connection, in which case
    /// `presence.online` has already been fanned out to the user's chats.
    pub async fn register(&self, connection: Arc<Connection>) -> AppResult<bool> {
        self.request(|reply| Command::Register { connection, reply })
            .await
            .ok_or(AppError::HubUnavailable)
    }

    /// Remove a connection (idempotent). `true` only for the call that removed
    /// the user's last connection; that call also announces `presence.offline`.
    pub async fn unregister(&self, connection: &Arc<Connection>) -> bool {
        let command_connection = Arc::clone(connection);
        match self
            .request(|reply| Command::Unregister {
                connection: command_connection,
                reply,
            })
            .await
        {
            Some(went_offline) => went_offline,
            None => {
                connection.close();
                false
            }
        }
    }

    /// Fan out to all subscribers of a chat except `exclude`. Never waits.
    pub fn broadcast_to_chat(
        &self,
        chat_id: ChatId,
        event: impl Into<Arc<Event>>,
        exclude: Option<UserId>,
    ) {
        self.dispatch(Command::BroadcastToChat {
            chat_id,
            event: event.into(),
            exclude,
        });
    }

    /// Deliver to every connection of one user. Never waits.
    pub fn broadcast_to_user(&self, user_id: UserId, event: impl Into<Arc<Event>>) {
        self.dispatch(Command::BroadcastToUser {
            user_id,
            event: event.into(),
        });
    }

    /// Start routing a chat to an already connected user (e.g. after they join it).
    /// `false` when the user is offline or the hub is gone.
    pub async fn subscribe_to_chat(&self, chat_id: ChatId, user_id: UserId) -> bool {
        self.request(|reply| Command::Subscribe {
            chat_id,
            user_id,
            reply,
        })
        .await
        .unwrap_or(false)
    }

    pub async fn unsubscribe_from_chat(&self, chat_id: ChatId, user_id: UserId) {
        let _ = self
            .request(|reply| Command::Unsubscribe {
                chat_id,
                user_id,
                reply,
            })
            .await;
    }

    pub async fn is_user_online(&self, user_id: UserId) -> bool {
        self.request(|reply| Command::IsOnline { user_id, reply })
            .await
            .unwrap_or(false)
    }

    pub async fn online_users(&self, candidates: &[UserId]) -> Vec<UserId> {
        let candidates = candidates.to_vec();
        self.request(|reply| Command::OnlineUsers { candidates, reply })
            .await
            .unwrap_or_default()
    }

    pub async fn stats(&self) -> HubStats {
        self.request(|reply| Command::Stats { reply })
            .await
            .unwrap_or_default()
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (reply, response) = oneshot::channel();
        self.commands.send(build(reply)).await.ok()?;
        response.await.ok()
    }

    fn dispatch(&self, command: Command) {
        match self.commands.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("hub command queue full, dropping broadcast"),
            Err(TrySendError::Closed(_)) => debug!("hub stopped, dropping broadcast"),
        }
    }
}

impl HubRunner {
    /// Process commands until `shutdown` resolves (or every handle is dropped),
    /// then close all connections and clear state.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("hub started");

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }

        self.commands.close();
        self.registry.shutdown();
        info!("hub shutdown complete");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register { connection, reply } => {
                let user_id = connection.user_id();
                let chat_ids = connection.chat_ids();
                let first = self.registry.register(connection);
                if first {
                    announce_online(&self.registry, user_id, &chat_ids);
                }
                let _ = reply.send(first);
            }
            Command::Unregister { connection, reply } => {
                let user_id = connection.user_id();
                let departed = self.registry.unregister(&connection);
                if let Some(chat_ids) = &departed {
                    announce_offline(&self.registry, user_id, chat_ids, Utc::now());
                }
                let _ = reply.send(departed.is_some());
            }
            Command::BroadcastToChat {
                chat_id,
                event,
                exclude,
            } => {
                self.registry.broadcast_to_chat(chat_id, &event, exclude);
            }
            Command::BroadcastToUser { user_id, event } => {
                let delivery = self.registry.broadcast_to_user(user_id, &event);
                debug!(
                    user_id,
                    event = %event.kind(),
                    delivered = delivery.delivered,
                    dropped = delivery.dropped,
                    "broadcast to user"
                );
            }
            Command::Subscribe {
                chat_id,
                user_id,
                reply,
            } => {
                let _ = reply.send(self.registry.subscribe(chat_id, user_id));
            }
            Command::Unsubscribe {
                chat_id,
                user_id,
                reply,
            } => {
                self.registry.unsubscribe(chat_id, user_id);
                let _ = reply.send(());
            }
            Command::IsOnline { user_id, reply } => {
                let _ = reply.send(self.registry.is_online(user_id));
            }
            Command::OnlineUsers { candidates, reply } => {
                let _ = reply.send(self.registry.online_users(&candidates));
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.registry.stats());
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Handle every queued command without waiting; returns how many ran.
    #[cfg(test)]
    pub(crate) fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(command) = self.commands.try_recv() {
            self.handle(command);
            handled += 1;
        }
        handled
    }
}
