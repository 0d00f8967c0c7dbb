//! Notifier Interface (C11) — change events fired after a commit, so
//! external subscribers (cache invalidators, live query listeners) can
//! react without polling.
//!
//! Grounded on the pack's `async-trait`-based plugin interfaces
//! (`harborgrid`): a small trait the engine calls through, with exactly
//! one bundled implementation backed by a `tokio::sync::broadcast`
//! channel. A second backend (LISTEN/NOTIFY through Postgres itself) is
//! named in `config::NotifierBackend` but not implemented here — it
//! would live behind the same trait in a calling crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// The logical channels a change can be published on, per spec.md §4.11.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Space,
    Spaces,
    Graph,
    Graphs,
    User,
    Users,
}

impl Channel {
    fn as_str(&self) -> &'static str {
        match self {
            Channel::Space => "space",
            Channel::Spaces => "spaces",
            Channel::Graph => "graph",
            Channel::Graphs => "graphs",
            Channel::User => "user",
            Channel::Users => "users",
        }
    }
}

/// The payload carried on every channel: enough to identify what
/// changed without forcing the subscriber to re-query for basic facts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub space_id: String,
    pub kind: ChangeKind,
    pub subject: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("no subscribers on channel {0}")]
    NoSubscribers(String),

    #[error("notifier channel closed")]
    Closed,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: Channel, payload: ChangeEvent) -> Result<(), NotifyError>;
}

/// The bundled in-process implementation: one broadcast channel per
/// logical `Channel`, so a slow or absent subscriber on `graph` never
/// blocks a publish on `space`.
pub struct InProcessNotifier {
    space: broadcast::Sender<ChangeEvent>,
    spaces: broadcast::Sender<ChangeEvent>,
    graph: broadcast::Sender<ChangeEvent>,
    graphs: broadcast::Sender<ChangeEvent>,
    user: broadcast::Sender<ChangeEvent>,
    users: broadcast::Sender<ChangeEvent>,
}

const CHANNEL_CAPACITY: usize = 256;

impl InProcessNotifier {
    pub fn new() -> Self {
        Self {
            space: broadcast::channel(CHANNEL_CAPACITY).0,
            spaces: broadcast::channel(CHANNEL_CAPACITY).0,
            graph: broadcast::channel(CHANNEL_CAPACITY).0,
            graphs: broadcast::channel(CHANNEL_CAPACITY).0,
            user: broadcast::channel(CHANNEL_CAPACITY).0,
            users: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    fn sender(&self, channel: Channel) -> &broadcast::Sender<ChangeEvent> {
        match channel {
            Channel::Space => &self.space,
            Channel::Spaces => &self.spaces,
            Channel::Graph => &self.graph,
            Channel::Graphs => &self.graphs,
            Channel::User => &self.user,
            Channel::Users => &self.users,
        }
    }

    /// Subscribes to one channel, receiving every event published after
    /// this call.
    pub fn subscribe(&self, channel: Channel) -> broadcast::Receiver<ChangeEvent> {
        self.sender(channel).subscribe()
    }
}

impl Default for InProcessNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for InProcessNotifier {
    async fn notify(&self, channel: Channel, payload: ChangeEvent) -> Result<(), NotifyError> {
        // `send` only errors when there are zero receivers; that's a
        // normal, non-fatal condition for a channel nobody is watching
        // yet, so it's reported but not escalated to an `EngineError`.
        self.sender(channel)
            .send(payload)
            .map(|_| ())
            .map_err(|_| NotifyError::NoSubscribers(channel.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(space_id: &str) -> ChangeEvent {
        ChangeEvent {
            space_id: space_id.to_string(),
            kind: ChangeKind::Created,
            subject: "http://ex/a".to_string(),
            occurred_at: DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_events_published_after_subscribing() {
        let notifier = InProcessNotifier::new();
        let mut rx = notifier.subscribe(Channel::Space);
        notifier.notify(Channel::Space, event("s1")).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.space_id, "s1");
    }

    #[tokio::test]
    async fn channels_are_independent() {
        let notifier = InProcessNotifier::new();
        let mut graph_rx = notifier.subscribe(Channel::Graph);
        notifier.notify(Channel::Space, event("s1")).await.unwrap();
        assert!(graph_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn publishing_with_no_subscribers_reports_but_does_not_panic() {
        let notifier = InProcessNotifier::new();
        let result = notifier.notify(Channel::User, event("s1")).await;
        assert!(matches!(result, Err(NotifyError::NoSubscribers(_))));
    }
}
