//! WebSocket Connection Hub
//!
//! Manages all WebSocket connections and their live views. Every topic a
//! connection subscribes to runs its own live query in a task that pushes
//! a `snapshot` message per result set. Unsubscribing or disconnecting
//! aborts the task, which drops the query.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::messages::{ServerMessage, Topic};
use crate::api::dto::PlannedBathDto;
use crate::backend::DocumentStore;
use crate::views::{
    activity_view, comments_view, feed_view, leaderboard_view, planned_view, AttendeeDirectory,
    View,
};

/// Unique identifier for a WebSocket connection
pub type ConnectionId = String;

type Sender = mpsc::UnboundedSender<ServerMessage>;

/// Manages all WebSocket connections and subscriptions
pub struct ConnectionHub {
    store: Arc<dyn DocumentStore>,
    /// Active connections: ConnectionId → ConnectionHandle
    connections: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
    /// Configuration
    config: HubConfig,
}

/// Configuration for the connection hub
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Maximum live views per connection
    pub max_topics_per_connection: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            max_topics_per_connection: 32,
        }
    }
}

/// Handle for sending messages to a specific connection
pub struct ConnectionHandle {
    /// Channel sender for this connection
    pub sender: Sender,
    /// Running live views, by topic
    views: HashMap<Topic, JoinHandle<()>>,
}

impl ConnectionHub {
    /// Create a new connection hub
    pub fn new(store: Arc<dyn DocumentStore>, config: HubConfig) -> Self {
        Self {
            store,
            connections: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Register a new WebSocket connection
    ///
    /// Returns the connection ID on success, or an error if the connection
    /// limit has been reached.
    pub async fn register(&self, sender: Sender) -> Result<ConnectionId, HubError> {
        let mut connections = self.connections.write().await;
        if connections.len() >= self.config.max_connections {
            return Err(HubError::TooManyConnections(self.config.max_connections));
        }

        let id = Uuid::new_v4().to_string();
        connections.insert(
            id.clone(),
            ConnectionHandle {
                sender,
                views: HashMap::new(),
            },
        );

        tracing::info!(connection_id = %id, "WebSocket connected");
        Ok(id)
    }

    /// Unregister a connection and stop its live views
    pub async fn unregister(&self, id: &str) {
        if let Some(handle) = self.connections.write().await.remove(id) {
            for task in handle.views.values() {
                task.abort();
            }
        }

        tracing::info!(connection_id = %id, "WebSocket disconnected");
    }

    /// Start a live view per topic.
    ///
    /// Unknown topics are skipped; topics already followed are confirmed
    /// again without restarting their view.
    pub async fn subscribe(&self, id: &str, topics: Vec<String>) -> Result<Vec<String>, HubError> {
        let mut connections = self.connections.write().await;
        let handle = connections
            .get_mut(id)
            .ok_or(HubError::ConnectionNotFound)?;

        let mut subscribed = Vec::new();
        for raw in topics {
            let topic: Topic = match raw.parse() {
                Ok(topic) => topic,
                Err(_) => {
                    tracing::warn!(topic = %raw, "Invalid topic ignored");
                    continue;
                }
            };

            if !handle.views.contains_key(&topic) {
                if handle.views.len() >= self.config.max_topics_per_connection {
                    return Err(HubError::TooManyTopics(self.config.max_topics_per_connection));
                }
                let task = self.start_view(&topic, handle.sender.clone());
                handle.views.insert(topic.clone(), task);
            }
            subscribed.push(topic.to_string());
        }

        tracing::debug!(
            connection_id = %id,
            topics = ?subscribed,
            "Subscribed to topics"
        );

        Ok(subscribed)
    }

    /// Stop live views
    pub async fn unsubscribe(
        &self,
        id: &str,
        topics: Vec<String>,
    ) -> Result<Vec<String>, HubError> {
        let mut connections = self.connections.write().await;
        let handle = connections
            .get_mut(id)
            .ok_or(HubError::ConnectionNotFound)?;

        let mut unsubscribed = Vec::new();
        for raw in topics {
            let Ok(topic) = raw.parse::<Topic>() else {
                continue;
            };
            if let Some(task) = handle.views.remove(&topic) {
                task.abort();
                unsubscribed.push(topic.to_string());
            }
        }

        tracing::debug!(
            connection_id = %id,
            topics = ?unsubscribed,
            "Unsubscribed from topics"
        );

        Ok(unsubscribed)
    }

    /// Send a message directly to a specific connection
    pub async fn send_to(&self, id: &str, message: ServerMessage) -> Result<(), HubError> {
        let connections = self.connections.read().await;
        let handle = connections.get(id).ok_or(HubError::ConnectionNotFound)?;

        handle
            .sender
            .send(message)
            .map_err(|_| HubError::SendFailed)
    }

    /// Get the current connection count
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Number of connections following a topic
    pub async fn subscription_count(&self, topic: &str) -> usize {
        let Ok(topic) = topic.parse::<Topic>() else {
            return 0;
        };
        self.connections
            .read()
            .await
            .values()
            .filter(|handle| handle.views.contains_key(&topic))
            .count()
    }

    fn start_view(&self, topic: &Topic, sender: Sender) -> JoinHandle<()> {
        let store = self.store.as_ref();
        let name = topic.to_string();
        match topic {
            Topic::Feed => tokio::spawn(forward(feed_view(store), name, sender)),
            Topic::Leaderboard => tokio::spawn(forward(leaderboard_view(store), name, sender)),
            Topic::Comments(bath_id) => {
                tokio::spawn(forward(comments_view(store, bath_id), name, sender))
            }
            Topic::Activity(uid) => tokio::spawn(forward(activity_view(store, uid), name, sender)),
            Topic::Planned => {
                let directory = AttendeeDirectory::new(Arc::clone(&self.store));
                tokio::spawn(forward_planned(planned_view(store), directory, name, sender))
            }
        }
    }
}

/// Push every result of a view to the connection until it goes away
async fn forward<T>(mut view: View<T>, topic: String, sender: Sender)
where
    T: Serialize + Clone + Send + 'static,
{
    while let Some(result) = view.next_result().await {
        let message = match result {
            Ok(value) => snapshot(&topic, &value),
            Err(e) => view_error(&topic, &e),
        };
        if sender.send(message).is_err() {
            break;
        }
    }
}

/// Planned baths with attendee names; the directory lives as long as the view
async fn forward_planned(
    mut view: View<Vec<crate::model::PlannedBath>>,
    directory: AttendeeDirectory,
    topic: String,
    sender: Sender,
) {
    while let Some(result) = view.next_result().await {
        let message = match result {
            Ok(planned) => {
                let uids: Vec<String> = planned
                    .iter()
                    .flat_map(|bath| bath.attendees.iter().cloned())
                    .collect();
                if let Err(e) = directory.resolve(&uids).await {
                    tracing::warn!(topic = %topic, error = %e, "Attendee lookup failed");
                }
                let dtos: Vec<PlannedBathDto> = planned
                    .into_iter()
                    .map(|bath| PlannedBathDto {
                        attendee_details: directory.render(&bath.attendees),
                        attending: None,
                        bath,
                    })
                    .collect();
                snapshot(&topic, &dtos)
            }
            Err(e) => view_error(&topic, &e),
        };
        if sender.send(message).is_err() {
            break;
        }
    }
}

fn snapshot<T: Serialize>(topic: &str, value: &T) -> ServerMessage {
    match serde_json::to_value(value) {
        Ok(data) => ServerMessage::Snapshot {
            topic: topic.to_string(),
            data,
        },
        Err(e) => view_error(topic, &e),
    }
}

fn view_error(topic: &str, err: &dyn std::fmt::Display) -> ServerMessage {
    tracing::warn!(topic, error = %err, "Live view failed");
    ServerMessage::Error {
        message: format!("{}: {}", topic, err),
    }
}

/// Errors that can occur in the connection hub
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Too many connections (limit: {0})")]
    TooManyConnections(usize),

    #[error("Too many topics on one connection (limit: {0})")]
    TooManyTopics(usize),

    #[error("Connection not found")]
    ConnectionNotFound,

    #[error("Failed to send message")]
    SendFailed,
}
