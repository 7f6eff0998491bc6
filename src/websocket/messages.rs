//! WebSocket Message Types
//!
//! Defines all message types for WebSocket communication between
//! clients and the Badekompis server.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Messages sent from client to server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start live views (e.g., "feed", "comments.B1")
    Subscribe {
        topics: Vec<String>,
    },
    /// Stop live views
    Unsubscribe {
        topics: Vec<String>,
    },
    /// Ping for keepalive
    Ping,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Current value of a live view; replaces the previous one
    Snapshot {
        topic: String,
        data: serde_json::Value,
    },
    /// Subscription confirmed
    Subscribed {
        /// Topics successfully subscribed to
        topics: Vec<String>,
    },
    /// Unsubscription confirmed
    Unsubscribed {
        /// Topics successfully unsubscribed from
        topics: Vec<String>,
    },
    /// Pong response to ping
    Pong,
    /// Error message
    Error {
        /// Error description
        message: String,
    },
    /// Connection established
    Connected {
        /// Unique connection identifier
        connection_id: String,
    },
}

/// A live view a connection can follow
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Feed,
    Planned,
    Leaderboard,
    /// Comments on one bath
    Comments(String),
    /// One user's entries
    Activity(String),
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let scoped = |id: &str, make: fn(String) -> Topic| {
            if id.is_empty() || id.contains('/') {
                Err(format!("invalid topic '{}'", s))
            } else {
                Ok(make(id.to_string()))
            }
        };

        match s {
            "feed" => Ok(Topic::Feed),
            "planned" => Ok(Topic::Planned),
            "leaderboard" => Ok(Topic::Leaderboard),
            _ => {
                if let Some(id) = s.strip_prefix("comments.") {
                    scoped(id, Topic::Comments)
                } else if let Some(uid) = s.strip_prefix("activity.") {
                    scoped(uid, Topic::Activity)
                } else {
                    Err(format!("invalid topic '{}'", s))
                }
            }
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Feed => f.write_str("feed"),
            Topic::Planned => f.write_str("planned"),
            Topic::Leaderboard => f.write_str("leaderboard"),
            Topic::Comments(id) => write!(f, "comments.{}", id),
            Topic::Activity(uid) => write!(f, "activity.{}", uid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_deserialize_subscribe() {
        let json = r#"{"type": "subscribe", "topics": ["feed", "comments.B1"]}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Subscribe { topics } => {
                assert_eq!(topics.len(), 2);
                assert_eq!(topics[1], "comments.B1");
            }
            _ => panic!("Expected Subscribe"),
        }
    }

    #[test]
    fn test_client_message_deserialize_ping() {
        let json = r#"{"type": "ping"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn test_server_message_serialize_snapshot() {
        let msg = ServerMessage::Snapshot {
            topic: "leaderboard".to_string(),
            data: serde_json::json!([]),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"snapshot\""));
        assert!(json.contains("\"topic\":\"leaderboard\""));
    }

    #[test]
    fn test_server_message_serialize_connected() {
        let msg = ServerMessage::Connected {
            connection_id: "abc-123".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"connected\""));
        assert!(json.contains("\"connection_id\":\"abc-123\""));
    }

    #[test]
    fn test_topic_parsing() {
        assert_eq!("feed".parse::<Topic>().unwrap(), Topic::Feed);
        assert_eq!(
            "comments.B1".parse::<Topic>().unwrap(),
            Topic::Comments("B1".to_string())
        );
        assert_eq!(
            "activity.u1".parse::<Topic>().unwrap().to_string(),
            "activity.u1"
        );

        assert!("comments.".parse::<Topic>().is_err());
        assert!("activity.a/b".parse::<Topic>().is_err());
        assert!("metrics.mood".parse::<Topic>().is_err());
        assert!("".parse::<Topic>().is_err());
    }
}
