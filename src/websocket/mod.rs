//! WebSocket Live Views
//!
//! Pushes live views to clients over WebSocket.
//!
//! ## Architecture
//!
//! - **ConnectionHub**: Manages connections and one live query per subscribed topic
//! - **Handler**: Handles WebSocket upgrade and message processing
//! - **Messages**: Defines client and server message formats
//!
//! ## Topics
//!
//! - `feed` - Every entry, newest first
//! - `planned` - Upcoming planned baths with attendee names
//! - `leaderboard` - Top users by logged baths
//! - `comments.{bathId}` - Comments on one bath
//! - `activity.{uid}` - One user's entries
//!
//! Each subscription answers with a `snapshot` right away and again after
//! every change to its result set.
//!
//! ## Example
//!
//! ```javascript
//! const ws = new WebSocket('ws://localhost:8082/ws');
//!
//! ws.onopen = () => {
//!   ws.send(JSON.stringify({type: 'subscribe', topics: ['feed', 'leaderboard']}));
//! };
//!
//! ws.onmessage = (event) => {
//!   const msg = JSON.parse(event.data);
//!   if (msg.type === 'snapshot') render(msg.topic, msg.data);
//! };
//! ```

mod handler;
mod hub;
mod messages;

pub use handler::websocket_handler;
pub use hub::{ConnectionHub, ConnectionId, HubConfig, HubError};
pub use messages::{ClientMessage, ServerMessage, Topic};
