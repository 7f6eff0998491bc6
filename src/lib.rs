//! # Badekompis
//!
//! Social tracker for cold-water baths. Users log baths, plan group baths,
//! comment and react on each other's entries and race towards a personal
//! yearly target on a shared leaderboard.
//!
//! The application core talks to a backend-as-a-service through four ports
//! (document store, auth, blob storage, geocoder). A local reference backend
//! ships with the crate so the server and CLI run without any external
//! service.
//!
//! ## Modules
//!
//! - [`backend`]: Ports and the local reference backend
//! - [`session`]: Signed-in principal and profile
//! - [`forms`]: Form validation
//! - [`baths`]: Logging and planning baths, comments and reactions
//! - [`attendance`]: Joining and leaving planned baths
//! - [`notifications`]: Unseen-activity flags
//! - [`views`]: Live views over the feed, planned baths and leaderboard
//! - [`api`]: REST API server with Axum
//! - [`websocket`]: Live views over WebSocket
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use badekompis::forms::SignupForm;
//! use badekompis::local_storage::MemoryLocalStorage;
//! use badekompis::{Backend, Config, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!     let backend = Backend::open_local(&config).await?;
//!
//!     let session = Session::new(backend, Arc::new(MemoryLocalStorage::new()));
//!     let notice = session
//!         .sign_up(&SignupForm {
//!             username: "anna".into(),
//!             password: "hemmelig".into(),
//!             confirm_password: "hemmelig".into(),
//!             target_baths: 30,
//!         })
//!         .await?;
//!
//!     println!("{}", notice);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod attendance;
pub mod backend;
pub mod baths;
pub mod config;
pub mod forms;
pub mod geocoding;
pub mod local_storage;
pub mod model;
pub mod notice;
pub mod notifications;
pub mod session;
pub mod views;
pub mod websocket;

pub use api::{build_router, serve, ApiError, AppState};
pub use attendance::{AttendanceOutcome, AttendanceService};
pub use backend::{Backend, DocumentStore, MemoryStore};
pub use baths::{BathError, BathService};
pub use config::Config;
pub use notice::Notice;
pub use notifications::{Category, NotificationStatus, NotificationTracker};
pub use session::{Session, SessionError};
