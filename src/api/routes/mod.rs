//! API Routes
//!
//! Route handlers organized by functionality.

pub mod auth;
pub mod baths;
pub mod feed;
pub mod geocode;
pub mod health;
pub mod notifications;
pub mod profile;
pub mod social;
pub mod uploads;

use crate::views::View;

use super::error::{ApiError, ApiResult};

/// First snapshot of a live view, for one-shot reads
pub(crate) async fn first_snapshot<T: Clone + Send + 'static>(mut view: View<T>) -> ApiResult<T> {
    match view.next_result().await {
        Some(result) => Ok(result?),
        None => Err(ApiError::Internal("Live query ended before its first snapshot".to_string())),
    }
}
