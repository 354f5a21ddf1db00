pub mod auth;
pub mod companions;
pub mod error;
pub mod events;
pub mod notifications;
pub mod queues;
pub mod time_slots;

use axum::Router;
use std::sync::Arc;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(auth::routes())
        .merge(events::routes())
        .merge(time_slots::routes())
        .merge(queues::routes())
        .merge(companions::routes())
        .merge(notifications::routes())
}
