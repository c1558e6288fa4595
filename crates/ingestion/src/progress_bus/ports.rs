//! `ProgressBus` is consumed by producers (upload session, pipeline,
//! recovery) directly as a concrete struct — the port worth naming here is
//! the *sink* side, so the websocket layer and tests can both implement it
//! without the bus depending on axum, the same separation the teacher keeps
//! between `InMemoryEventBus` and its `EventHandler<E>` consumers.

use super::dto::ProgressEvent;
use async_trait::async_trait;

/// A destination for progress events — one per live subscriber connection.
/// Returning `false` (or being dropped) tells the bus the sink is dead; the
/// bus removes it and the publish is still considered to have succeeded
/// (best-effort delivery, spec.md §4.1).
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn send(&self, event: &ProgressEvent) -> bool;
}

/// Handle returned by `subscribe`. Cancelling is idempotent, matching the
/// teacher's `InMemorySubscription::cancel` contract.
pub trait Subscription: Send + Sync {
    fn id(&self) -> &str;
    fn principal_id(&self) -> &str;
    fn cancel(&self);
    fn is_active(&self) -> bool;
}
