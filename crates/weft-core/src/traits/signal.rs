use crate::types::StoreId;
use std::sync::Arc;

/// Callback fired when some process committed to a store.
///
/// Handlers must be cheap: they run on the signal-delivery thread and should
/// only schedule work elsewhere.
pub type SignalHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Payload-less cross-process change notification.
///
/// Delivery is at-least-once while the receiver is running and may be lost
/// while it is suspended, so receivers always pair it with polling.
pub trait ChangeSignal: Send + Sync {
    /// Announce that `store` has new log entries
    fn post(&self, store: StoreId);

    /// Register a handler for `store`
    fn subscribe(&self, store: StoreId, handler: SignalHandler) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);
}
