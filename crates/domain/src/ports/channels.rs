use crate::DomainResult;
use crate::notifications::Notification;
use crate::ports::BoxFuture;

/// Outbound transport for a delivery channel (email sender, push gateway,
/// in-app inbox). Fire-and-forget from the engine's point of view: a failed
/// submit is logged and counted, never rolled back.
pub trait ChannelSink: Send + Sync {
    fn deliver(&self, notification: &Notification) -> BoxFuture<'_, DomainResult<()>>;
}
