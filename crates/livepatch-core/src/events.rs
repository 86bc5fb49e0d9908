//! Typed inspector events and fan-out to subscribers.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::ScriptId;

/// Events relevant to the reload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InspectorEvent {
    /// `Debugger.scriptParsed`.
    ScriptParsed { script_id: ScriptId, url: String },
    /// `Debugger.scriptFailedToParse`.
    ScriptFailedToParse { script_id: ScriptId, url: String },
    /// `Debugger.paused`.
    Paused,
    /// The transport went away.
    Disconnected,
}

/// Fan-out hub for inspector events.
///
/// Every subscriber gets its own unbounded queue, so a slow subscriber never
/// loses the burst of `scriptParsed` events replayed by `Debugger.enable`.
/// Closing the hub ends every subscription.
pub struct EventHub {
    subscribers: Mutex<Option<Vec<mpsc::UnboundedSender<InspectorEvent>>>>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    /// Create an open hub with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Some(Vec::new())),
        }
    }

    /// Deliver an event to all live subscribers, dropping those that went away.
    pub fn publish(&self, event: &InspectorEvent) {
        if let Some(subs) = self.subscribers.lock().as_mut() {
            subs.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Subscribe to future events.
    ///
    /// Subscribing to a closed hub yields a subscription that ends immediately.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(subs) = self.subscribers.lock().as_mut() {
            subs.push(tx);
        }
        Subscription { rx }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .as_ref()
            .map_or(0, |subs| subs.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// End every subscription. Later publishes are dropped.
    pub fn close(&self) {
        self.subscribers.lock().take();
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.subscribers.lock().is_none()
    }
}

/// Receiving end of an [`EventHub`] subscription.
///
/// Dropping it unsubscribes.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<InspectorEvent>,
}

impl Subscription {
    /// Wait for the next event. `None` once the hub is closed and drained.
    pub async fn recv(&mut self) -> Option<InspectorEvent> {
        self.rx.recv().await
    }

    /// Take an already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<InspectorEvent> {
        self.rx.try_recv().ok()
    }

    /// Convert into a `Stream`.
    #[must_use]
    pub fn into_stream(self) -> UnboundedReceiverStream<InspectorEvent> {
        UnboundedReceiverStream::new(self.rx)
    }
}

impl Stream for Subscription {
    type Item = InspectorEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    fn parsed(id: &str) -> InspectorEvent {
        InspectorEvent::ScriptParsed {
            script_id: ScriptId::new(id),
            url: format!("file:///p/{id}.js"),
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_events_in_order() {
        let hub = EventHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        hub.publish(&parsed("1"));
        hub.publish(&InspectorEvent::Paused);

        assert_eq!(a.recv().await, Some(parsed("1")));
        assert_eq!(a.recv().await, Some(InspectorEvent::Paused));
        assert_eq!(b.try_recv(), Some(parsed("1")));
        assert_eq!(b.try_recv(), Some(InspectorEvent::Paused));
        assert_eq!(b.try_recv(), None);
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let hub = EventHub::new();
        let sub = hub.subscribe();
        hub.publish(&parsed("7"));
        hub.close();
        hub.publish(&parsed("8"));

        let events: Vec<_> = sub.collect().await;
        assert_eq!(events, vec![parsed("7")]);
        assert!(hub.is_closed());
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let hub = EventHub::new();
        let sub = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        hub.publish(&InspectorEvent::Paused);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_after_close_ends_immediately() {
        let hub = EventHub::new();
        hub.close();
        let mut sub = hub.subscribe();
        tokio_test::assert_ready!(tokio_test::task::spawn(sub.recv()).poll());
    }
}
