//! Event subscription registry.
//!
//! One [`EventStream`] per event type, created on first selection and kept
//! for the life of the client. Each connection gets its own set of hub
//! subscription ids: they are bound when the `subscribe_events` request is
//! sent and forgotten when the connection goes away.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, trace};

use hasslink_protocol::{HassEvent, Request};

use crate::types::EventStream;

/// The registry holds the only strong reference to each channel, so
/// streams close when it is dropped.
struct Entry {
    sender: Arc<broadcast::Sender<HassEvent>>,
    stream: EventStream,
}

pub(crate) struct EventSubscriptionRegistry {
    /// Keyed by event type; `None` is the wildcard subscription.
    streams: BTreeMap<Option<String>, Entry>,
    /// Hub subscription id on the current connection -> event type.
    by_id: HashMap<u64, Option<String>>,
    buffer: usize,
}

impl EventSubscriptionRegistry {
    pub(crate) fn new(buffer: usize) -> Self {
        Self {
            streams: BTreeMap::new(),
            by_id: HashMap::new(),
            buffer,
        }
    }

    /// Returns the stream for `event_type`, creating it on first use.
    /// The flag is `true` when the stream is new.
    pub(crate) fn select(&mut self, event_type: Option<&str>) -> (EventStream, bool) {
        let key = event_type.map(str::to_string);
        if let Some(entry) = self.streams.get(&key) {
            return (entry.stream.clone(), false);
        }

        debug!(event_type = event_type.unwrap_or("*"), "new event stream");
        let (sender, _) = broadcast::channel(self.buffer);
        let sender = Arc::new(sender);
        let stream = EventStream::new(key.clone(), &sender);
        self.streams.insert(
            key,
            Entry {
                sender,
                stream: stream.clone(),
            },
        );
        (stream, true)
    }

    /// Binds a hub subscription id to an event type and builds the
    /// matching `subscribe_events` request.
    pub(crate) fn bind(&mut self, event_type: Option<String>, id: u64) -> Request {
        let request = Request::subscribe_events(event_type.as_deref()).with_id(id);
        self.by_id.insert(id, event_type);
        request
    }

    /// Re-issues a subscription for every known stream on a fresh
    /// connection. Ids come from `alloc` in stream order.
    pub(crate) fn resubscribe(
        &mut self,
        mut alloc: impl FnMut() -> u64,
    ) -> Vec<(Option<String>, Request)> {
        self.by_id.clear();
        let types: Vec<_> = self.streams.keys().cloned().collect();
        types
            .into_iter()
            .map(|event_type| {
                let request = self.bind(event_type.clone(), alloc());
                (event_type, request)
            })
            .collect()
    }

    /// Forgets the hub ids of a closed connection.
    pub(crate) fn clear_ids(&mut self) {
        self.by_id.clear();
    }

    /// Delivers an event to the stream subscribed under `id`.
    /// Returns `false` for unknown ids; the event is dropped.
    pub(crate) fn route(&self, id: u64, event: HassEvent) -> bool {
        let Some(entry) = self
            .by_id
            .get(&id)
            .and_then(|event_type| self.streams.get(event_type))
        else {
            trace!(id, event_type = %event.event_type, "event for unknown subscription, dropping");
            return false;
        };
        // Zero receivers is not an error.
        let _ = entry.sender.send(event);
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.streams.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hasslink_protocol::MessageType;

    fn event(event_type: &str) -> HassEvent {
        serde_json::from_value(serde_json::json!({ "event_type": event_type })).unwrap()
    }

    #[test]
    fn select_returns_same_stream_for_same_type() {
        let mut reg = EventSubscriptionRegistry::new(8);
        let (a, new_a) = reg.select(Some("state_changed"));
        let (b, new_b) = reg.select(Some("state_changed"));
        let (all, new_all) = reg.select(None);

        assert!(new_a && !new_b && new_all);
        assert!(a.same_stream(&b));
        assert!(!a.same_stream(&all));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn bind_builds_subscribe_request() {
        let mut reg = EventSubscriptionRegistry::new(8);
        let req = reg.bind(Some("call_service".into()), 4);
        assert_eq!(req.msg_type, MessageType::SubscribeEvents);
        assert_eq!(req.id, Some(4));
        assert_eq!(req.field("event_type").unwrap(), "call_service");

        let wildcard = reg.bind(None, 5);
        assert!(wildcard.field("event_type").is_none());
    }

    #[tokio::test]
    async fn route_delivers_to_bound_stream_only() {
        let mut reg = EventSubscriptionRegistry::new(8);
        let (stream, _) = reg.select(Some("state_changed"));
        let mut rx = stream.subscribe();
        reg.bind(Some("state_changed".into()), 2);

        assert!(reg.route(2, event("state_changed")));
        assert!(!reg.route(99, event("state_changed")));
        assert_eq!(rx.recv().await.unwrap().event_type, "state_changed");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn resubscribe_rebinds_every_stream() {
        let mut reg = EventSubscriptionRegistry::new(8);
        reg.select(Some("b"));
        reg.select(None);
        reg.select(Some("a"));
        reg.bind(Some("a".into()), 7);

        let mut next = 10;
        let requests = reg.resubscribe(|| {
            next += 1;
            next
        });

        let ids: Vec<_> = requests.iter().map(|(t, r)| (t.clone(), r.id)).collect();
        assert_eq!(
            ids,
            vec![
                (None, Some(11)),
                (Some("a".into()), Some(12)),
                (Some("b".into()), Some(13)),
            ]
        );
        // The old binding is gone.
        assert!(!reg.route(7, event("a")));
        assert!(reg.route(12, event("a")));
    }

    #[test]
    fn clear_ids_keeps_streams() {
        let mut reg = EventSubscriptionRegistry::new(8);
        let (before, _) = reg.select(Some("a"));
        reg.bind(Some("a".into()), 1);
        reg.clear_ids();

        assert!(!reg.route(1, event("a")));
        let (after, created) = reg.select(Some("a"));
        assert!(!created);
        assert!(before.same_stream(&after));
    }

    #[tokio::test]
    async fn dropping_registry_closes_streams() {
        let mut reg = EventSubscriptionRegistry::new(8);
        let (stream, _) = reg.select(Some("a"));
        let mut rx = stream.subscribe();
        reg.bind(Some("a".into()), 1);
        assert!(reg.route(1, event("a")));

        drop(reg);
        assert!(stream.is_closed());
        assert_eq!(rx.recv().await.unwrap().event_type, "a");
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
