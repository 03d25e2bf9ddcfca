//! Transport contract and per-context outgoing routing.

use std::sync::Arc;

use async_trait::async_trait;
use parley_types::{BusResult, Message};

use crate::BusHandle;

/// Adapter between a chat platform and the bus.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Id matched against `Context::source` when routing replies.
    fn id(&self) -> &str;

    /// Begins delivering inbound messages through `bus.publish_incoming`.
    async fn start(&self, bus: BusHandle) -> BusResult<()>;

    async fn stop(&self) -> BusResult<()>;

    async fn send(&self, message: &Message) -> BusResult<()>;
}

/// Transports in registration order.
#[derive(Clone, Default)]
pub struct TransportSet {
    transports: Vec<Arc<dyn Transport>>,
}

impl TransportSet {
    pub fn new(transports: Vec<Arc<dyn Transport>>) -> Self {
        Self { transports }
    }

    pub fn len(&self) -> usize {
        self.transports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }

    /// Transports a message should be delivered to: the one named by its
    /// context source, or every transport when the message has no source.
    pub fn select(&self, message: &Message) -> Vec<&Arc<dyn Transport>> {
        match message.context.source.as_deref() {
            Some(source) => self
                .transports
                .iter()
                .filter(|transport| transport.id() == source)
                .collect(),
            None => self.transports.iter().collect(),
        }
    }

    /// Sends `message` to the selected transports and returns how many
    /// accepted it. Every selected transport is attempted; the first failure
    /// is returned after the rest were tried.
    pub async fn dispatch(&self, message: &Message) -> BusResult<usize> {
        let selected = self.select(message);
        if selected.is_empty() {
            tracing::warn!(
                source = message.context.source.as_deref().unwrap_or_default(),
                uid = %message.context.uid,
                "no transport for outgoing message"
            );
            return Ok(0);
        }

        let mut delivered = 0;
        let mut first_error = None;
        for transport in selected {
            match transport.send(message).await {
                Ok(()) => delivered += 1,
                Err(error) => {
                    tracing::warn!(transport = transport.id(), error = %error, "transport send failed");
                    first_error.get_or_insert(error);
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(delivered),
        }
    }

    pub(crate) async fn start_all(&self, bus: &BusHandle) -> BusResult<()> {
        for transport in &self.transports {
            tracing::debug!(transport = transport.id(), "starting transport");
            transport.start(bus.clone()).await?;
        }
        Ok(())
    }

    pub(crate) async fn stop_all(&self) {
        for transport in &self.transports {
            if let Err(error) = transport.stop().await {
                tracing::warn!(transport = transport.id(), error = %error, "transport failed to stop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Transport, TransportSet};
    use crate::BusHandle;
    use async_trait::async_trait;
    use parley_types::{BusError, BusResult, Context, Message};
    use std::sync::{Arc, Mutex};

    struct RecordingTransport {
        id: &'static str,
        fail: bool,
        sent: Mutex<Vec<String>>,
    }

    impl RecordingTransport {
        fn new(id: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                id,
                fail,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().expect("sent lock").clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        fn id(&self) -> &str {
            self.id
        }

        async fn start(&self, _bus: BusHandle) -> BusResult<()> {
            Ok(())
        }

        async fn stop(&self) -> BusResult<()> {
            Ok(())
        }

        async fn send(&self, message: &Message) -> BusResult<()> {
            if self.fail {
                return Err(BusError::TransientIo("socket closed".to_string()));
            }
            self.sent.lock().expect("sent lock").push(message.body.clone());
            Ok(())
        }
    }

    fn message(source: Option<&str>) -> Message {
        let mut context = Context::new("u-1", "alice", "general");
        context.source = source.map(str::to_string);
        Message::text(context, "hello")
    }

    #[tokio::test]
    async fn functional_dispatch_routes_by_context_source() {
        let slack = RecordingTransport::new("slack", false);
        let stdio = RecordingTransport::new("stdio", false);
        let set = TransportSet::new(vec![slack.clone(), stdio.clone()]);

        assert_eq!(set.dispatch(&message(Some("stdio"))).await, Ok(1));
        assert!(slack.sent().is_empty());
        assert_eq!(stdio.sent(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn functional_dispatch_broadcasts_sourceless_messages() {
        let slack = RecordingTransport::new("slack", false);
        let stdio = RecordingTransport::new("stdio", false);
        let set = TransportSet::new(vec![slack.clone(), stdio.clone()]);

        assert_eq!(set.dispatch(&message(None)).await, Ok(2));
        assert_eq!(slack.sent().len(), 1);
        assert_eq!(stdio.sent().len(), 1);
    }

    #[tokio::test]
    async fn regression_unknown_source_is_dropped_and_failures_surface() {
        let broken = RecordingTransport::new("broken", true);
        let stdio = RecordingTransport::new("stdio", false);
        let set = TransportSet::new(vec![broken, stdio.clone()]);

        assert_eq!(set.dispatch(&message(Some("irc"))).await, Ok(0));
        assert!(matches!(
            set.dispatch(&message(None)).await,
            Err(BusError::TransientIo(_))
        ));
        assert_eq!(stdio.sent().len(), 1);
    }
}
