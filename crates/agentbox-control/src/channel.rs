//! One control channel per live container connection.

use crate::{ControlError, HandlerRegistry, PendingRequests};
use agentbox_proto::{correlation_id, ControlMessage, MessageKind};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// The daemon-side half of a container's control channel.
///
/// Outbound messages go through a bounded queue into the connection's writer
/// task; inbound responses are correlated through the pending map. The
/// channel itself never touches the transport, so callers may hold clones
/// freely without pinning any lock across I/O.
#[derive(Clone)]
pub struct ControlChannel {
    container: String,
    outbound: mpsc::Sender<ControlMessage>,
    pending: Arc<PendingRequests>,
}

impl ControlChannel {
    pub fn new(container: &str, outbound: mpsc::Sender<ControlMessage>) -> Self {
        Self {
            container: container.to_string(),
            outbound,
            pending: Arc::new(PendingRequests::new()),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Send a request and wait for the correlated response payload.
    ///
    /// The deadline is mandatory. On timeout the waiter is removed and a
    /// late response is dropped silently.
    pub async fn request(
        &self,
        msg_type: &str,
        payload: Value,
        deadline: Duration,
    ) -> Result<Value, ControlError> {
        let id = correlation_id();
        let rx = self.pending.register(&id);

        let msg = ControlMessage::request(msg_type, &id, payload);
        if self.outbound.send(msg).await.is_err() {
            self.pending.discard(&id);
            return Err(ControlError::TransportClosed);
        }

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(payload)) => Ok(payload),
            // Sender dropped: the connection died with the request in flight.
            Ok(Err(_)) => Err(ControlError::TransportClosed),
            Err(_) => {
                self.pending.discard(&id);
                debug!(
                    container = %self.container,
                    msg_type = %msg_type,
                    "request timed out; any late response will be dropped"
                );
                Err(ControlError::Timeout)
            }
        }
    }

    /// Send a fire-and-forget event.
    pub async fn send_event(&self, msg_type: &str, payload: Value) -> Result<(), ControlError> {
        let msg = ControlMessage::event(msg_type, payload);
        self.outbound
            .send(msg)
            .await
            .map_err(|_| ControlError::TransportClosed)
    }

    /// Send the response correlated to `id`.
    pub async fn respond(
        &self,
        msg_type: &str,
        id: &str,
        payload: Value,
    ) -> Result<(), ControlError> {
        let msg = ControlMessage::response(msg_type, id, payload);
        self.outbound
            .send(msg)
            .await
            .map_err(|_| ControlError::TransportClosed)
    }

    /// Correlate an inbound response with its waiter. Unmatched responses
    /// are logged and dropped.
    pub fn complete_response(&self, id: &str, payload: Value) {
        self.pending.complete(id, payload);
    }

    /// Fail every in-flight request with transport-closed.
    pub fn fail_pending(&self) {
        self.pending.fail_all();
    }

    /// Number of requests currently awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

/// Dispatch one inbound request or event.
///
/// Runs on the connection's serial dispatcher, so events from one container
/// apply in arrival order and a slow handler delays only that connection.
/// Responses are *not* routed here: the transport correlates them eagerly
/// via [`ControlChannel::complete_response`], which is what allows a request
/// handler to issue a nested request on its own connection.
///
/// Handlers run inside a spawned task so a panic is contained: for requests
/// it becomes an `internal_error` response, for events it is logged.
pub async fn dispatch_message(
    registry: &HandlerRegistry,
    channel: &ControlChannel,
    msg: ControlMessage,
) {
    let container = channel.container().to_string();

    match msg.kind {
        MessageKind::Request => {
            let payload = match registry.request_handler(&msg.msg_type) {
                Some(handler) => {
                    match tokio::spawn(handler(container.clone(), msg.payload)).await {
                        Ok(value) => value,
                        Err(e) => {
                            warn!(
                                container = %container,
                                msg_type = %msg.msg_type,
                                error = %e,
                                "request handler panicked"
                            );
                            json!({"ok": false, "error": "internal_error"})
                        }
                    }
                }
                None => {
                    warn!(
                        container = %container,
                        msg_type = %msg.msg_type,
                        "request with unknown selector"
                    );
                    json!({"ok": false, "error": "unknown_selector"})
                }
            };

            if let Some(id) = msg.id {
                if channel.respond(&msg.msg_type, &id, payload).await.is_err() {
                    debug!(container = %container, "connection closed before response could be sent");
                }
            }
        }
        MessageKind::Event => match registry.event_handler(&msg.msg_type) {
            Some(handler) => {
                if let Err(e) = tokio::spawn(handler(container.clone(), msg.payload)).await {
                    warn!(
                        container = %container,
                        msg_type = %msg.msg_type,
                        error = %e,
                        "event handler panicked"
                    );
                }
            }
            None => {
                debug!(
                    container = %container,
                    msg_type = %msg.msg_type,
                    "event with no registered handler"
                );
            }
        },
        MessageKind::Response => {
            // Correlated on the read path; reaching here means the transport
            // skipped that step.
            if let Some(id) = msg.id {
                channel.complete_response(&id, msg.payload);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn channel_pair() -> (ControlChannel, mpsc::Receiver<ControlMessage>) {
        let (tx, rx) = mpsc::channel(16);
        (ControlChannel::new("agentbox-web", tx), rx)
    }

    #[tokio::test]
    async fn request_resolves_with_matching_response() {
        let (channel, mut outbound) = channel_pair();

        let requester = channel.clone();
        let task = tokio::spawn(async move {
            requester
                .request("ping", json!({}), Duration::from_secs(5))
                .await
        });

        let sent = outbound.recv().await.unwrap();
        assert_eq!(sent.kind, MessageKind::Request);
        let id = sent.id.unwrap();

        channel.complete_response(&id, json!({"ok": true}));

        let result = task.await.unwrap().unwrap();
        assert_eq!(result["ok"], true);
        assert_eq!(channel.in_flight(), 0);
    }

    #[tokio::test]
    async fn request_times_out_and_drops_late_response() {
        let (channel, mut outbound) = channel_pair();

        let result = channel
            .request("ping", json!({}), Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(ControlError::Timeout)));

        // The waiter is gone; the late response is dropped silently.
        let sent = outbound.recv().await.unwrap();
        channel.complete_response(&sent.id.unwrap(), json!({"ok": true}));
        assert_eq!(channel.in_flight(), 0);
    }

    #[tokio::test]
    async fn closed_transport_fails_requests() {
        let (channel, outbound) = channel_pair();
        drop(outbound);

        let result = channel
            .request("ping", json!({}), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(ControlError::TransportClosed)));
    }

    #[tokio::test]
    async fn fail_pending_fails_in_flight_requests() {
        let (channel, mut outbound) = channel_pair();

        let requester = channel.clone();
        let task = tokio::spawn(async move {
            requester
                .request("port_add", json!({}), Duration::from_secs(5))
                .await
        });
        let _ = outbound.recv().await.unwrap();

        channel.fail_pending();

        assert!(matches!(
            task.await.unwrap(),
            Err(ControlError::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn dispatch_answers_requests_through_the_registry() {
        let (channel, mut outbound) = channel_pair();
        let registry = HandlerRegistry::builder()
            .request("ping", |_c, _p| async { json!({"ok": true}) })
            .build();

        let msg = ControlMessage::request("ping", "cafe01", json!({}));
        dispatch_message(&registry, &channel, msg).await;

        let response = outbound.recv().await.unwrap();
        assert_eq!(response.kind, MessageKind::Response);
        assert_eq!(response.id.as_deref(), Some("cafe01"));
        assert_eq!(response.payload["ok"], true);
    }

    #[tokio::test]
    async fn dispatch_reports_unknown_selector() {
        let (channel, mut outbound) = channel_pair();
        let registry = HandlerRegistry::builder().build();

        let msg = ControlMessage::request("bogus", "cafe02", json!({}));
        dispatch_message(&registry, &channel, msg).await;

        let response = outbound.recv().await.unwrap();
        assert_eq!(response.payload["ok"], false);
        assert_eq!(response.payload["error"], "unknown_selector");
    }

    #[tokio::test]
    async fn dispatch_converts_handler_panic_to_error_response() {
        let (channel, mut outbound) = channel_pair();
        let registry = HandlerRegistry::builder()
            .request("boom", |_c, _p| async { panic!("handler bug") })
            .build();

        let msg = ControlMessage::request("boom", "cafe03", json!({}));
        dispatch_message(&registry, &channel, msg).await;

        let response = outbound.recv().await.unwrap();
        assert_eq!(response.payload["error"], "internal_error");
    }

    #[tokio::test]
    async fn events_get_no_response() {
        let (channel, mut outbound) = channel_pair();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let registry = HandlerRegistry::builder()
            .event("stream_register", move |_c, _p| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build();

        let msg = ControlMessage::event("stream_register", json!({"session": "main"}));
        dispatch_message(&registry, &channel, msg).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(outbound.try_recv().is_err());
    }
}
