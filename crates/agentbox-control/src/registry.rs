//! Handler registries for the control channel.

use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Request handler: receives the container name and the request payload and
/// produces the response payload (usually `{"ok": ...}`).
pub type RequestHandler =
    Arc<dyn Fn(String, Value) -> Pin<Box<dyn Future<Output = Value> + Send>> + Send + Sync>;

/// Event handler: receives the container name and the event payload.
/// Events get no response.
pub type EventHandler =
    Arc<dyn Fn(String, Value) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Immutable handler registry, declared once at daemon startup.
#[derive(Default)]
pub struct HandlerRegistry {
    requests: HashMap<String, RequestHandler>,
    events: HashMap<String, EventHandler>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn request_handler(&self, msg_type: &str) -> Option<RequestHandler> {
        self.requests.get(msg_type).cloned()
    }

    pub fn event_handler(&self, msg_type: &str) -> Option<EventHandler> {
        self.events.get(msg_type).cloned()
    }

    pub fn request_types(&self) -> impl Iterator<Item = &str> {
        self.requests.keys().map(String::as_str)
    }
}

/// Builder collecting handlers before the registry is frozen.
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    requests: HashMap<String, RequestHandler>,
    events: HashMap<String, EventHandler>,
}

impl HandlerRegistryBuilder {
    /// Register a request handler for `msg_type`.
    pub fn request<F, Fut>(mut self, msg_type: &str, handler: F) -> Self
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Value> + Send + 'static,
    {
        let boxed: RequestHandler =
            Arc::new(move |container, payload| Box::pin(handler(container, payload)));
        self.requests.insert(msg_type.to_string(), boxed);
        self
    }

    /// Register an event handler for `msg_type`.
    pub fn event<F, Fut>(mut self, msg_type: &str, handler: F) -> Self
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: EventHandler =
            Arc::new(move |container, payload| Box::pin(handler(container, payload)));
        self.events.insert(msg_type.to_string(), boxed);
        self
    }

    /// Freeze the registry.
    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            requests: self.requests,
            events: self.events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registered_request_handler_runs() {
        let registry = HandlerRegistry::builder()
            .request("ping", |_container, _payload| async { json!({"ok": true}) })
            .build();

        let handler = registry.request_handler("ping").unwrap();
        let result = handler("web".to_string(), json!({})).await;
        assert_eq!(result["ok"], true);
    }

    #[test]
    fn unknown_selectors_are_absent() {
        let registry = HandlerRegistry::builder().build();
        assert!(registry.request_handler("nope").is_none());
        assert!(registry.event_handler("nope").is_none());
    }

    #[tokio::test]
    async fn event_handler_sees_container_name() {
        let (tx, rx) = tokio::sync::oneshot::channel::<String>();
        let tx = std::sync::Mutex::new(Some(tx));

        let registry = HandlerRegistry::builder()
            .event("state_update", move |container, _payload| {
                let tx = tx.lock().unwrap().take();
                async move {
                    if let Some(tx) = tx {
                        let _ = tx.send(container);
                    }
                }
            })
            .build();

        let handler = registry.event_handler("state_update").unwrap();
        handler("agentbox-web".to_string(), json!({})).await;
        assert_eq!(rx.await.unwrap(), "agentbox-web");
    }
}
