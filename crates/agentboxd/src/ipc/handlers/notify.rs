//! Notification and clipboard actions.

use crate::app::DaemonState;
use crate::external::{clipboard, notifier};
use agentbox_ipc::IpcServer;
use serde_json::Value;

/// Register the `notify` and `clipboard` actions.
pub async fn register(server: &IpcServer, state: DaemonState) {
    let notify_state = state.clone();
    server
        .register_handler("notify", move |request| {
            let state = notify_state.clone();
            async move {
                let title = str_field(&request, "title", "Agentbox");
                let message = str_field(&request, "message", "Notification");
                let urgency = str_field(&request, "urgency", "normal");
                notifier::notify(&state.config, &title, &message, &urgency).await
            }
        })
        .await;

    server
        .register_handler("clipboard", move |request| async move {
            let data = str_field(&request, "data", "");
            let selection = str_field(&request, "selection", "primary");
            clipboard::set_clipboard(&data, &selection).await
        })
        .await;
}

fn str_field(request: &Value, key: &str, default: &str) -> String {
    request
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}
