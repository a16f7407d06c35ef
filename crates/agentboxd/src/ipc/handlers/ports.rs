//! Port forwarding actions: each proxies a control request to the target
//! container and mirrors its response.

use crate::app::{DaemonState, CONTAINER_REQUEST_TIMEOUT};
use agentbox_ipc::{err_response, ok_response, IpcServer};
use agentbox_proto::ForwardDirection;
use serde_json::{json, Value};
use tracing::warn;

/// Register the four port actions.
pub async fn register(server: &IpcServer, state: DaemonState) {
    let add_host = state.clone();
    server
        .register_handler("add_host_port", move |request| {
            let state = add_host.clone();
            async move { add_port(&state, &request, ForwardDirection::Remote).await }
        })
        .await;

    let add_container = state.clone();
    server
        .register_handler("add_container_port", move |request| {
            let state = add_container.clone();
            async move { add_port(&state, &request, ForwardDirection::Local).await }
        })
        .await;

    let remove_host = state.clone();
    server
        .register_handler("remove_host_port", move |request| {
            let state = remove_host.clone();
            async move { remove_port(&state, &request, ForwardDirection::Remote).await }
        })
        .await;

    server
        .register_handler("remove_container_port", move |request| {
            let state = state.clone();
            async move { remove_port(&state, &request, ForwardDirection::Local).await }
        })
        .await;
}

async fn add_port(state: &DaemonState, request: &Value, direction: ForwardDirection) -> Value {
    let Some((container, host_port)) = required_fields(request) else {
        return err_response("missing required fields: container, host_port");
    };
    let container_port = optional_port(request, "container_port").unwrap_or(host_port);

    if direction == ForwardDirection::Remote && host_port < 1024 {
        return err_response(format!(
            "port {host_port} is privileged (< 1024) and requires root"
        ));
    }
    if !state.tunnel.is_connected(&container) {
        return err_response(format!("container {container} not connected"));
    }

    let payload = json!({
        "direction": direction.as_str(),
        "host_port": host_port,
        "container_port": container_port,
        "name": format!("dynamic-{host_port}"),
    });

    match state
        .tunnel
        .request(&container, "port_add", payload, CONTAINER_REQUEST_TIMEOUT)
        .await
    {
        Ok(response) if response["ok"] == true => {
            let message = match direction {
                ForwardDirection::Remote => format!("Port {host_port} exposed via SSH tunnel"),
                ForwardDirection::Local => format!("Host port {host_port} forwarded into container"),
            };
            ok_response(json!({"message": message}))
        }
        Ok(response) => err_response(
            response["error"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string(),
        ),
        Err(e) => {
            warn!(container = %container, host_port, error = %e, "port_add failed");
            err_response("failed to communicate with container")
        }
    }
}

async fn remove_port(state: &DaemonState, request: &Value, direction: ForwardDirection) -> Value {
    let Some((container, host_port)) = required_fields(request) else {
        return err_response("missing required fields: container, host_port");
    };
    if !state.tunnel.is_connected(&container) {
        return err_response(format!("container {container} not connected"));
    }

    let payload = json!({
        "direction": direction.as_str(),
        "host_port": host_port,
    });

    match state
        .tunnel
        .request(&container, "port_remove", payload, CONTAINER_REQUEST_TIMEOUT)
        .await
    {
        Ok(response) if response["ok"] == true => {
            let message = match direction {
                ForwardDirection::Remote => format!("Port {host_port} unexposed"),
                ForwardDirection::Local => format!("Port {host_port} unforwarded"),
            };
            ok_response(json!({"message": message}))
        }
        Ok(response) => err_response(
            response["error"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string(),
        ),
        Err(e) => {
            warn!(container = %container, host_port, error = %e, "port_remove failed");
            err_response("failed to communicate with container")
        }
    }
}

fn required_fields(request: &Value) -> Option<(String, u16)> {
    let container = request.get("container")?.as_str()?.to_string();
    let host_port = as_port(request.get("host_port")?)?;
    Some((container, host_port))
}

fn optional_port(request: &Value, key: &str) -> Option<u16> {
    request.get(key).and_then(as_port)
}

fn as_port(value: &Value) -> Option<u16> {
    let port = value.as_u64()?;
    u16::try_from(port).ok().filter(|p| *p > 0)
}
