//! Host clipboard integration.

use crate::utils::find_in_path;
use agentbox_ipc::{err_response, ok_response};
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{error, warn};

/// How long to wait for the writer process. wl-copy forks to keep serving
/// the selection, so still-running after this is success.
const CLIPBOARD_WAIT: Duration = Duration::from_millis(500);

/// Write to the host clipboard: wl-copy on Wayland, falling back to xclip
/// and then xsel on X11.
pub async fn set_clipboard(data: &str, selection: &str) -> Value {
    if data.is_empty() {
        return err_response("empty_data");
    }

    let command: Vec<String> = if find_in_path("wl-copy").is_some() {
        if selection == "primary" {
            vec!["wl-copy".into(), "--primary".into()]
        } else {
            vec!["wl-copy".into()]
        }
    } else if find_in_path("xclip").is_some() {
        vec!["xclip".into(), "-selection".into(), selection.to_string()]
    } else if find_in_path("xsel").is_some() {
        if selection == "primary" {
            vec!["xsel".into(), "--primary".into(), "--input".into()]
        } else {
            vec!["xsel".into(), "--clipboard".into(), "--input".into()]
        }
    } else {
        warn!("no clipboard tool found (wl-copy, xclip, xsel)");
        return err_response("no_clipboard_tool");
    };

    let mut child = match Command::new(&command[0])
        .args(&command[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            error!(error = %e, "clipboard tool failed to start");
            return err_response(e);
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(data.as_bytes()).await {
            error!(error = %e, "failed to write clipboard data");
            return err_response(e);
        }
        // Closing stdin lets the tool read EOF and fork to background.
        drop(stdin);
    }

    // A tool still running after the wait has daemonized to serve the
    // selection, which counts as success.
    let _ = tokio::time::timeout(CLIPBOARD_WAIT, child.wait()).await;
    ok_response(json!({}))
}
