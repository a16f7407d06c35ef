//! Desktop notification delivery via notify-send.

use crate::utils::find_in_path;
use agentbox_core::Config;
use agentbox_ipc::{err_response, ok_response};
use serde_json::{json, Value};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);
const HOOK_TIMEOUT: Duration = Duration::from_secs(5);
const BEEP_TIMEOUT: Duration = Duration::from_secs(5);
const BELL_SAMPLE: &str = "/usr/share/sounds/freedesktop/stereo/bell.oga";

/// Deliver a desktop notification. `urgency: "high"` maps to the notifier's
/// `critical` level, which also rings the bell.
pub async fn notify(config: &Config, title: &str, message: &str, urgency: &str) -> Value {
    let urgency = if urgency == "high" { "critical" } else { urgency };
    debug!(title = %title, message = %message, urgency = %urgency, "notify");

    let result = tokio::time::timeout(
        NOTIFY_TIMEOUT,
        Command::new("notify-send")
            .args(["-u", urgency, title, message])
            .stdin(Stdio::null())
            .output(),
    )
    .await;

    let output = match result {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!(error = %e, "notify-send failed to start");
            return err_response(e);
        }
        Err(_) => {
            warn!("notify-send timed out");
            return err_response("notify_timeout");
        }
    };

    if urgency == "critical" {
        beep().await;
    }

    run_notify_hook(config, title, message, urgency).await;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(stderr = %stderr, "notify-send failed");
        let error = if stderr.is_empty() {
            "notify_failed".to_string()
        } else {
            stderr
        };
        return err_response(error);
    }
    ok_response(json!({}))
}

/// Audible bell: the freedesktop sample through paplay when available,
/// otherwise a BEL byte on the controlling terminal.
async fn beep() {
    if Path::new(BELL_SAMPLE).exists() && find_in_path("paplay").is_some() {
        let _ = tokio::time::timeout(
            BEEP_TIMEOUT,
            Command::new("paplay")
                .arg(BELL_SAMPLE)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status(),
        )
        .await;
        return;
    }
    let _ = tokio::fs::write("/dev/tty", b"\x07").await;
}

/// Run the user's notify hook script, if configured.
async fn run_notify_hook(config: &Config, title: &str, message: &str, urgency: &str) {
    let Some(hook) = &config.notifications.notify_hook else {
        return;
    };
    if !hook.is_file() {
        return;
    }

    let result = tokio::time::timeout(
        HOOK_TIMEOUT,
        Command::new(hook)
            .args([title, message, urgency])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status(),
    )
    .await;

    match result {
        Ok(Err(e)) => warn!(error = %e, "notify hook failed"),
        Err(_) => warn!("notify hook timed out"),
        _ => {}
    }
}
