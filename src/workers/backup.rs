use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use chrono::Utc;
use sea_orm::DatabaseConnection;
use ssh2::Session;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::db::entities::device;
use crate::db::services::{config_service, device_service};
use crate::dialect::VendorDialect;
use crate::workers::{BackupOutcome, CancelFlag, JobError};

/// How long a single blocking libssh2 call may stall before control
/// returns to the read loop (which then re-checks deadline and cancel).
const SESSION_TIMEOUT_MS: u32 = 5_000;

const SSH_PORT: u16 = 22;

// libssh2 error codes that mean the credential itself was rejected.
const LIBSSH2_ERROR_AUTHENTICATION_FAILED: i32 = -18;
const LIBSSH2_ERROR_PASSWORD_EXPIRED: i32 = -16;

#[derive(Debug)]
enum CaptureError {
    Connect(String),
    Auth(String),
    Timeout(String),
    Cancelled,
}

/// Captures the device's running configuration over SSH and hands it to
/// the config store. Connect/timeout failures get a small number of
/// immediate retries; authentication failures do not.
pub async fn run_backup(
    db: &DatabaseConnection,
    device: &device::Model,
    username: String,
    password: String,
    dialect: &'static dyn VendorDialect,
    cfg: &ServerConfig,
    cancel: CancelFlag,
) -> Result<BackupOutcome, JobError> {
    let mut last_failure = String::new();

    for attempt in 0..=cfg.backup_retries {
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        if attempt > 0 {
            debug!(device_id = device.id, attempt, "Retrying backup capture.");
        }

        let host = device.host.clone();
        let user = username.clone();
        let pass = password.clone();
        let connect_timeout = Duration::from_secs(cfg.ssh_connect_timeout_secs);
        let op_timeout = Duration::from_secs(cfg.ssh_op_timeout_secs);
        let cancel_flag = cancel.clone();

        let captured = tokio::task::spawn_blocking(move || {
            capture_once(&host, &user, &pass, dialect, connect_timeout, op_timeout, cancel_flag)
        })
        .await
        .map_err(|e| JobError::Unreachable(format!("capture task panicked: {e}")))?;

        match captured {
            Ok(raw) => {
                let text = dialect.clean_output(&raw);
                let captured_at = Utc::now();
                let (version, changed) =
                    config_service::append_version(db, device.id, &text, captured_at).await?;
                device_service::touch_last_backup(db, device.id, captured_at).await?;

                return if changed {
                    info!(device_id = device.id, version_id = version.id, bytes = text.len(), "Stored new configuration version.");
                    Ok(BackupOutcome::Success { version_id: version.id, bytes: text.len() })
                } else {
                    info!(device_id = device.id, version_id = version.id, "Configuration unchanged since last capture.");
                    Ok(BackupOutcome::SuccessNoChange { version_id: version.id })
                };
            }
            Err(CaptureError::Auth(detail)) => {
                warn!(device_id = device.id, "SSH authentication rejected.");
                return Err(JobError::AuthFailure(detail));
            }
            Err(CaptureError::Cancelled) => return Err(JobError::Cancelled),
            Err(CaptureError::Connect(detail)) | Err(CaptureError::Timeout(detail)) => {
                warn!(device_id = device.id, attempt, detail = %detail, "Backup capture attempt failed.");
                last_failure = detail;
            }
        }
    }

    Err(JobError::Unreachable(last_failure))
}

/// One blocking SSH session: connect, authenticate, run the dialect's
/// command sequence in an interactive shell, read until the channel
/// closes or the operation deadline passes. The session is torn down on
/// every exit path because everything lives in this scope.
fn capture_once(
    host: &str,
    username: &str,
    password: &str,
    dialect: &'static dyn VendorDialect,
    connect_timeout: Duration,
    op_timeout: Duration,
    cancel: CancelFlag,
) -> Result<String, CaptureError> {
    let deadline = Instant::now() + op_timeout;

    let addr = (host, SSH_PORT)
        .to_socket_addrs()
        .map_err(|e| CaptureError::Connect(format!("resolve {host}: {e}")))?
        .next()
        .ok_or_else(|| CaptureError::Connect(format!("no address for {host}")))?;

    let tcp = TcpStream::connect_timeout(&addr, connect_timeout)
        .map_err(|e| CaptureError::Connect(format!("connect {addr}: {e}")))?;

    let mut sess = Session::new()
        .map_err(|e| CaptureError::Connect(format!("session init: {e}")))?;
    sess.set_timeout(SESSION_TIMEOUT_MS);
    sess.set_tcp_stream(tcp);
    sess.handshake()
        .map_err(|e| CaptureError::Connect(format!("handshake: {e}")))?;

    if let Err(e) = sess.userauth_password(username, password) {
        // Distinguish a rejected credential from a transport drop: only
        // the former must not be retried.
        return match e.code() {
            ssh2::ErrorCode::Session(LIBSSH2_ERROR_AUTHENTICATION_FAILED)
            | ssh2::ErrorCode::Session(LIBSSH2_ERROR_PASSWORD_EXPIRED) => {
                Err(CaptureError::Auth(format!("password auth for {username}: {e}")))
            }
            _ => Err(CaptureError::Connect(format!("auth transport: {e}"))),
        };
    }
    if !sess.authenticated() {
        return Err(CaptureError::Auth(format!("auth incomplete for {username}")));
    }

    let mut channel = sess
        .channel_session()
        .map_err(|e| CaptureError::Connect(format!("channel open: {e}")))?;
    channel
        .request_pty("vt100", None, None)
        .map_err(|e| CaptureError::Connect(format!("pty request: {e}")))?;
    channel
        .shell()
        .map_err(|e| CaptureError::Connect(format!("shell request: {e}")))?;

    let mut script = String::new();
    if let Some(no_paging) = dialect.disable_paging_command() {
        script.push_str(no_paging);
        script.push('\n');
    }
    script.push_str(dialect.capture_command());
    script.push('\n');
    script.push_str("exit\n");
    channel
        .write_all(script.as_bytes())
        .map_err(|e| CaptureError::Connect(format!("command write: {e}")))?;

    let mut output = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        if cancel.is_cancelled() {
            return Err(CaptureError::Cancelled);
        }
        if Instant::now() >= deadline {
            return Err(CaptureError::Timeout(format!(
                "capture exceeded {}s", op_timeout.as_secs()
            )));
        }
        match channel.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => output.extend_from_slice(&buf[..n]),
            // Per-call session timeout elapsed; loop back so the deadline
            // and the cancel flag get re-checked.
            Err(_) if !channel.eof() => continue,
            Err(_) => break,
        }
    }
    let _ = channel.close();
    let _ = channel.wait_close();

    let raw = String::from_utf8_lossy(&output).into_owned();
    Ok(extract_capture(&raw, dialect.capture_command()))
}

/// Cuts the shell transcript down to the configuration body: everything
/// after the capture command's echo, minus trailing prompt/exit noise.
fn extract_capture(transcript: &str, capture_command: &str) -> String {
    let after_echo = match transcript.rfind(capture_command) {
        Some(pos) => &transcript[pos + capture_command.len()..],
        None => transcript,
    };

    let lines: Vec<&str> = after_echo.lines().collect();
    let mut end = lines.len();
    while end > 0 {
        let tail = lines[end - 1].trim();
        // Prompt lines and the echoed `exit` (possibly glued to the
        // prompt, e.g. `sw1#exit`) are session noise, not configuration.
        if tail.is_empty() || tail.ends_with("exit") || tail.ends_with('#') || tail.ends_with('>')
        {
            end -= 1;
        } else {
            break;
        }
    }
    lines[..end].join("\n").trim_matches('\n').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_strips_echo_and_prompt() {
        let transcript = "sw1>terminal length 0\nsw1#show running-config\n!\nhostname sw1\ninterface Vlan1\n ip address 10.0.0.2 255.255.255.0\nsw1#exit\n";
        let body = extract_capture(transcript, "show running-config");
        assert!(body.starts_with('!'));
        assert!(body.ends_with("ip address 10.0.0.2 255.255.255.0"));
        assert!(!body.contains("sw1#"));
    }

    #[test]
    fn extract_without_echo_keeps_payload() {
        let transcript = "hostname sw2\nvlan 10\n";
        assert_eq!(extract_capture(transcript, "show running-config"), "hostname sw2\nvlan 10");
    }
}
