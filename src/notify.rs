use std::fs::OpenOptions;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;

use crate::config::{Config, NotifyTarget};
use crate::error::{LookoutError, Result};
use crate::watcher::Destination;

/// Notification sink consumed by the runner
pub trait Notifier: Send + Sync {
    /// Deliver `text` (Telegram HTML subset) to `destination`, or to the
    /// sink's default destination when `None`
    fn send(&self, text: &str, destination: Option<&Destination>) -> Result<()>;
}

/// Sends through the configured `default_notify` target
pub struct TargetNotifier {
    target: Option<NotifyTarget>,
}

impl TargetNotifier {
    pub fn new(target: Option<NotifyTarget>) -> Self {
        Self { target }
    }
}

impl Notifier for TargetNotifier {
    fn send(&self, text: &str, destination: Option<&Destination>) -> Result<()> {
        let target = self.target.as_ref().ok_or_else(|| {
            LookoutError::Notification("no default_notify target configured".into())
        })?;

        match target {
            NotifyTarget::Telegram { bot_token, chat_id } => {
                send_telegram(bot_token, destination.unwrap_or(chat_id), text)?
            }
            NotifyTarget::Command { command } => send_command(command, destination, text)?,
        }

        log_notification(target.kind(), destination, text);
        Ok(())
    }
}

/// Append a delivered notification to `<data_dir>/notifications.log`
fn log_notification(target_type: &str, destination: Option<&Destination>, text: &str) {
    if let Ok(data_dir) = Config::data_dir() {
        let log_path = data_dir.join("notifications.log");
        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
        {
            let log_entry = format!(
                "\n{}\n{}\nTarget: {} | Destination: {}\n{}\n{}\n",
                "=".repeat(60),
                Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
                target_type,
                destination.map(Destination::as_str).unwrap_or("(default)"),
                "-".repeat(40),
                text,
            );
            let _ = file.write_all(log_entry.as_bytes());
        }
    }
}

fn send_telegram(bot_token: &str, chat_id: &Destination, text: &str) -> Result<()> {
    let url = format!("https://api.telegram.org/bot{}/sendMessage", bot_token);

    let telegram_payload = serde_json::json!({
        "chat_id": chat_id.as_str(),
        "text": text,
        "parse_mode": "HTML",
        "disable_web_page_preview": true
    });

    ureq::post(&url)
        .header("Content-Type", "application/json")
        .send_json(&telegram_payload)
        .map_err(|e| LookoutError::Notification(format!("Telegram: {}", e)))?;

    Ok(())
}

/// Pipe the message to a shell command on stdin.
/// The destination override, if any, is exported as `LOOKOUT_DESTINATION`.
fn send_command(command: &str, destination: Option<&Destination>, text: &str) -> Result<()> {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", command])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    if let Some(destination) = destination {
        cmd.env("LOOKOUT_DESTINATION", destination.as_str());
    }

    let mut child = cmd.spawn()?;
    if let Some(ref mut stdin) = child.stdin {
        stdin.write_all(text.as_bytes())?;
    }

    let output = child.wait_with_output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(LookoutError::Notification(format!(
            "Command failed: {}",
            stderr.trim()
        )));
    }

    Ok(())
}

/// A message captured by `RecordingNotifier`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub text: String,
    pub destination: Option<Destination>,
}

/// Records messages instead of delivering them; used for dry runs
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentMessage>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every send fails after recording the attempt
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, text: &str, destination: Option<&Destination>) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentMessage {
                text: text.to_string(),
                destination: destination.cloned(),
            });
        if self.fail {
            return Err(LookoutError::Notification("delivery refused".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_target_is_an_error() {
        let notifier = TargetNotifier::new(None);
        let err = notifier.send("hi", None).unwrap_err();
        assert!(matches!(err, LookoutError::Notification(_)));
    }

    #[test]
    fn test_command_receives_text_and_destination() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let command = format!(
            "cat > '{}'; printf '|%s' \"$LOOKOUT_DESTINATION\" >> '{}'",
            out.display(),
            out.display()
        );
        send_command(&command, Some(&Destination::new("@news")), "<b>hello</b>").unwrap();
        assert_eq!(
            std::fs::read_to_string(&out).unwrap(),
            "<b>hello</b>|@news"
        );
    }

    #[test]
    fn test_command_failure_is_reported() {
        let err = send_command("echo nope >&2; exit 3", None, "text").unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_recording_notifier() {
        let notifier = RecordingNotifier::new();
        notifier.send("one", None).unwrap();
        notifier.send("two", Some(&Destination::new("42"))).unwrap();
        let sent = notifier.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].destination, Some(Destination::new("42")));

        let failing = RecordingNotifier::failing();
        assert!(failing.send("x", None).is_err());
        assert_eq!(failing.sent().len(), 1);
    }
}
