use std::sync::Arc;
use std::time::Duration;

use serenity::all::{ChannelId, Http};
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// Discord rejects messages longer than 2000 characters.
const MAX_LOG_CHARS: usize = 1900;

/// Log message with priority.
enum LogMessage {
    /// High priority (WARN/ERROR) - send immediately
    Urgent(String),
    /// Low priority (INFO) - batch and send periodically
    Info(String),
}

/// Mirrors this crate's log events into a Discord channel.
pub struct DiscordLogLayer {
    tx: mpsc::UnboundedSender<LogMessage>,
}

impl DiscordLogLayer {
    /// Must be called from within the tokio runtime.
    pub fn new(http: Arc<Http>, channel: ChannelId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogMessage>();

        tokio::spawn(async move {
            let mut info_buffer: Vec<String> = Vec::new();
            let mut interval = tokio::time::interval(Duration::from_secs(5));

            loop {
                tokio::select! {
                    msg = rx.recv() => {
                        match msg {
                            Some(LogMessage::Urgent(text)) => {
                                send_log(&http, channel, &text).await;
                            }
                            Some(LogMessage::Info(text)) => {
                                info_buffer.push(text);
                                if info_buffer.len() >= 20 {
                                    flush_buffer(&http, channel, &mut info_buffer).await;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = interval.tick() => {
                        if !info_buffer.is_empty() {
                            flush_buffer(&http, channel, &mut info_buffer).await;
                        }
                    }
                }
            }
        });

        Self { tx }
    }
}

fn truncate_for_discord(text: &str) -> String {
    if text.chars().count() > MAX_LOG_CHARS {
        let truncated: String = text.chars().take(MAX_LOG_CHARS).collect();
        format!("{}...", truncated)
    } else {
        text.to_string()
    }
}

async fn send_log(http: &Http, channel: ChannelId, text: &str) {
    let text = truncate_for_discord(text);
    // Reporting through tracing here would feed the layer its own failures.
    if let Err(e) = channel.say(http, &text).await {
        eprintln!("Failed to send log to Discord: {e}");
    }
}

async fn flush_buffer(http: &Http, channel: ChannelId, buffer: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }
    let combined = buffer.join("\n");
    buffer.clear();
    send_log(http, channel, &combined).await;
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let text = format!("{:?}", value);
            self.message = if self.message.is_empty() {
                text
            } else {
                format!("{} ({})", text, self.message)
            };
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message
                .push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

/// Only our own events are mirrored; serenity's HTTP logging would otherwise
/// echo every log post back into the channel.
fn is_own_target(target: &str) -> bool {
    target == env!("CARGO_CRATE_NAME")
        || target.starts_with(concat!(env!("CARGO_CRATE_NAME"), "::"))
}

impl<S: Subscriber> Layer<S> for DiscordLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();

        if level > Level::INFO || !is_own_target(event.metadata().target()) {
            return;
        }

        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);

        let msg = match level {
            Level::ERROR => LogMessage::Urgent(format!("❌ {}", visitor.message)),
            Level::WARN => LogMessage::Urgent(format!("⚠️ {}", visitor.message)),
            _ => LogMessage::Info(visitor.message),
        };

        if self.tx.send(msg).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_long_log() {
        let long = "é".repeat(MAX_LOG_CHARS + 50);
        let out = truncate_for_discord(&long);
        assert_eq!(out.chars().count(), MAX_LOG_CHARS + 3);
        assert!(out.ends_with("..."));
        assert_eq!(truncate_for_discord("short"), "short");
    }

    #[test]
    fn test_only_own_targets_are_mirrored() {
        assert!(is_own_target("medic_relay"));
        assert!(is_own_target("medic_relay::relay"));
        assert!(!is_own_target("serenity::http::client"));
        assert!(!is_own_target("medic_relay_other"));
    }
}
