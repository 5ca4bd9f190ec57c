//! Relay core: decides whether an inbound message is an alarm and forwards it.
//!
//! Nothing here talks to Discord directly. Messages arrive as
//! [`InboundMessage`] values and leave through a [`NotificationSink`], so the
//! whole decision path can be driven from tests.

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serenity::all::{ChannelId, Mentionable, RoleId, UserId};
use serenity::async_trait;
use tracing::{debug, error, info};

use crate::config::Config;

/// Decorative prefix added by in-game chat bridges, e.g. `(Red) [Bob]: `.
static RELAY_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\(.*?\)\s*\[[^\]]+\]:\s*").unwrap());

/// Text parts of a rich embed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbedText {
    pub title: Option<String>,
    pub description: Option<String>,
    /// (name, value) pairs in display order.
    pub fields: Vec<(String, String)>,
    pub footer: Option<String>,
}

/// A chat message as seen by the relay.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub content: String,
    pub embeds: Vec<EmbedText>,
    pub channel_id: ChannelId,
    /// Parent channel when the message was posted in a thread.
    pub parent_channel_id: Option<ChannelId>,
    pub author_id: UserId,
    pub author_name: String,
    /// Posted by this bot.
    pub from_self: bool,
}

/// Alarm about to be posted in the destination channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundNotification {
    pub text: String,
    pub mention: Option<RoleId>,
}

impl OutboundNotification {
    /// Message body with the role mention appended.
    pub fn body(&self) -> String {
        match self.mention {
            Some(role) => format!("{} {}", self.text, role.mention()),
            None => self.text.clone(),
        }
    }

    /// Roles the platform may ping for this message. Never broadcast.
    pub fn allowed_roles(&self) -> Vec<RoleId> {
        self.mention.into_iter().collect()
    }
}

/// Why a message produced no alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    OtherChannel,
    OwnMessage,
    EmptyText,
    NoMatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Destination channel could not be fetched.
    ResolveChannel { channel: ChannelId, reason: String },
    /// Channel was found but the message was rejected.
    Send { channel: ChannelId, reason: String },
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResolveChannel { channel, reason } => {
                write!(f, "failed to resolve channel {}: {}", channel, reason)
            }
            Self::Send { channel, reason } => {
                write!(f, "failed to send to channel {}: {}", channel, reason)
            }
        }
    }
}

impl std::error::Error for RelayError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Skipped(Skip),
    Forwarded(OutboundNotification),
    Failed(RelayError),
}

/// Outbound boundary: posts a notification into a channel.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(
        &self,
        channel: ChannelId,
        notification: &OutboundNotification,
    ) -> Result<(), RelayError>;
}

/// Inbound boundary: feeds messages into the relay until the source ends.
#[async_trait]
pub trait InboundSource: Send {
    type Error;

    async fn subscribe(self, relay: Arc<Relay>) -> Result<(), Self::Error>;
}

/// Collect every piece of text worth matching against, in display order.
pub fn extract_fragments(msg: &InboundMessage, scan_embeds: bool) -> Vec<String> {
    let mut parts: Vec<&str> = vec![msg.content.as_str()];

    if scan_embeds {
        for embed in &msg.embeds {
            parts.extend(embed.title.as_deref());
            parts.extend(embed.description.as_deref());
            for (name, value) in &embed.fields {
                parts.push(name.as_str());
                parts.push(value.as_str());
            }
            parts.extend(embed.footer.as_deref());
        }
    }

    parts
        .into_iter()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Remove leading bridge prefixes like `(Red) [Bob]: ` and trim.
///
/// Stacked prefixes are all removed, so applying this twice changes nothing.
pub fn strip_relay_prefix(text: &str) -> String {
    let mut rest = text.trim();
    while let Some(m) = RELAY_PREFIX.find(rest) {
        rest = rest[m.end()..].trim();
    }
    rest.to_string()
}

/// Strip bridge prefixes from every fragment and join what is left.
///
/// Embeds usually carry a title or field name before the prefixed line, so
/// cleaning only the start of the joined text would leave prefixes behind.
pub fn clean_fragments(fragments: &[String]) -> String {
    fragments
        .iter()
        .map(|f| strip_relay_prefix(f))
        .filter(|f| !f.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Per-message relay logic. Holds only the read-only config.
pub struct Relay {
    config: Arc<Config>,
}

impl Relay {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether the message was posted where we listen.
    pub fn accepts_channel(&self, msg: &InboundMessage) -> bool {
        let source = self.config.source_channel;
        msg.channel_id == source
            || (self.config.include_threads && msg.parent_channel_id == Some(source))
    }

    /// Decide on a message and, if it is an alarm, forward it through `sink`.
    ///
    /// Never returns an error: send failures are logged and reported in the
    /// outcome so the next event is unaffected.
    pub async fn handle(&self, msg: &InboundMessage, sink: &dyn NotificationSink) -> RelayOutcome {
        if !self.accepts_channel(msg) {
            debug!(channel = %msg.channel_id, "ignoring message from other channel");
            return RelayOutcome::Skipped(Skip::OtherChannel);
        }

        if msg.from_self {
            return RelayOutcome::Skipped(Skip::OwnMessage);
        }

        let fragments = extract_fragments(msg, self.config.scan_embeds);
        let combined = fragments.join("\n");
        let preview: String = combined.chars().take(100).collect();
        info!(
            channel = %msg.channel_id,
            author = %msg.author_name,
            author_id = %msg.author_id,
            fragments = fragments.len(),
            "message seen: {preview:?}"
        );

        if combined.trim().is_empty() {
            debug!("no text to match");
            return RelayOutcome::Skipped(Skip::EmptyText);
        }

        if !self.config.pattern.is_match(&combined) {
            debug!(pattern = %self.config.pattern, "no match");
            return RelayOutcome::Skipped(Skip::NoMatch);
        }
        info!(pattern = %self.config.pattern, "✅ trigger matched");

        let notification = OutboundNotification {
            text: format!("{}{}", self.config.alarm_prefix, clean_fragments(&fragments)),
            mention: self.config.role_id,
        };

        let destination = self.config.destination_channel;
        match sink.deliver(destination, &notification).await {
            Ok(()) => {
                info!(channel = %destination, "📣 forwarded alarm");
                RelayOutcome::Forwarded(notification)
            }
            Err(e) => {
                error!(channel = %destination, error = ?e, "forward failed: {e}");
                RelayOutcome::Failed(e)
            }
        }
    }
}
