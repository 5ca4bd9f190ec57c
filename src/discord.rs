//! Discord adapter for serenity.
//!
//! Converts gateway messages into [`InboundMessage`] values for the relay and
//! posts alarms back through the HTTP client.

use std::sync::{Arc, OnceLock};

use serenity::{
    Client,
    all::{
        Channel, ChannelId, Context, CreateAllowedMentions, CreateMessage, Embed, EventHandler,
        GatewayIntents, Http, Message, Ready, UserId,
    },
    async_trait,
};
use tracing::{debug, info};

use crate::relay::{
    EmbedText, InboundMessage, InboundSource, NotificationSink, OutboundNotification, Relay,
    RelayError,
};

/// Posts notifications with the Discord REST client.
pub struct DiscordSink {
    http: Arc<Http>,
}

impl DiscordSink {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl NotificationSink for DiscordSink {
    async fn deliver(
        &self,
        channel: ChannelId,
        notification: &OutboundNotification,
    ) -> Result<(), RelayError> {
        let target = channel
            .to_channel(&*self.http)
            .await
            .map_err(|e| RelayError::ResolveChannel { channel, reason: error_detail(&e) })?;

        target
            .id()
            .send_message(&*self.http, build_message(notification))
            .await
            .map(|_| ())
            .map_err(|e| RelayError::Send { channel, reason: error_detail(&e) })
    }
}

/// Debug form keeps the Discord JSON error code and HTTP status.
fn error_detail(e: &serenity::Error) -> String {
    format!("{e:?}")
}

/// Alarm message with mentions restricted to the notification's role.
fn build_message(notification: &OutboundNotification) -> CreateMessage {
    // An empty allow-list also suppresses @everyone and @here.
    let mentions = CreateAllowedMentions::new().roles(notification.allowed_roles());
    CreateMessage::new()
        .content(notification.body())
        .allowed_mentions(mentions)
}

/// Handler for Discord gateway events.
pub struct RelayHandler {
    relay: Arc<Relay>,
    bot_user_id: OnceLock<UserId>,
}

impl RelayHandler {
    pub fn new(relay: Arc<Relay>) -> Self {
        Self { relay, bot_user_id: OnceLock::new() }
    }

    /// Required gateway intents for the bot.
    pub fn intents() -> GatewayIntents {
        GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT
    }

    /// Parent of `msg`'s channel when it is a thread. Only looked up when
    /// thread forwarding is on and the message is outside the source channel.
    async fn thread_parent(&self, ctx: &Context, msg: &Message) -> Option<ChannelId> {
        let config = self.relay.config();
        if !config.include_threads || msg.channel_id == config.source_channel {
            return None;
        }

        match msg.channel_id.to_channel(ctx).await {
            Ok(Channel::Guild(channel)) if channel.thread_metadata.is_some() => channel.parent_id,
            Ok(_) => None,
            Err(e) => {
                debug!(channel = %msg.channel_id, error = %e, "could not resolve channel");
                None
            }
        }
    }
}

fn embed_text(embed: &Embed) -> EmbedText {
    EmbedText {
        title: embed.title.clone(),
        description: embed.description.clone(),
        fields: embed
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.value.clone()))
            .collect(),
        footer: embed.footer.as_ref().map(|f| f.text.clone()),
    }
}

fn to_inbound(msg: &Message, parent: Option<ChannelId>, bot_user_id: Option<UserId>) -> InboundMessage {
    InboundMessage {
        content: msg.content.clone(),
        embeds: msg.embeds.iter().map(embed_text).collect(),
        channel_id: msg.channel_id,
        parent_channel_id: parent,
        author_id: msg.author.id,
        author_name: msg.author.name.clone(),
        from_self: bot_user_id == Some(msg.author.id),
    }
}

#[async_trait]
impl EventHandler for RelayHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        let _ = self.bot_user_id.set(ready.user.id);
        let config = self.relay.config();
        info!(
            bot_name = %ready.user.name,
            guilds = ready.guilds.len(),
            "✅ logged in"
        );
        info!(
            source = %config.source_channel,
            destination = %config.destination_channel,
            "listening for alarms"
        );
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let parent = self.thread_parent(&ctx, &msg).await;
        let inbound = to_inbound(&msg, parent, self.bot_user_id.get().copied());
        let sink = DiscordSink::new(ctx.http.clone());

        // Failures are already logged by the relay.
        self.relay.handle(&inbound, &sink).await;
    }
}

/// Gateway connection driving the relay.
pub struct DiscordGateway {
    token: String,
}

impl DiscordGateway {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl InboundSource for DiscordGateway {
    type Error = serenity::Error;

    async fn subscribe(self, relay: Arc<Relay>) -> Result<(), Self::Error> {
        let mut client = Client::builder(&self.token, RelayHandler::intents())
            .event_handler(RelayHandler::new(relay))
            .await?;

        client.start().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use serenity::all::RoleId;

    const AUTHOR: u64 = 80_351_110_224_678_912;

    fn message_json(content: &str, embeds: Value) -> Message {
        serde_json::from_value(json!({
            "id": "1234567890123456789",
            "channel_id": "111111111111",
            "guild_id": "555555555555",
            "author": {
                "id": AUTHOR.to_string(),
                "username": "game-bridge",
                "discriminator": "1234",
                "avatar": null,
                "bot": true
            },
            "content": content,
            "timestamp": "2024-05-01T12:00:00.000000+00:00",
            "edited_timestamp": null,
            "tts": false,
            "mention_everyone": false,
            "mentions": [],
            "mention_roles": [],
            "attachments": [],
            "embeds": embeds,
            "pinned": false,
            "type": 0
        }))
        .unwrap()
    }

    fn serialized(notification: &OutboundNotification) -> Value {
        serde_json::to_value(build_message(notification)).unwrap()
    }

    #[test]
    fn test_message_pings_only_configured_role() {
        let notification = OutboundNotification {
            text: "ALARM /911".to_string(),
            mention: Some(RoleId::new(333_333_333_333)),
        };
        let body = serialized(&notification);
        assert_eq!(body["content"], json!("ALARM /911 <@&333333333333>"));
        assert_eq!(
            body["allowed_mentions"],
            json!({"parse": [], "users": [], "roles": ["333333333333"]})
        );
    }

    #[test]
    fn test_message_without_role_pings_nobody() {
        let notification = OutboundNotification { text: "ALARM @everyone".to_string(), mention: None };
        let body = serialized(&notification);
        assert_eq!(body["content"], json!("ALARM @everyone"));
        assert_eq!(body["allowed_mentions"], json!({"parse": [], "users": [], "roles": []}));
    }

    #[test]
    fn test_to_inbound_maps_embeds() {
        let msg = message_json(
            "",
            json!([{
                "type": "rich",
                "title": "Game chat",
                "description": "(Red) [Bob]: need a medic /911",
                "fields": [{"name": "Side", "value": "Red", "inline": true}],
                "footer": {"text": "server 1"}
            }]),
        );

        let inbound = to_inbound(&msg, None, None);
        assert_eq!(inbound.channel_id, ChannelId::new(111_111_111_111));
        assert_eq!(inbound.author_id, UserId::new(AUTHOR));
        assert_eq!(inbound.author_name, "game-bridge");
        assert!(!inbound.from_self);
        assert_eq!(
            inbound.embeds,
            vec![EmbedText {
                title: Some("Game chat".to_string()),
                description: Some("(Red) [Bob]: need a medic /911".to_string()),
                fields: vec![("Side".to_string(), "Red".to_string())],
                footer: Some("server 1".to_string()),
            }]
        );
    }

    #[test]
    fn test_to_inbound_flags_own_messages_and_threads() {
        let msg = message_json("/911", json!([]));
        let parent = Some(ChannelId::new(999_999_999_999));

        let own = to_inbound(&msg, parent, Some(UserId::new(AUTHOR)));
        assert!(own.from_self);
        assert_eq!(own.parent_channel_id, parent);

        let other = to_inbound(&msg, None, Some(UserId::new(42)));
        assert!(!other.from_self);
        assert!(other.embeds.is_empty());
    }

    #[test]
    fn test_error_detail_keeps_variant() {
        let source = serde_json::from_str::<u8>("not json").unwrap_err();
        let display = source.to_string();
        let detail = error_detail(&serenity::Error::Json(source));
        assert!(detail.starts_with("Json("), "detail: {detail}");
        assert!(detail.contains("line"), "detail: {detail}");
        assert!(!display.starts_with("Json("));
    }

    #[test]
    fn test_intents_include_message_content() {
        let intents = RelayHandler::intents();
        assert!(intents.contains(GatewayIntents::GUILD_MESSAGES));
        assert!(intents.contains(GatewayIntents::MESSAGE_CONTENT));
        assert!(!intents.contains(GatewayIntents::DIRECT_MESSAGES));
    }
}
