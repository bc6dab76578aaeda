// src/notify/mod.rs
use reqwest::Client;
use tracing::{debug, warn};

/// Push channel for entry/exit/protection events. Telegram-backed when a bot
/// token and chat id are configured, otherwise a no-op. Send failures never
/// reach engine state.
pub struct Notifier {
    channel: Option<TelegramChannel>,
}

struct TelegramChannel {
    token: String,
    chat_id: String,
    client: Client,
}

impl Notifier {
    pub fn from_env() -> Self {
        let token = std::env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").unwrap_or_default();
        if token.is_empty() || chat_id.is_empty() {
            debug!("Telegram not configured, notifications disabled");
            return Self::disabled();
        }
        Self {
            channel: Some(TelegramChannel {
                token,
                chat_id,
                client: Client::new(),
            }),
        }
    }

    pub fn disabled() -> Self {
        Self { channel: None }
    }

    pub async fn send(&self, text: &str) {
        let Some(channel) = &self.channel else {
            return;
        };
        let url = format!("https://api.telegram.org/bot{}/sendMessage", channel.token);
        let params = [
            ("chat_id", channel.chat_id.as_str()),
            ("text", text),
            ("parse_mode", "Markdown"),
        ];
        match channel.client.post(&url).form(&params).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!("Telegram rejected notification: HTTP {}", resp.status()),
            Err(e) => warn!("Telegram notification failed: {e}"),
        }
    }
}
