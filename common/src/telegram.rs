use anyhow::Result;
use serde::Serialize;
use std::env;
use tracing::{error, info};

const TELEGRAM_API_URL: &str = "https://api.telegram.org/bot";

#[derive(Serialize)]
struct SendMessageRequest {
    chat_id: String,
    text: String,
}

/// Posts to the ops channel. A missing token or chat id disables the
/// notifier instead of failing the caller.
pub async fn send_telegram_message(message: &str) -> Result<()> {
    let bot_token = match env::var("TELEGRAM_BOT_TOKEN") {
        Ok(token) => token,
        Err(_) => return Ok(()),
    };
    let chat_id = match env::var("TELEGRAM_CHAT_ID") {
        Ok(id) => id,
        Err(_) => return Ok(()),
    };

    let client = reqwest::Client::new();
    let url = format!("{}{}/sendMessage", TELEGRAM_API_URL, bot_token);

    let request = SendMessageRequest {
        chat_id,
        text: message.to_string(),
    };

    info!("Sending telegram message: {}", message);

    let response = client.post(&url).json(&request).send().await?;

    if !response.status().is_success() {
        let error_text = response.text().await?;
        error!("Telegram API error: {}", error_text);
    }

    Ok(())
}
