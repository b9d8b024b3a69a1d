use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::ChannelSender;

/// Bot-API sender. sendMessage and sendPhoto go out as form posts,
/// sendMediaGroup as JSON because its media field is structured.
#[derive(Clone)]
pub struct TelegramSender {
    api_base: String,
    bot_token: String,
    chat_id: String,
    client: Client,
    timeout: Duration,
}

impl TelegramSender {
    pub fn new(api_base: &str, bot_token: &str, chat_id: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
            client: Client::new(),
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    async fn check(resp: reqwest::Response, method: &str) -> Result<()> {
        if let Err(e) = resp.error_for_status_ref() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("{method} HTTP error: {e}: {body}"));
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelSender for TelegramSender {
    async fn send_text(&self, text: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.method_url("sendMessage"))
            .timeout(self.timeout)
            .form(&[("chat_id", self.chat_id.as_str()), ("text", text)])
            .send()
            .await
            .context("sendMessage request")?;
        Self::check(resp, "sendMessage").await
    }

    async fn send_photo(&self, photo_url: &str, caption: Option<&str>) -> Result<()> {
        let mut form: Vec<(&str, &str)> =
            vec![("chat_id", self.chat_id.as_str()), ("photo", photo_url)];
        if let Some(caption) = caption {
            form.push(("caption", caption));
        }
        let resp = self
            .client
            .post(self.method_url("sendPhoto"))
            .timeout(self.timeout)
            .form(&form)
            .send()
            .await
            .context("sendPhoto request")?;
        Self::check(resp, "sendPhoto").await
    }

    async fn send_media_group(&self, photo_urls: &[String], caption: Option<&str>) -> Result<()> {
        let media: Vec<InputMediaPhoto> = photo_urls
            .iter()
            .enumerate()
            .map(|(i, url)| InputMediaPhoto {
                kind: "photo",
                media: url,
                caption: if i == 0 { caption } else { None },
            })
            .collect();
        let payload = MediaGroupPayload {
            chat_id: &self.chat_id,
            media,
        };
        let resp = self
            .client
            .post(self.method_url("sendMediaGroup"))
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .context("sendMediaGroup request")?;
        Self::check(resp, "sendMediaGroup").await
    }
}

#[derive(Serialize)]
struct InputMediaPhoto<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    media: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<&'a str>,
}

#[derive(Serialize)]
struct MediaGroupPayload<'a> {
    chat_id: &'a str,
    media: Vec<InputMediaPhoto<'a>>,
}
