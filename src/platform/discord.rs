use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use tracing::debug;

use crate::media::MediaHandle;
use crate::platform::{RichPost, SecondaryClient};

const API_BASE: &str = "https://discord.com/api/v10";

/// Accent colour of relayed cards (Discord "blue")
const EMBED_COLOR: u32 = 0x3498DB;

#[derive(Debug, Serialize)]
struct MessagePayload {
    #[serde(skip_serializing_if = "String::is_empty")]
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    embeds: Vec<Embed>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<AttachmentRef>,
    allowed_mentions: AllowedMentions,
}

#[derive(Debug, Serialize)]
struct Embed {
    title: String,
    description: String,
    color: u32,
    footer: EmbedFooter,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<EmbedImage>,
}

#[derive(Debug, Serialize)]
struct EmbedFooter {
    text: String,
}

#[derive(Debug, Serialize)]
struct EmbedImage {
    url: String,
}

#[derive(Debug, Serialize)]
struct AttachmentRef {
    id: u32,
    filename: String,
}

#[derive(Debug, Serialize)]
struct AllowedMentions {
    parse: Vec<&'static str>,
}

impl AllowedMentions {
    /// Lets `@here` / `@everyone` in the content ping the channel
    fn everyone() -> Self {
        Self {
            parse: vec!["everyone"],
        }
    }
}

fn card_payload(post: &RichPost, image: Option<&str>) -> MessagePayload {
    MessagePayload {
        content: post.content.clone(),
        embeds: vec![Embed {
            title: post.title.clone(),
            description: post.body.clone(),
            color: EMBED_COLOR,
            footer: EmbedFooter {
                text: post.footer.clone(),
            },
            image: image.map(|name| EmbedImage {
                url: format!("attachment://{}", name),
            }),
        }],
        attachments: image.map(attachment).into_iter().collect(),
        allowed_mentions: AllowedMentions::everyone(),
    }
}

fn file_payload(content: &str, file_name: &str) -> MessagePayload {
    MessagePayload {
        content: content.to_string(),
        embeds: Vec::new(),
        attachments: vec![attachment(file_name)],
        allowed_mentions: AllowedMentions::everyone(),
    }
}

fn attachment(file_name: &str) -> AttachmentRef {
    AttachmentRef {
        id: 0,
        filename: file_name.to_string(),
    }
}

/// Secondary-platform client speaking the Discord REST API with a bot token
pub struct DiscordClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl DiscordClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            base_url: API_BASE.to_string(),
        }
    }

    async fn create_message(
        &self,
        channel: u64,
        payload: &MessagePayload,
        file: Option<&MediaHandle>,
    ) -> Result<()> {
        let url = format!("{}/channels/{}/messages", self.base_url, channel);
        debug!("Sending message to Discord: {}", url);

        let request = self
            .client
            .post(&url)
            .header("Authorization", format!("Bot {}", self.token));

        let request = match file {
            Some(handle) => {
                let bytes = tokio::fs::read(handle.path()).await.with_context(|| {
                    format!("Failed to read media file: {}", handle.path().display())
                })?;
                let payload_json =
                    serde_json::to_string(payload).context("Failed to encode Discord payload")?;
                let form = Form::new()
                    .text("payload_json", payload_json)
                    .part("files[0]", Part::bytes(bytes).file_name(handle.file_name()));
                request.multipart(form)
            }
            None => request.json(payload),
        };

        let response = request
            .send()
            .await
            .context("Failed to send request to Discord")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Discord API error ({}): {}", status, error_body);
        }

        Ok(())
    }
}

#[async_trait]
impl SecondaryClient for DiscordClient {
    async fn send_rich_message(
        &self,
        channel: u64,
        post: &RichPost,
        image: Option<&MediaHandle>,
    ) -> Result<()> {
        let image_name = image.map(|h| h.file_name());
        let payload = card_payload(post, image_name.as_deref());
        self.create_message(channel, &payload, image).await
    }

    async fn send_file(&self, channel: u64, file: &MediaHandle, content: &str) -> Result<()> {
        let payload = file_payload(content, &file.file_name());
        self.create_message(channel, &payload, Some(file)).await
    }
}
