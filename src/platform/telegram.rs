use std::collections::HashSet;
use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::payloads::{
    SendAnimationSetters, SendDocumentSetters, SendMessageSetters, SendPhotoSetters,
    SendVideoSetters,
};
use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile, ParseMode};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::media::{MediaFetcher, MediaHandle};
use crate::platform::{ChatInfo, InboundMessage, MediaRef, PrimaryClient, Sender};
use crate::relay::Relay;

/// Telegram rejects captions longer than this
const CAPTION_LIMIT: usize = 1024;

/// Convert the relay's markdown (`**bold**`, `[label](url)`) to Telegram HTML,
/// escaping everything else.
pub fn markdown_to_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 32);
    let mut rest = text;
    let mut bold = false;

    while let Some(c) = rest.chars().next() {
        if rest.starts_with("**") {
            if bold {
                out.push_str("</b>");
                bold = false;
                rest = &rest[2..];
                continue;
            }
            if rest[2..].contains("**") {
                out.push_str("<b>");
                bold = true;
                rest = &rest[2..];
                continue;
            }
        }

        if c == '[' {
            if let Some((label, url, consumed)) = parse_link(rest) {
                out.push_str("<a href=\"");
                escape_into(&mut out, url, true);
                out.push_str("\">");
                escape_into(&mut out, label, false);
                out.push_str("</a>");
                rest = &rest[consumed..];
                continue;
            }
        }

        escape_into(&mut out, &rest[..c.len_utf8()], false);
        rest = &rest[c.len_utf8()..];
    }

    if bold {
        out.push_str("</b>");
    }
    out
}

/// Parse `[label](url)` at the start of `s`, returning the byte length consumed.
fn parse_link(s: &str) -> Option<(&str, &str, usize)> {
    let close = s.find("](")?;
    let label = &s[1..close];
    if label.contains('\n') {
        return None;
    }
    let after = &s[close + 2..];
    let end = after.find(')')?;
    let url = &after[..end];
    if url.is_empty() || url.contains(char::is_whitespace) {
        return None;
    }
    Some((label, url, close + 2 + end + 1))
}

fn escape_into(out: &mut String, s: &str, attribute: bool) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

/// Lowercased extension with a leading dot, from a file name or a fallback.
fn extension_of(file_name: Option<&str>, fallback: &str) -> String {
    file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_else(|| fallback.to_string())
}

fn media_ref(msg: &Message) -> Option<MediaRef> {
    let (file_id, extension) = if let Some(sizes) = msg.photo() {
        // Largest size comes last
        (sizes.last()?.file.id.0.clone(), ".jpg".to_string())
    } else if let Some(animation) = msg.animation() {
        (
            animation.file.id.0.clone(),
            extension_of(animation.file_name.as_deref(), ".mp4"),
        )
    } else if let Some(video) = msg.video() {
        (
            video.file.id.0.clone(),
            extension_of(video.file_name.as_deref(), ".mp4"),
        )
    } else if let Some(document) = msg.document() {
        (
            document.file.id.0.clone(),
            extension_of(document.file_name.as_deref(), ""),
        )
    } else if let Some(audio) = msg.audio() {
        (
            audio.file.id.0.clone(),
            extension_of(audio.file_name.as_deref(), ".mp3"),
        )
    } else if let Some(voice) = msg.voice() {
        (voice.file.id.0.clone(), ".ogg".to_string())
    } else {
        return None;
    };

    Some(MediaRef { file_id, extension })
}

fn sender(msg: &Message) -> Option<Sender> {
    if let Some(user) = msg.from.as_ref() {
        return Some(Sender {
            name: user.first_name.clone(),
            id: user.id.0 as i64,
            handle: user.username.clone(),
        });
    }
    // Channel posts and anonymous admins are signed by a chat
    msg.sender_chat.as_ref().map(|chat| Sender {
        name: chat.title().unwrap_or("Unknown").to_string(),
        id: chat.id.0,
        handle: chat.username().map(str::to_string),
    })
}

/// Build the platform-agnostic message from a Telegram update
pub fn inbound_from_message(msg: &Message) -> InboundMessage {
    InboundMessage {
        message_id: msg.id.0,
        text: msg
            .text()
            .or_else(|| msg.caption())
            .unwrap_or_default()
            .to_string(),
        sender: sender(msg),
        chat: ChatInfo {
            id: msg.chat.id.0,
            title: msg.chat.title().unwrap_or("Unknown Chat").to_string(),
            handle: msg.chat.username().map(str::to_string),
        },
        media: media_ref(msg),
    }
}

/// Run the listener: every new post in a source chat becomes one pipeline run.
pub async fn run(bot: Bot, relay: Arc<Relay>, source_channels: &[i64]) -> Result<()> {
    let sources: Arc<HashSet<i64>> = Arc::new(source_channels.iter().copied().collect());

    info!("Watching {} source chats...", sources.len());

    let channel_sources = Arc::clone(&sources);
    let group_sources = Arc::clone(&sources);
    let handler = dptree::entry()
        .branch(
            Update::filter_channel_post()
                .filter(move |msg: Message| channel_sources.contains(&msg.chat.id.0))
                .endpoint(handle_post),
        )
        .branch(
            Update::filter_message()
                .filter(move |msg: Message| group_sources.contains(&msg.chat.id.0))
                .endpoint(handle_post),
        );

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![relay])
        // No per-chat sequencing; runs interleave freely
        .distribution_function(|_| None::<Infallible>)
        .default_handler(|upd| async move {
            debug!("Ignored update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("relay"))
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_post(msg: Message, relay: Arc<Relay>) -> ResponseResult<()> {
    relay.handle(inbound_from_message(&msg)).await;
    Ok(())
}

/// Primary-platform client and media fetcher backed by the Bot API
#[derive(Clone)]
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl PrimaryClient for TelegramClient {
    async fn send_text(&self, channel: i64, text: &str) -> Result<()> {
        self.bot
            .send_message(ChatId(channel), markdown_to_html(text))
            .parse_mode(ParseMode::Html)
            .await
            .with_context(|| format!("Failed to send message to Telegram chat {}", channel))?;
        Ok(())
    }

    async fn send_file_with_caption(
        &self,
        channel: i64,
        file: &MediaHandle,
        caption: &str,
    ) -> Result<()> {
        let chat = ChatId(channel);
        let fits = caption.chars().count() <= CAPTION_LIMIT;
        let inline = if fits && !caption.is_empty() {
            Some(markdown_to_html(caption))
        } else {
            None
        };
        let input = InputFile::file(file.path());

        let sent = match file.extension().to_lowercase().as_str() {
            ".jpg" | ".jpeg" | ".png" => {
                let req = self.bot.send_photo(chat, input);
                let req = match inline {
                    Some(c) => req.caption(c).parse_mode(ParseMode::Html),
                    None => req,
                };
                req.await
            }
            ".gif" => {
                let req = self.bot.send_animation(chat, input);
                let req = match inline {
                    Some(c) => req.caption(c).parse_mode(ParseMode::Html),
                    None => req,
                };
                req.await
            }
            ".mp4" | ".mov" => {
                let req = self.bot.send_video(chat, input);
                let req = match inline {
                    Some(c) => req.caption(c).parse_mode(ParseMode::Html),
                    None => req,
                };
                req.await
            }
            _ => {
                let req = self.bot.send_document(chat, input);
                let req = match inline {
                    Some(c) => req.caption(c).parse_mode(ParseMode::Html),
                    None => req,
                };
                req.await
            }
        };
        sent.with_context(|| format!("Failed to send file to Telegram chat {}", channel))?;

        if !fits {
            self.send_text(channel, caption).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl MediaFetcher for TelegramClient {
    async fn fetch(&self, media: &MediaRef, dest: &Path) -> Result<()> {
        let file = self
            .bot
            .get_file(FileId(media.file_id.clone()))
            .await
            .context("Failed to resolve Telegram file")?;

        let mut dst = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;
        self.bot
            .download_file(&file.path, &mut dst)
            .await
            .context("Failed to download Telegram file")?;
        dst.flush().await?;
        Ok(())
    }
}
