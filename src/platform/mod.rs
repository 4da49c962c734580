pub mod discord;
pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

use crate::media::MediaHandle;

/// Author of an inbound message as reported by the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub name: String,
    pub id: i64,
    /// Public handle without the leading '@'
    pub handle: Option<String>,
}

impl Sender {
    /// Sender used when the platform does not report one
    pub fn unknown() -> Self {
        Self {
            name: "Unknown".to_string(),
            id: 0,
            handle: None,
        }
    }

    /// Resolve an optional sender to a concrete one, filling in defaults.
    pub fn resolve(sender: Option<&Sender>) -> Sender {
        match sender {
            Some(s) => Sender {
                name: if s.name.trim().is_empty() {
                    "Unknown".to_string()
                } else {
                    s.name.clone()
                },
                id: s.id,
                handle: s.handle.clone().filter(|h| !h.is_empty()),
            },
            None => Sender::unknown(),
        }
    }
}

/// Chat a message was posted in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatInfo {
    pub id: i64,
    pub title: String,
    pub handle: Option<String>,
}

/// Attachment reference; the bytes are only fetched by the media acquirer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    /// Platform file identifier used to download the attachment
    pub file_id: String,
    /// Extension including the dot, e.g. ".jpg"
    pub extension: String,
}

/// A message received from a source channel. Immutable for one pipeline run.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message_id: i32,
    pub text: String,
    pub sender: Option<Sender>,
    pub chat: ChatInfo,
    pub media: Option<MediaRef>,
}

/// Card-style post for the secondary platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RichPost {
    pub content: String,
    pub title: String,
    pub body: String,
    pub footer: String,
}

/// Outbound client for the primary platform
#[async_trait]
pub trait PrimaryClient: Send + Sync {
    async fn send_text(&self, channel: i64, text: &str) -> Result<()>;

    /// Send a file; an empty caption sends the file alone.
    async fn send_file_with_caption(
        &self,
        channel: i64,
        file: &MediaHandle,
        caption: &str,
    ) -> Result<()>;
}

/// Outbound client for the secondary platform
#[async_trait]
pub trait SecondaryClient: Send + Sync {
    async fn send_rich_message(
        &self,
        channel: u64,
        post: &RichPost,
        image: Option<&MediaHandle>,
    ) -> Result<()>;

    async fn send_file(&self, channel: u64, file: &MediaHandle, content: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_missing_sender() {
        assert_eq!(Sender::resolve(None), Sender::unknown());
        assert_eq!(Sender::unknown().name, "Unknown");
        assert_eq!(Sender::unknown().id, 0);
    }

    #[test]
    fn test_resolve_fills_blank_fields() {
        let raw = Sender {
            name: "  ".to_string(),
            id: 7,
            handle: Some(String::new()),
        };
        let resolved = Sender::resolve(Some(&raw));
        assert_eq!(resolved.name, "Unknown");
        assert_eq!(resolved.id, 7);
        assert_eq!(resolved.handle, None);
    }

    #[test]
    fn test_resolve_keeps_complete_sender() {
        let raw = Sender {
            name: "Alex".to_string(),
            id: 12345,
            handle: Some("alex".to_string()),
        };
        assert_eq!(Sender::resolve(Some(&raw)), raw);
    }
}
