use anyhow::Result;
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::{Config, DiscordConfig};
use crate::format::RenderedMessage;
use crate::media::MediaHandle;
use crate::platform::{PrimaryClient, RichPost, SecondaryClient};

/// Bounded retry with a fixed pause between attempts
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Run `op` until it succeeds or `max_attempts` is reached.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        "{} failed (attempt {}/{}): {:#}",
                        label, attempt, self.max_attempts, e
                    );
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e.context(format!("{} gave up after {} attempts", label, attempt)))
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Primary(i64),
    Secondary(u64),
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Primary(id) => write!(f, "telegram:{}", id),
            Destination::Secondary(id) => write!(f, "discord:{}", id),
        }
    }
}

/// Configured outbound channels: one primary, any number of secondary.
#[derive(Debug, Clone)]
pub struct DestinationSet {
    pub primary: i64,
    pub secondary: Vec<u64>,
}

impl DestinationSet {
    pub fn from_config(config: &Config) -> Self {
        Self {
            primary: config.telegram.primary_destination,
            secondary: config.secondary_destinations().to_vec(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Destination> + '_ {
        std::iter::once(Destination::Primary(self.primary))
            .chain(self.secondary.iter().map(|id| Destination::Secondary(*id)))
    }

    pub fn len(&self) -> usize {
        1 + self.secondary.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub destination: Destination,
    pub outcome: DeliveryOutcome,
}

impl DeliveryResult {
    pub fn is_delivered(&self) -> bool {
        self.outcome == DeliveryOutcome::Delivered
    }
}

/// Static parts of the secondary-platform card
#[derive(Debug, Clone)]
pub struct PostTemplate {
    pub title: String,
    pub footer: String,
    pub mention: String,
    pub file_notice: String,
}

impl Default for PostTemplate {
    fn default() -> Self {
        Self {
            title: "A new post has been posted on Telegram".to_string(),
            footer: "Reposted via @Wizard".to_string(),
            mention: "@here".to_string(),
            file_notice: "Here's the reposted media:".to_string(),
        }
    }
}

impl PostTemplate {
    pub fn from_config(config: &DiscordConfig) -> Self {
        Self {
            title: config.embed_title.clone(),
            footer: config.footer.clone(),
            mention: config.mention.clone(),
            ..Self::default()
        }
    }
}

/// How a rendered message is split into outbound units
#[derive(Debug, Clone, Copy)]
enum DeliveryPlan<'a> {
    Text,
    InlineImage(&'a MediaHandle),
    FileThenText(&'a MediaHandle),
}

impl<'a> DeliveryPlan<'a> {
    fn for_media(media: Option<&'a MediaHandle>) -> Self {
        match media {
            Some(m) if m.is_image() => DeliveryPlan::InlineImage(m),
            Some(m) => DeliveryPlan::FileThenText(m),
            None => DeliveryPlan::Text,
        }
    }
}

/// Fans a rendered message out to every destination concurrently
pub struct Dispatcher {
    primary: Arc<dyn PrimaryClient>,
    secondary: Option<Arc<dyn SecondaryClient>>,
    destinations: DestinationSet,
    policy: RetryPolicy,
    template: PostTemplate,
}

impl Dispatcher {
    pub fn new(
        primary: Arc<dyn PrimaryClient>,
        secondary: Option<Arc<dyn SecondaryClient>>,
        destinations: DestinationSet,
        policy: RetryPolicy,
        template: PostTemplate,
    ) -> Self {
        Self {
            primary,
            secondary,
            destinations,
            policy,
            template,
        }
    }

    /// Deliver to all destinations and report one result per destination.
    /// A failing destination never delays or aborts the others.
    pub async fn dispatch(&self, rendered: &RenderedMessage) -> Vec<DeliveryResult> {
        let plan = DeliveryPlan::for_media(rendered.media.as_ref());
        let text = rendered.text.as_str();

        join_all(
            self.destinations
                .iter()
                .map(|destination| self.deliver(destination, text, plan)),
        )
        .await
    }

    async fn deliver(
        &self,
        destination: Destination,
        text: &str,
        plan: DeliveryPlan<'_>,
    ) -> DeliveryResult {
        let label = format!("Delivery to {}", destination);
        let run = self
            .policy
            .run(&label, || self.attempt(destination, text, plan));

        // A panicking client fails its own destination only
        let outcome = match AssertUnwindSafe(run).catch_unwind().await {
            Ok(Ok(())) => {
                info!("Message delivered to {}", destination);
                DeliveryOutcome::Delivered
            }
            Ok(Err(e)) => {
                error!("{:#}", e);
                DeliveryOutcome::Failed(format!("{:#}", e))
            }
            Err(panic) => {
                let reason = panic_message(&*panic);
                error!("{} panicked: {}", label, reason);
                DeliveryOutcome::Failed(format!("panicked: {}", reason))
            }
        };
        DeliveryResult {
            destination,
            outcome,
        }
    }

    async fn attempt(
        &self,
        destination: Destination,
        text: &str,
        plan: DeliveryPlan<'_>,
    ) -> Result<()> {
        match destination {
            Destination::Primary(channel) => self.send_primary(channel, text, plan).await,
            Destination::Secondary(channel) => self.send_secondary(channel, text, plan).await,
        }
    }

    async fn send_primary(&self, channel: i64, text: &str, plan: DeliveryPlan<'_>) -> Result<()> {
        match plan {
            DeliveryPlan::Text => self.primary.send_text(channel, text).await,
            DeliveryPlan::InlineImage(media) => {
                self.primary
                    .send_file_with_caption(channel, media, text)
                    .await
            }
            DeliveryPlan::FileThenText(media) => {
                self.primary
                    .send_file_with_caption(channel, media, "")
                    .await?;
                self.primary.send_text(channel, text).await
            }
        }
    }

    async fn send_secondary(&self, channel: u64, text: &str, plan: DeliveryPlan<'_>) -> Result<()> {
        let client = match &self.secondary {
            Some(client) => client,
            None => anyhow::bail!("No secondary client configured"),
        };

        let mut post = RichPost {
            content: self.template.mention.clone(),
            title: self.template.title.clone(),
            body: text.to_string(),
            footer: self.template.footer.clone(),
        };

        match plan {
            DeliveryPlan::Text => client.send_rich_message(channel, &post, None).await,
            DeliveryPlan::InlineImage(media) => {
                client.send_rich_message(channel, &post, Some(media)).await
            }
            DeliveryPlan::FileThenText(media) => {
                client
                    .send_file(channel, media, &self.template.file_notice)
                    .await?;
                post.content.clear();
                client.send_rich_message(channel, &post, None).await
            }
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
