use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub discord: Option<DiscordConfig>,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Chats whose new posts are fed into the relay
    pub source_channels: Vec<i64>,
    /// The single primary-platform destination
    pub primary_destination: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscordConfig {
    pub bot_token: String,
    #[serde(default)]
    pub destinations: Vec<u64>,
    #[serde(default = "default_footer")]
    pub footer: String,
    #[serde(default = "default_embed_title")]
    pub embed_title: String,
    #[serde(default = "default_mention")]
    pub mention: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilterConfig {
    #[serde(default)]
    pub monitor_words: Vec<String>,
    #[serde(default)]
    pub block_keywords: Vec<String>,
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    #[serde(default = "default_max_emoticons")]
    pub max_emoticons: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    /// Transient storage for downloaded attachments
    #[serde(default = "default_media_dir")]
    pub directory: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Append-only log sink for inbound texts and pipeline outcomes
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Six-field cron expression for the statistics heartbeat
    #[serde(default = "default_heartbeat")]
    pub heartbeat: String,
}

fn default_footer() -> String {
    "Reposted via @Wizard".to_string()
}

fn default_embed_title() -> String {
    "A new post has been posted on Telegram".to_string()
}

fn default_mention() -> String {
    "@here".to_string()
}

fn default_max_message_length() -> usize {
    700
}

fn default_max_emoticons() -> usize {
    8
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_secs() -> u64 {
    1
}

fn default_media_dir() -> PathBuf {
    PathBuf::from("media")
}

fn default_heartbeat() -> String {
    "0 0 * * * *".to_string()
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            monitor_words: Vec::new(),
            block_keywords: Vec::new(),
            max_message_length: default_max_message_length(),
            max_emoticons: default_max_emoticons(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            directory: default_media_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: None,
            heartbeat: default_heartbeat(),
        }
    }
}

impl DeliveryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

impl Config {
    /// Discord destinations, empty when the [discord] table is absent.
    pub fn secondary_destinations(&self) -> &[u64] {
        self.discord
            .as_ref()
            .map(|d| d.destinations.as_slice())
            .unwrap_or(&[])
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content).context("Failed to parse config")?;

        if config.delivery.max_attempts == 0 {
            anyhow::bail!("delivery.max_attempts must be at least 1");
        }
        if config.telegram.source_channels.is_empty() {
            anyhow::bail!("telegram.source_channels must list at least one chat");
        }

        // An empty keyword is a substring of every text
        config.filter.monitor_words = clean_keywords(&config.filter.monitor_words);
        config.filter.block_keywords = clean_keywords(&config.filter.block_keywords);

        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        if !config.media.directory.exists() {
            std::fs::create_dir_all(&config.media.directory).with_context(|| {
                format!(
                    "Failed to create media directory: {}",
                    config.media.directory.display()
                )
            })?;
        }

        Ok(config)
    }
}

fn clean_keywords(words: &[String]) -> Vec<String> {
    words
        .iter()
        .filter(|w| !w.trim().is_empty())
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [telegram]
        bot_token = "123:abc"
        source_channels = [-1001111111111]
        primary_destination = -1002222222222
    "#;

    #[test]
    fn test_defaults_applied() {
        let config = Config::parse(MINIMAL).unwrap();
        assert_eq!(config.filter.max_message_length, 700);
        assert_eq!(config.filter.max_emoticons, 8);
        assert_eq!(config.delivery.max_attempts, 3);
        assert_eq!(config.delivery.backoff(), Duration::from_secs(1));
        assert_eq!(config.media.directory, PathBuf::from("media"));
        assert!(config.logging.file.is_none());
        assert_eq!(config.logging.heartbeat, "0 0 * * * *");
        assert!(config.secondary_destinations().is_empty());
    }

    #[test]
    fn test_full_config() {
        let content = r#"
            [telegram]
            bot_token = "123:abc"
            source_channels = [-1001, -1002]
            primary_destination = -1003

            [discord]
            bot_token = "discord-token"
            destinations = [11, 22]

            [filter]
            monitor_words = ["hiring", "  ", "rust"]
            block_keywords = ["scam", ""]
            max_message_length = 500

            [delivery]
            max_attempts = 5
            backoff_secs = 2

            [logging]
            file = "messages.log"
        "#;
        let config = Config::parse(content).unwrap();
        assert_eq!(config.telegram.source_channels, vec![-1001, -1002]);
        assert_eq!(config.secondary_destinations(), &[11, 22]);
        assert_eq!(config.filter.monitor_words, vec!["hiring", "rust"]);
        assert_eq!(config.filter.block_keywords, vec!["scam"]);
        assert_eq!(config.filter.max_message_length, 500);
        assert_eq!(config.filter.max_emoticons, 8);
        assert_eq!(config.delivery.max_attempts, 5);
        let discord = config.discord.unwrap();
        assert_eq!(discord.footer, "Reposted via @Wizard");
        assert_eq!(discord.embed_title, "A new post has been posted on Telegram");
        assert_eq!(discord.mention, "@here");
        assert_eq!(config.logging.file, Some(PathBuf::from("messages.log")));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let content = format!("{MINIMAL}\n[delivery]\nmax_attempts = 0\n");
        assert!(Config::parse(&content).is_err());
    }

    #[test]
    fn test_missing_telegram_rejected() {
        assert!(Config::parse("[filter]\nmonitor_words = [\"x\"]\n").is_err());
    }

    #[test]
    fn test_load_creates_media_dir() {
        let dir = tempfile::tempdir().unwrap();
        let media_dir = dir.path().join("downloads");
        let config_path = dir.path().join("config.toml");
        let content = format!(
            "{MINIMAL}\n[media]\ndirectory = {:?}\n",
            media_dir.to_string_lossy()
        );
        std::fs::write(&config_path, content).unwrap();

        let config = Config::load(&config_path).unwrap();
        assert_eq!(config.media.directory, media_dir);
        assert!(media_dir.is_dir());
    }
}
