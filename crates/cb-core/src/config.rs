use std::{env, fs, path::Path, time::Duration};

use crate::{errors::Error, Result};

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Tunables of the conversation pipeline.
///
/// Passed into each component's constructor; nothing below the binary reads
/// the process environment.
#[derive(Clone, Debug, PartialEq)]
pub struct ConversationConfig {
    /// User messages per summary block (the block spans twice as many turns).
    pub block_size: u64,
    /// Raw turns loaded into every context window.
    pub recent_limit: usize,
    /// Lifetime user messages allowed on the free tier.
    pub free_quota: u64,
    /// The near-limit notice fires when the count equals `free_quota - warning_margin`.
    pub warning_margin: u64,

    pub summary_max_tokens: u32,
    pub summary_temperature: f32,
    pub reply_max_tokens: u32,
    pub reply_temperature: f32,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            block_size: 50,
            recent_limit: 50,
            free_quota: 50,
            warning_margin: 5,
            summary_max_tokens: 300,
            summary_temperature: 0.3,
            reply_max_tokens: 300,
            reply_temperature: 0.8,
        }
    }
}

impl ConversationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::Config("block_size must be positive".to_string()));
        }
        if self.recent_limit == 0 {
            return Err(Error::Config("recent_limit must be positive".to_string()));
        }
        if self.warning_margin >= self.free_quota {
            return Err(Error::Config(format!(
                "warning_margin ({}) must be below free_quota ({})",
                self.warning_margin, self.free_quota
            )));
        }
        if !(0.0..=1.0).contains(&self.summary_temperature)
            || !(0.0..=1.0).contains(&self.reply_temperature)
        {
            return Err(Error::Config(
                "temperatures must be within 0.0..=1.0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Process-level configuration, loaded once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    // Completion provider
    pub anthropic_api_key: String,
    pub anthropic_model: String,
    pub anthropic_base_url: String,
    pub completion_timeout: Duration,

    pub conversation: ConversationConfig,

    // Console driver
    pub console_user_id: i64,
    pub console_premium_days: Option<i64>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let anthropic_api_key = env_str("ANTHROPIC_API_KEY")
            .and_then(non_empty)
            .ok_or_else(|| {
                Error::Config("ANTHROPIC_API_KEY environment variable is required".to_string())
            })?;
        let anthropic_model = env_str("ANTHROPIC_MODEL")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let anthropic_base_url = env_str("ANTHROPIC_BASE_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE_URL.to_string());
        let completion_timeout =
            Duration::from_millis(env_u64("COMPLETION_TIMEOUT_MS").unwrap_or(30_000));

        let defaults = ConversationConfig::default();
        let conversation = ConversationConfig {
            block_size: env_u64("SUMMARY_BLOCK_SIZE").unwrap_or(defaults.block_size),
            recent_limit: env_usize("RECENT_LIMIT").unwrap_or(defaults.recent_limit),
            free_quota: env_u64("FREE_QUOTA").unwrap_or(defaults.free_quota),
            warning_margin: env_u64("QUOTA_WARNING_MARGIN").unwrap_or(defaults.warning_margin),
            ..defaults
        };
        conversation.validate()?;

        let console_user_id = env_i64("CONSOLE_USER_ID").unwrap_or(1);
        let console_premium_days = env_i64("CONSOLE_PREMIUM_DAYS").filter(|d| *d > 0);

        Ok(Self {
            anthropic_api_key,
            anthropic_model,
            anthropic_base_url,
            completion_timeout,
            conversation,
            console_user_id,
            console_premium_days,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };
    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    env_str(key).and_then(|s| s.trim().parse::<i64>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
