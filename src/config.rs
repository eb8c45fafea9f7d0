use anyhow::{anyhow, Result};
use std::{io::ErrorKind, net::SocketAddr, path::PathBuf, time::Duration};

const CONFIG_PATH_REL_HOME: &str = ".config/hingebot/config.toml";
const DATA_DIR_REL_HOME: &str = ".config/hingebot";

/// Bot configuration
///
/// Every section has defaults so an absent or partial `config.toml` is fine; secrets usually come
/// from the environment instead.
#[derive(Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: General,
    pub storage: Storage,
    pub profile_generator: ProfileGenerator,
    pub gift_code: GiftCode,
    pub liveness: Liveness,
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct General {
    pub discord_token: String,
    /// Global discord names allowed to run privileged commands in any server.
    pub bot_owners: Vec<String>,
    pub command_prefix: String,
    pub profile_rate_limit_seconds: u64,
}

#[derive(Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Storage {
    /// Directory holding the JSON caches.  Defaults to the config directory.
    pub data_dir: Option<PathBuf>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileSource {
    Llm,
    Phrases,
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ProfileGenerator {
    pub source: ProfileSource,
    pub chat_url: String,
    pub model_name: String,
    pub api_key: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GiftCode {
    pub api_url: String,
    pub secret: String,
    pub timeout_seconds: u64,
    /// Pause between players so the game API doesn't throttle us.
    pub player_delay_ms: u64,
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Liveness {
    pub enabled: bool,
    pub bind: SocketAddr,
}

impl Default for General {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            bot_owners: Vec::new(),
            command_prefix: ";".to_owned(),
            profile_rate_limit_seconds: 5,
        }
    }
}

impl Default for ProfileGenerator {
    fn default() -> Self {
        Self {
            source: ProfileSource::Llm,
            chat_url: "https://api.groq.com/openai/v1/chat/completions".to_owned(),
            model_name: "llama-3.3-70b-versatile".to_owned(),
            api_key: String::new(),
            temperature: 1.0,
            timeout_seconds: 30,
        }
    }
}

impl Default for GiftCode {
    fn default() -> Self {
        Self {
            api_url: "https://wos-giftcode-api.centurygame.com/api".to_owned(),
            secret: String::new(),
            timeout_seconds: 15,
            player_delay_ms: 1000,
        }
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: SocketAddr::from(([0, 0, 0, 0], 7123)),
        }
    }
}

impl Config {
    fn config_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|p| p.join(CONFIG_PATH_REL_HOME))
            .ok_or(anyhow!("Could not find home directory"))
    }

    pub async fn load() -> Result<Self> {
        let path = Self::config_path()?;

        let mut config = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Self::parse(&contents).map_err(|e| {
                anyhow!(
                    "Could not parse configuration at `{}`: {}",
                    path.to_string_lossy(),
                    e
                )
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => Config::default(),
            Err(e) => {
                return Err(anyhow!(
                    "Could not read configuration at `{}`: {}",
                    path.to_string_lossy(),
                    e
                ))
            }
        };

        // A missing .env is the normal case in production
        let _ = dotenvy::dotenv();
        config.apply_env(|key| std::env::var(key).ok());

        if config.general.discord_token.is_empty() {
            return Err(anyhow!(
                "No discord token: set DISCORD_TOKEN or general.discord_token in `{}`",
                path.to_string_lossy()
            ));
        }

        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(Into::into)
    }

    /// Secrets from the environment win over the file.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| var(key).filter(|v| !v.is_empty());

        if let Some(token) = non_empty("DISCORD_TOKEN") {
            self.general.discord_token = token;
        }
        if let Some(key) = non_empty("GROQ_API_KEY") {
            self.profile_generator.api_key = key;
        }
        if let Some(secret) = non_empty("WOS_SECRET") {
            self.gift_code.secret = secret;
        }
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.storage.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::home_dir()
                .map(|p| p.join(DATA_DIR_REL_HOME))
                .ok_or(anyhow!("Could not find home directory")),
        }
    }
}

impl GiftCode {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl ProfileGenerator {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = Config::parse("").unwrap();
        assert_eq!(cfg.general.command_prefix, ";");
        assert_eq!(cfg.general.profile_rate_limit_seconds, 5);
        assert_eq!(cfg.profile_generator.source, ProfileSource::Llm);
        assert_eq!(cfg.liveness.bind.port(), 7123);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let cfg = Config::parse(
            r#"
            [general]
            command_prefix = "!"
            bot_owners = ["alice"]

            [profile_generator]
            source = "phrases"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.general.command_prefix, "!");
        assert_eq!(cfg.general.bot_owners, vec!["alice".to_owned()]);
        assert_eq!(cfg.general.profile_rate_limit_seconds, 5);
        assert_eq!(cfg.profile_generator.source, ProfileSource::Phrases);
        assert_eq!(cfg.profile_generator.timeout_seconds, 30);
    }

    #[test]
    fn environment_overrides_secrets() {
        let mut cfg = Config::parse(
            r#"
            [general]
            discord_token = "from-file"
            [gift_code]
            secret = "file-secret"
            "#,
        )
        .unwrap();

        let env: HashMap<&str, &str> = [("DISCORD_TOKEN", "from-env"), ("WOS_SECRET", "")]
            .into_iter()
            .collect();
        cfg.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(cfg.general.discord_token, "from-env");
        // empty variables don't clobber configured values
        assert_eq!(cfg.gift_code.secret, "file-secret");
        assert!(cfg.profile_generator.api_key.is_empty());
    }
}
