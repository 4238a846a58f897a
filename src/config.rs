use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Cola
    pub max_queue_size: usize,

    // Tiempos de espera (en segundos)
    pub voice_connect_timeout: u64,
    pub title_lookup_timeout: u64,

    // Binarios externos
    pub ytdlp_bin: String,
    pub ffmpeg_bin: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")?.parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Cola
            max_queue_size: std::env::var("MAX_QUEUE_SIZE")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,

            // Tiempos de espera
            voice_connect_timeout: std::env::var("VOICE_CONNECT_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            title_lookup_timeout: std::env::var("TITLE_LOOKUP_TIMEOUT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,

            // Binarios
            ytdlp_bin: std::env::var("YTDLP_BIN").unwrap_or_else(|_| "yt-dlp".to_string()),
            ffmpeg_bin: std::env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string()),
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// Catches common mistakes before the gateway connection is attempted,
    /// so a misconfigured deployment fails fast with a readable message.
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN must not be empty");
        }

        if self.application_id == 0 {
            anyhow::bail!("APPLICATION_ID must be a valid application id");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.voice_connect_timeout == 0 {
            anyhow::bail!("Voice connect timeout must be greater than 0");
        }

        if self.ytdlp_bin.trim().is_empty() || self.ffmpeg_bin.trim().is_empty() {
            anyhow::bail!("YTDLP_BIN and FFMPEG_BIN must not be empty");
        }

        Ok(())
    }

    /// Espera máxima para que la conexión de voz quede lista.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.voice_connect_timeout)
    }

    /// Espera máxima para la consulta de título de un enlace directo.
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.title_lookup_timeout)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes sensitive values like the token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Queue: {} tracks max\n  \
            Timeouts: voice {}s, title lookup {}s\n  \
            Binaries: {} / {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.max_queue_size,
            self.voice_connect_timeout,
            self.title_lookup_timeout,
            self.ytdlp_bin,
            self.ffmpeg_bin,
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            // Cola
            max_queue_size: 1000,

            // Tiempos de espera
            voice_connect_timeout: 30,
            title_lookup_timeout: 10,

            // Binarios
            ytdlp_bin: "yt-dlp".to_string(),
            ffmpeg_bin: "ffmpeg".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn valid_config() -> Config {
        Config {
            discord_token: "token".to_string(),
            application_id: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_accepts_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_rejects_missing_token() {
        assert!(Config::default().validate().is_err());
    }

    #[test]
    fn test_rejects_zero_queue_size() {
        let config = Config {
            max_queue_size: 0,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_connect_timeout() {
        let config = Config {
            voice_connect_timeout: 0,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeouts_are_seconds() {
        let config = valid_config();
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.lookup_timeout(), Duration::from_secs(10));
    }
}
