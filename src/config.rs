use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Proveedores externos
    pub metadata_api_key: Option<String>,
    pub soundcloud_client_id: Option<String>,

    // Resolución
    pub resolve_timeout_secs: u64,
    pub max_media_seconds: u64,
    pub playlist_ttl_secs: u64,

    // Paths
    pub audio_dir: PathBuf,

    // Radio
    pub radio_refresh_secs: u64,

    // Reproducción
    pub default_volume: f32, // factor 0.0–2.0, 2.0 equivale a 100%
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")?.parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Proveedores (opcionales: sin key no hay playlists ni búsqueda)
            metadata_api_key: std::env::var("METADATA_API_KEY").ok(),
            soundcloud_client_id: std::env::var("SOUNDCLOUD_CLIENT_ID").ok(),

            // Resolución
            resolve_timeout_secs: std::env::var("RESOLVE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            max_media_seconds: std::env::var("MAX_MEDIA_SECONDS")
                .unwrap_or_else(|_| "5400".to_string()) // 90 minutos
                .parse()?,
            playlist_ttl_secs: std::env::var("PLAYLIST_TTL_SECS")
                .unwrap_or_else(|_| "21600".to_string()) // 6 horas
                .parse()?,

            // Paths
            audio_dir: std::env::var("AUDIO_DIR")
                .unwrap_or_else(|_| "/app/cache/audio".to_string())
                .into(),

            // Radio
            radio_refresh_secs: std::env::var("RADIO_REFRESH_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()?,

            // Reproducción
            default_volume: std::env::var("DEFAULT_VOLUME")
                .unwrap_or_else(|_| "2.0".to_string())
                .parse()?,
        };

        // Create directories if they don't exist
        std::fs::create_dir_all(&config.audio_dir)?;

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// Performs sanity checks on configuration values to catch
    /// common mistakes before the bot starts serving guilds.
    ///
    /// # Validation Rules
    ///
    /// - Volume factor must be between 0.0 and 2.0
    /// - Timeouts and TTLs must be non-zero
    ///
    /// # Returns
    ///
    /// - `Ok(())`: All values are valid
    /// - `Err(anyhow::Error)`: Invalid configuration detected
    pub fn validate(&self) -> Result<()> {
        if self.default_volume < 0.0 || self.default_volume > 2.0 {
            anyhow::bail!(
                "Default volume must be between 0.0 and 2.0, got: {}",
                self.default_volume
            );
        }

        if self.resolve_timeout_secs == 0 {
            anyhow::bail!("Resolve timeout must be greater than 0");
        }

        if self.max_media_seconds == 0 {
            anyhow::bail!("Max media duration must be greater than 0");
        }

        if self.playlist_ttl_secs == 0 {
            anyhow::bail!("Playlist TTL must be greater than 0");
        }

        if self.radio_refresh_secs == 0 {
            anyhow::bail!("Radio refresh interval must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Provides a safe summary that excludes sensitive information
    /// like tokens and API keys.
    ///
    /// # Returns
    ///
    /// A formatted string suitable for logging or debugging.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Resolución: timeout {}s, máx {}s por pista, playlists {}h\n  \
            Audio dir: {}\n  \
            Proveedores: metadata={}, soundcloud={}",
            self.application_id,
            self.guild_id
                .map_or("global".to_string(), |id| id.to_string()),
            self.resolve_timeout_secs,
            self.max_media_seconds,
            self.playlist_ttl_secs / 3600,
            self.audio_dir.display(),
            if self.metadata_api_key.is_some() { "sí" } else { "no" },
            if self.soundcloud_client_id.is_some() { "sí" } else { "no" },
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

            // Proveedores
            metadata_api_key: None,
            soundcloud_client_id: None,

            // Resolución
            resolve_timeout_secs: 10,
            max_media_seconds: 5400, // 90 minutos
            playlist_ttl_secs: 21600, // 6 horas

            // Paths
            audio_dir: "/app/cache/audio".into(),

            // Radio
            radio_refresh_secs: 15,

            // Reproducción
            default_volume: 2.0, // 100%
        }
    }
}
