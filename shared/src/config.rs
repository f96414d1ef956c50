use anyhow::{Context, Result};

pub struct BotConfig {
    /// Token allowing the bot to connect to Discord
    pub discord_token: String,
}

impl BotConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            discord_token: std::env::var("DISCORD_TOKEN")
                .context("Expected DISCORD_TOKEN in environment")?,
        })
    }
}

/// Reads an optional secret, treating an empty value as unset.
pub fn optional_secret(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

/// Load bot config using the calling crate's manifest directory.
///
/// Debug builds read `.env` next to the calling crate's manifest first, so
/// optional secrets picked up later with [`optional_secret`] see it too.
#[macro_export]
macro_rules! load_bot_config {
    () => {{
        #[cfg(debug_assertions)]
        {
            use $crate::__private::anyhow::Context as _;

            $crate::__private::dotenvy::from_path(
                std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env"),
            )
            .context("Can't find .env file")?;
        }

        $crate::config::BotConfig::from_env()
    }};
}
