use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shared::config::optional_secret;

const CONFIG_PATH: &str = "./config.toml";

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Pause after every copied message
    pub message_delay_ms: u64,
    /// Extra pause after creating a thread
    pub thread_delay_ms: u64,
    /// Attachments at or above this size are listed instead of re-uploaded
    pub max_attachment_bytes: u32,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            message_delay_ms: 1500,
            thread_delay_ms: 3000,
            max_attachment_bytes: 8_000_000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ReminderConfig {
    pub tick_seconds: u64,
    /// Reminders overdue by more than this are dropped instead of sent late
    pub restore_grace_seconds: i64,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            tick_seconds: 5,
            restore_grace_seconds: 300,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct TournamentConfig {
    /// Pause between the pinned announcement and the first round
    pub announce_delay_seconds: u64,
    /// How long before the end of a vote the "last call" reminder is posted
    pub last_call_seconds: u64,
}

impl Default for TournamentConfig {
    fn default() -> Self {
        Self {
            announce_delay_seconds: 5,
            last_call_seconds: 300,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AudioConfig {
    pub ffmpeg_program: String,
    /// Local ASR program. `{input}` in `local_args` is replaced by the WAV path.
    pub local_program: String,
    pub local_args: Vec<String>,
    pub local_languages: Vec<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            ffmpeg_program: "ffmpeg".to_owned(),
            local_program: "vosk-transcriber".to_owned(),
            local_args: vec![
                "--model".to_owned(),
                "./models/vosk-model-small-fr-0.22".to_owned(),
                "--input".to_owned(),
                "{input}".to_owned(),
            ],
            local_languages: vec!["fr-FR".to_owned()],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SeedreamConfig {
    pub text_to_image_url: String,
    pub edit_url: String,
    pub requests_url: String,
    pub default_width: u32,
    pub default_height: u32,
    pub timeout_seconds: u64,
}

impl Default for SeedreamConfig {
    fn default() -> Self {
        Self {
            text_to_image_url: "https://queue.fal.run/fal-ai/bytedance/seedream/v4/text-to-image"
                .to_owned(),
            edit_url: "https://queue.fal.run/fal-ai/bytedance/seedream/v4/edit".to_owned(),
            requests_url: "https://queue.fal.run/fal-ai/bytedance/requests".to_owned(),
            default_width: 2048,
            default_height: 2048,
            timeout_seconds: 600,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AltTextConfig {
    pub model: String,
}

impl Default for AltTextConfig {
    fn default() -> Self {
        Self {
            model: optional_secret("ALT_DEFAULT_MODEL")
                .unwrap_or_else(|| "gemini-2.0-flash-exp".to_owned()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub command_prefix: String,
    pub data_dir: PathBuf,
    pub archive: ArchiveConfig,
    pub reminders: ReminderConfig,
    pub tournament: TournamentConfig,
    pub audio: AudioConfig,
    pub seedream: SeedreamConfig,
    pub alt_text: AltTextConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command_prefix: "!".to_owned(),
            data_dir: PathBuf::from("./data"),
            archive: ArchiveConfig::default(),
            reminders: ReminderConfig::default(),
            tournament: TournamentConfig::default(),
            audio: AudioConfig::default(),
            seedream: SeedreamConfig::default(),
            alt_text: AltTextConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config = if let Ok(bytes) = fs::read(CONFIG_PATH) {
            toml::from_slice(bytes.as_slice()).context("Failed to parse config.toml")?
        } else {
            Self::default()
        };

        Ok(config)
    }
}

/// API keys for the external services. Each one only gates its own feature.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub fal_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub google_speech_api_key: Option<String>,
    pub google_credentials_json: Option<String>,
    pub google_credentials_path: Option<PathBuf>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            fal_key: optional_secret("FAL_KEY"),
            gemini_api_key: optional_secret("GEMINI_API_KEY"),
            google_speech_api_key: optional_secret("GOOGLE_SPEECH_API_KEY"),
            google_credentials_json: optional_secret("GOOGLE_CREDENTIALS_JSON"),
            google_credentials_path: optional_secret("GOOGLE_CREDENTIALS_PATH").map(PathBuf::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_section_defaults() {
        let config: Config = toml::from_str(
            r#"
            command_prefix = "?"

            [archive]
            message_delay_ms = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.command_prefix, "?");
        assert_eq!(config.archive.message_delay_ms, 10);
        assert_eq!(config.archive.thread_delay_ms, 3000);
        assert_eq!(config.reminders.restore_grace_seconds, 300);
        assert_eq!(config.seedream.default_width, 2048);
    }
}
