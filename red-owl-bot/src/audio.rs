mod transcribe;

use std::time::Duration;

use anyhow::{Context as _, Result};
use thiserror::Error;
use tracing::{info, warn};

pub use transcribe::{GoogleSpeech, LocalCommand};

use crate::command::Context;
use crate::format::{MAX_MESSAGE_CHARS, parse_message_link, split_message};

const AUDIO_EXTENSIONS: [&str; 3] = ["mp3", "wav", "ogg"];
const CDN_ATTACHMENTS: &str = "https://cdn.discordapp.com/attachments/";
const CHUNK_DELAY: Duration = Duration::from_millis(250);

/// Supported languages and their BCP-47 codes.
pub const LANGUAGES: [(&str, &str); 11] = [
    ("french", "fr-FR"),
    ("english", "en-US"),
    ("spanish", "es-ES"),
    ("german", "de-DE"),
    ("italian", "it-IT"),
    ("portuguese", "pt-PT"),
    ("dutch", "nl-NL"),
    ("russian", "ru-RU"),
    ("japanese", "ja-JP"),
    ("chinese", "zh-CN"),
    ("korean", "ko-KR"),
];

#[derive(Error, Debug)]
pub enum TranscribeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audio conversion failed: {0}")]
    Conversion(String),

    #[error("speech service error: {0}")]
    Service(String),

    #[error("the {0} service is not configured")]
    NotConfigured(&'static str),

    #[error("only {supported} is supported locally, use the google service for other languages")]
    UnsupportedLanguage { supported: String },

    #[error("could not transcribe the audio")]
    NoSpeech,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, poise::ChoiceParameter)]
pub enum Service {
    #[name = "google"]
    Google,
    #[name = "local"]
    Local,
}

pub fn language_code(name: &str) -> Option<&'static str> {
    let name = name.trim().to_lowercase();
    LANGUAGES
        .iter()
        .find(|(language, _)| *language == name)
        .map(|(_, code)| *code)
}

fn audio_extension(name: &str) -> Option<&'static str> {
    let lower = name.to_lowercase();
    AUDIO_EXTENSIONS
        .into_iter()
        .find(|extension| lower.ends_with(&format!(".{extension}")))
}

/// Where the audio of a linked message lives.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSource {
    pub url: String,
    pub extension: &'static str,
}

/// The first attachment if it is audio, otherwise a CDN attachment URL posted
/// as the message content.
pub fn find_audio_source(attachments: &[(String, String)], content: &str) -> Option<AudioSource> {
    if let Some((filename, url)) = attachments.first() {
        if let Some(extension) = audio_extension(filename) {
            return Some(AudioSource {
                url: url.clone(),
                extension,
            });
        }
    }

    let content = content.trim();
    if content.starts_with(CDN_ATTACHMENTS) {
        return audio_extension(content).map(|extension| AudioSource {
            url: content.to_owned(),
            extension,
        });
    }

    None
}

/// The messages that carry a transcription.
pub fn transcription_messages(transcription: &str) -> Vec<String> {
    if transcription.chars().count() < MAX_MESSAGE_CHARS {
        return vec![format!("Transcription: {transcription}")];
    }

    let mut messages = vec!["Transcription:".to_owned()];
    messages.extend(split_message(transcription, MAX_MESSAGE_CHARS));
    messages
}

async fn transcribe_source(
    ctx: Context<'_>,
    source: &AudioSource,
    language_code: &str,
    service: Service,
) -> Result<String, TranscribeError> {
    let data = ctx.data();
    let bytes = data
        .http
        .get(&source.url)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;

    let input = tempfile::Builder::new()
        .suffix(&format!(".{}", source.extension))
        .tempfile()?;
    tokio::fs::write(input.path(), &bytes).await?;

    let wav = tempfile::Builder::new().suffix(".wav").tempfile()?;
    transcribe::convert_to_wav(&data.config.audio.ffmpeg_program, input.path(), wav.path()).await?;

    match service {
        Service::Google => {
            let google = data
                .speech
                .as_ref()
                .ok_or(TranscribeError::NotConfigured("google"))?;
            google.transcribe(wav.path(), language_code).await
        }
        Service::Local => data.local_asr.transcribe(wav.path(), language_code).await,
    }
}

/// Transcribe a voice message or audio file to text
#[poise::command(prefix_command, slash_command)]
pub async fn speech2text(
    ctx: Context<'_>,
    #[description = "Link to the message holding the audio"] message_link: String,
    #[description = "Language spoken (default: french)"] language: Option<String>,
    #[description = "Speech service (default: google)"] service: Option<Service>,
) -> Result<()> {
    let language = language.unwrap_or_else(|| "french".to_owned());
    let service = service.unwrap_or(Service::Google);

    let Some(language_code) = language_code(&language) else {
        let names: Vec<_> = LANGUAGES.iter().map(|(name, _)| *name).collect();
        ctx.say(format!(
            "Unsupported language. Available languages: {}",
            names.join(", ")
        ))
        .await?;
        return Ok(());
    };

    let Some((channel_id, message_id)) = parse_message_link(&message_link) else {
        ctx.say("That is not a valid message link.").await?;
        return Ok(());
    };

    let message = match channel_id.message(ctx.serenity_context(), message_id).await {
        Ok(message) => message,
        Err(e) => {
            warn!("Failed to fetch message {message_id} in {channel_id}: {e:?}");
            ctx.say("Could not find the linked message.").await?;
            return Ok(());
        }
    };

    let attachments: Vec<(String, String)> = message
        .attachments
        .iter()
        .map(|a| (a.filename.clone(), a.url.clone()))
        .collect();
    let Some(source) = find_audio_source(&attachments, &message.content) else {
        ctx.say("The linked message does not contain valid audio.")
            .await?;
        return Ok(());
    };

    ctx.defer().await?;

    let transcription = match transcribe_source(ctx, &source, language_code, service).await {
        Ok(text) => text,
        Err(e) => {
            warn!("Transcription of {} failed: {e}", source.url);
            format!("Error while processing the audio: {e}")
        }
    };

    info!("Transcription: {transcription}");

    let messages = transcription_messages(&transcription);
    let chunked = messages.len() > 1;
    for message in messages {
        ctx.say(message).await.context("Failed to send transcription")?;
        if chunked {
            tokio::time::sleep(CHUNK_DELAY).await;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn attachment(name: &str) -> (String, String) {
        (name.to_owned(), format!("https://cdn.example/{name}"))
    }

    #[test]
    fn languages_are_case_insensitive() {
        assert_eq!(language_code("French"), Some("fr-FR"));
        assert_eq!(language_code("korean"), Some("ko-KR"));
        assert_eq!(language_code("klingon"), None);
    }

    #[test]
    fn first_audio_attachment_is_used() {
        let source = find_audio_source(&[attachment("memo.OGG")], "").unwrap();
        assert_eq!(source.extension, "ogg");
        assert_eq!(source.url, "https://cdn.example/memo.OGG");

        // Only the first attachment is considered
        assert_eq!(
            find_audio_source(&[attachment("photo.png"), attachment("memo.mp3")], ""),
            None
        );
    }

    #[test]
    fn cdn_links_in_content_are_audio_sources() {
        let link = "https://cdn.discordapp.com/attachments/1/2/voice.wav";
        assert_eq!(
            find_audio_source(&[], link),
            Some(AudioSource {
                url: link.to_owned(),
                extension: "wav",
            })
        );
        assert_eq!(find_audio_source(&[], "https://example.com/voice.wav"), None);
        assert_eq!(
            find_audio_source(&[], "https://cdn.discordapp.com/attachments/1/2/a.flac"),
            None
        );
    }

    #[test]
    fn long_transcriptions_are_chunked() {
        assert_eq!(
            transcription_messages("bonjour"),
            vec!["Transcription: bonjour".to_owned()]
        );

        let long = "a".repeat(4500);
        let messages = transcription_messages(&long);
        assert_eq!(messages[0], "Transcription:");
        assert_eq!(
            messages[1..].iter().map(|m| m.len()).collect::<Vec<_>>(),
            vec![2000, 2000, 500]
        );
    }
}
