use anyhow::{Context as _, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use serenity::all::{Context as SerenityContext, Message};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::command::Context;
use crate::guild::GuildStore;

const GEMINI_API: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const PROMPT: &str = "Describe this image:";

#[derive(Error, Debug)]
pub enum GeminiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gemini API error: {0}")]
    Api(String),

    #[error("the model returned no text")]
    Empty,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

fn response_text(response: GenerateResponse) -> Result<String, GeminiError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(GeminiError::Api(format!("prompt blocked ({reason})")));
    }

    let text = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default();

    let text = text.trim();
    if text.is_empty() {
        Err(GeminiError::Empty)
    } else {
        Ok(text.to_owned())
    }
}

pub struct GeminiClient {
    http: Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(http: Client, api_key: String, model: String) -> Self {
        Self {
            http,
            api_key,
            model,
        }
    }

    /// Ask the model to describe an image.
    pub async fn describe(&self, image: &[u8], mime_type: &str) -> Result<String, GeminiError> {
        let body = json!({
            "contents": [{
                "parts": [
                    { "text": PROMPT },
                    { "inline_data": { "mime_type": mime_type, "data": STANDARD.encode(image) } },
                ],
            }],
        });

        let resp = self
            .http
            .post(format!("{GEMINI_API}/{}:generateContent", self.model))
            .query(&[("key", &self.api_key)])
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let message = match resp.json::<ApiErrorResponse>().await {
                Ok(error) => error.error.message,
                Err(_) => status.to_string(),
            };
            return Err(GeminiError::Api(message));
        }

        response_text(resp.json().await?)
    }

    async fn describe_url(&self, url: &str, mime_type: &str) -> Result<String, GeminiError> {
        let image = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        self.describe(&image, mime_type).await
    }
}

/// Toggle alt text generation for images posted in this channel
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn alt_text(ctx: Context<'_>) -> Result<()> {
    let guild_id = ctx.guild_id().context("guild only command")?;
    let channel_id = ctx.channel_id();

    let enabled = ctx.data().guilds.update(|guilds| {
        guilds
            .entry(guild_id)
            .or_default()
            .toggle_alt_text(channel_id)
    })?;

    info!("Alt text in {channel_id} is now {}", if enabled { "on" } else { "off" });

    if enabled {
        ctx.say("Alt text generation enabled for this channel.").await?;
    } else {
        ctx.say("Alt text generation disabled for this channel.").await?;
    }

    Ok(())
}

/// Post a description of every image of a message sent in an enabled channel.
pub async fn describe_images(
    ctx: &SerenityContext,
    guilds: &GuildStore,
    gemini: Option<&GeminiClient>,
    message: &Message,
) -> Result<()> {
    let Some(guild_id) = message.guild_id else {
        return Ok(());
    };

    let enabled = guilds.read(|guilds| {
        guilds
            .get(&guild_id)
            .is_some_and(|settings| settings.alt_text_channels.contains(&message.channel_id))
    });
    if !enabled {
        return Ok(());
    }

    let Some(gemini) = gemini else {
        debug!("Alt text enabled in {} but GEMINI_API_KEY is not set", message.channel_id);
        return Ok(());
    };

    let images = message.attachments.iter().filter_map(|attachment| {
        attachment
            .content_type
            .as_deref()
            .filter(|kind| kind.starts_with("image/"))
            .map(|kind| (attachment, kind))
    });

    for (attachment, mime_type) in images {
        let reply = match gemini.describe_url(&attachment.url, mime_type).await {
            Ok(text) => format!("Alt text for {}: {text}", attachment.filename),
            Err(e) => {
                warn!("Alt text for {} failed: {e}", attachment.filename);
                format!("Error while generating alt text for {}: {e}", attachment.filename)
            }
        };

        message
            .channel_id
            .say(&ctx.http, reply)
            .await
            .context("Failed to send alt text")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse(json: &str) -> GenerateResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn text_parts_are_concatenated() {
        let response = parse(
            r#"{"candidates": [{"content": {"parts": [
                {"text": "A red owl "},
                {"text": "on a branch."}
            ], "role": "model"}}]}"#,
        );

        assert_eq!(response_text(response).unwrap(), "A red owl on a branch.");
    }

    #[test]
    fn blocked_prompts_are_errors() {
        let response = parse(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#);

        assert_eq!(
            response_text(response).unwrap_err().to_string(),
            "Gemini API error: prompt blocked (SAFETY)"
        );
    }

    #[test]
    fn missing_candidates_mean_no_text() {
        assert!(matches!(response_text(parse("{}")), Err(GeminiError::Empty)));
    }
}
