mod client;

use std::time::Duration;

use anyhow::Result;
use poise::{CreateReply, ReplyHandle};
use serenity::all::{Attachment, CreateAttachment, CreateEmbed};
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

pub use client::FalClient;

use self::client::{GenOutput, QueueStatus};
use crate::command::Context;
use crate::format::truncate_chars;

const MIN_SIZE: u32 = 1024;
const MAX_SIZE: u32 = 4096;
const MAX_INPUT_IMAGES: usize = 10;
const IMAGE_EXTENSIONS: [&str; 4] = [".png", ".jpg", ".jpeg", ".webp"];
const INITIAL_POLL_DELAY: f64 = 1.5;
const MAX_POLL_DELAY: f64 = 3.0;
const POLL_BACKOFF: f64 = 1.2;
const PROGRESS_EVERY: Duration = Duration::from_secs(6);
const EMBED_COLOUR: u32 = 0x5865F2;

#[derive(Error, Debug)]
pub enum FalError {
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("processing failed: {0}")]
    Failed(String),

    #[error("timed out waiting for the generation, try again later")]
    Timeout,

    #[error("the API response has neither images nor a request id")]
    MissingRequestId,

    #[error("no image in the final result")]
    NoImage,
}

#[derive(Error, Debug, PartialEq)]
pub enum QueryError {
    #[error("The size must be between 1024 and 4096 px.")]
    Size,

    #[error("Usage: `gen [<width> <height>] <prompt>`")]
    MissingPrompt,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenRequest {
    pub width: u32,
    pub height: u32,
    pub prompt: String,
}

fn is_digits(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_digit())
}

fn validate_size(value: &str) -> Result<u32, QueryError> {
    value
        .parse::<u32>()
        .ok()
        .filter(|size| (MIN_SIZE..=MAX_SIZE).contains(size))
        .ok_or(QueryError::Size)
}

/// Parse `[<width> <height>] <prompt>`. The leading numbers are only a size
/// when a prompt follows them.
pub fn parse_gen_query(query: &str, default_width: u32, default_height: u32) -> Result<GenRequest, QueryError> {
    let query = query.trim();
    let mut tokens = query.split_whitespace();

    if let (Some(width), Some(height)) = (tokens.next(), tokens.next()) {
        let rest = query[width.len()..].trim_start()[height.len()..].trim_start();
        if is_digits(width) && is_digits(height) && !rest.is_empty() {
            return Ok(GenRequest {
                width: validate_size(width)?,
                height: validate_size(height)?,
                prompt: rest.to_owned(),
            });
        }
    }

    if query.is_empty() {
        return Err(QueryError::MissingPrompt);
    }

    Ok(GenRequest {
        width: default_width,
        height: default_height,
        prompt: query.to_owned(),
    })
}

pub fn is_image(content_type: Option<&str>, filename: &str) -> bool {
    if content_type.is_some_and(|kind| kind.starts_with("image/")) {
        return true;
    }

    let name = filename.to_lowercase();
    IMAGE_EXTENSIONS.iter().any(|extension| name.ends_with(extension))
}

fn input_image_urls(attachments: &[Attachment]) -> Vec<String> {
    attachments
        .iter()
        .filter(|a| is_image(a.content_type.as_deref(), &a.filename))
        .take(MAX_INPUT_IMAGES)
        .map(|a| a.url.clone())
        .collect()
}

#[derive(Debug, PartialEq)]
enum Progress {
    Done,
    Failed(String),
    Pending,
}

fn status_label(status: &QueueStatus) -> String {
    status
        .status
        .as_deref()
        .or(status.state.as_deref())
        .unwrap_or_default()
        .to_uppercase()
}

fn classify(status: &QueueStatus) -> Progress {
    let label = status_label(status);

    let failed = matches!(label.as_str(), "FAILED" | "ERROR" | "CANCELED" | "CANCELLED")
        || status.failed == Some(true);
    if let Some(error) = status.error.as_ref().filter(|e| !e.is_null()) {
        return Progress::Failed(match error.as_str() {
            Some(message) => message.to_owned(),
            None => error.to_string(),
        });
    }
    if failed {
        return Progress::Failed(label);
    }

    let done = matches!(label.as_str(), "COMPLETED" | "SUCCEEDED" | "SUCCESS" | "DONE")
        || status.completed == Some(true);
    if done { Progress::Done } else { Progress::Pending }
}

fn next_poll_delay(delay: f64) -> f64 {
    (delay * POLL_BACKOFF).min(MAX_POLL_DELAY)
}

fn progress_text(status: &QueueStatus, elapsed: Duration) -> String {
    let label = status_label(status);
    let label = if label.is_empty() { "IN PROGRESS".to_owned() } else { label };

    let mut extra = Vec::new();
    if let Some(position) = status.position {
        extra.push(format!("pos {position}"));
    }
    if let Some(eta) = status.eta {
        extra.push(format!("eta {}s", eta as i64));
    }
    let suffix = if extra.is_empty() {
        String::new()
    } else {
        format!(" ({})", extra.join(", "))
    };

    format!("🧪 Seedream v4: {label}… *{}s*{suffix}", elapsed.as_secs())
}

async fn show_progress(ctx: Context<'_>, handle: &ReplyHandle<'_>, content: String) {
    if let Err(e) = handle
        .edit(ctx, CreateReply::default().content(content))
        .await
    {
        debug!("Failed to update generation progress: {e:?}");
    }
}

async fn wait_for_completion(
    ctx: Context<'_>,
    client: &FalClient,
    request_id: &str,
    handle: &ReplyHandle<'_>,
) -> Result<(), FalError> {
    let started = Instant::now();
    let mut last_notice: Option<Instant> = None;
    let mut delay = INITIAL_POLL_DELAY;

    loop {
        let status = client.status(request_id).await?;

        if last_notice.is_none_or(|at| at.elapsed() > PROGRESS_EVERY) {
            last_notice = Some(Instant::now());
            show_progress(ctx, handle, progress_text(&status, started.elapsed())).await;
        }

        match classify(&status) {
            Progress::Done => return Ok(()),
            Progress::Failed(reason) => return Err(FalError::Failed(reason)),
            Progress::Pending => {}
        }

        if started.elapsed() > client.timeout() {
            return Err(FalError::Timeout);
        }

        sleep(Duration::from_secs_f64(delay)).await;
        delay = next_poll_delay(delay);
    }
}

async fn generate(
    ctx: Context<'_>,
    client: &FalClient,
    request: &GenRequest,
    image_urls: &[String],
    handle: &ReplyHandle<'_>,
) -> Result<GenOutput, FalError> {
    let output = client.submit(request, image_urls).await?;
    if !output.images.is_empty() {
        return Ok(output);
    }

    let request_id = output.request_id.ok_or(FalError::MissingRequestId)?;
    wait_for_completion(ctx, client, &request_id, handle).await?;

    let response_url = match client.status(&request_id).await {
        Ok(status) => status.response_url,
        Err(e) => {
            debug!("Could not read response url for {request_id}: {e}");
            None
        }
    };

    client.result(&request_id, response_url.as_deref()).await
}

/// Generate an image, or edit the attached images, with Seedream v4
#[poise::command(prefix_command, slash_command, rename = "gen")]
pub async fn generate_image(
    ctx: Context<'_>,
    #[description = "[<width> <height>] <prompt>, sizes between 1024 and 4096"]
    #[rest]
    query: String,
) -> Result<()> {
    let Some(client) = ctx.data().fal.as_ref() else {
        ctx.say("⚠️ The **FAL_KEY** environment variable is missing. Set it before using `gen`.")
            .await?;
        return Ok(());
    };

    let config = &ctx.data().config.seedream;
    let request = match parse_gen_query(&query, config.default_width, config.default_height) {
        Ok(request) => request,
        Err(e) => {
            ctx.say(format!("❌ {e}")).await?;
            return Ok(());
        }
    };

    let image_urls = match ctx {
        poise::Context::Prefix(prefix) => input_image_urls(&prefix.msg.attachments),
        poise::Context::Application(_) => Vec::new(),
    };
    let is_edit = !image_urls.is_empty();
    let (action, mode) = if is_edit {
        ("editing", "Edit (img2img)")
    } else {
        ("generation", "Text-to-Image")
    };

    info!(
        "{} requested Seedream {action} at {}x{}",
        ctx.author().name,
        request.width,
        request.height
    );

    let handle = ctx
        .say(format!("🧪 Seedream v4: {action} in progress…"))
        .await?;

    let output = match generate(ctx, client, &request, &image_urls, &handle).await {
        Ok(output) => output,
        Err(e) => {
            warn!("Seedream request failed: {e}");
            show_progress(ctx, &handle, format!("❌ {e}")).await;
            return Ok(());
        }
    };

    let image_url = output.images.first().and_then(|image| image.url.clone());
    let Some(image_url) = image_url else {
        show_progress(ctx, &handle, format!("❌ {}", FalError::NoImage)).await;
        return Ok(());
    };

    let image = match client.download(&image_url).await {
        Ok(image) => image,
        Err(e) => {
            show_progress(ctx, &handle, format!("❌ Could not download the image: {e}")).await;
            return Ok(());
        }
    };

    let filename = format!("seedream_v4.{}", image.extension);
    let mut embed = CreateEmbed::new()
        .title("🖼️ Seedream v4")
        .description(format!("**Mode**: {mode}"))
        .colour(EMBED_COLOUR)
        .field("Prompt", truncate_chars(&request.prompt, 1024, ""), false)
        .field("Size", format!("{}×{}", request.width, request.height), true)
        .image(format!("attachment://{filename}"));
    if let Some(seed) = output.seed {
        embed = embed.field("Seed", seed.to_string(), true);
    }

    handle
        .edit(
            ctx,
            CreateReply::default()
                .content("")
                .embed(embed)
                .attachment(CreateAttachment::bytes(image.bytes, filename)),
        )
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn request(width: u32, height: u32, prompt: &str) -> GenRequest {
        GenRequest {
            width,
            height,
            prompt: prompt.to_owned(),
        }
    }

    #[test]
    fn size_is_read_only_when_a_prompt_follows() {
        assert_eq!(
            parse_gen_query("1024 2048 a red owl", 2048, 2048),
            Ok(request(1024, 2048, "a red owl"))
        );
        assert_eq!(
            parse_gen_query("a red owl", 2048, 2048),
            Ok(request(2048, 2048, "a red owl"))
        );
        // Two numbers and nothing else are the prompt
        assert_eq!(
            parse_gen_query("1024 2048", 2048, 2048),
            Ok(request(2048, 2048, "1024 2048"))
        );
        assert_eq!(
            parse_gen_query("  1024   1024   spaced   out ", 2048, 2048),
            Ok(request(1024, 1024, "spaced   out"))
        );
    }

    #[test]
    fn sizes_outside_bounds_are_rejected() {
        assert_eq!(parse_gen_query("512 1024 owl", 2048, 2048), Err(QueryError::Size));
        assert_eq!(parse_gen_query("1024 5000 owl", 2048, 2048), Err(QueryError::Size));
        assert_eq!(
            parse_gen_query("99999999999 1024 owl", 2048, 2048),
            Err(QueryError::Size)
        );
        assert_eq!(parse_gen_query("   ", 2048, 2048), Err(QueryError::MissingPrompt));
    }

    #[test]
    fn images_are_detected_by_type_or_extension() {
        assert!(is_image(Some("image/gif"), "anim"));
        assert!(is_image(None, "photo.JPEG"));
        assert!(!is_image(Some("video/mp4"), "clip.mp4"));
    }

    #[test]
    fn poll_delay_backs_off_to_a_cap() {
        let mut delay = INITIAL_POLL_DELAY;
        let mut delays = Vec::new();
        for _ in 0..6 {
            delays.push(delay);
            delay = next_poll_delay(delay);
        }

        assert!((delays[1] - 1.8).abs() < 1e-9);
        assert_eq!(delays[5], MAX_POLL_DELAY);
    }

    #[test]
    fn statuses_are_classified() {
        let status = |json: &str| serde_json::from_str::<QueueStatus>(json).unwrap();

        assert_eq!(classify(&status(r#"{"status": "IN_QUEUE"}"#)), Progress::Pending);
        assert_eq!(classify(&status(r#"{"status": "completed"}"#)), Progress::Done);
        assert_eq!(classify(&status(r#"{"completed": true}"#)), Progress::Done);
        assert_eq!(
            classify(&status(r#"{"state": "FAILED"}"#)),
            Progress::Failed("FAILED".to_owned())
        );
        assert_eq!(
            classify(&status(r#"{"status": "IN_PROGRESS", "error": "nsfw"}"#)),
            Progress::Failed("nsfw".to_owned())
        );
    }

    #[test]
    fn progress_mentions_queue_position_and_eta() {
        let status: QueueStatus =
            serde_json::from_str(r#"{"status": "IN_QUEUE", "queue_position": 3, "eta": 12.7}"#)
                .unwrap();

        assert_eq!(
            progress_text(&status, Duration::from_secs(8)),
            "🧪 Seedream v4: IN_QUEUE… *8s* (pos 3, eta 12s)"
        );
        assert_eq!(
            progress_text(&QueueStatus::default(), Duration::ZERO),
            "🧪 Seedream v4: IN PROGRESS… *0s*"
        );
    }
}
