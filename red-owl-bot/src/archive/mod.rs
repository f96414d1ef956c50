mod render;

use std::time::Duration;

use anyhow::{Context as _, Result};
use poise::CreateReply;
use serenity::all::{
    ChannelId, ChannelType, CreateAttachment, CreateEmbed, CreateEmbedAuthor, CreateMessage,
    CreateThread, EditMessage, GetMessages, GuildChannel, Http, Mentionable, Message, MessageId,
    Permissions, ReactionType, UserId,
};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use self::render::{CopyPlan, parse_channel_link, plan_message};
use crate::command::Context;
use crate::config::ArchiveConfig;

const CONFIRM: char = '✅';
const ABORT: char = '❌';
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(30);
const PROMPT_CLEANUP_DELAY: Duration = Duration::from_secs(10);
const STATUS_EVERY: usize = 20;
const HISTORY_PAGE: u8 = 100;

/// Counters reported when the transfer ends.
#[derive(Debug, Default)]
struct TransferStats {
    messages: usize,
    threads: usize,
    errors: usize,
}

fn is_readable_source(channel: &GuildChannel) -> bool {
    matches!(
        channel.kind,
        ChannelType::Text | ChannelType::News | ChannelType::Voice
    )
}

fn is_thread(channel: &GuildChannel) -> bool {
    matches!(
        channel.kind,
        ChannelType::PublicThread | ChannelType::PrivateThread | ChannelType::NewsThread
    )
}

/// Names of the permissions missing for the bot in the destination.
fn missing_destination_permissions(permissions: Permissions, destination_is_thread: bool) -> Vec<&'static str> {
    let mut missing = Vec::new();

    if !permissions.send_messages() {
        missing.push("Send messages");
    }
    if !destination_is_thread && !permissions.create_public_threads() {
        missing.push("Create public threads");
    }
    if !permissions.send_messages_in_threads() {
        missing.push("Send messages in threads");
    }
    if !permissions.embed_links() {
        missing.push("Embed links");
    }
    if !permissions.attach_files() {
        missing.push("Attach files");
    }

    missing
}

/// Fetch the next page of history after `after`, oldest first.
async fn history_after(http: &Http, channel_id: ChannelId, after: MessageId) -> Result<Vec<Message>> {
    let mut messages = channel_id
        .messages(http, GetMessages::new().after(after).limit(HISTORY_PAGE))
        .await
        .context("Failed to fetch messages")?;
    messages.sort_by_key(|m| m.id);
    Ok(messages)
}

fn build_embed(message: &Message, plan: &CopyPlan) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .author(CreateEmbedAuthor::new(message.author.display_name()).icon_url(message.author.face()))
        .timestamp(message.timestamp);

    if let Some(description) = &plan.description {
        embed = embed.description(description);
    }
    if let Some(link) = &plan.original_link {
        embed = embed.field("Original embed", format!("[View the original embed]({link})"), false);
    }
    if let Some(image) = &plan.image_url {
        embed = embed.image(image);
    }

    embed
}

/// Copy one message. Returns the message posted in the destination, if any.
async fn copy_message(
    http: &Http,
    message: &Message,
    target: ChannelId,
    config: &ArchiveConfig,
) -> Result<Option<Message>> {
    let Some(mut plan) = plan_message(message, config.max_attachment_bytes) else {
        return Ok(None);
    };

    let mut files = Vec::new();
    for attachment in &plan.reupload {
        match CreateAttachment::url(http, &attachment.url).await {
            Ok(file) => files.push(file),
            Err(e) => plan
                .notes
                .push(format!("- {} (download error: {e})", attachment.filename)),
        }
    }

    let mut builder = CreateMessage::new();
    if plan.has_embed_content() {
        let mut embed = build_embed(message, &plan);
        if !plan.notes.is_empty() {
            embed = embed.field("Other attachments", plan.notes.join("\n"), false);
        }
        builder = builder.embed(embed);
    } else if files.is_empty() {
        return Ok(None);
    }
    builder = builder.add_files(files);

    match target.send_message(http, builder).await {
        Ok(sent) => Ok(Some(sent)),
        Err(e) => {
            target
                .say(
                    http,
                    format!("> :warning: Error while copying message {}: {e}", message.link()),
                )
                .await?;
            Ok(None)
        }
    }
}

async fn update_status(http: &Http, status: &mut Message, content: String) {
    if let Err(e) = status.edit(http, EditMessage::new().content(content)).await {
        debug!("Failed to update transfer status: {e:?}");
    }
}

/// Copy a thread's history into `target_thread`.
async fn copy_thread(
    http: &Http,
    source_thread: ChannelId,
    target_thread: &GuildChannel,
    config: &ArchiveConfig,
    status: &mut Message,
    stats: &mut TransferStats,
) -> Result<()> {
    let delay = Duration::from_millis(config.message_delay_ms);
    let mut cursor = MessageId::new(1);
    let mut copied = 0;

    loop {
        let batch = history_after(http, source_thread, cursor).await?;
        let Some(last) = batch.last() else {
            break;
        };
        cursor = last.id;

        for message in &batch {
            copied += 1;
            if let Err(e) = copy_message(http, message, target_thread.id, config).await {
                stats.errors += 1;
                if let Err(report) = target_thread
                    .id
                    .say(
                        http,
                        format!(
                            "> :warning: Error while copying thread message {}: {e}",
                            message.link()
                        ),
                    )
                    .await
                {
                    warn!("Could not report the failed copy of {}: {report}", message.link());
                }
            }
            sleep(delay).await;

            if copied % STATUS_EVERY == 0 {
                let content = format!(
                    "⏳ Transfer in progress... Message {}, thread {} ({copied} messages)",
                    stats.messages, target_thread.name
                );
                update_status(http, status, content).await;
            }
        }
    }

    Ok(())
}

async fn run_transfer(
    ctx: Context<'_>,
    source: &GuildChannel,
    destination: &GuildChannel,
    status: &mut Message,
    stats: &mut TransferStats,
) -> Result<()> {
    let http = ctx.http();
    let config = &ctx.data().config.archive;
    let message_delay = Duration::from_millis(config.message_delay_ms);
    let thread_delay = Duration::from_millis(config.thread_delay_ms);
    let mut cursor = MessageId::new(1);

    loop {
        let batch = history_after(http, source.id, cursor).await?;
        let Some(last) = batch.last() else {
            break;
        };
        cursor = last.id;

        for message in &batch {
            stats.messages += 1;

            let sent = match copy_message(http, message, destination.id, config).await {
                Ok(sent) => sent,
                Err(e) => {
                    stats.errors += 1;
                    ctx.say(format!(
                        "> :warning: Error while processing message {}: {e}",
                        message.link()
                    ))
                    .await?;
                    None
                }
            };
            sleep(message_delay).await;

            if let Some(source_thread) = &message.thread {
                match (&sent, is_thread(destination)) {
                    (Some(sent), false) => {
                        match destination
                            .id
                            .create_thread_from_message(
                                http,
                                sent.id,
                                CreateThread::new(source_thread.name.clone()),
                            )
                            .await
                        {
                            Ok(target_thread) => {
                                stats.threads += 1;
                                update_status(
                                    http,
                                    status,
                                    format!(
                                        "⏳ Transfer in progress... Message {}, thread {} created: {}",
                                        stats.messages, stats.threads, target_thread.name
                                    ),
                                )
                                .await;
                                sleep(thread_delay).await;

                                if let Err(e) = copy_thread(
                                    http,
                                    source_thread.id,
                                    &target_thread,
                                    config,
                                    status,
                                    stats,
                                )
                                .await
                                {
                                    stats.errors += 1;
                                    ctx.say(format!(
                                        "> :warning: Could not read thread {} ({}): {e}",
                                        source_thread.id.mention(),
                                        source_thread.name
                                    ))
                                    .await?;
                                }
                            }
                            Err(e) => {
                                stats.errors += 1;
                                ctx.say(format!(
                                    "> :warning: Could not create the thread for message {}: {e}",
                                    message.link()
                                ))
                                .await?;
                            }
                        }
                    }
                    (Some(_), true) => {
                        ctx.say(format!(
                            "> :information_source: Threads cannot be nested, thread {} of {} was skipped.",
                            source_thread.name,
                            message.link()
                        ))
                        .await?;
                    }
                    (None, _) => {
                        ctx.say(format!(
                            "> :information_source: The original message {} was skipped or failed, its thread cannot be recreated.",
                            message.link()
                        ))
                        .await?;
                    }
                }
            }

            if stats.messages % STATUS_EVERY == 0 {
                let content = format!(
                    "⏳ Transfer in progress... {} messages processed.",
                    stats.messages
                );
                update_status(http, status, content).await;
            }
        }
    }

    Ok(())
}

/// Wait for the author to confirm with a reaction. Returns `None` on timeout.
async fn await_confirmation(ctx: Context<'_>, prompt: &Message) -> Result<Option<bool>> {
    prompt.react(ctx.http(), CONFIRM).await?;
    prompt.react(ctx.http(), ABORT).await?;

    let reaction = prompt
        .await_reaction(ctx.serenity_context())
        .author_id(ctx.author().id)
        .filter(|reaction| {
            reaction.emoji.unicode_eq(&CONFIRM.to_string())
                || reaction.emoji.unicode_eq(&ABORT.to_string())
        })
        .timeout(CONFIRM_TIMEOUT)
        .await;

    Ok(reaction.map(|reaction| reaction.emoji == ReactionType::from(CONFIRM)))
}

/// Edit the prompt, then delete it a little later.
async fn retire_prompt(ctx: Context<'_>, mut prompt: Message, content: &str) -> Result<()> {
    prompt
        .edit(ctx.http(), EditMessage::new().content(content))
        .await?;

    let http = ctx.serenity_context().http.clone();
    tokio::spawn(async move {
        sleep(PROMPT_CLEANUP_DELAY).await;
        if let Err(e) = prompt.delete(&http).await {
            debug!("Failed to delete confirmation prompt: {e:?}");
        }
    });

    Ok(())
}

/// The bot's permissions in `channel`, empty when its guild or member is not
/// cached.
fn bot_permissions(ctx: Context<'_>, channel: &GuildChannel, bot_id: UserId) -> Permissions {
    ctx.cache()
        .guild(channel.guild_id)
        .and_then(|guild| {
            guild
                .members
                .get(&bot_id)
                .map(|member| guild.user_permissions_in(channel, member))
        })
        .unwrap_or_else(Permissions::empty)
}

/// Copy every message (and thread) of another channel into this one
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn transfer(
    ctx: Context<'_>,
    #[description = "Link to the source channel"] channel_link: String,
) -> Result<()> {
    ctx.defer().await?;

    let Some((source_guild, source_id)) = parse_channel_link(&channel_link) else {
        ctx.say("The link is not a valid Discord channel link.").await?;
        return Ok(());
    };

    let bot_id = ctx.cache().current_user().id;
    let source = if ctx.cache().guild(source_guild).is_some() {
        source_id
            .to_channel(ctx.serenity_context())
            .await
            .ok()
            .and_then(|channel| channel.guild())
            .filter(is_readable_source)
            .filter(|channel| bot_permissions(ctx, channel, bot_id).read_message_history())
    } else {
        None
    };

    let Some(source) = source else {
        ctx.say(
            "Cannot find the source channel. Check the link and make sure the bot is on the \
             source server and can read that channel's history.",
        )
        .await?;
        return Ok(());
    };

    let Some(destination) = ctx.guild_channel().await else {
        ctx.say("This command can only be used in a text channel or a thread.")
            .await?;
        return Ok(());
    };
    if !matches!(destination.kind, ChannelType::Text | ChannelType::News) && !is_thread(&destination)
    {
        ctx.say("This command can only be used in a text channel or a thread.")
            .await?;
        return Ok(());
    }

    let permissions = bot_permissions(ctx, &destination, bot_id);
    let missing = missing_destination_permissions(permissions, is_thread(&destination));
    if !missing.is_empty() {
        ctx.say(format!(
            "The bot is missing permissions in **{}**: {}.",
            destination.name,
            missing.join(", ")
        ))
        .await?;
        return Ok(());
    }

    let prompt = ctx
        .send(CreateReply::default().content(format!(
            "You are about to copy **all** messages of {} (server: `{}`) into {}.\n\
             This can take a long time and cannot easily be cancelled.\n\
             React with {CONFIRM} within 30 seconds to confirm.",
            source.id.mention(),
            source_guild
                .name(ctx.serenity_context())
                .unwrap_or_else(|| source_guild.to_string()),
            destination.id.mention(),
        )))
        .await?
        .into_message()
        .await?;

    match await_confirmation(ctx, &prompt).await? {
        None => return retire_prompt(ctx, prompt, "Confirmation expired.").await,
        Some(false) => return retire_prompt(ctx, prompt, "Transfer cancelled.").await,
        Some(true) => {
            if let Err(e) = prompt.delete(ctx.http()).await {
                debug!("Failed to delete confirmation prompt: {e:?}");
            }
        }
    }

    info!(
        "Transferring channel {} into {} for {}",
        source.id,
        destination.id,
        ctx.author().id
    );

    let mut status = ctx
        .channel_id()
        .say(
            ctx.http(),
            format!("⏳ Starting transfer from {}...", source.id.mention()),
        )
        .await?;
    let mut stats = TransferStats::default();

    let outcome = run_transfer(ctx, &source, &destination, &mut status, &mut stats).await;

    let summary = match &outcome {
        Ok(()) => format!(
            "✅ Transfer complete! {} messages and {} threads copied from {} into {}. {} errors.",
            stats.messages,
            stats.threads,
            source.id.mention(),
            destination.id.mention(),
            stats.errors
        ),
        Err(e) => {
            stats.errors += 1;
            warn!("Transfer from {} failed: {e:?}", source.id);
            format!("❌ The transfer was interrupted: {e}")
        }
    };
    update_status(ctx.http(), &mut status, summary).await;

    if stats.errors > 0 {
        ctx.say(format!(
            "⚠️ The transfer finished with {} errors. Some messages or threads may be missing.",
            stats.errors
        ))
        .await?;
    }

    Ok(())
}
