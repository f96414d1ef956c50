mod bracket;
mod forms;
mod runner;
mod setup;

use anyhow::{Context as _, Result};
use poise::CreateReply;
use serenity::all::{
    ChannelType, Context as SerenityContext, CreateEmbed, CreateMessage, GuildId, Mentionable,
    Message,
};
use tracing::{info, warn};

pub use forms::{GoogleClient, ServiceAccount};
pub use runner::{TournamentService, TournamentStore};

use self::bracket::VotingBackend;
use self::setup::{ChannelChoice, SetupEvent, SetupSession};
use crate::command::Context;

const STATUS_COLOUR: u32 = 0x3498DB;

/// Set up a new tournament (the wizard runs in DMs)
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "ADMINISTRATOR"
)]
pub async fn tournoi(ctx: Context<'_>) -> Result<()> {
    let guild_id = ctx.guild_id().context("guild only command")?;
    let service = &ctx.data().tournaments;

    if service.is_active(guild_id) {
        ctx.say("⚠️ A tournament is already running on this server. Use `tournoi_stop` to stop it.")
            .await?;
        return Ok(());
    }

    let author = ctx.author();
    service.open_session(SetupSession::new(
        guild_id,
        author.id,
        service.forms_available(),
    ));

    let dm = author
        .direct_message(
            ctx.serenity_context(),
            CreateMessage::new().embed(SetupSession::welcome_embed()),
        )
        .await;

    match dm {
        Ok(_) => {
            info!("{} started a tournament setup in guild {guild_id}", author.name);
            ctx.say("📨 Check your DMs to set up the tournament!").await?;
        }
        Err(e) => {
            warn!("Could not DM {}: {e}", author.name);
            service.close_session(author.id);
            ctx.say("❌ I can't send you a DM. Please allow direct messages from server members.")
                .await?;
        }
    }

    Ok(())
}

/// Stop the running tournament
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "ADMINISTRATOR"
)]
pub async fn tournoi_stop(ctx: Context<'_>) -> Result<()> {
    let guild_id = ctx.guild_id().context("guild only command")?;

    if ctx.data().tournaments.stop(guild_id)? {
        ctx.say("✅ Tournament stopped.").await?;
    } else {
        ctx.say("❌ No tournament is running on this server.").await?;
    }

    Ok(())
}

/// Show how the running tournament is going
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn tournoi_status(ctx: Context<'_>) -> Result<()> {
    let guild_id = ctx.guild_id().context("guild only command")?;

    let Some(tournament) = ctx.data().tournaments.snapshot(guild_id) else {
        ctx.say("❌ No tournament is running on this server.").await?;
        return Ok(());
    };

    let voting = match tournament.round_backend() {
        VotingBackend::Reactions => "Discord reactions",
        VotingBackend::Forms => "Google Forms",
    };
    let embed = CreateEmbed::new()
        .title(format!("📊 Tournament: {}", tournament.theme))
        .colour(STATUS_COLOUR)
        .field(
            "Round",
            format!("{}/{}", tournament.current_round, tournament.total_rounds),
            true,
        )
        .field("Participants", tournament.participants.len().to_string(), true)
        .field(
            "Matches left",
            tournament.remaining_in_round().to_string(),
            true,
        )
        .field("Channel", tournament.channel_id.mention().to_string(), true)
        .field("Voting", voting, true);

    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// The guild's text channels in display order.
fn text_channels(ctx: &SerenityContext, guild_id: GuildId) -> Vec<ChannelChoice> {
    let Some(guild) = ctx.cache.guild(guild_id) else {
        return Vec::new();
    };

    let mut channels: Vec<_> = guild
        .channels
        .values()
        .filter(|channel| channel.kind == ChannelType::Text)
        .collect();
    channels.sort_by_key(|channel| (channel.position, channel.id));

    channels
        .into_iter()
        .map(|channel| ChannelChoice {
            id: channel.id,
            name: channel.name.clone(),
        })
        .collect()
}

/// Feed a DM into its author's setup session. Returns whether the message
/// belonged to one.
pub async fn handle_setup_dm(
    ctx: &SerenityContext,
    service: &TournamentService,
    message: &Message,
) -> Result<bool> {
    let user_id = message.author.id;
    let Some(guild_id) = service.with_session(user_id, |session| session.guild_id) else {
        return Ok(false);
    };

    let channels = text_channels(ctx, guild_id);
    let image = message
        .attachments
        .iter()
        .find(|attachment| {
            attachment
                .content_type
                .as_deref()
                .is_some_and(|kind| kind.starts_with("image/"))
        })
        .map(|attachment| attachment.url.clone());

    let Some((event, embed)) = service.with_session(user_id, |session| {
        let event = session.handle(&message.content, image, &channels);
        let embed = session.embed(&event);
        (event, embed)
    }) else {
        return Ok(false);
    };

    if matches!(event, SetupEvent::Cancelled | SetupEvent::Confirmed(_)) {
        service.close_session(user_id);
    }

    let text = SetupSession::text(&event);
    if text.is_some() || embed.is_some() {
        let mut reply = CreateMessage::new();
        if let Some(text) = text {
            reply = reply.content(text);
        }
        if let Some(embed) = embed {
            reply = reply.embed(embed);
        }
        message
            .channel_id
            .send_message(&ctx.http, reply)
            .await
            .context("Failed to answer setup DM")?;
    }

    if let SetupEvent::Confirmed(settings) = event {
        let channel_id = settings.channel_id;
        let reply = if service.start(ctx.http.clone(), guild_id, settings)? {
            CreateMessage::new().content(format!(
                "✅ The tournament has started in {}!",
                channel_id.mention()
            ))
        } else {
            CreateMessage::new().embed(SetupSession::error_embed(
                "A tournament is already running on this server.",
            ))
        };
        message
            .channel_id
            .send_message(&ctx.http, reply)
            .await
            .context("Failed to answer setup DM")?;
    }

    Ok(true)
}
