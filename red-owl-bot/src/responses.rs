use std::time::Duration;

use anyhow::{Context as _, Result};
use poise::CreateReply;
use serenity::all::{Context as SerenityContext, CreateEmbed, Message, User, UserId};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::command::Context;
use crate::format::chunk_fields;
use crate::guild::{GuildStore, ResponseRule};

/// Gives the author a chance to delete the message before the bot answers.
const RESPONSE_DELAY: Duration = Duration::from_secs(3);
const EMBED_COLOUR: u32 = 0x4CAF50;

/// Manage automatic responses to keywords
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    subcommands("add", "remove", "list"),
    subcommand_required
)]
pub async fn response(_ctx: Context<'_>) -> Result<()> {
    Ok(())
}

/// Reply automatically when a member says a keyword
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn add(
    ctx: Context<'_>,
    #[description = "Member to watch"] user: User,
    #[description = "Keyword to look for"] keyword: String,
    #[description = "What the bot answers"]
    #[rest]
    response: String,
) -> Result<()> {
    let guild_id = ctx.guild_id().context("guild only command")?;

    ctx.data().guilds.update(|guilds| {
        guilds
            .entry(guild_id)
            .or_default()
            .set_response(user.id, keyword.clone(), response)
    })?;

    ctx.say(format!(
        "Response set for {} when saying '{keyword}'.",
        user.display_name()
    ))
    .await?;
    Ok(())
}

/// Stop replying to a keyword
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Member the rule belongs to"] user: User,
    #[description = "Keyword to forget"] keyword: String,
) -> Result<()> {
    let guild_id = ctx.guild_id().context("guild only command")?;

    let removed = ctx.data().guilds.update(|guilds| {
        guilds
            .get_mut(&guild_id)
            .is_some_and(|settings| settings.remove_response(user.id, &keyword))
    })?;

    if removed {
        ctx.say(format!(
            "Removed automated response for {} for keyword '{keyword}'.",
            user.display_name()
        ))
        .await?;
    } else {
        ctx.say("No automated response found for that keyword and user.")
            .await?;
    }
    Ok(())
}

/// List the automatic responses of this server
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn list(ctx: Context<'_>) -> Result<()> {
    let guild_id = ctx.guild_id().context("guild only command")?;

    let mut rules: Vec<(UserId, Vec<ResponseRule>)> = ctx.data().guilds.read(|guilds| {
        guilds
            .get(&guild_id)
            .map(|settings| {
                settings
                    .response_rules
                    .iter()
                    .map(|(user_id, rules)| (*user_id, rules.clone()))
                    .collect()
            })
            .unwrap_or_default()
    });

    if rules.is_empty() {
        ctx.say("No automated responses set.").await?;
        return Ok(());
    }

    rules.sort_by_key(|(user_id, _)| *user_id);

    for (user_id, user_rules) in rules {
        let member_name = match guild_id.member(ctx.serenity_context(), user_id).await {
            Ok(member) => member.display_name().to_owned(),
            Err(_) => format!("UserID {user_id}"),
        };

        for chunk in chunk_fields(&user_rules) {
            let embed = CreateEmbed::new()
                .title(format!("Automated Responses for {member_name}"))
                .colour(EMBED_COLOUR)
                .fields(chunk.into_iter().map(|rule| {
                    (
                        format!("Keyword: '{}'", rule.keyword),
                        format!("Response: '{}'", rule.response),
                        false,
                    )
                }));

            ctx.send(CreateReply::default().embed(embed)).await?;
        }
    }

    Ok(())
}

/// Answer a guild message when its author has a matching rule.
pub async fn check_and_respond(
    ctx: &SerenityContext,
    guilds: &GuildStore,
    message: &Message,
) -> Result<()> {
    let Some(guild_id) = message.guild_id else {
        return Ok(());
    };

    let response = guilds.read(|guilds| {
        guilds
            .get(&guild_id)
            .and_then(|settings| settings.find_response(message.author.id, &message.content))
            .map(str::to_owned)
    });

    let Some(response) = response else {
        return Ok(());
    };

    sleep(RESPONSE_DELAY).await;

    // Only answer if the triggering message survived the delay
    if let Err(e) = message.channel_id.message(&ctx.http, message.id).await {
        debug!("Message {} gone before auto-response: {e:?}", message.id);
        return Ok(());
    }

    if let Err(e) = message.channel_id.say(&ctx.http, response).await {
        warn!("Failed to send auto-response in {}: {e:?}", message.channel_id);
    }

    Ok(())
}
