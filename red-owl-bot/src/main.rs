use std::sync::Arc;

use anyhow::{Context, Error, Result};
use poise::samples::register_in_guild;
use serenity::all::{Context as SerenityContext, FullEvent, GatewayIntents};
use serenity::Client;
use tracing::{error, info, warn};

use crate::{
    alt_text::GeminiClient,
    audio::{GoogleSpeech, LocalCommand},
    command::CommandData,
    config::{Config, Secrets},
    guild::GuildStore,
    reminders::{ReminderStore, spawn_scheduler},
    seedream::FalClient,
    tournament::{GoogleClient, ServiceAccount, TournamentService, TournamentStore},
};

mod alt_text;
mod archive;
mod audio;
mod cancellation;
mod command;
mod config;
mod dice;
mod format;
mod guild;
mod reminders;
mod responses;
mod seedream;
mod store;
mod tournament;

async fn handle_event(
    ctx: &SerenityContext,
    event: &FullEvent,
    _framework: poise::FrameworkContext<'_, CommandData, Error>,
    data: &CommandData,
) -> Result<()> {
    let FullEvent::Message { new_message } = event else {
        return Ok(());
    };

    // Ignore bot messages to prevent loops
    if new_message.author.bot {
        return Ok(());
    }

    if new_message.guild_id.is_none() {
        return tournament::handle_setup_dm(ctx, &data.tournaments, new_message)
            .await
            .map(|_| ());
    }

    let (responded, described) = tokio::join!(
        responses::check_and_respond(ctx, &data.guilds, new_message),
        alt_text::describe_images(ctx, &data.guilds, data.gemini.as_ref(), new_message),
    );
    if let Err(e) = responded {
        warn!("Auto-response failed: {e:?}");
    }
    if let Err(e) = described {
        warn!("Alt text failed: {e:?}");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    shared::init_tracing!()?;
    let bot_config = shared::load_bot_config!()?;
    let config = Config::load()?;
    let secrets = Secrets::from_env();
    let http = reqwest::Client::new();

    let guilds = GuildStore::load(config.data_dir.join("guilds.json"))?;
    let reminders = ReminderStore::load(config.data_dir.join("reminders.json"))?;

    let google = match ServiceAccount::load(
        secrets.google_credentials_json.as_deref(),
        secrets.google_credentials_path.as_deref(),
    )? {
        Some(account) => {
            info!("Google Forms voting enabled for {}", account.client_email);
            Some(GoogleClient::new(http.clone(), account)?)
        }
        None => {
            info!("Google credentials not configured, tournaments vote with reactions only");
            None
        }
    };
    let tournaments = TournamentService::new(
        TournamentStore::load(config.data_dir.join("tournaments.json"))?,
        google,
        config.tournament.clone(),
    );

    let fal = secrets
        .fal_key
        .map(|key| FalClient::new(http.clone(), key, config.seedream.clone()));
    let speech = secrets
        .google_speech_api_key
        .map(|key| GoogleSpeech::new(http.clone(), key));
    let gemini = secrets
        .gemini_api_key
        .map(|key| GeminiClient::new(http.clone(), key, config.alt_text.model.clone()));
    let local_asr = LocalCommand::new(&config.audio);

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::GUILD_MESSAGE_REACTIONS
        | GatewayIntents::GUILD_MEMBERS;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                dice::hexa(),
                dice::fate(),
                responses::response(),
                reminders::remind(),
                reminders::remind_repeat(),
                reminders::remind_list(),
                reminders::remind_cancel(),
                reminders::remind_clear(),
                archive::transfer(),
                audio::speech2text(),
                seedream::generate_image(),
                alt_text::alt_text(),
                tournament::tournoi(),
                tournament::tournoi_stop(),
                tournament::tournoi_status(),
            ],
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some(config.command_prefix.clone()),
                ..Default::default()
            },
            event_handler: |ctx, event, framework, data| {
                Box::pin(handle_event(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            let http_discord = Arc::clone(&ctx.http);

            Box::pin(async move {
                info!("{} is connected!", ready.user.name);

                for guild_id in &ready.guilds {
                    register_in_guild(ctx, &framework.options().commands, guild_id.id).await?;
                }

                spawn_scheduler(
                    Arc::clone(&http_discord),
                    reminders.clone(),
                    config.reminders.clone(),
                );
                tournaments.resume_all(http_discord);

                Ok(CommandData {
                    config,
                    http,
                    guilds,
                    reminders,
                    tournaments,
                    fal,
                    speech,
                    local_asr,
                    gemini,
                })
            })
        })
        .build();

    let mut client = Client::builder(&bot_config.discord_token, intents)
        .framework(framework)
        .await
        .context("Error creating client")?;

    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}
