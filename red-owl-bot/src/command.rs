use anyhow::Error;

use crate::alt_text::GeminiClient;
use crate::audio::{GoogleSpeech, LocalCommand};
use crate::config::Config;
use crate::guild::GuildStore;
use crate::reminders::ReminderStore;
use crate::seedream::FalClient;
use crate::tournament::TournamentService;

pub struct CommandData {
    pub config: Config,
    /// Shared client for every outgoing HTTP call that is not Discord
    pub http: reqwest::Client,
    pub guilds: GuildStore,
    pub reminders: ReminderStore,
    pub tournaments: TournamentService,
    pub fal: Option<FalClient>,
    pub speech: Option<GoogleSpeech>,
    pub local_asr: LocalCommand,
    pub gemini: Option<GeminiClient>,
}

pub type Context<'a> = poise::Context<'a, CommandData, Error>;
