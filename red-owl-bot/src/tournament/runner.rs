use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use futures::future::join_all;
use rand::Rng;
use serenity::all::{
    ChannelId, CreateEmbed, CreateEmbedFooter, CreateMessage, GuildId, Http, Message, MessageId,
    ReactionType, UserId,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::bracket::{
    FormQuestion, Match, ParticipantId, Phase, RoundForm, Tournament, TournamentSettings, VoteReminder,
    VotingBackend, summary_list,
};
use super::forms::{FormMatch, GoogleClient, tally};
use super::setup::{MAX_DURATION_SECONDS, SetupSession, format_duration};
use crate::cancellation::{CancellationRegistry, sleep_or_cancel};
use crate::config::TournamentConfig;
use crate::store::PersistedState;

pub type TournamentStore = PersistedState<HashMap<GuildId, Tournament>>;

pub const VOTE_ONE: &str = "1\u{fe0f}\u{20e3}";
pub const VOTE_TWO: &str = "2\u{fe0f}\u{20e3}";

const ANNOUNCE_COLOUR: u32 = 0xF39C12;
const ROUND_COLOUR: u32 = 0xE67E22;
const MATCH_COLOUR: u32 = 0x9B59B6;
const LEFT_COLOUR: u32 = 0x3498DB;
const RIGHT_COLOUR: u32 = 0xE74C3C;
const BYE_COLOUR: u32 = 0x95A5A6;
const SUMMARY_COLOUR: u32 = 0x2ECC71;
const CHAMPION_COLOUR: u32 = 0xFFD700;

const BYE_DELAY: Duration = Duration::from_secs(2);
const MATCH_DELAY: Duration = Duration::from_secs(1);

/// Owns every running tournament and the setup sessions feeding them.
#[derive(Clone)]
pub struct TournamentService {
    store: TournamentStore,
    cancellation: Arc<Mutex<CancellationRegistry<GuildId>>>,
    sessions: Arc<Mutex<HashMap<UserId, SetupSession>>>,
    google: Option<Arc<GoogleClient>>,
    config: TournamentConfig,
}

impl TournamentService {
    pub fn new(
        store: TournamentStore,
        google: Option<GoogleClient>,
        config: TournamentConfig,
    ) -> Self {
        Self {
            store,
            cancellation: Arc::new(Mutex::new(CancellationRegistry::new())),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            google: google.map(Arc::new),
            config,
        }
    }

    pub fn forms_available(&self) -> bool {
        self.google.is_some()
    }

    pub fn is_active(&self, guild_id: GuildId) -> bool {
        self.store.read(|tournaments| tournaments.contains_key(&guild_id))
    }

    pub fn snapshot(&self, guild_id: GuildId) -> Option<Tournament> {
        self.store.read(|tournaments| tournaments.get(&guild_id).cloned())
    }

    /// Run `f` on the session of `user_id`, if any.
    pub fn with_session<R>(
        &self,
        user_id: UserId,
        f: impl FnOnce(&mut SetupSession) -> R,
    ) -> Option<R> {
        self.sessions.lock().unwrap().get_mut(&user_id).map(f)
    }

    pub fn open_session(&self, session: SetupSession) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.creator_id, session);
    }

    pub fn close_session(&self, user_id: UserId) {
        self.sessions.lock().unwrap().remove(&user_id);
    }

    /// Build the bracket from confirmed settings and start playing it.
    /// Returns `false` when the guild already has a tournament.
    pub fn start(
        &self,
        http: Arc<Http>,
        guild_id: GuildId,
        settings: TournamentSettings,
    ) -> Result<bool> {
        let created = self.store.update(|tournaments| {
            if tournaments.contains_key(&guild_id) {
                return false;
            }
            let tournament = Tournament::new(guild_id, settings, &mut rand::thread_rng(), Utc::now());
            info!(
                "Tournament \"{}\" created in guild {guild_id} with {} participants",
                tournament.theme,
                tournament.participants.len()
            );
            tournaments.insert(guild_id, tournament);
            true
        })?;

        if created {
            self.spawn(http, guild_id);
        }
        Ok(created)
    }

    /// Restart every persisted tournament.
    pub fn resume_all(&self, http: Arc<Http>) {
        let guilds: Vec<GuildId> = self.store.read(|tournaments| tournaments.keys().copied().collect());

        for guild_id in guilds {
            info!("Resuming tournament in guild {guild_id}");
            self.spawn(Arc::clone(&http), guild_id);
        }
    }

    /// Cancel the running task and forget the tournament.
    /// Returns whether there was one.
    pub fn stop(&self, guild_id: GuildId) -> Result<bool> {
        self.cancellation.lock().unwrap().cancel(&guild_id);
        let removed = self.store.update(|tournaments| tournaments.remove(&guild_id))?;

        let Some(tournament) = removed else {
            return Ok(false);
        };

        info!("Tournament \"{}\" stopped in guild {guild_id}", tournament.theme);
        if let (Some(form), Some(google)) = (tournament.form, self.google.clone()) {
            tokio::spawn(async move { google.discard(&form.form_id, &form.drive_files).await });
        }
        Ok(true)
    }

    fn spawn(&self, http: Arc<Http>, guild_id: GuildId) {
        // Check and register atomically so a resume cannot race a start
        let cancel_rx = {
            let mut registry = self.cancellation.lock().unwrap();
            if registry.is_running(&guild_id) {
                debug!("Tournament in guild {guild_id} is already running");
                return;
            }
            registry.register(guild_id)
        };

        let service = self.clone();
        tokio::spawn(async move {
            run_tournament(service, http, guild_id, cancel_rx).await;
        });
    }

    /// Mutate the tournament a task is driving and persist it. `None` once it
    /// has been stopped or the task was cancelled.
    fn update<R>(
        &self,
        guild_id: GuildId,
        cancel_rx: &watch::Receiver<bool>,
        f: impl FnOnce(&mut Tournament) -> R,
    ) -> Result<Option<R>> {
        self.store.update(|tournaments| {
            // A cancelled task must not touch a tournament started after it
            if *cancel_rx.borrow() {
                return None;
            }
            tournaments.get_mut(&guild_id).map(f)
        })
    }

    /// The tournament a task is driving, `None` once that task was cancelled.
    fn current(&self, guild_id: GuildId, cancel_rx: &watch::Receiver<bool>) -> Option<Tournament> {
        self.store.read(|tournaments| {
            if *cancel_rx.borrow() {
                None
            } else {
                tournaments.get(&guild_id).cloned()
            }
        })
    }

    fn remove(&self, guild_id: GuildId, cancel_rx: &watch::Receiver<bool>) -> Result<Option<Tournament>> {
        self.store.update(|tournaments| {
            if *cancel_rx.borrow() {
                return None;
            }
            tournaments.remove(&guild_id)
        })
    }
}

async fn run_tournament(
    service: TournamentService,
    http: Arc<Http>,
    guild_id: GuildId,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let result = play(&service, &http, guild_id, &mut cancel_rx).await;

    // A stopped task was already removed from the registry, and a new
    // tournament may have registered under the same guild since
    if !*cancel_rx.borrow() {
        service.cancellation.lock().unwrap().deregister(&guild_id);
    }

    if let Err(e) = result {
        error!("Tournament in guild {guild_id} failed: {e:?}");
    }
}

async fn play(
    service: &TournamentService,
    http: &Http,
    guild_id: GuildId,
    cancel_rx: &mut watch::Receiver<bool>,
) -> Result<()> {
    if let Some(tournament) = service.current(guild_id, cancel_rx) {
        if let Err(problem) = check_durations(&tournament) {
            warn!("Tournament in guild {guild_id} cannot run: {problem}");
            service.remove(guild_id, cancel_rx)?;
            send(
                http,
                tournament.channel_id,
                CreateMessage::new().content(format!(
                    "❌ The tournament \"{}\" was cancelled: {problem}.",
                    tournament.theme
                )),
            )
            .await?;
            return Ok(());
        }
    }

    loop {
        if *cancel_rx.borrow() {
            info!("Tournament in guild {guild_id} cancelled");
            return Ok(());
        }
        let Some(tournament) = service.current(guild_id, cancel_rx) else {
            return Ok(());
        };

        match tournament.phase {
            Phase::Announce => {
                announce(http, &tournament).await?;
                let delay = Duration::from_secs(service.config.announce_delay_seconds);
                if !sleep_or_cancel(delay, cancel_rx).await {
                    return Ok(());
                }
                service.update(guild_id, cancel_rx, |t| t.phase = Phase::Round { announced: false })?;
            }
            Phase::Round { announced } => {
                if !announced && !announce_round(service, http, guild_id, cancel_rx).await? {
                    return Ok(());
                }
                if !play_round(service, http, guild_id, cancel_rx).await? {
                    return Ok(());
                }
                if finish_round(service, http, guild_id, cancel_rx).await? {
                    return Ok(());
                }
            }
            Phase::Intermission { until } => {
                if !sleep_until(until, cancel_rx).await {
                    return Ok(());
                }
                service.update(guild_id, cancel_rx, |t| {
                    t.advance_round(&mut rand::thread_rng());
                    t.phase = Phase::Round { announced: false };
                    info!("Guild {guild_id} moves on to round {}", t.current_round);
                })?;
            }
        }
    }
}

/// Vote and pause lengths must fit in a schedulable deadline.
fn check_durations(tournament: &Tournament) -> Result<(), String> {
    let durations = [
        ("vote duration", tournament.vote_duration),
        ("pause between rounds", tournament.between_rounds),
    ];
    for (what, seconds) in durations {
        if seconds > MAX_DURATION_SECONDS {
            return Err(format!("the {what} ({seconds}s) is longer than 30 days"));
        }
    }
    Ok(())
}

/// `seconds` after `from`, or an error when that is out of range.
fn deadline_after(from: DateTime<Utc>, seconds: u64) -> Result<DateTime<Utc>> {
    i64::try_from(seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|delay| from.checked_add_signed(delay))
        .with_context(|| format!("a deadline {seconds}s away is out of range"))
}

async fn sleep_until(at: DateTime<Utc>, cancel_rx: &mut watch::Receiver<bool>) -> bool {
    let remaining = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    sleep_or_cancel(remaining, cancel_rx).await
}

async fn send(http: &Http, channel_id: ChannelId, message: CreateMessage) -> Result<Message> {
    channel_id
        .send_message(http, message)
        .await
        .context("Failed to send tournament message")
}

async fn announce(http: &Http, tournament: &Tournament) -> Result<()> {
    let embed = CreateEmbed::new()
        .title(format!("🏆 TOURNAMENT: {}", tournament.theme))
        .description(format!(
            "A new tournament starts with **{} participants**!\n\nSingle elimination, vote for your favourite in each match.\n\n**Vote duration:** {}\n**Created by:** <@{}>",
            tournament.participants.len(),
            format_duration(tournament.vote_duration),
            tournament.creator_id
        ))
        .colour(ANNOUNCE_COLOUR)
        .footer(CreateEmbedFooter::new("May the best one win!"))
        .timestamp(serenity::all::Timestamp::now());

    let message = send(http, tournament.channel_id, CreateMessage::new().embed(embed)).await?;
    if let Err(e) = message.pin(http).await {
        warn!("Could not pin the tournament announcement: {e}");
    }
    Ok(())
}

/// Run `post` on every item with `delay` in between. `false` when cancelled.
async fn post_paced<T, F, Fut>(
    items: Vec<T>,
    delay: Duration,
    cancel_rx: &mut watch::Receiver<bool>,
    mut post: F,
) -> Result<bool>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    for item in items {
        if *cancel_rx.borrow() {
            return Ok(false);
        }
        post(item).await?;
        if !sleep_or_cancel(delay, cancel_rx).await {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Post the round header and its byes. `false` when cancelled.
async fn announce_round(
    service: &TournamentService,
    http: &Http,
    guild_id: GuildId,
    cancel_rx: &mut watch::Receiver<bool>,
) -> Result<bool> {
    let Some(byes) = service.update(guild_id, cancel_rx, |t| t.resolve_byes())? else {
        return Ok(false);
    };
    let Some(tournament) = service.current(guild_id, cancel_rx) else {
        return Ok(false);
    };

    let matches = tournament.pending_matches().len();
    let how = match tournament.round_backend() {
        VotingBackend::Reactions => format!("Vote with {VOTE_ONE} or {VOTE_TWO} on each match!"),
        VotingBackend::Forms => "Vote in the form posted below!".to_owned(),
    };
    let header = CreateEmbed::new()
        .title(format!(
            "🥊 ROUND {}/{}",
            tournament.current_round, tournament.total_rounds
        ))
        .description(format!(
            "**{matches} match(es)** in this round. {how}\n\nVotes last {}.",
            format_duration(tournament.vote_duration)
        ))
        .colour(ROUND_COLOUR);
    send(http, tournament.channel_id, CreateMessage::new().embed(header)).await?;

    let byes: Vec<CreateEmbed> = byes
        .into_iter()
        .map(|participant| {
            let embed = CreateEmbed::new()
                .title("🎯 Automatic pass")
                .description(format!(
                    "**{}** has no opponent and moves on to the next round!",
                    tournament.name(participant)
                ))
                .colour(BYE_COLOUR);
            match tournament.participant(participant).and_then(|p| p.image.clone()) {
                Some(image) => embed.thumbnail(image),
                None => embed,
            }
        })
        .collect();
    let channel_id = tournament.channel_id;
    let posted = post_paced(byes, BYE_DELAY, cancel_rx, |embed| async move {
        send(http, channel_id, CreateMessage::new().embed(embed))
            .await
            .map(|_| ())
    })
    .await?;
    if !posted {
        return Ok(false);
    }

    let updated = service.update(guild_id, cancel_rx, |t| t.phase = Phase::Round { announced: true })?;
    Ok(updated.is_some())
}

/// Collect the votes of every pending match. `false` when cancelled.
async fn play_round(
    service: &TournamentService,
    http: &Http,
    guild_id: GuildId,
    cancel_rx: &mut watch::Receiver<bool>,
) -> Result<bool> {
    let Some(tournament) = service.current(guild_id, cancel_rx) else {
        return Ok(false);
    };
    if tournament.pending_matches().is_empty() {
        return Ok(true);
    }

    match (tournament.round_backend(), service.google.clone()) {
        (VotingBackend::Forms, Some(google)) => {
            play_forms_round(service, &google, http, guild_id, cancel_rx).await
        }
        (VotingBackend::Forms, None) => {
            warn!("Guild {guild_id} votes with forms but Google credentials are missing");
            service.update(guild_id, cancel_rx, |t| t.reactions_fallback = true)?;
            play_reactions_round(service, http, guild_id, cancel_rx).await
        }
        (VotingBackend::Reactions, _) => {
            play_reactions_round(service, http, guild_id, cancel_rx).await
        }
    }
}

fn match_embeds(tournament: &Tournament, m: &Match) -> Vec<CreateEmbed> {
    let Some(participant2) = m.participant2 else {
        return Vec::new();
    };

    let header = CreateEmbed::new()
        .title(format!("⚔️ {} vs {}", tournament.name(m.participant1), tournament.name(participant2)))
        .description(format!(
            "Round {} | {VOTE_ONE} for **{}**, {VOTE_TWO} for **{}**",
            m.round,
            tournament.name(m.participant1),
            tournament.name(participant2)
        ))
        .colour(MATCH_COLOUR);

    let side = |id, emoji: &str, colour: u32| {
        let mut embed = CreateEmbed::new()
            .title(format!("{emoji} {}", tournament.name(id)))
            .colour(colour);
        if let Some(image) = tournament.participant(id).and_then(|p| p.image.clone()) {
            embed = embed.image(image);
        }
        embed
    };

    vec![
        header,
        side(m.participant1, VOTE_ONE, LEFT_COLOUR),
        side(participant2, VOTE_TWO, RIGHT_COLOUR),
    ]
}

async fn post_match(http: &Http, tournament: &Tournament, m: &Match) -> Result<MessageId> {
    let message = send(
        http,
        tournament.channel_id,
        CreateMessage::new().embeds(match_embeds(tournament, m)),
    )
    .await?;

    for emoji in [VOTE_ONE, VOTE_TWO] {
        if let Err(e) = message
            .react(http, ReactionType::Unicode(emoji.to_owned()))
            .await
        {
            warn!("Could not add {emoji} to match {}: {e}", m.id);
        }
    }

    Ok(message.id)
}

/// Votes on a match message, leaving out the bot's own reactions.
pub fn reaction_votes<'a>(reactions: impl IntoIterator<Item = (&'a str, u64, bool)>) -> (u32, u32) {
    let mut votes = (0, 0);
    for (emoji, count, me) in reactions {
        let count = u32::try_from(count.saturating_sub(u64::from(me))).unwrap_or(u32::MAX);
        if emoji == VOTE_ONE {
            votes.0 = count;
        } else if emoji == VOTE_TWO {
            votes.1 = count;
        }
    }
    votes
}

async fn fetch_votes(http: &Http, channel_id: ChannelId, m: &Match) -> (u32, u32) {
    let Some(message_id) = m.message_id else {
        return (0, 0);
    };

    match channel_id.message(http, message_id).await {
        Ok(message) => reaction_votes(message.reactions.iter().filter_map(|reaction| {
            match &reaction.reaction_type {
                ReactionType::Unicode(emoji) => Some((emoji.as_str(), reaction.count, reaction.me)),
                _ => None,
            }
        })),
        Err(e) => {
            warn!("Match {} message is gone, picking at random: {e}", m.id);
            (0, 0)
        }
    }
}

async fn play_reactions_round(
    service: &TournamentService,
    http: &Http,
    guild_id: GuildId,
    cancel_rx: &mut watch::Receiver<bool>,
) -> Result<bool> {
    let Some(tournament) = service.current(guild_id, cancel_rx) else {
        return Ok(false);
    };
    let deadline = deadline_after(Utc::now(), tournament.vote_duration)?;

    // Matches posted before a restart keep their message and deadline
    for m in tournament.pending_matches().iter().filter(|m| m.message_id.is_none()) {
        let message_id = post_match(http, &tournament, m).await?;
        debug!("Posted match {} as message {message_id}", m.id);
        service.update(guild_id, cancel_rx, |t| {
            if let Some(stored) = t.match_mut(&m.id) {
                stored.message_id = Some(message_id);
                stored.deadline = Some(deadline);
            }
        })?;
        if !sleep_or_cancel(MATCH_DELAY, cancel_rx).await {
            return Ok(false);
        }
    }

    let Some(tournament) = service.current(guild_id, cancel_rx) else {
        return Ok(false);
    };
    let deadline = tournament.round_deadline().unwrap_or(deadline);
    if !wait_for_votes(service, http, &tournament, deadline, None, cancel_rx).await? {
        return Ok(false);
    }

    let pending = tournament.pending_matches();
    let votes = join_all(
        pending
            .iter()
            .map(|m| fetch_votes(http, tournament.channel_id, m)),
    )
    .await;

    let recorded = service.update(guild_id, cancel_rx, |t| {
        let mut rng = rand::thread_rng();
        for (m, (votes1, votes2)) in pending.iter().zip(votes) {
            t.record_votes(&m.id, votes1, votes2, &mut rng);
        }
    })?;
    Ok(recorded.is_some())
}

async fn create_form(google: &GoogleClient, tournament: &Tournament) -> Result<RoundForm> {
    let matches: Vec<FormMatch> = tournament
        .pending_matches()
        .into_iter()
        .filter_map(|m| {
            let participant2 = m.participant2?;
            let image = |id| tournament.participant(id).and_then(|p| p.image.clone());
            Some(FormMatch {
                match_id: m.id.clone(),
                name1: tournament.name(m.participant1).to_owned(),
                image1: image(m.participant1),
                name2: tournament.name(participant2).to_owned(),
                image2: image(participant2),
            })
        })
        .collect();

    let deadline = deadline_after(Utc::now(), tournament.vote_duration)?;
    let created = google
        .create_round_form(
            &form_title(tournament),
            &format!(
                "Pick your favourite in each match. Votes close in {}.",
                format_duration(tournament.vote_duration)
            ),
            &matches,
        )
        .await?;

    Ok(RoundForm {
        form_id: created.form_id,
        responder_url: created.responder_url,
        questions: created.questions,
        drive_files: created.drive_files,
        deadline,
    })
}

fn form_title(tournament: &Tournament) -> String {
    format!("{}: round {}", tournament.theme, tournament.current_round)
}

/// Record the tallied votes of each form question, by match id, then settle
/// the matches the form left out.
fn record_form_votes(
    tournament: &mut Tournament,
    questions: &[FormQuestion],
    votes: &HashMap<String, (u32, u32)>,
    rng: &mut impl Rng,
) {
    for question in questions {
        let (votes1, votes2) = votes.get(&question.match_id).copied().unwrap_or_default();
        tournament.record_votes(&question.match_id, votes1, votes2, rng);
    }
    for m in tournament.pending_matches() {
        tournament.record_votes(&m.id, 0, 0, rng);
    }
}

async fn play_forms_round(
    service: &TournamentService,
    google: &GoogleClient,
    http: &Http,
    guild_id: GuildId,
    cancel_rx: &mut watch::Receiver<bool>,
) -> Result<bool> {
    let Some(tournament) = service.current(guild_id, cancel_rx) else {
        return Ok(false);
    };

    // A form created before a restart keeps its id, questions and deadline
    let form = match tournament.form.clone() {
        Some(form) => form,
        None => match create_form(google, &tournament).await {
            Ok(form) => {
                info!("Created form {} for round {}", form.form_id, tournament.current_round);
                if service
                    .update(guild_id, cancel_rx, |t| t.form = Some(form.clone()))?
                    .is_none()
                {
                    google.discard(&form.form_id, &form.drive_files).await;
                    return Ok(false);
                }

                let embed = CreateEmbed::new()
                    .title(format!("📝 Round {} voting form", tournament.current_round))
                    .description(format!(
                        "[**Click here to vote**]({})\n\n{} match(es) to decide. Votes close {}.",
                        form.responder_url,
                        form.questions.len(),
                        relative(form.deadline)
                    ))
                    .url(&form.responder_url)
                    .colour(MATCH_COLOUR);
                send(http, tournament.channel_id, CreateMessage::new().embed(embed)).await?;
                form
            }
            Err(e) => {
                warn!("Could not create the round form, falling back to reactions: {e:?}");
                service.update(guild_id, cancel_rx, |t| t.reactions_fallback = true)?;
                send(
                    http,
                    tournament.channel_id,
                    CreateMessage::new().content(
                        "⚠️ The Google Form could not be created, this round is voted with reactions instead.",
                    ),
                )
                .await?;
                return play_reactions_round(service, http, guild_id, cancel_rx).await;
            }
        },
    };

    let link = Some(form.responder_url.as_str());
    if !wait_for_votes(service, http, &tournament, form.deadline, link, cancel_rx).await? {
        return Ok(false);
    }

    if let Err(e) = google.close_form(&form.form_id, &form_title(&tournament)).await {
        warn!("Could not close form {}: {e}", form.form_id);
    }
    let votes = match google.responses(&form.form_id).await {
        Ok(responses) => tally(&form.questions, &responses),
        Err(e) => {
            warn!("Could not read the responses of form {}: {e}", form.form_id);
            HashMap::new()
        }
    };

    let recorded = service.update(guild_id, cancel_rx, |t| {
        record_form_votes(t, &form.questions, &votes, &mut rand::thread_rng());
        t.form = None;
    })?;

    // A stopped tournament already had its form discarded
    if recorded.is_some() {
        google.discard(&form.form_id, &form.drive_files).await;
    }
    Ok(recorded.is_some())
}

fn relative(at: DateTime<Utc>) -> String {
    format!("<t:{}:R>", at.timestamp())
}

fn reminder_text(
    reminder: VoteReminder,
    round: u32,
    deadline: DateTime<Utc>,
    link: Option<&str>,
) -> String {
    let mut text = match reminder {
        VoteReminder::Halfway => format!(
            "⏳ **Halfway through round {round}!** Votes close {}.",
            relative(deadline)
        ),
        VoteReminder::LastCall => format!(
            "📢 **Last call for round {round}!** Votes close {}.",
            relative(deadline)
        ),
    };
    if let Some(link) = link {
        text.push_str(&format!("\nVote here: {link}"));
    }
    text
}

/// Post the vote reminders still ahead and wait for `deadline`.
async fn wait_for_votes(
    service: &TournamentService,
    http: &Http,
    tournament: &Tournament,
    deadline: DateTime<Utc>,
    link: Option<&str>,
    cancel_rx: &mut watch::Receiver<bool>,
) -> Result<bool> {
    let reminders = super::bracket::reminder_times(
        deadline,
        tournament.vote_duration,
        service.config.last_call_seconds,
    );

    for (at, reminder) in reminders {
        if at <= Utc::now() {
            continue;
        }
        if !sleep_until(at, cancel_rx).await {
            return Ok(false);
        }
        let text = reminder_text(reminder, tournament.current_round, deadline, link);
        if let Err(e) = tournament.channel_id.say(http, text).await {
            warn!("Could not post vote reminder: {e}");
        }
    }

    Ok(sleep_until(deadline, cancel_rx).await)
}

/// Post the round results, then either crown the champion or schedule the
/// next round. Returns `true` once the tournament is over.
async fn finish_round(
    service: &TournamentService,
    http: &Http,
    guild_id: GuildId,
    cancel_rx: &watch::Receiver<bool>,
) -> Result<bool> {
    let Some(tournament) = service.current(guild_id, cancel_rx) else {
        return Ok(true);
    };

    let summary = tournament.round_summary(tournament.current_round);
    let stats = tournament.stats();
    let embed = CreateEmbed::new()
        .title(format!("📊 Round {} results", tournament.current_round))
        .colour(SUMMARY_COLOUR)
        .field(
            format!("🎯 Qualified ({})", summary.qualified.len()),
            non_empty(summary_list(&summary.qualified)),
            false,
        )
        .field(
            format!("💔 Eliminated ({})", summary.eliminated.len()),
            non_empty(summary_list(&summary.eliminated)),
            false,
        )
        .footer(CreateEmbedFooter::new(format!(
            "Matches played: {} | Total votes: {}",
            stats.matches_played, stats.total_votes
        )))
        .timestamp(serenity::all::Timestamp::now());
    send(http, tournament.channel_id, CreateMessage::new().embed(embed)).await?;

    if let Some(champion) = tournament.champion() {
        crown(http, &tournament, champion).await?;
        service.remove(guild_id, cancel_rx)?;
        info!("Tournament \"{}\" in guild {guild_id} is over", tournament.theme);
        return Ok(true);
    }

    let until = deadline_after(Utc::now(), tournament.between_rounds)?;
    if service
        .update(guild_id, cancel_rx, |t| t.phase = Phase::Intermission { until })?
        .is_none()
    {
        return Ok(true);
    }
    send(
        http,
        tournament.channel_id,
        CreateMessage::new().content(format!(
            "⏸️ Next round starts {}.",
            relative(until)
        )),
    )
    .await?;
    Ok(false)
}

fn non_empty(text: String) -> String {
    if text.is_empty() { "None".to_owned() } else { text }
}

async fn crown(http: &Http, tournament: &Tournament, champion: ParticipantId) -> Result<()> {
    let stats = tournament.stats();
    let mut embed = CreateEmbed::new()
        .title("🏆 VICTORY! 🏆")
        .description(format!(
            "# {}\n\nwins the **{}** tournament!",
            tournament.name(champion),
            tournament.theme
        ))
        .colour(CHAMPION_COLOUR)
        .field(
            "📊 Statistics",
            format!(
                "Participants: {}\nMatches played: {}\nTotal votes: {}",
                stats.participants, stats.matches_played, stats.total_votes
            ),
            false,
        )
        .timestamp(serenity::all::Timestamp::now());
    if let Some(image) = tournament.participant(champion).and_then(|p| p.image.clone()) {
        embed = embed.image(image);
    }

    send(http, tournament.channel_id, CreateMessage::new().embed(embed)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::json;

    use super::*;
    use crate::tournament::forms::FormResponse;

    fn settings(count: usize) -> TournamentSettings {
        TournamentSettings {
            theme: "Owls".to_owned(),
            participants: (0..count).map(|i| (format!("Owl {i}"), None)).collect(),
            channel_id: ChannelId::new(5),
            vote_duration: 3600,
            between_rounds: 300,
            backend: VotingBackend::Forms,
            creator_id: UserId::new(7),
        }
    }

    fn service(dir: &tempfile::TempDir) -> TournamentService {
        let store = TournamentStore::load(dir.path().join("tournaments.json")).unwrap();
        TournamentService::new(store, None, TournamentConfig::default())
    }

    #[test]
    fn bot_reactions_are_not_votes() {
        let votes = reaction_votes([(VOTE_ONE, 5, true), (VOTE_TWO, 3, true)]);
        assert_eq!(votes, (4, 2));
    }

    #[test]
    fn missing_bot_reaction_keeps_the_count() {
        let votes = reaction_votes([(VOTE_ONE, 2, false), ("🔥", 9, false)]);
        assert_eq!(votes, (2, 0));
    }

    #[test]
    fn reminders_link_the_form() {
        let deadline = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        assert_eq!(
            reminder_text(VoteReminder::LastCall, 2, deadline, Some("https://forms.gle/x")),
            "📢 **Last call for round 2!** Votes close <t:1700000000:R>.\nVote here: https://forms.gle/x"
        );
        assert_eq!(
            reminder_text(VoteReminder::Halfway, 1, deadline, None),
            "⏳ **Halfway through round 1!** Votes close <t:1700000000:R>."
        );
    }

    #[test]
    fn form_votes_decide_their_match() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut tournament = Tournament::new(GuildId::new(1), settings(4), &mut rng, Utc::now());
        let pending = tournament.pending_matches();
        let voted = pending[0].clone();
        let name1 = tournament.name(voted.participant1).to_owned();
        let name2 = tournament.name(voted.participant2.unwrap()).to_owned();

        let questions = vec![FormQuestion {
            match_id: voted.id.clone(),
            question_id: "7a3f".to_owned(),
            option1: name1.clone(),
            option2: name2.clone(),
        }];
        let responses: Vec<FormResponse> = serde_json::from_value(json!([
            {"answers": {"7a3f": {"textAnswers": {"answers": [{"value": name2}]}}}},
            {"answers": {"7a3f": {"textAnswers": {"answers": [{"value": name2}]}}}},
            {"answers": {"7a3f": {"textAnswers": {"answers": [{"value": name1}]}}}},
        ]))
        .unwrap();
        let votes = tally(&questions, &responses);

        record_form_votes(&mut tournament, &questions, &votes, &mut rng);

        let decided = tournament.match_mut(&voted.id).unwrap().clone();
        assert_eq!((decided.votes1, decided.votes2), (1, 2));
        assert_eq!(decided.winner, voted.participant2);
        assert!(tournament.pending_matches().is_empty());
        assert!(tournament.round_complete());
    }

    #[test]
    fn deadlines_out_of_range_are_errors() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        assert_eq!(
            deadline_after(now, 3600).unwrap(),
            DateTime::from_timestamp(1_700_003_600, 0).unwrap()
        );
        assert!(deadline_after(now, 1_000_000_000 * 86_400).is_err());
        assert!(deadline_after(now, u64::MAX).is_err());
    }

    #[test]
    fn overlong_durations_cannot_run() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut tournament = Tournament::new(GuildId::new(1), settings(4), &mut rng, Utc::now());
        assert_eq!(check_durations(&tournament), Ok(()));

        tournament.vote_duration = MAX_DURATION_SECONDS;
        assert_eq!(check_durations(&tournament), Ok(()));

        tournament.between_rounds = 1_000_000_000 * 86_400;
        assert_eq!(
            check_durations(&tournament),
            Err("the pause between rounds (86400000000000s) is longer than 30 days".to_owned())
        );
    }

    #[test]
    fn cancelled_tasks_leave_the_next_tournament_alone() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir);
        let guild_id = GuildId::new(1);
        let tournament = Tournament::new(guild_id, settings(4), &mut StdRng::seed_from_u64(3), Utc::now());
        service
            .store
            .update(|tournaments| tournaments.insert(guild_id, tournament))
            .unwrap();

        let (old_tx, old_rx) = watch::channel(false);
        old_tx.send(true).unwrap();
        let (_new_tx, new_rx) = watch::channel(false);

        let stale = service.update(guild_id, &old_rx, |t| t.theme = "Stale".to_owned()).unwrap();
        assert_eq!(stale, None);
        assert_eq!(service.current(guild_id, &old_rx), None);
        assert_eq!(service.remove(guild_id, &old_rx).unwrap(), None);

        let live = service.update(guild_id, &new_rx, |t| t.theme.clone()).unwrap();
        assert_eq!(live, Some("Owls".to_owned()));
        assert_eq!(service.snapshot(guild_id).unwrap().theme, "Owls");
    }

    #[tokio::test(start_paused = true)]
    async fn paced_posts_stop_when_cancelled() {
        let (tx, mut rx) = watch::channel(false);
        let mut posted = Vec::new();

        let finished = post_paced(vec![1, 2, 3], BYE_DELAY, &mut rx, |n| {
            posted.push(n);
            if n == 1 {
                tx.send(true).unwrap();
            }
            async { anyhow::Ok(()) }
        })
        .await
        .unwrap();

        assert!(!finished);
        assert_eq!(posted, vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn paced_posts_wait_between_items() {
        let (_tx, mut rx) = watch::channel(false);
        let start = tokio::time::Instant::now();
        let mut posted = Vec::new();

        let finished = post_paced(vec!["a", "b"], BYE_DELAY, &mut rx, |item| {
            posted.push(item);
            async { anyhow::Ok(()) }
        })
        .await
        .unwrap();

        assert!(finished);
        assert_eq!(posted, vec!["a", "b"]);
        assert!(start.elapsed() >= BYE_DELAY * 2);
    }
}
