//! Tournament state and single-elimination bracket rules.
//!
//! Everything here is plain data so it can be persisted between phases and
//! resumed after a restart.

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serenity::all::{ChannelId, GuildId, MessageId, UserId};

pub type ParticipantId = u32;

const SUMMARY_LIMIT: usize = 10;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub image: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VotingBackend {
    Reactions,
    Forms,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Match {
    /// `R<round>_M<n>`
    pub id: String,
    pub round: u32,
    pub participant1: ParticipantId,
    /// `None` for a bye
    pub participant2: Option<ParticipantId>,
    pub winner: Option<ParticipantId>,
    #[serde(default)]
    pub votes1: u32,
    #[serde(default)]
    pub votes2: u32,
    /// Vote message, for the reactions backend
    #[serde(default)]
    pub message_id: Option<MessageId>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

impl Match {
    fn new(round: u32, number: usize, participant1: ParticipantId, participant2: Option<ParticipantId>) -> Self {
        Self {
            id: format!("R{round}_M{number}"),
            round,
            participant1,
            participant2,
            winner: None,
            votes1: 0,
            votes2: 0,
            message_id: None,
            deadline: None,
        }
    }

    pub fn is_bye(&self) -> bool {
        self.participant2.is_none()
    }

    pub fn loser(&self) -> Option<ParticipantId> {
        let winner = self.winner?;
        let other = self.participant2?;
        Some(if winner == self.participant1 { other } else { self.participant1 })
    }

    /// Votes of the winner and of the loser.
    pub fn result_votes(&self) -> (u32, u32) {
        if self.winner == Some(self.participant1) {
            (self.votes1, self.votes2)
        } else {
            (self.votes2, self.votes1)
        }
    }
}

/// One radio question of a round form, tied to its match.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FormQuestion {
    pub match_id: String,
    pub question_id: String,
    pub option1: String,
    pub option2: String,
}

/// The Google form collecting the votes of the current round.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RoundForm {
    pub form_id: String,
    pub responder_url: String,
    pub questions: Vec<FormQuestion>,
    /// Drive files holding the option images
    #[serde(default)]
    pub drive_files: Vec<String>,
    pub deadline: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    /// The opening announcement has not been posted yet
    Announce,
    /// The current round is being played
    Round { announced: bool },
    /// Waiting before the next round
    Intermission { until: DateTime<Utc> },
}

/// What the setup wizard hands over to start a tournament.
#[derive(Debug, Clone, PartialEq)]
pub struct TournamentSettings {
    pub theme: String,
    pub participants: Vec<(String, Option<String>)>,
    pub channel_id: ChannelId,
    pub vote_duration: u64,
    pub between_rounds: u64,
    pub backend: VotingBackend,
    pub creator_id: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub participants: usize,
    pub matches_played: usize,
    pub total_votes: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundSummary {
    pub qualified: Vec<String>,
    pub eliminated: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteReminder {
    Halfway,
    LastCall,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Tournament {
    pub guild_id: GuildId,
    pub theme: String,
    pub participants: Vec<Participant>,
    pub channel_id: ChannelId,
    /// Seconds
    pub vote_duration: u64,
    /// Seconds
    pub between_rounds: u64,
    pub backend: VotingBackend,
    pub creator_id: UserId,
    pub current_round: u32,
    pub total_rounds: u32,
    pub matches: Vec<Match>,
    #[serde(default)]
    pub form: Option<RoundForm>,
    /// Form creation failed, this round is voted with reactions
    #[serde(default)]
    pub reactions_fallback: bool,
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
}

/// Rounds needed to get a single winner out of `participants`.
pub fn total_rounds(participants: usize) -> u32 {
    if participants <= 1 {
        0
    } else {
        usize::BITS - (participants - 1).leading_zeros()
    }
}

/// Pair participants in order. An odd one out gets a bye.
pub fn pair_round(round: u32, ids: &[ParticipantId]) -> Vec<Match> {
    ids.chunks(2)
        .enumerate()
        .map(|(i, pair)| Match::new(round, i + 1, pair[0], pair.get(1).copied()))
        .collect()
}

/// Higher vote count wins, ties are broken at random.
pub fn decide_winner(
    participant1: ParticipantId,
    participant2: ParticipantId,
    votes1: u32,
    votes2: u32,
    rng: &mut impl Rng,
) -> ParticipantId {
    match votes1.cmp(&votes2) {
        std::cmp::Ordering::Greater => participant1,
        std::cmp::Ordering::Less => participant2,
        std::cmp::Ordering::Equal => {
            if rng.gen_bool(0.5) {
                participant1
            } else {
                participant2
            }
        }
    }
}

/// When to remind voters before `deadline`: halfway through when the window
/// is at least twice the last call lead, and a last call when it is longer.
pub fn reminder_times(
    deadline: DateTime<Utc>,
    vote_duration: u64,
    last_call: u64,
) -> Vec<(DateTime<Utc>, VoteReminder)> {
    let before = |seconds: u64| {
        i64::try_from(seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|lead| deadline.checked_sub_signed(lead))
    };
    let mut times = Vec::new();

    if vote_duration >= last_call.saturating_mul(2) && last_call > 0 {
        times.extend(before(vote_duration / 2).map(|at| (at, VoteReminder::Halfway)));
    }
    if vote_duration > last_call.saturating_mul(2) && last_call > 0 {
        times.extend(before(last_call).map(|at| (at, VoteReminder::LastCall)));
    }

    times
}

/// Keep the first lines, with a marker when some were left out.
pub fn summary_list(lines: &[String]) -> String {
    let mut text = lines
        .iter()
        .take(SUMMARY_LIMIT)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");
    if lines.len() > SUMMARY_LIMIT {
        text.push_str("\n...");
    }
    text
}

impl Tournament {
    pub fn new(
        guild_id: GuildId,
        settings: TournamentSettings,
        rng: &mut impl Rng,
        now: DateTime<Utc>,
    ) -> Self {
        let participants: Vec<Participant> = settings
            .participants
            .into_iter()
            .enumerate()
            .map(|(id, (name, image))| Participant {
                id: id as ParticipantId,
                name,
                image,
            })
            .collect();

        let mut ids: Vec<ParticipantId> = participants.iter().map(|p| p.id).collect();
        ids.shuffle(rng);

        Self {
            guild_id,
            theme: settings.theme,
            total_rounds: total_rounds(participants.len()),
            participants,
            channel_id: settings.channel_id,
            vote_duration: settings.vote_duration,
            between_rounds: settings.between_rounds,
            backend: settings.backend,
            creator_id: settings.creator_id,
            current_round: 1,
            matches: pair_round(1, &ids),
            form: None,
            reactions_fallback: false,
            phase: Phase::Announce,
            created_at: now,
        }
    }

    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn name(&self, id: ParticipantId) -> &str {
        self.participant(id).map_or("?", |p| p.name.as_str())
    }

    /// The backend used to vote on the current round.
    pub fn round_backend(&self) -> VotingBackend {
        if self.reactions_fallback {
            VotingBackend::Reactions
        } else {
            self.backend
        }
    }

    pub fn round_matches(&self, round: u32) -> impl Iterator<Item = &Match> {
        self.matches.iter().filter(move |m| m.round == round)
    }

    pub fn current_matches(&self) -> impl Iterator<Item = &Match> {
        self.round_matches(self.current_round)
    }

    pub fn match_mut(&mut self, id: &str) -> Option<&mut Match> {
        self.matches.iter_mut().find(|m| m.id == id)
    }

    /// Undecided head-to-head matches of the current round.
    pub fn pending_matches(&self) -> Vec<Match> {
        self.current_matches()
            .filter(|m| m.winner.is_none() && !m.is_bye())
            .cloned()
            .collect()
    }

    /// Matches of the current round without a winner yet.
    pub fn remaining_in_round(&self) -> usize {
        self.current_matches().filter(|m| m.winner.is_none()).count()
    }

    /// Advance every bye of the current round. Returns who moved on.
    pub fn resolve_byes(&mut self) -> Vec<ParticipantId> {
        let round = self.current_round;
        self.matches
            .iter_mut()
            .filter(|m| m.round == round && m.is_bye() && m.winner.is_none())
            .map(|m| {
                m.winner = Some(m.participant1);
                m.participant1
            })
            .collect()
    }

    /// Store the votes of a match and pick its winner.
    pub fn record_votes(&mut self, match_id: &str, votes1: u32, votes2: u32, rng: &mut impl Rng) -> Option<ParticipantId> {
        let m = self.match_mut(match_id)?;
        let participant2 = m.participant2?;

        let winner = decide_winner(m.participant1, participant2, votes1, votes2, rng);
        m.votes1 = votes1;
        m.votes2 = votes2;
        m.winner = Some(winner);
        Some(winner)
    }

    pub fn round_complete(&self) -> bool {
        self.current_matches().all(|m| m.winner.is_some())
    }

    fn round_winners(&self) -> Vec<ParticipantId> {
        self.current_matches().filter_map(|m| m.winner).collect()
    }

    /// The winner of the tournament once the last round is decided.
    pub fn champion(&self) -> Option<ParticipantId> {
        if !self.round_complete() {
            return None;
        }

        match self.round_winners().as_slice() {
            [winner] => Some(*winner),
            _ => None,
        }
    }

    /// Pair the winners of the current round into the next one.
    pub fn advance_round(&mut self, rng: &mut impl Rng) {
        let mut winners = self.round_winners();
        winners.shuffle(rng);

        self.current_round += 1;
        self.matches.extend(pair_round(self.current_round, &winners));
        self.form = None;
        self.reactions_fallback = false;
    }

    /// Latest vote deadline of the current round.
    pub fn round_deadline(&self) -> Option<DateTime<Utc>> {
        let match_deadline = self
            .current_matches()
            .filter(|m| m.winner.is_none())
            .filter_map(|m| m.deadline)
            .max();

        match (&self.form, match_deadline) {
            (Some(form), Some(deadline)) => Some(deadline.max(form.deadline)),
            (Some(form), None) => Some(form.deadline),
            (None, deadline) => deadline,
        }
    }

    pub fn stats(&self) -> Stats {
        let played = self.matches.iter().filter(|m| !m.is_bye() && m.winner.is_some());

        Stats {
            participants: self.participants.len(),
            matches_played: played.clone().count(),
            total_votes: played.map(|m| m.votes1 + m.votes2).sum(),
        }
    }

    pub fn round_summary(&self, round: u32) -> RoundSummary {
        let mut summary = RoundSummary::default();

        for m in self.round_matches(round) {
            let Some(winner) = m.winner else {
                continue;
            };

            if m.is_bye() {
                summary
                    .qualified
                    .push(format!("✅ **{}** (bye)", self.name(winner)));
                continue;
            }

            let (winner_votes, loser_votes) = m.result_votes();
            summary
                .qualified
                .push(format!("✅ **{}** ({winner_votes} votes)", self.name(winner)));
            if let Some(loser) = m.loser() {
                summary
                    .eliminated
                    .push(format!("❌ {} ({loser_votes} votes)", self.name(loser)));
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn settings(count: usize) -> TournamentSettings {
        TournamentSettings {
            theme: "Owls".to_owned(),
            participants: (0..count).map(|i| (format!("Owl {i}"), None)).collect(),
            channel_id: ChannelId::new(5),
            vote_duration: 3600,
            between_rounds: 300,
            backend: VotingBackend::Reactions,
            creator_id: UserId::new(7),
        }
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn tournament(count: usize, rng: &mut StdRng) -> Tournament {
        Tournament::new(GuildId::new(1), settings(count), rng, at(0))
    }

    #[test]
    fn rounds_are_ceil_log2() {
        assert_eq!(total_rounds(1), 0);
        assert_eq!(total_rounds(2), 1);
        assert_eq!(total_rounds(4), 2);
        assert_eq!(total_rounds(5), 3);
        assert_eq!(total_rounds(8), 3);
        assert_eq!(total_rounds(9), 4);
    }

    #[test]
    fn odd_participant_gets_a_bye() {
        let matches = pair_round(2, &[4, 1, 3]);

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, "R2_M1");
        assert_eq!((matches[0].participant1, matches[0].participant2), (4, Some(1)));
        assert_eq!(matches[1].id, "R2_M2");
        assert!(matches[1].is_bye());
    }

    #[test]
    fn ties_are_broken_randomly() {
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(decide_winner(1, 2, 5, 3, &mut rng), 1);
        assert_eq!(decide_winner(1, 2, 0, 3, &mut rng), 2);

        let picks: Vec<_> = (0..32).map(|_| decide_winner(1, 2, 4, 4, &mut rng)).collect();
        assert!(picks.contains(&1));
        assert!(picks.contains(&2));
    }

    #[test]
    fn new_tournament_uses_every_participant_once() {
        let mut rng = StdRng::seed_from_u64(1);
        let t = tournament(5, &mut rng);

        assert_eq!(t.total_rounds, 3);
        assert_eq!(t.phase, Phase::Announce);
        assert_eq!(t.matches.len(), 3);

        let mut seen: Vec<_> = t
            .matches
            .iter()
            .flat_map(|m| std::iter::once(m.participant1).chain(m.participant2))
            .collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert_eq!(t.matches.iter().filter(|m| m.is_bye()).count(), 1);
    }

    #[test]
    fn full_tournament_reaches_a_champion() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut t = tournament(5, &mut rng);
        let mut rounds = 0;

        let champion = loop {
            rounds += 1;
            t.resolve_byes();
            for m in t.pending_matches() {
                t.record_votes(&m.id, 3, 1, &mut rng);
            }
            assert!(t.round_complete());

            if let Some(champion) = t.champion() {
                break champion;
            }
            t.advance_round(&mut rng);
        };

        assert_eq!(rounds, 3);
        assert_eq!(t.current_round, t.total_rounds);

        // 5 participants need 4 head-to-head matches
        let stats = t.stats();
        assert_eq!(stats.participants, 5);
        assert_eq!(stats.matches_played, 4);
        assert_eq!(stats.total_votes, 16);
        assert!(t.participant(champion).is_some());
    }

    #[test]
    fn summary_lists_qualified_and_eliminated() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut t = tournament(3, &mut rng);
        t.resolve_byes();
        let head_to_head = t.pending_matches().remove(0);
        t.record_votes(&head_to_head.id, 1, 4, &mut rng);

        let summary = t.round_summary(1);
        let winner = head_to_head.participant2.unwrap();
        let bye = t.matches[1].participant1;

        assert_eq!(
            summary.qualified,
            vec![
                format!("✅ **{}** (4 votes)", t.name(winner)),
                format!("✅ **{}** (bye)", t.name(bye)),
            ]
        );
        assert_eq!(
            summary.eliminated,
            vec![format!("❌ {} (1 votes)", t.name(head_to_head.participant1))]
        );
        assert_eq!(t.remaining_in_round(), 0);
    }

    #[test]
    fn summary_list_is_capped() {
        let lines: Vec<String> = (0..12).map(|i| i.to_string()).collect();
        assert_eq!(summary_list(&lines[..2]), "0\n1");
        assert!(summary_list(&lines).ends_with("9\n..."));
    }

    #[test]
    fn reminders_depend_on_window_length() {
        let deadline = at(3600);

        assert_eq!(
            reminder_times(deadline, 3600, 300),
            vec![(at(1800), VoteReminder::Halfway), (at(3300), VoteReminder::LastCall)]
        );
        assert_eq!(
            reminder_times(deadline, 600, 300),
            vec![(at(3300), VoteReminder::Halfway)]
        );
        assert!(reminder_times(deadline, 300, 300).is_empty());
    }

    #[test]
    fn out_of_range_reminders_are_skipped() {
        let deadline = at(3600);

        assert_eq!(
            reminder_times(deadline, u64::MAX, 300),
            vec![(at(3300), VoteReminder::LastCall)]
        );
        assert!(reminder_times(deadline, u64::MAX, u64::MAX / 4).is_empty());
    }

    #[test]
    fn state_survives_serialization() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut t = tournament(4, &mut rng);
        t.phase = Phase::Intermission { until: at(60) };
        t.matches[0].message_id = Some(MessageId::new(99));

        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains(r#""phase":"intermission""#));
        let back: Tournament = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
