use std::mem;

use log::{debug, info};

use crate::quiz::deck::DeckSelector;
use crate::quiz::{tier_for_level, MatchPolicy, Question, Tier};
use crate::reward::RewardClaim;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSettings {
    pub questions_per_round: usize,
    pub seconds_per_question: u32,
    pub total_levels: u32,
    pub levels_per_tier: u32,
    pub tiers: Tier,
    /// Tokens paid for a perfect round, 0 disables rewards.
    pub reward_amount: u64,
    pub token_code: String,
    pub match_policy: MatchPolicy,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            questions_per_round: 7,
            seconds_per_question: 22,
            total_levels: 100,
            levels_per_tier: 20,
            tiers: 5,
            reward_amount: 5,
            token_code: "HUGS".to_string(),
            match_policy: MatchPolicy::CaseInsensitive,
        }
    }
}

impl GameSettings {
    pub fn tier_for(&self, level: u32) -> Tier {
        tier_for_level(level, self.levels_per_tier, self.tiers)
    }
}

/// Serial number of the loaded question. Anything carrying an older ticket
/// is ignored.
pub type Ticket = u64;

#[derive(Debug, Clone)]
pub struct Round {
    tier: Tier,
    questions: Vec<Question>,
    index: usize,
    correct: usize,
    remaining_seconds: u32,
}

impl Round {
    fn new(tier: Tier, questions: Vec<Question>, seconds: u32) -> Self {
        Self {
            tier,
            questions,
            index: 0,
            correct: 0,
            remaining_seconds: seconds,
        }
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    fn current(&self) -> Option<&Question> {
        self.questions.get(self.index)
    }

    /// Swaps not-yet-asked slots for the given candidates, in order.
    /// A candidate is skipped when its id or normalised prompt is already
    /// in the round. Returns how many slots were replaced.
    pub fn enrich(&mut self, candidates: Vec<Question>) -> usize {
        let policy = MatchPolicy::CaseInsensitive;
        let mut replaced = 0;
        let mut slot = self.index;
        for candidate in candidates {
            if slot >= self.questions.len() {
                break;
            }
            let prompt = policy.normalize(&candidate.prompt);
            let clash = self
                .questions
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != slot)
                .any(|(_, q)| q.id == candidate.id || policy.normalize(&q.prompt) == prompt);
            if clash {
                debug!("Dropping duplicate remote question '{}'", candidate.prompt);
                continue;
            }
            self.questions[slot] = candidate;
            replaced += 1;
            slot += 1;
        }
        replaced
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundSummary {
    pub level: u32,
    pub tier: Tier,
    pub correct: usize,
    pub total: usize,
}

impl RoundSummary {
    /// Every drawn question answered correctly. An empty round is never perfect.
    pub fn is_perfect(&self) -> bool {
        self.total > 0 && self.correct == self.total
    }
}

#[derive(Debug, Clone)]
pub enum Phase {
    NotStarted,
    /// Round drawn, first question not loaded yet.
    AwaitingQuestion(Round),
    ActiveQuestion(Round),
    RoundComplete(RoundSummary),
    SessionComplete,
    /// The tier for the current level has no questions.
    NoContent { tier: Tier },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionView {
    pub ticket: Ticket,
    pub level: u32,
    pub tier: Tier,
    /// 1-based position in the round.
    pub number: usize,
    pub total: usize,
    pub prompt: String,
    pub seconds: u32,
    pub correct_so_far: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    Question(QuestionView),
    RoundComplete(RoundSummary),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub correct: bool,
    pub timed_out: bool,
    pub skipped: bool,
    pub accepted: Vec<String>,
    pub next: Next,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// Ticket no longer current, the countdown should stop.
    Stale,
    Running(u32),
    Expired(Verdict),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundStart {
    Ready { level: u32, tier: Tier, questions: usize },
    NoContent { level: u32, tier: Tier },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceTo {
    Round(RoundStart),
    SessionComplete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advance {
    pub summary: RoundSummary,
    pub reward: Option<RewardClaim>,
    pub next: AdvanceTo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub level: u32,
    pub tier: Tier,
    pub active: bool,
    pub level_complete: bool,
    pub finished: bool,
    pub no_content: bool,
    /// `(number, total)`, only while a question is loaded.
    pub position: Option<(usize, usize)>,
    pub correct: usize,
    pub remaining_seconds: Option<u32>,
    pub last_correct: Option<usize>,
}

/// One player's run through the levels.
pub struct Game {
    settings: GameSettings,
    selector: DeckSelector,
    wallet: Option<String>,
    level: u32,
    phase: Phase,
    ticket: Ticket,
    last_summary: Option<RoundSummary>,
}

impl Game {
    pub fn new(settings: GameSettings, selector: DeckSelector) -> Self {
        Self {
            settings,
            selector,
            wallet: None,
            level: 1,
            phase: Phase::NotStarted,
            ticket: 0,
            last_summary: None,
        }
    }

    pub fn set_wallet(&mut self, wallet: Option<String>) {
        self.wallet = wallet;
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Back to level 1, nothing running.
    pub fn reset(&mut self) {
        self.level = 1;
        self.phase = Phase::NotStarted;
        self.last_summary = None;
        self.ticket += 1;
    }

    /// Draws the round for the current level. A finished or content-less
    /// session starts over from level 1. Returns `None` while a round or
    /// level-complete pause is in progress.
    pub fn start(&mut self) -> Option<RoundStart> {
        match self.phase {
            Phase::NotStarted => {}
            Phase::SessionComplete | Phase::NoContent { .. } => self.reset(),
            _ => return None,
        }
        Some(self.begin_round())
    }

    fn begin_round(&mut self) -> RoundStart {
        let tier = self.settings.tier_for(self.level);
        let questions = self.selector.draw(tier, self.settings.questions_per_round);
        if questions.is_empty() {
            info!("No questions for tier {} (level {})", tier, self.level);
            self.phase = Phase::NoContent { tier };
            return RoundStart::NoContent {
                level: self.level,
                tier,
            };
        }
        let count = questions.len();
        info!("Level {} round drawn: {} question(s) from tier {}", self.level, count, tier);
        self.phase = Phase::AwaitingQuestion(Round::new(tier, questions, self.settings.seconds_per_question));
        RoundStart::Ready {
            level: self.level,
            tier,
            questions: count,
        }
    }

    pub fn pending_round_mut(&mut self) -> Option<&mut Round> {
        match &mut self.phase {
            Phase::AwaitingQuestion(round) => Some(round),
            _ => None,
        }
    }

    /// Loads the first question of a drawn round and starts its timer.
    pub fn present(&mut self) -> Option<QuestionView> {
        if !matches!(self.phase, Phase::AwaitingQuestion(_)) {
            return None;
        }
        if let Phase::AwaitingQuestion(round) = mem::replace(&mut self.phase, Phase::NotStarted) {
            self.phase = Phase::ActiveQuestion(round);
        }
        self.ticket += 1;
        self.current()
    }

    pub fn current(&self) -> Option<QuestionView> {
        match &self.phase {
            Phase::ActiveQuestion(round) => view(round, self.level, self.ticket),
            _ => None,
        }
    }

    pub fn submit(&mut self, ticket: Ticket, answer: &str) -> Option<Verdict> {
        self.resolve(ticket, Resolution::Answer(answer))
    }

    /// Same as a wrong answer.
    pub fn timeout(&mut self, ticket: Ticket) -> Option<Verdict> {
        self.resolve(ticket, Resolution::Timeout)
    }

    /// Gives up on the question. Scored like a wrong answer.
    pub fn skip(&mut self, ticket: Ticket) -> Option<Verdict> {
        self.resolve(ticket, Resolution::Skip)
    }

    /// One second of the active question's countdown.
    pub fn tick(&mut self, ticket: Ticket) -> Tick {
        if ticket != self.ticket {
            return Tick::Stale;
        }
        let Phase::ActiveQuestion(round) = &mut self.phase else {
            return Tick::Stale;
        };
        round.remaining_seconds = round.remaining_seconds.saturating_sub(1);
        if round.remaining_seconds > 0 {
            return Tick::Running(round.remaining_seconds);
        }
        match self.timeout(ticket) {
            Some(verdict) => Tick::Expired(verdict),
            None => Tick::Stale,
        }
    }

    fn resolve(&mut self, ticket: Ticket, resolution: Resolution<'_>) -> Option<Verdict> {
        if ticket != self.ticket {
            debug!("Ignoring answer for stale ticket {} (current {})", ticket, self.ticket);
            return None;
        }
        let Phase::ActiveQuestion(round) = &mut self.phase else {
            return None;
        };
        let question = round.current()?;
        let correct = match resolution {
            Resolution::Answer(answer) => question.accepts(answer, self.settings.match_policy),
            Resolution::Timeout | Resolution::Skip => false,
        };
        let accepted = question.answers.clone();
        if correct {
            round.correct += 1;
        }
        round.index += 1;
        // Whatever happens next, this question is closed
        self.ticket += 1;

        let next = if round.index < round.questions.len() {
            round.remaining_seconds = self.settings.seconds_per_question;
            match view(round, self.level, self.ticket) {
                Some(view) => Next::Question(view),
                None => return None,
            }
        } else {
            let summary = RoundSummary {
                level: self.level,
                tier: round.tier,
                correct: round.correct,
                total: round.questions.len(),
            };
            info!(
                "Level {} round complete: {}/{} correct",
                summary.level, summary.correct, summary.total
            );
            self.phase = Phase::RoundComplete(summary);
            self.last_summary = Some(summary);
            Next::RoundComplete(summary)
        };

        Some(Verdict {
            correct,
            timed_out: resolution == Resolution::Timeout,
            skipped: resolution == Resolution::Skip,
            accepted,
            next,
        })
    }

    /// Leaves the level-complete pause: settles the reward, then moves to
    /// the next level or ends the session at the level cap.
    pub fn advance(&mut self) -> Option<Advance> {
        let Phase::RoundComplete(summary) = self.phase else {
            return None;
        };
        let reward = self.reward_for(&summary);

        if self.level >= self.settings.total_levels {
            info!("Session complete at level {}", self.level);
            self.phase = Phase::SessionComplete;
            return Some(Advance {
                summary,
                reward,
                next: AdvanceTo::SessionComplete,
            });
        }

        self.level += 1;
        let start = self.begin_round();
        Some(Advance {
            summary,
            reward,
            next: AdvanceTo::Round(start),
        })
    }

    fn reward_for(&self, summary: &RoundSummary) -> Option<RewardClaim> {
        if !summary.is_perfect() || self.settings.reward_amount == 0 {
            return None;
        }
        let address = self.wallet.as_ref()?;
        Some(RewardClaim {
            address: address.clone(),
            amount: self.settings.reward_amount,
            token: self.settings.token_code.clone(),
            reason: format!("perfect round at level {}", summary.level),
        })
    }

    pub fn status(&self) -> Status {
        let round = match &self.phase {
            Phase::ActiveQuestion(round) => Some(round),
            _ => None,
        };
        Status {
            level: self.level,
            tier: self.settings.tier_for(self.level),
            active: matches!(self.phase, Phase::AwaitingQuestion(_) | Phase::ActiveQuestion(_)),
            level_complete: matches!(self.phase, Phase::RoundComplete(_)),
            finished: matches!(self.phase, Phase::SessionComplete),
            no_content: matches!(self.phase, Phase::NoContent { .. }),
            position: round
                .filter(|r| !r.is_empty())
                .map(|r| (r.index + 1, r.len())),
            correct: round.map(|r| r.correct).unwrap_or(0),
            remaining_seconds: round.map(|r| r.remaining_seconds),
            last_correct: self.last_summary.map(|s| s.correct),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution<'a> {
    Answer(&'a str),
    Timeout,
    Skip,
}

fn view(round: &Round, level: u32, ticket: Ticket) -> Option<QuestionView> {
    let question = round.current()?;
    Some(QuestionView {
        ticket,
        level,
        tier: round.tier,
        number: round.index + 1,
        total: round.len(),
        prompt: question.prompt.clone(),
        seconds: round.remaining_seconds,
        correct_so_far: round.correct,
    })
}
