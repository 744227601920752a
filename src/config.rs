use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::quiz::deck::RefillPolicy;
use crate::quiz::round::GameSettings;
use crate::quiz::MatchPolicy;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is not valid: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewardsMode {
    Mock { ledger: PathBuf },
    Http { url: String },
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub game: GameSettings,
    pub refill: RefillPolicy,
    pub rewards: RewardsMode,
    /// Per-chat deck files live here. `DECK_DIR=memory` gives `None`,
    /// decks are then forgotten on restart.
    pub deck_dir: Option<PathBuf>,
    pub question_bank: Option<PathBuf>,
    pub remote_questions_url: Option<String>,
    pub chatgpt_api_key: Option<String>,
    pub dialogue_db: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values count as unset
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = GameSettings::default();

        let punctuation_insensitive = parse_or(var("PUNCTUATION_INSENSITIVE"), "PUNCTUATION_INSENSITIVE", false)?;
        let game = GameSettings {
            questions_per_round: positive(var("QUESTIONS_PER_ROUND"), "QUESTIONS_PER_ROUND", defaults.questions_per_round)?,
            seconds_per_question: positive(var("SECONDS_PER_QUESTION"), "SECONDS_PER_QUESTION", defaults.seconds_per_question)?,
            total_levels: positive(var("TOTAL_LEVELS"), "TOTAL_LEVELS", defaults.total_levels)?,
            levels_per_tier: positive(var("LEVELS_PER_TIER"), "LEVELS_PER_TIER", defaults.levels_per_tier)?,
            tiers: positive(var("TIER_COUNT"), "TIER_COUNT", defaults.tiers)?,
            reward_amount: parse_or(var("TOKENS_PER_PERFECT_ROUND"), "TOKENS_PER_PERFECT_ROUND", defaults.reward_amount)?,
            token_code: var("TOKEN_CODE").unwrap_or(defaults.token_code),
            match_policy: if punctuation_insensitive {
                MatchPolicy::IgnorePunctuation
            } else {
                MatchPolicy::CaseInsensitive
            },
        };

        let refill = match var("DECK_REFILL") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                name: "DECK_REFILL",
                reason,
            })?,
            None => RefillPolicy::default(),
        };

        let rewards = match var("REWARDS_MODE").map(|m| m.to_uppercase()).as_deref() {
            None | Some("MOCK") => RewardsMode::Mock {
                ledger: var("LEDGER_FILE").unwrap_or_else(|| "hugs_ledger.jsonl".to_string()).into(),
            },
            Some("HTTP") => RewardsMode::Http {
                url: var("REWARD_URL").ok_or(ConfigError::Missing("REWARD_URL"))?,
            },
            Some("OFF") => RewardsMode::Off,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "REWARDS_MODE",
                    reason: format!("expected MOCK, HTTP or OFF, got '{other}'"),
                })
            }
        };

        Ok(Self {
            game,
            refill,
            rewards,
            deck_dir: match var("DECK_DIR") {
                Some(dir) if dir.eq_ignore_ascii_case("memory") => None,
                dir => Some(dir.unwrap_or_else(|| "decks".to_string()).into()),
            },
            question_bank: var("QUESTION_BANK").map(PathBuf::from),
            remote_questions_url: var("REMOTE_QUESTIONS_URL"),
            chatgpt_api_key: var("CHATGPT_API_KEY"),
            dialogue_db: var("DIALOGUE_DB").unwrap_or_else(|| "db.sqlite".to_string()),
        })
    }
}

fn parse_or<T>(raw: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    match raw {
        Some(raw) => raw.parse().map_err(|err: T::Err| ConfigError::Invalid {
            name,
            reason: err.to_string(),
        }),
        None => Ok(default),
    }
}

fn positive<T>(raw: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + Default + PartialEq,
    T::Err: ToString,
{
    let value = parse_or(raw, name, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            name,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
