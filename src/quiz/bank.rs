use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use log::{info, warn};

use crate::quiz::{Question, Tier};

const BUILTIN_BANK: &str = include_str!("../../data/questions.json");

#[derive(Debug, thiserror::Error)]
pub enum BankError {
    #[error("failed to read question bank: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse question bank: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate question id '{id}' in tier {tier}")]
    DuplicateId { tier: Tier, id: String },
}

/// A single accepted answer or a list of alternatives.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(untagged)]
pub enum AcceptedAnswers {
    One(String),
    Many(Vec<String>),
}
impl AcceptedAnswers {
    /// Non-blank alternatives, trimmed.
    pub fn into_vec(self) -> Vec<String> {
        let answers = match self {
            AcceptedAnswers::One(answer) => vec![answer],
            AcceptedAnswers::Many(answers) => answers,
        };
        answers
            .into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect()
    }
}

#[derive(Debug, serde::Deserialize)]
struct BankEntry {
    id: String,
    prompt: String,
    answers: AcceptedAnswers,
}

/// Read-only question pools keyed by tier.
#[derive(Debug, Clone, Default)]
pub struct QuestionBank {
    tiers: BTreeMap<Tier, Vec<Question>>,
}

impl QuestionBank {
    pub fn builtin() -> Result<Self, BankError> {
        Self::from_json(BUILTIN_BANK)
    }

    pub fn open(path: &Path) -> Result<Self, BankError> {
        let text = fs::read_to_string(path)?;
        let bank = Self::from_json(&text)?;
        info!("Loaded question bank from {}", path.display());
        Ok(bank)
    }

    pub fn from_json(text: &str) -> Result<Self, BankError> {
        let raw: BTreeMap<Tier, Vec<BankEntry>> = serde_json::from_str(text)?;
        let tiers = raw
            .into_iter()
            .map(|(tier, entries)| {
                let questions = entries
                    .into_iter()
                    .filter_map(|entry| {
                        let answers = entry.answers.into_vec();
                        if entry.prompt.trim().is_empty() || answers.is_empty() {
                            warn!("Skipping question '{}' in tier {}: no prompt or answer", entry.id, tier);
                            return None;
                        }
                        Some(Question::new(entry.id, entry.prompt.trim(), answers))
                    })
                    .collect();
                (tier, questions)
            })
            .collect();
        Self::from_tiers(tiers)
    }

    pub fn from_tiers(tiers: BTreeMap<Tier, Vec<Question>>) -> Result<Self, BankError> {
        for (tier, questions) in &tiers {
            let mut seen = HashSet::new();
            for question in questions {
                if !seen.insert(question.id.as_str()) {
                    return Err(BankError::DuplicateId {
                        tier: *tier,
                        id: question.id.clone(),
                    });
                }
            }
        }
        Ok(Self { tiers })
    }

    /// Every question of a tier, empty if the tier is unknown.
    pub fn pool(&self, tier: Tier) -> &[Question] {
        self.tiers.get(&tier).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.tiers.values().map(Vec::len).sum()
    }

    pub fn tier_sizes(&self) -> Vec<(Tier, usize)> {
        self.tiers.iter().map(|(tier, qs)| (*tier, qs.len())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_bank_covers_every_tier() {
        let bank = QuestionBank::builtin().unwrap();
        for tier in 1..=5 {
            assert!(bank.pool(tier).len() >= 7, "tier {tier} too small");
        }
        assert!(bank.pool(6).is_empty());
    }

    #[test]
    fn single_and_multiple_answers_are_accepted() {
        let bank = QuestionBank::from_json(
            r#"{
                "1": [
                    {"id": "a", "prompt": "What do bees make?", "answers": "honey"},
                    {"id": "b", "prompt": "How many days are in a week?", "answers": ["7", " seven "]}
                ]
            }"#,
        )
        .unwrap();
        let pool = bank.pool(1);
        assert_eq!(pool[0].answers, vec!["honey"]);
        assert_eq!(pool[1].answers, vec!["7", "seven"]);
        assert_eq!(bank.len(), 2);
    }

    #[test]
    fn entries_without_answers_are_skipped() {
        let bank = QuestionBank::from_json(
            r#"{"2": [
                {"id": "a", "prompt": "Empty?", "answers": []},
                {"id": "b", "prompt": "  ", "answers": "x"},
                {"id": "c", "prompt": "Kept?", "answers": "yes"}
            ]}"#,
        )
        .unwrap();
        let ids: Vec<_> = bank.pool(2).iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["c"]);
    }

    #[test]
    fn duplicate_ids_within_a_tier_are_rejected() {
        let err = QuestionBank::from_json(
            r#"{"3": [
                {"id": "x", "prompt": "One?", "answers": "1"},
                {"id": "x", "prompt": "Two?", "answers": "2"}
            ]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, BankError::DuplicateId { tier: 3, .. }));
    }

    #[test]
    fn same_id_in_different_tiers_is_fine() {
        let bank = QuestionBank::from_json(
            r#"{
                "1": [{"id": "x", "prompt": "One?", "answers": "1"}],
                "2": [{"id": "x", "prompt": "Two?", "answers": "2"}]
            }"#,
        );
        assert!(bank.is_ok());
    }
}
