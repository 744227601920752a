pub mod ai_helper;
pub mod bank;
pub mod deck;
pub mod remote;
pub mod round;

/// Difficulty bucket, `1..=tiers`.
pub type Tier = u8;

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Question {
    pub id: String,
    pub prompt: String,
    pub answers: Vec<String>,
}
impl Question {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>, answers: Vec<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            answers,
        }
    }

    pub fn accepts(&self, answer: &str, policy: MatchPolicy) -> bool {
        let given = policy.normalize(answer);
        if given.is_empty() {
            return false;
        }
        self.answers.iter().any(|a| policy.normalize(a) == given)
    }
}

/// How a typed answer is compared against the accepted ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchPolicy {
    /// Trim, lowercase and collapse whitespace.
    #[default]
    CaseInsensitive,
    /// Same as `CaseInsensitive`, and punctuation is dropped on both sides.
    IgnorePunctuation,
}

impl MatchPolicy {
    pub fn normalize(&self, text: &str) -> String {
        let lowered = text.to_lowercase();
        let kept: String = match self {
            MatchPolicy::CaseInsensitive => lowered,
            MatchPolicy::IgnorePunctuation => lowered
                .chars()
                .filter(|c| c.is_alphanumeric() || c.is_whitespace())
                .collect(),
        };
        kept.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// `clamp(ceil(level / levels_per_tier), 1, tiers)`
pub fn tier_for_level(level: u32, levels_per_tier: u32, tiers: Tier) -> Tier {
    let tier = level.div_ceil(levels_per_tier.max(1));
    tier.clamp(1, u32::from(tiers.max(1))) as Tier
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sky() -> Question {
        Question::new(
            "1-001",
            "What color is the sky on a clear day?",
            vec!["blue".to_string()],
        )
    }

    #[test]
    fn tiers_follow_twenty_level_buckets() {
        assert_eq!(tier_for_level(1, 20, 5), 1);
        assert_eq!(tier_for_level(20, 20, 5), 1);
        assert_eq!(tier_for_level(21, 20, 5), 2);
        assert_eq!(tier_for_level(100, 20, 5), 5);
    }

    #[test]
    fn tiers_are_clamped() {
        assert_eq!(tier_for_level(0, 20, 5), 1);
        assert_eq!(tier_for_level(250, 20, 5), 5);
        assert_eq!(tier_for_level(7, 0, 5), 5);
    }

    #[test]
    fn answers_ignore_case_and_outer_whitespace() {
        let question = sky();
        for answer in [" Blue ", "blue", "BLUE", "\tbLuE\n"] {
            assert!(question.accepts(answer, MatchPolicy::CaseInsensitive), "{answer:?}");
        }
        assert!(!question.accepts("green", MatchPolicy::CaseInsensitive));
    }

    #[test]
    fn interior_whitespace_is_collapsed() {
        let question = Question::new(
            "2-011",
            "Who painted the Mona Lisa?",
            vec!["leonardo da vinci".to_string(), "da vinci".to_string()],
        );
        assert!(question.accepts("  Leonardo   da \t Vinci ", MatchPolicy::CaseInsensitive));
        assert!(question.accepts("DA  VINCI", MatchPolicy::CaseInsensitive));
    }

    #[test]
    fn blank_answer_never_matches() {
        assert!(!sky().accepts("   ", MatchPolicy::CaseInsensitive));
    }

    #[test]
    fn punctuation_only_ignored_when_asked() {
        let question = Question::new(
            "1-004",
            "What is the capital of the United States?",
            vec!["washington dc".to_string()],
        );
        assert!(!question.accepts("Washington, D.C.", MatchPolicy::CaseInsensitive));
        assert!(question.accepts("Washington, DC", MatchPolicy::IgnorePunctuation));
    }
}
