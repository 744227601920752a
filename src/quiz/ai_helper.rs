use std::time::Duration;

use chatgpt::client::ChatGPT;
use chatgpt::config::ChatGPTEngine;
use chatgpt::types::CompletionResponse;
use log::debug;

use crate::quiz::remote::{FetchError, QuestionSource, RemoteQuestion};
use crate::quiz::Tier;

const CATEGORIES: [&str; 6] = [
    "American bands",
    "old TV commercials and slogans",
    "60s to 90s pop culture",
    "modern technology",
    "movie trivia",
    "U.S. history",
];

/// Generates trivia with ChatGPT in the same shape as the HTTP source.
pub struct AiQuestions {
    chat_gpt: ChatGPT,
}

impl AiQuestions {
    pub fn new(api_key: &str) -> Result<Self, chatgpt::err::Error> {
        let mut chat_gpt = ChatGPT::new(api_key)?;
        chat_gpt.config.engine = ChatGPTEngine::Gpt35Turbo;
        chat_gpt.config.timeout = Duration::from_secs(15);
        Ok(Self { chat_gpt })
    }
}

impl QuestionSource for AiQuestions {
    async fn fetch(&self, tier: Tier, level: u32, slot: usize) -> Result<RemoteQuestion, FetchError> {
        let prompt = question_prompt(tier, level, slot);
        debug!("Asking for a tier {} question (level {}, slot {})", tier, level, slot);

        let response: CompletionResponse = self.chat_gpt.send_message(&prompt).await?;
        let content = response.message().clone().content;
        debug!("Completion: {:?}", content);

        parse_reply(&content)
    }
}

pub fn difficulty(tier: Tier) -> &'static str {
    match tier {
        0 | 1 => "easy",
        2 => "moderate",
        3 => "intermediate",
        4 => "hard",
        _ => "very hard",
    }
}

fn question_prompt(tier: Tier, level: u32, slot: usize) -> String {
    let category = CATEGORIES[(level as usize + slot) % CATEGORIES.len()];
    format!(
        "You write questions for a timed trivia game where players type short free-text answers.
        Write one {} question about {}.
        The answer must be one to four words. List every common spelling or alternative the player could type.
        Reply with JSON only, no commentary: {{\"question\": \"...\", \"answer\": [\"...\", \"...\"]}}",
        difficulty(tier),
        category
    )
}

/// Pulls the first JSON object out of a completion, code fences and all.
fn parse_reply(content: &str) -> Result<RemoteQuestion, FetchError> {
    let start = content.find('{').ok_or(FetchError::Malformed("json object"))?;
    let end = content.rfind('}').ok_or(FetchError::Malformed("json object"))?;
    if end < start {
        return Err(FetchError::Malformed("json object"));
    }
    Ok(serde_json::from_str(&content[start..=end])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_reply_is_parsed() {
        let reply = "Sure!\n```json\n{\"question\": \"Who played Forrest Gump?\", \"answer\": [\"tom hanks\", \"hanks\"]}\n```";
        let question = parse_reply(reply).unwrap().into_question("remote-1-0".to_string()).unwrap();
        assert_eq!(question.prompt, "Who played Forrest Gump?");
        assert_eq!(question.answers, vec!["tom hanks", "hanks"]);
    }

    #[test]
    fn reply_without_json_is_malformed() {
        assert!(matches!(parse_reply("I cannot help with that."), Err(FetchError::Malformed(_))));
        assert!(matches!(parse_reply("} backwards {"), Err(FetchError::Malformed(_))));
        assert!(matches!(parse_reply("{\"question\": oops}"), Err(FetchError::Json(_))));
    }

    #[test]
    fn prompt_names_difficulty_and_rotates_categories() {
        let first = question_prompt(5, 81, 0);
        assert!(first.contains("very hard"));
        assert!(first.contains(CATEGORIES[81 % CATEGORIES.len()]));
        assert_ne!(question_prompt(1, 1, 0), question_prompt(1, 1, 1));
    }
}
