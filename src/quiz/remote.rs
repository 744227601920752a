use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::{timeout_at, Instant};

use crate::quiz::ai_helper::AiQuestions;
use crate::quiz::bank::AcceptedAnswers;
use crate::quiz::{Question, Tier};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("question request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("question generator failed: {0}")]
    Ai(#[from] chatgpt::err::Error),
    #[error("remote question is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("remote question has no {0}")]
    Malformed(&'static str),
}

impl FetchError {
    /// The source answered, but with something unusable.
    fn is_bad_payload(&self) -> bool {
        matches!(self, FetchError::Json(_) | FetchError::Malformed(_))
    }
}

/// `{"question": "...", "answer": "..." | ["...", ...]}`
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct RemoteQuestion {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: Option<AcceptedAnswers>,
}

impl RemoteQuestion {
    pub fn into_question(self, id: String) -> Result<Question, FetchError> {
        let prompt = self.question.trim();
        if prompt.is_empty() {
            return Err(FetchError::Malformed("question"));
        }
        let answers = self.answer.map(AcceptedAnswers::into_vec).unwrap_or_default();
        if answers.is_empty() {
            return Err(FetchError::Malformed("answer"));
        }
        Ok(Question::new(id, prompt, answers))
    }
}

pub trait QuestionSource {
    fn fetch(
        &self,
        tier: Tier,
        level: u32,
        slot: usize,
    ) -> impl Future<Output = Result<RemoteQuestion, FetchError>> + Send;
}

/// `GET {url}?level=N&q=i&tier=T`
pub struct HttpQuestions {
    client: reqwest::Client,
    url: String,
}

impl HttpQuestions {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url: url.into(),
        }
    }
}

impl QuestionSource for HttpQuestions {
    async fn fetch(&self, tier: Tier, level: u32, slot: usize) -> Result<RemoteQuestion, FetchError> {
        let text = self
            .client
            .get(&self.url)
            .query(&[
                ("level", level.to_string()),
                ("q", (slot + 1).to_string()),
                ("tier", tier.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(serde_json::from_str(&text)?)
    }
}

pub enum RemoteSource {
    Http(HttpQuestions),
    Ai(AiQuestions),
}

impl QuestionSource for RemoteSource {
    async fn fetch(&self, tier: Tier, level: u32, slot: usize) -> Result<RemoteQuestion, FetchError> {
        match self {
            RemoteSource::Http(http) => http.fetch(tier, level, slot).await,
            RemoteSource::Ai(ai) => ai.fetch(tier, level, slot).await,
        }
    }
}

/// Asks the source for one question per slot. Unusable answers are
/// dropped; the first transport failure, or running out of `budget`, ends
/// the attempt and the round keeps its bank questions from there on.
pub async fn fetch_candidates<S>(
    source: &S,
    tier: Tier,
    level: u32,
    slots: usize,
    budget: Duration,
) -> Vec<Question>
where
    S: QuestionSource + Sync,
{
    let deadline = Instant::now() + budget;
    let mut candidates = Vec::with_capacity(slots);
    for slot in 0..slots {
        let Ok(fetched) = timeout_at(deadline, source.fetch(tier, level, slot)).await else {
            warn!(
                "Remote questions took longer than {:?}, keeping {} of them",
                budget,
                candidates.len()
            );
            break;
        };
        let fetched = fetched.and_then(|remote| remote.into_question(format!("remote-{level}-{slot}")));
        match fetched {
            Ok(question) => candidates.push(question),
            Err(err) if err.is_bad_payload() => debug!("Discarding remote question: {}", err),
            Err(err) => {
                warn!("Remote questions unavailable, using the bank: {}", err);
                break;
            }
        }
    }
    candidates
}
