use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::quiz::bank::QuestionBank;
use crate::quiz::{Question, Tier};

/// Remaining (not yet drawn) question ids per tier, in draw order.
pub type DeckState = BTreeMap<Tier, Vec<String>>;

#[derive(Debug, thiserror::Error)]
pub enum DeckStoreError {
    #[error("deck store i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("deck state is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait DeckStore {
    fn load(&self) -> Result<DeckState, DeckStoreError>;
    fn save(&self, state: &DeckState) -> Result<(), DeckStoreError>;
}

/// Keeps deck state in memory. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryDeckStore {
    state: Arc<Mutex<DeckState>>,
}

impl DeckStore for MemoryDeckStore {
    fn load(&self) -> Result<DeckState, DeckStoreError> {
        Ok(self.state.lock().map(|s| s.clone()).unwrap_or_default())
    }

    fn save(&self, state: &DeckState) -> Result<(), DeckStoreError> {
        if let Ok(mut current) = self.state.lock() {
            *current = state.clone();
        }
        Ok(())
    }
}

/// One JSON document per player: `{"1": ["1-004", ...], ...}`.
#[derive(Debug, Clone)]
pub struct JsonDeckStore {
    path: PathBuf,
}

impl JsonDeckStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DeckStore for JsonDeckStore {
    fn load(&self) -> Result<DeckState, DeckStoreError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(DeckState::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, state: &DeckState) -> Result<(), DeckStoreError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        // Write then rename so a crash never leaves half a document behind
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(state)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// When a deck runs short of a full round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RefillPolicy {
    /// Throw away the short tail and reshuffle the whole tier.
    #[default]
    Reshuffle,
    /// Draw the short tail first, then top up from a fresh pass that excludes it.
    Exhaust,
}

impl FromStr for RefillPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reshuffle" => Ok(RefillPolicy::Reshuffle),
            "exhaust" | "strict" => Ok(RefillPolicy::Exhaust),
            other => Err(format!("unknown refill policy '{other}'")),
        }
    }
}

pub struct DeckSelector {
    bank: Arc<QuestionBank>,
    store: Box<dyn DeckStore + Send + Sync>,
    state: DeckState,
    policy: RefillPolicy,
}

impl DeckSelector {
    pub fn new(
        bank: Arc<QuestionBank>,
        store: impl DeckStore + Send + Sync + 'static,
        policy: RefillPolicy,
    ) -> Self {
        let state = store.load().unwrap_or_else(|err| {
            warn!("Could not load deck state, starting fresh: {}", err);
            DeckState::new()
        });
        Self {
            bank,
            store: Box::new(store),
            state,
            policy,
        }
    }

    /// Draws up to `count` questions of `tier` without repeating any id
    /// that is still waiting in the deck. Returns an empty round when the
    /// tier has no content.
    pub fn draw(&mut self, tier: Tier, count: usize) -> Vec<Question> {
        let pool = self.bank.pool(tier);
        if pool.is_empty() || count == 0 {
            return Vec::new();
        }

        let known: HashSet<&str> = pool.iter().map(|q| q.id.as_str()).collect();
        let deck = self.state.entry(tier).or_default();
        deck.retain(|id| known.contains(id.as_str()));

        let taken: Vec<String> = match self.policy {
            RefillPolicy::Reshuffle => {
                if deck.len() < count {
                    *deck = shuffled_ids(pool, &HashSet::new());
                }
                let take = count.min(deck.len());
                deck.drain(..take).collect()
            }
            RefillPolicy::Exhaust => {
                let take = count.min(deck.len());
                let mut taken: Vec<String> = deck.drain(..take).collect();
                if taken.len() < count {
                    let tail: HashSet<&str> = taken.iter().map(String::as_str).collect();
                    let mut fresh = shuffled_ids(pool, &tail);
                    let need = (count - taken.len()).min(fresh.len());
                    let topped: Vec<String> = fresh.drain(..need).collect();
                    // The tail belongs to the new pass too, but goes last
                    let mut requeued = taken.clone();
                    requeued.shuffle(&mut thread_rng());
                    fresh.extend(requeued);
                    *deck = fresh;
                    taken.extend(topped);
                }
                taken
            }
        };

        debug!(
            "Drew {} question(s) from tier {}, {} left in deck",
            taken.len(),
            tier,
            self.state.get(&tier).map(Vec::len).unwrap_or(0)
        );
        if let Err(err) = self.store.save(&self.state) {
            warn!("Could not persist deck state: {}", err);
        }

        let by_id: HashMap<&str, &Question> = pool.iter().map(|q| (q.id.as_str(), q)).collect();
        taken
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).map(|q| (*q).clone()))
            .collect()
    }
}

fn shuffled_ids(pool: &[Question], excluded: &HashSet<&str>) -> Vec<String> {
    let mut ids: Vec<String> = pool
        .iter()
        .filter(|q| !excluded.contains(q.id.as_str()))
        .map(|q| q.id.clone())
        .collect();
    ids.shuffle(&mut thread_rng());
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank(sizes: &[(Tier, usize)]) -> Arc<QuestionBank> {
        let tiers = sizes
            .iter()
            .map(|(tier, size)| {
                let questions = (0..*size)
                    .map(|n| {
                        Question::new(
                            format!("{tier}-{n:03}"),
                            format!("Question {n} of tier {tier}?"),
                            vec![format!("answer {n}")],
                        )
                    })
                    .collect();
                (*tier, questions)
            })
            .collect();
        Arc::new(QuestionBank::from_tiers(tiers).unwrap())
    }

    fn ids(questions: &[Question]) -> Vec<String> {
        questions.iter().map(|q| q.id.clone()).collect()
    }

    fn temp_path(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        std::env::temp_dir().join(format!("deck-{}-{}-{}", name, std::process::id(), nanos))
    }

    #[test]
    fn draw_returns_distinct_questions() {
        let mut selector = DeckSelector::new(bank(&[(1, 30)]), MemoryDeckStore::default(), RefillPolicy::Reshuffle);
        let drawn = ids(&selector.draw(1, 7));
        assert_eq!(drawn.len(), 7);
        assert_eq!(drawn.iter().collect::<HashSet<_>>().len(), 7);
    }

    #[test]
    fn no_repeats_until_the_pool_is_used_up() {
        let mut selector = DeckSelector::new(bank(&[(2, 21)]), MemoryDeckStore::default(), RefillPolicy::Reshuffle);
        let mut seen = HashSet::new();
        for _ in 0..3 {
            for id in ids(&selector.draw(2, 7)) {
                assert!(seen.insert(id), "repeated before the pass ended");
            }
        }
        assert_eq!(seen.len(), 21);
    }

    #[test]
    fn short_deck_is_reshuffled_from_the_full_tier() {
        let store = MemoryDeckStore::default();
        let mut selector = DeckSelector::new(bank(&[(1, 10)]), store.clone(), RefillPolicy::Reshuffle);
        selector.draw(1, 7);
        assert_eq!(store.load().unwrap()[&1].len(), 3);

        let second = ids(&selector.draw(1, 7));
        assert_eq!(second.iter().collect::<HashSet<_>>().len(), 7);
        assert_eq!(store.load().unwrap()[&1].len(), 3);
    }

    #[test]
    fn small_pool_returns_everything_it_has() {
        let mut selector = DeckSelector::new(bank(&[(4, 4)]), MemoryDeckStore::default(), RefillPolicy::Reshuffle);
        let drawn = ids(&selector.draw(4, 7));
        assert_eq!(drawn.len(), 4);
        assert_eq!(drawn.iter().collect::<HashSet<_>>().len(), 4);
    }

    #[test]
    fn empty_tier_gives_empty_round_and_leaves_deck_alone() {
        let store = MemoryDeckStore::default();
        let mut selector = DeckSelector::new(bank(&[(1, 10)]), store.clone(), RefillPolicy::Reshuffle);
        assert!(selector.draw(3, 7).is_empty());
        assert!(selector.draw(1, 0).is_empty());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn a_new_selector_continues_from_persisted_state() {
        let shared = bank(&[(1, 21)]);
        let store = MemoryDeckStore::default();
        let first = ids(&DeckSelector::new(shared.clone(), store.clone(), RefillPolicy::Reshuffle).draw(1, 7));
        let second = ids(&DeckSelector::new(shared, store, RefillPolicy::Reshuffle).draw(1, 7));
        assert!(first.iter().all(|id| !second.contains(id)));
    }

    #[test]
    fn ids_missing_from_the_bank_are_pruned() {
        let store = MemoryDeckStore::default();
        let mut stale = DeckState::new();
        stale.insert(1, vec!["gone-1".into(), "1-000".into(), "gone-2".into()]);
        store.save(&stale).unwrap();

        let mut selector = DeckSelector::new(bank(&[(1, 10)]), store, RefillPolicy::Reshuffle);
        let drawn = ids(&selector.draw(1, 1));
        assert_eq!(drawn, vec!["1-000".to_string()]);
    }

    #[test]
    fn exhaust_policy_draws_the_tail_before_reshuffling() {
        let store = MemoryDeckStore::default();
        let mut selector = DeckSelector::new(bank(&[(1, 10)]), store.clone(), RefillPolicy::Exhaust);
        let first = ids(&selector.draw(1, 7));
        let tail = store.load().unwrap()[&1].clone();
        assert_eq!(tail.len(), 3);

        let second = ids(&selector.draw(1, 7));
        assert_eq!(second.iter().collect::<HashSet<_>>().len(), 7);
        assert!(tail.iter().all(|id| second.contains(id)));

        // Pass one was `first` plus the tail: every id exactly once.
        let pass: HashSet<_> = first.iter().chain(tail.iter()).collect();
        assert_eq!(pass.len(), 10);

        // The tail went to the back of the new pass.
        let remaining = store.load().unwrap()[&1].clone();
        assert_eq!(remaining.len(), 6);
        assert!(tail.iter().all(|id| remaining[3..].contains(id)));
    }

    /// Loads fine, never manages to save.
    struct ReadOnlyStore;

    impl DeckStore for ReadOnlyStore {
        fn load(&self) -> Result<DeckState, DeckStoreError> {
            Ok(DeckState::new())
        }

        fn save(&self, _state: &DeckState) -> Result<(), DeckStoreError> {
            Err(std::io::Error::new(ErrorKind::PermissionDenied, "read-only disk").into())
        }
    }

    #[test]
    fn failed_save_does_not_stop_play() {
        let mut selector = DeckSelector::new(bank(&[(1, 21)]), ReadOnlyStore, RefillPolicy::Reshuffle);
        let mut seen = HashSet::new();
        for _ in 0..3 {
            let round = ids(&selector.draw(1, 7));
            assert_eq!(round.len(), 7);
            for id in round {
                assert!(seen.insert(id), "deck did not advance");
            }
        }
        assert_eq!(seen.len(), 21);
        assert!(selector.state[&1].is_empty());
    }

    #[test]
    fn refill_policy_parses() {
        assert_eq!("Reshuffle".parse::<RefillPolicy>(), Ok(RefillPolicy::Reshuffle));
        assert_eq!(" exhaust ".parse::<RefillPolicy>(), Ok(RefillPolicy::Exhaust));
        assert!("sometimes".parse::<RefillPolicy>().is_err());
    }

    #[test]
    fn json_store_round_trips_and_tolerates_a_missing_file() {
        let path = temp_path("roundtrip").join("player.json");
        let store = JsonDeckStore::new(&path);
        assert!(store.load().unwrap().is_empty());

        let mut state = DeckState::new();
        state.insert(2, vec!["2-001".into(), "2-007".into()]);
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), state);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn corrupt_json_store_starts_a_fresh_deck() {
        let path = temp_path("corrupt");
        fs::write(&path, "{not json").unwrap();
        let store = JsonDeckStore::new(&path);
        assert!(store.load().is_err());

        let mut selector = DeckSelector::new(bank(&[(1, 10)]), store, RefillPolicy::Reshuffle);
        assert_eq!(selector.draw(1, 7).len(), 7);
        let _ = fs::remove_file(&path);
    }
}
