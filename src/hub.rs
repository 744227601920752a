use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use log::debug;
use teloxide::types::{ChatId, MessageId};
use tokio::sync::Mutex;

use crate::quiz::bank::QuestionBank;
use crate::quiz::deck::{DeckSelector, JsonDeckStore, MemoryDeckStore, RefillPolicy};
use crate::quiz::round::{Game, GameSettings, Ticket, Tick, Verdict};
use crate::timer::QuestionClock;

/// Everything one chat is playing.
pub struct ChatSession {
    pub game: Game,
    pub clock: QuestionClock,
    /// Ticket of the question on screen and the message that shows it.
    shown: Option<(Ticket, MessageId)>,
}

impl ChatSession {
    /// Remembers which message carries the question. Ignored when the game
    /// has already moved past `ticket`.
    pub fn mark_shown(&mut self, ticket: Ticket, message: MessageId) -> bool {
        let current = self.game.current().map(|view| view.ticket);
        if current != Some(ticket) {
            return false;
        }
        self.shown = Some((ticket, message));
        true
    }

    /// Resolves the question on screen with a typed answer. Messages sent
    /// before the question appeared, and repeats, are ignored.
    pub fn answer(&mut self, message: MessageId, text: &str) -> Option<Verdict> {
        self.resolve_shown(message, |game, ticket| game.submit(ticket, text))
    }

    /// Gives up on the question on screen. Same ordering rules as `answer`.
    pub fn skip(&mut self, message: MessageId) -> Option<Verdict> {
        self.resolve_shown(message, |game, ticket| game.skip(ticket))
    }

    fn resolve_shown(
        &mut self,
        message: MessageId,
        resolve: impl FnOnce(&mut Game, Ticket) -> Option<Verdict>,
    ) -> Option<Verdict> {
        let (ticket, shown_at) = self.shown?;
        if message.0 <= shown_at.0 {
            debug!("Message {} predates question message {}", message.0, shown_at.0);
            return None;
        }
        let verdict = resolve(&mut self.game, ticket)?;
        self.shown = None;
        self.clock.disarm();
        Some(verdict)
    }

    /// Stops the clock and forgets the question on screen.
    pub fn halt(&mut self) {
        self.clock.disarm();
        self.shown = None;
    }
}

/// Per-chat games. The map lock is only held to find a session; each
/// session has its own lock, so deck file writes in one chat never hold up
/// another chat's clock.
pub struct Hub {
    sessions: Mutex<HashMap<ChatId, Arc<Mutex<ChatSession>>>>,
    bank: Arc<QuestionBank>,
    settings: GameSettings,
    refill: RefillPolicy,
    deck_dir: Option<PathBuf>,
}

impl Hub {
    pub fn new(
        bank: Arc<QuestionBank>,
        settings: GameSettings,
        refill: RefillPolicy,
        deck_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            bank,
            settings,
            refill,
            deck_dir,
        }
    }

    pub fn token_code(&self) -> &str {
        &self.settings.token_code
    }

    fn open_session(&self, chat: ChatId) -> ChatSession {
        let selector = match &self.deck_dir {
            Some(dir) => {
                let path = dir.join(format!("{}.json", chat.0));
                debug!("Deck for chat {} kept in {}", chat.0, path.display());
                DeckSelector::new(self.bank.clone(), JsonDeckStore::new(path), self.refill)
            }
            None => DeckSelector::new(self.bank.clone(), MemoryDeckStore::default(), self.refill),
        };
        ChatSession {
            game: Game::new(self.settings.clone(), selector),
            clock: QuestionClock::default(),
            shown: None,
        }
    }

    async fn existing(&self, chat: ChatId) -> Option<Arc<Mutex<ChatSession>>> {
        self.sessions.lock().await.get(&chat).cloned()
    }

    async fn session(&self, chat: ChatId) -> Arc<Mutex<ChatSession>> {
        if let Some(session) = self.existing(chat).await {
            return session;
        }
        // Loading the deck touches the disk, keep it out of the map lock
        let fresh = Arc::new(Mutex::new(self.open_session(chat)));
        self.sessions
            .lock()
            .await
            .entry(chat)
            .or_insert(fresh)
            .clone()
    }

    /// Runs `f` on the chat's session, creating it on first use.
    pub async fn with_session<R>(&self, chat: ChatId, f: impl FnOnce(&mut ChatSession) -> R) -> R {
        let session = self.session(chat).await;
        let mut session = session.lock().await;
        f(&mut session)
    }

    /// One clock tick. Chats without a session have nothing to tick.
    pub async fn tick(&self, chat: ChatId, ticket: Ticket) -> Tick {
        match self.existing(chat).await {
            Some(session) => {
                let mut session = session.lock().await;
                session.game.tick(ticket)
            }
            None => Tick::Stale,
        }
    }
}
