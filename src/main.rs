mod config;
mod hub;
mod quiz;
mod reward;
mod timer;

use std::sync::Arc;
use std::time::Duration;

use config::{RewardsMode, Settings};
use dotenv::dotenv;
use hub::{ChatSession, Hub};
use log::{debug, error, info, warn};
use quiz::{
    ai_helper::AiQuestions,
    bank::QuestionBank,
    remote::{fetch_candidates, HttpQuestions, RemoteSource},
    round::{AdvanceTo, Next, Phase, QuestionView, RoundStart, RoundSummary, Ticket, Tick, Verdict},
};
use reward::{is_valid_address, HttpRewards, MockLedger, RewardBackend, RewardClaim, RewardService};
use teloxide::{
    dispatching::dialogue::{serializer::Json, ErasedStorage, SqliteStorage, Storage},
    prelude::*,
    types::{ChatAction, KeyboardButton, KeyboardMarkup, MessageId},
};

type GameDialogue = Dialogue<State, ErasedStorage<State>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
pub enum State {
    #[default]
    Start,
    ReceiveWallet,
    Lobby {
        wallet: Option<String>,
    },
}

type DialogueStorage = std::sync::Arc<ErasedStorage<State>>;

/// What every handler needs besides the bot and the dialogue.
struct Shell {
    hub: Arc<Hub>,
    rewards: Option<Arc<RewardBackend>>,
    remote: Option<Arc<RemoteSource>>,
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    pretty_env_logger::init();

    if let Err(err) = run().await {
        error!("{}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut settings = Settings::from_env()?;
    info!("Starting 22 Seconds bot...");

    let bank = match &settings.question_bank {
        Some(path) => QuestionBank::open(path)?,
        None => QuestionBank::builtin()?,
    };
    info!("Question bank ready: {} questions {:?}", bank.len(), bank.tier_sizes());

    let rewards = match &settings.rewards {
        RewardsMode::Mock { ledger } => {
            info!("Rewards go to the mock ledger at {}", ledger.display());
            Some(Arc::new(RewardBackend::Mock(MockLedger::new(ledger.clone()))))
        }
        RewardsMode::Http { url } => {
            info!("Rewards are posted to {}", url);
            Some(Arc::new(RewardBackend::Http(HttpRewards::new(url.clone()))))
        }
        RewardsMode::Off => {
            info!("Rewards are off");
            settings.game.reward_amount = 0;
            None
        }
    };

    let remote = match (&settings.remote_questions_url, &settings.chatgpt_api_key) {
        (Some(url), _) => {
            info!("Rounds are enriched from {}", url);
            Some(Arc::new(RemoteSource::Http(HttpQuestions::new(url.clone()))))
        }
        (None, Some(key)) => match AiQuestions::new(key) {
            Ok(ai) => {
                info!("Rounds are enriched with generated questions");
                Some(Arc::new(RemoteSource::Ai(ai)))
            }
            Err(err) => {
                warn!("Question generator unavailable, using the bank only: {}", err);
                None
            }
        },
        (None, None) => None,
    };

    let bot = Bot::from_env();

    info!("Opening dialogue storage at {}", settings.dialogue_db);
    let storage: DialogueStorage = SqliteStorage::open(&settings.dialogue_db, Json).await?.erase();

    let hub = Arc::new(Hub::new(
        Arc::new(bank),
        settings.game.clone(),
        settings.refill,
        settings.deck_dir.clone(),
    ));
    let shell = Arc::new(Shell { hub, rewards, remote });

    Dispatcher::builder(
        bot,
        Update::filter_message()
            .enter_dialogue::<Message, ErasedStorage<State>, State>()
            .branch(dptree::case![State::Start].endpoint(start))
            .branch(dptree::case![State::ReceiveWallet].endpoint(receive_wallet))
            .branch(dptree::case![State::Lobby { wallet }].endpoint(lobby)),
    )
    .dependencies(dptree::deps![storage, shell])
    .enable_ctrlc_handler()
    .build()
    .dispatch()
    .await;
    Ok(())
}

const START_GAME: &str = "▶️ Start game";
const NEXT_LEVEL: &str = "⏭ Next level";
const CHANGE_WALLET: &str = "👛 Change wallet";
const BALANCE: &str = "💰 Balance";
const SKIP: &str = "Skip";
const SKIP_QUESTION: &str = "⏭ Skip question";

/// How long a round may wait for remote questions before it starts.
const ENRICH_BUDGET: Duration = Duration::from_secs(10);

fn lobby_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![KeyboardButton::new(START_GAME)],
        vec![KeyboardButton::new(CHANGE_WALLET), KeyboardButton::new(BALANCE)],
    ])
}

fn question_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![KeyboardButton::new(SKIP_QUESTION)]])
}

fn next_level_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![KeyboardButton::new(NEXT_LEVEL)]])
}

const GREETING_TEXT: &str = "Welcome to 22 Seconds! Every level is a round of quick trivia questions, \
and you have 22 seconds to type each answer. Answer a whole round correctly to earn tokens.\n\n\
Send me your wallet address to collect rewards, or press Skip to just play.";
async fn start(bot: Bot, dialogue: GameDialogue, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, GREETING_TEXT)
        .reply_markup(KeyboardMarkup::new(vec![vec![KeyboardButton::new(SKIP)]]))
        .await?;

    dialogue.update(State::ReceiveWallet).await?;
    Ok(())
}

async fn receive_wallet(
    bot: Bot,
    dialogue: GameDialogue,
    shell: Arc<Shell>,
    msg: Message,
) -> HandlerResult {
    let wallet = match msg.text().map(str::trim) {
        Some(SKIP) => None,
        Some(address) if is_valid_address(address) => Some(address.to_string()),
        _ => {
            bot.send_message(
                msg.chat.id,
                "That does not look like a wallet address. It starts with r and has 25 to 35 letters and digits. Try again or press Skip.",
            )
            .await?;
            return Ok(());
        }
    };

    let reply = match &wallet {
        Some(address) => format!("Wallet saved: {}", address),
        None => "No wallet, no problem. You can add one later.".to_string(),
    };
    let update = wallet.clone();
    shell
        .hub
        .with_session(msg.chat.id, move |session| session.game.set_wallet(update))
        .await;

    bot.send_message(msg.chat.id, reply)
        .reply_markup(lobby_keyboard())
        .await?;
    dialogue.update(State::Lobby { wallet }).await?;
    Ok(())
}

async fn lobby(
    bot: Bot,
    dialogue: GameDialogue,
    wallet: Option<String>,
    shell: Arc<Shell>,
    msg: Message,
) -> HandlerResult {
    let chat = msg.chat.id;
    match msg.text().map(str::trim) {
        Some("/start") => {
            shell
                .hub
                .with_session(chat, |session| {
                    session.halt();
                    session.game.reset();
                })
                .await;
            start(bot, dialogue, msg.clone()).await?;
        }
        Some(START_GAME) => {
            let started = shell
                .hub
                .with_session(chat, |session| {
                    session.game.set_wallet(wallet);
                    session.game.start()
                })
                .await;
            match started {
                Some(round) => open_round(&shell, &bot, chat, round).await?,
                None => {
                    bot.send_message(chat, "A round is already running. Answer the question, or press Next level when it is over.")
                        .await?;
                }
            }
        }
        Some(NEXT_LEVEL) => next_level(&shell, &bot, chat, wallet).await?,
        Some(CHANGE_WALLET) => {
            bot.send_message(chat, "Send me the new wallet address, or press Skip to play without one.")
                .reply_markup(KeyboardMarkup::new(vec![vec![KeyboardButton::new(SKIP)]]))
                .await?;
            dialogue.update(State::ReceiveWallet).await?;
        }
        Some(BALANCE) => show_balance(&shell, &bot, chat, wallet.as_deref()).await?,
        Some("/status") => show_status(&shell, &bot, chat).await?,
        Some(SKIP_QUESTION) => resolve_question(&shell, &bot, chat, |session| session.skip(msg.id)).await?,
        Some(answer) => {
            resolve_question(&shell, &bot, chat, |session| session.answer(msg.id, answer)).await?
        }
        None => {
            bot.send_message(chat, "Please answer with text.").await?;
        }
    }
    Ok(())
}

/// Resolves the question on screen and starts the next question's clock
/// before anything is sent, so a failed send cannot leave the round without
/// a clock.
async fn resolve_question(
    shell: &Shell,
    bot: &Bot,
    chat: ChatId,
    resolve: impl FnOnce(&mut ChatSession) -> Option<Verdict>,
) -> HandlerResult {
    let (hub, clock_bot) = (shell.hub.clone(), bot.clone());
    let verdict = shell
        .hub
        .with_session(chat, |session| {
            let verdict = resolve(session)?;
            if let Next::Question(view) = &verdict.next {
                session.clock.arm(run_clock(hub, clock_bot, chat, view.ticket));
            }
            Some(verdict)
        })
        .await;
    match verdict {
        Some(verdict) => report_verdict(&shell.hub, bot, chat, &verdict).await,
        None => idle_hint(shell, bot, chat).await?,
    }
    Ok(())
}

async fn idle_hint(shell: &Shell, bot: &Bot, chat: ChatId) -> HandlerResult {
    let status = shell.hub.with_session(chat, |session| session.game.status()).await;
    let text = if status.active {
        "Too late for that one, the next question is on its way."
    } else if status.level_complete {
        "Press Next level to continue."
    } else {
        "Press Start game to play."
    };
    bot.send_message(chat, text).await?;
    Ok(())
}

/// Fills the drawn round with remote questions when a source is configured,
/// shows the first question and starts its clock.
async fn open_round(shell: &Shell, bot: &Bot, chat: ChatId, round: RoundStart) -> HandlerResult {
    let (level, tier, questions) = match round {
        RoundStart::Ready {
            level,
            tier,
            questions,
        } => (level, tier, questions),
        RoundStart::NoContent { level, tier } => {
            bot.send_message(
                chat,
                format!("There are no questions for level {} (tier {}) yet. Press Start game to play again from level 1.", level, tier),
            )
            .reply_markup(lobby_keyboard())
            .await?;
            return Ok(());
        }
    };

    if let Some(remote) = &shell.remote {
        // Nice to have, so failures are ignored
        let _ = bot.send_chat_action(chat, ChatAction::Typing).await;
        let candidates = fetch_candidates(remote.as_ref(), tier, level, questions, ENRICH_BUDGET).await;
        if !candidates.is_empty() {
            let replaced = shell
                .hub
                .with_session(chat, |session| {
                    session
                        .game
                        .pending_round_mut()
                        .map(|round| round.enrich(candidates))
                })
                .await;
            debug!("Remote questions in level {} round: {:?}", level, replaced);
        }
    }

    let (hub, clock_bot) = (shell.hub.clone(), bot.clone());
    let view = shell
        .hub
        .with_session(chat, |session| {
            let view = session.game.present()?;
            session.clock.arm(run_clock(hub, clock_bot, chat, view.ticket));
            Some(view)
        })
        .await;
    let Some(view) = view else {
        return Ok(());
    };
    let go = bot
        .send_message(
            chat,
            format!("Level {} · tier {} · {} questions. Go!", level, tier, questions),
        )
        .reply_markup(question_keyboard())
        .await;
    if let Err(err) = go {
        warn!("Could not open level {} in chat {}: {}", level, chat.0, err);
    }
    if let Err(err) = show_question(&shell.hub, bot, chat, &view).await {
        warn!("Could not show question {} in chat {}: {}", view.number, chat.0, err);
    }
    Ok(())
}

async fn show_question(hub: &Hub, bot: &Bot, chat: ChatId, view: &QuestionView) -> HandlerResult {
    let text = format!(
        "Level {} · tier {} · question {}/{} · ✅ {}\n⏱ {}s\n\n{}",
        view.level, view.tier, view.number, view.total, view.correct_so_far, view.seconds, view.prompt
    );
    let sent = bot.send_message(chat, text).reply_markup(question_keyboard()).await?;
    let id: MessageId = sent.id;
    if !hub.with_session(chat, |session| session.mark_shown(view.ticket, id)).await {
        debug!("Question {} in chat {} was already resolved", view.ticket, chat.0);
    }
    Ok(())
}

/// Reports a resolved question and shows the next one. The next clock is
/// already running by now, so failed sends are only logged.
async fn report_verdict(hub: &Hub, bot: &Bot, chat: ChatId, verdict: &Verdict) {
    if let Err(err) = announce(bot, chat, verdict).await {
        warn!("Could not report a verdict to chat {}: {}", chat.0, err);
    }
    if let Next::Question(view) = &verdict.next {
        if let Err(err) = show_question(hub, bot, chat, view).await {
            warn!("Could not show question {} in chat {}: {}", view.number, chat.0, err);
        }
    }
}

async fn announce(bot: &Bot, chat: ChatId, verdict: &Verdict) -> HandlerResult {
    let accepted = verdict.accepted.join(" / ");
    let text = if verdict.correct {
        "✅ Correct!".to_string()
    } else if verdict.timed_out {
        format!("⏰ Time's up! Accepted: {}", accepted)
    } else if verdict.skipped {
        format!("⏭ Skipped. Accepted: {}", accepted)
    } else {
        format!("❌ Not quite. Accepted: {}", accepted)
    };
    bot.send_message(chat, text).await?;

    if let Next::RoundComplete(summary) = &verdict.next {
        bot.send_message(chat, round_summary(summary))
            .reply_markup(next_level_keyboard())
            .await?;
    }
    Ok(())
}

fn round_summary(summary: &RoundSummary) -> String {
    let mut text = format!(
        "Level {} (tier {}) complete: {}/{} correct.",
        summary.level, summary.tier, summary.correct, summary.total
    );
    if summary.is_perfect() {
        text.push_str(" Perfect round! 🎉");
    }
    text
}

/// Counts down the question on screen and keeps going through timeouts
/// until the round ends or an answer re-arms the clock.
async fn run_clock(hub: Arc<Hub>, bot: Bot, chat: ChatId, mut ticket: Ticket) {
    loop {
        let last = timer::countdown(Duration::from_secs(1), || hub.tick(chat, ticket)).await;
        let Tick::Expired(verdict) = last else {
            return;
        };
        report_verdict(&hub, &bot, chat, &verdict).await;
        let Next::Question(view) = verdict.next else {
            return;
        };
        ticket = view.ticket;
    }
}

async fn next_level(shell: &Shell, bot: &Bot, chat: ChatId, wallet: Option<String>) -> HandlerResult {
    let advance = shell
        .hub
        .with_session(chat, |session| {
            session.game.set_wallet(wallet);
            session.halt();
            session.game.advance()
        })
        .await;
    let Some(advance) = advance else {
        bot.send_message(chat, "Finish the current round first.").await?;
        return Ok(());
    };

    match advance.reward {
        Some(claim) => dispatch_reward(shell, bot, chat, claim),
        None if advance.summary.is_perfect() && shell.rewards.is_some() => {
            bot.send_message(chat, "Add a wallet with Change wallet to earn tokens for perfect rounds.")
                .await?;
        }
        None => {}
    }

    match advance.next {
        AdvanceTo::Round(round) => open_round(shell, bot, chat, round).await?,
        AdvanceTo::SessionComplete => {
            bot.send_message(chat, "🏁 You finished every level! Press Start game to play again.")
                .reply_markup(lobby_keyboard())
                .await?;
        }
    }
    Ok(())
}

/// Pays out in the background. Gameplay never waits for the backend.
fn dispatch_reward(shell: &Shell, bot: &Bot, chat: ChatId, claim: RewardClaim) {
    let Some(rewards) = shell.rewards.clone() else {
        debug!("No reward backend for claim {:?}", claim);
        return;
    };
    let bot = bot.clone();
    tokio::spawn(async move {
        let text = match rewards.reward(&claim).await {
            Ok(receipt) => {
                info!(
                    "Paid {} {} to {} for {} ({})",
                    receipt.amount, receipt.token, claim.address, claim.reason, receipt.tx_hash
                );
                format!(
                    "💸 {} {} sent to your wallet. Tx: {}",
                    receipt.amount, receipt.token, receipt.tx_hash
                )
            }
            Err(err) => {
                warn!("Reward for chat {} failed: {}", chat.0, err);
                format!("The reward could not be sent ({}). Your progress is safe.", err)
            }
        };
        if let Err(err) = bot.send_message(chat, text).await {
            warn!("Could not report a reward to chat {}: {}", chat.0, err);
        }
    });
}

async fn show_balance(shell: &Shell, bot: &Bot, chat: ChatId, wallet: Option<&str>) -> HandlerResult {
    let Some(address) = wallet else {
        bot.send_message(chat, "No wallet yet. Add one with Change wallet.").await?;
        return Ok(());
    };
    let Some(ledger) = shell.rewards.as_ref().and_then(|r| r.ledger()) else {
        bot.send_message(chat, "Balances are only tracked by the mock ledger.").await?;
        return Ok(());
    };

    let token = shell.hub.token_code();
    let text = match (ledger.balance(address, token).await, ledger.history(address, token, 5).await) {
        (Ok(balance), Ok(history)) => {
            let mut text = format!("Balance of {}: {} {}", address, balance, token);
            for entry in history {
                text.push_str(&format!(
                    "\n+{} {} · {} · {}",
                    entry.amount,
                    entry.token,
                    entry.reason,
                    entry.timestamp.format("%Y-%m-%d %H:%M")
                ));
            }
            text
        }
        (Err(err), _) | (_, Err(err)) => {
            warn!("Ledger read failed: {}", err);
            "The ledger cannot be read right now.".to_string()
        }
    };
    bot.send_message(chat, text).await?;
    Ok(())
}

async fn show_status(shell: &Shell, bot: &Bot, chat: ChatId) -> HandlerResult {
    let (status, phase, clock_running) = shell
        .hub
        .with_session(chat, |session| {
            let phase = match session.game.phase() {
                Phase::NotStarted => "not started".to_string(),
                Phase::AwaitingQuestion(_) => "getting the round ready".to_string(),
                Phase::ActiveQuestion(_) => "playing".to_string(),
                Phase::RoundComplete(_) => "level complete".to_string(),
                Phase::SessionComplete => "finished".to_string(),
                Phase::NoContent { tier } => format!("no questions left in tier {}", tier),
            };
            (session.game.status(), phase, session.clock.is_armed())
        })
        .await;

    let mut text = format!("Level {} · tier {} · {}", status.level, status.tier, phase);
    if let Some((number, total)) = status.position {
        text.push_str(&format!("\nQuestion {}/{}", number, total));
        if let Some(seconds) = status.remaining_seconds.filter(|_| clock_running) {
            text.push_str(&format!(" · {}s left", seconds));
        }
        text.push_str(&format!("\nCorrect so far: {}", status.correct));
    }
    if let Some(correct) = status.last_correct {
        text.push_str(&format!("\nLast round: {} correct", correct));
    }
    if status.finished || status.no_content {
        text.push_str("\nPress Start game to begin again.");
    } else if status.level_complete {
        text.push_str("\nPress Next level to continue.");
    } else if !status.active {
        text.push_str("\nPress Start game to play.");
    }
    bot.send_message(chat, text).await?;
    Ok(())
}
