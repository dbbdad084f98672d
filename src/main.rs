use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use folio_chat::backend::supabase::SupabaseClient;
use folio_chat::backend::{Backends, FeedEvent, Subscription};
use folio_chat::config::AppConfig;
use folio_chat::models::{ConversationSummary, Draft, Message, MessageId, ParticipantPair, Session};
use folio_chat::services::{
    AuthError, AuthService, ChatCommand, ChatSession, ChatSettings, ChatUpdate,
    Database, FeedState, Inbox, ProfileResolver, PushRegistrar, SettingsService,
};

const INBOX_CHANNEL: &str = "chat-list-updates";

type Input = Lines<BufReader<Stdin>>;
type SessionUpdates = watch::Receiver<Option<Session>>;

enum Choice {
    Open(String),
    Logout,
    SignedOut,
    Quit,
}

#[derive(Debug, PartialEq)]
enum ChatExit {
    Back,
    SignedOut,
    Quit,
}

enum ChatInput {
    Skip,
    Exit(ChatExit),
    Command(ChatCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load()?;
    let db = Database::new().await?;
    let mut settings = SettingsService::load(&db).await;

    let client = Arc::new(SupabaseClient::new(&config)?);
    let backends = Backends::supabase(client);
    let auth = Arc::new(AuthService::new(backends.auth.clone(), db.clone()));
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    let shutdown = CancellationToken::new();
    let refresher = auth.spawn_refresher(shutdown.clone());
    let mut updates = auth.subscribe();

    let inbox = Inbox::new(
        backends.messages.clone(),
        backends.profiles.clone(),
        config.admin_id.clone(),
    );

    'login: loop {
        let session = match auth.restore().await {
            Ok(Some(session)) => session,
            Ok(None) => match sign_in(&auth, &mut input).await? {
                Some(session) => session,
                None => break,
            },
            Err(e) => {
                println!("Could not restore the previous session: {}", e);
                match sign_in(&auth, &mut input).await? {
                    Some(session) => session,
                    None => break,
                }
            }
        };
        println!("Welcome back, {}", session.user.greeting_name());

        if settings.register_push {
            if let Some(token) = config.push_token.as_deref() {
                PushRegistrar::new(backends.push_tokens.clone())
                    .register(&session.user.id, token)
                    .await;
            }
        }

        // Only the first inbox view may jump straight into a conversation.
        let mut auto_open = true;
        loop {
            let choice = choose_conversation(
                &backends,
                &inbox,
                &db,
                &mut settings,
                &session.user.id,
                auto_open,
                &mut updates,
                &mut input,
            )
            .await?;
            auto_open = false;

            match choice {
                Choice::Open(counterpart) => {
                    let session = match auth.ensure_fresh().await {
                        Ok(Some(session)) => session,
                        Ok(None) => {
                            println!("Your session has ended, please sign in again.");
                            continue 'login;
                        }
                        Err(e) => {
                            println!("Could not refresh your session: {}", e);
                            continue;
                        }
                    };
                    let exit = chat(
                        &backends,
                        &auth,
                        &config,
                        &settings,
                        &session,
                        &counterpart,
                        &mut updates,
                        &mut input,
                    )
                    .await?;
                    match exit {
                        ChatExit::Back => {}
                        ChatExit::SignedOut => {
                            println!("Your session has ended, please sign in again.");
                            continue 'login;
                        }
                        ChatExit::Quit => break 'login,
                    }
                }
                Choice::Logout => {
                    auth.sign_out().await?;
                    println!("Signed out.");
                    continue 'login;
                }
                Choice::SignedOut => {
                    println!("Your session has ended, please sign in again.");
                    continue 'login;
                }
                Choice::Quit => break 'login,
            }
        }
    }

    shutdown.cancel();
    refresher.await?;
    Ok(())
}

async fn prompt(input: &mut Input, label: &str) -> Result<Option<String>> {
    print!("{}", label);
    std::io::stdout().flush()?;
    Ok(input.next_line().await?)
}

async fn sign_in(auth: &AuthService, input: &mut Input) -> Result<Option<Session>> {
    loop {
        let Some(email) = prompt(input, "Email: ").await? else {
            return Ok(None);
        };
        let Some(password) = prompt(input, "Password: ").await? else {
            return Ok(None);
        };

        match auth.sign_in(&email, &password).await {
            Ok(session) => return Ok(Some(session)),
            Err(e @ (AuthError::MissingCredentials | AuthError::Backend(_))) => {
                println!("Login failed: {}", e);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn show_inbox(inbox: &Inbox, user_id: &str) -> Vec<ConversationSummary> {
    let summaries = match inbox.refresh(user_id).await {
        Ok(summaries) => summaries,
        Err(e) => {
            println!("Could not load conversations: {}", e);
            Vec::new()
        }
    };

    println!();
    if summaries.is_empty() {
        println!("No conversations yet.");
    }
    for (idx, summary) in summaries.iter().enumerate() {
        println!(
            "{:>3}. {} [{}] {}",
            idx + 1,
            summary.display_name,
            summary.last_message_at.with_timezone(&Local).format("%H:%M"),
            summary.last_message
        );
    }
    summaries
}

fn show_help(start: Option<&str>) {
    if start.is_some() {
        println!("Type 'a' to message the portfolio admin.");
    }
    println!("Pick a number, 'r' to refresh, '/push on|off', '/logout' or 'q' to quit.");
}

async fn next_insert(feed: &mut Option<Subscription>) -> Option<FeedEvent> {
    match feed {
        Some(feed) => feed.next_event().await,
        None => std::future::pending().await,
    }
}

/// Resolves once the session is gone, after a sign-out or a rejected refresh.
async fn signed_out(updates: &mut SessionUpdates) {
    if updates.wait_for(Option::is_none).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn set_push(db: &Database, settings: &mut ChatSettings, enabled: bool) {
    settings.register_push = enabled;
    match SettingsService::save(db, settings).await {
        Ok(()) if enabled => println!("Push notifications will be registered at sign-in."),
        Ok(()) => println!("Push notifications will no longer be registered."),
        Err(e) => println!("Could not save settings: {}", e),
    }
}

#[allow(clippy::too_many_arguments)]
async fn choose_conversation(
    backends: &Backends,
    inbox: &Inbox,
    db: &Database,
    settings: &mut ChatSettings,
    user_id: &str,
    auto_open: bool,
    updates: &mut SessionUpdates,
    input: &mut Input,
) -> Result<Choice> {
    let mut summaries = show_inbox(inbox, user_id).await;
    let mut start = inbox.start_target(user_id, &summaries);
    if let Some(target) = auto_open_target(auto_open, &start) {
        return Ok(Choice::Open(target));
    }
    show_help(start.as_deref());

    // Dropped on return, which releases it.
    let mut feed = match backends.realtime.subscribe(INBOX_CHANNEL).await {
        Ok(feed) => Some(feed),
        Err(e) => {
            tracing::warn!("Inbox will not update live: {}", e);
            None
        }
    };

    loop {
        tokio::select! {
            line = input.next_line() => {
                let Some(line) = line? else {
                    return Ok(Choice::Quit);
                };
                match line.trim() {
                    "q" => return Ok(Choice::Quit),
                    "/logout" => return Ok(Choice::Logout),
                    "/push on" => set_push(db, settings, true).await,
                    "/push off" => set_push(db, settings, false).await,
                    "a" if start.is_some() => {
                        if let Some(target) = start.take() {
                            return Ok(Choice::Open(target));
                        }
                    }
                    "r" | "" => {
                        summaries = show_inbox(inbox, user_id).await;
                        start = inbox.start_target(user_id, &summaries);
                        show_help(start.as_deref());
                    }
                    choice => match choice.parse::<usize>().ok().and_then(|n| summaries.get(n.wrapping_sub(1))) {
                        Some(summary) => return Ok(Choice::Open(summary.counterpart_id.clone())),
                        None => println!("No conversation {}", choice),
                    },
                }
            }
            event = next_insert(&mut feed), if feed.is_some() => match event {
                Some(FeedEvent::Insert(_)) => {
                    summaries = show_inbox(inbox, user_id).await;
                    start = inbox.start_target(user_id, &summaries);
                    show_help(start.as_deref());
                }
                Some(FeedEvent::Disconnected(_)) | None => feed = None,
            },
            _ = signed_out(updates) => return Ok(Choice::SignedOut),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn chat(
    backends: &Backends,
    auth: &Arc<AuthService>,
    config: &AppConfig,
    settings: &ChatSettings,
    session: &Session,
    counterpart: &str,
    updates: &mut SessionUpdates,
    input: &mut Input,
) -> Result<ChatExit> {
    let header = ProfileResolver::new(backends.profiles.clone(), config.admin_id.clone())
        .resolve(counterpart)
        .await;

    let pair = ParticipantPair::new(session.user.id.clone(), counterpart);
    let chat = match ChatSession::open(backends, pair, &config.admin_id, config.channel(), settings).await {
        Ok(chat) => chat.with_auth(auth.clone()),
        Err(e) => {
            println!("Could not open the conversation: {}", e);
            return Ok(ChatExit::Back);
        }
    };

    println!("\n--- {} --- (/back to leave, /image <url> to send a picture)", header.display_name);

    let (commands, commands_rx) = mpsc::channel(16);
    let mut transcript = Transcript::new(session.user.id.clone(), header.display_name);
    let task = tokio::spawn(chat.run(commands_rx, move |update| transcript.apply(update)));

    let exit = loop {
        tokio::select! {
            line = input.next_line() => match chat_input(line?.as_deref()) {
                ChatInput::Skip => {}
                ChatInput::Exit(exit) => break exit,
                ChatInput::Command(command) => {
                    if commands.send(command).await.is_err() {
                        break ChatExit::Back;
                    }
                }
            },
            _ = signed_out(updates) => break ChatExit::SignedOut,
        }
    };

    let _ = commands.send(ChatCommand::Close).await;
    task.await.context("Chat session ended abnormally")?;
    Ok(exit)
}

/// The conversation to jump into without asking. Leaving a chat must land in
/// the inbox, so only the first view after login qualifies.
fn auto_open_target(auto_open: bool, start: &Option<String>) -> Option<String> {
    start.clone().filter(|_| auto_open)
}

/// What a line typed in a conversation means. `None` is end of input.
fn chat_input(line: Option<&str>) -> ChatInput {
    let Some(line) = line else {
        return ChatInput::Exit(ChatExit::Quit);
    };
    match line.trim() {
        "" => ChatInput::Skip,
        "/back" => ChatInput::Exit(ChatExit::Back),
        "/reconnect" => ChatInput::Command(ChatCommand::Reconnect),
        text => ChatInput::Command(match text.strip_prefix("/image ") {
            Some(url) => ChatCommand::Send(Draft::attachment(url)),
            None => ChatCommand::Send(Draft::text(text)),
        }),
    }
}

/// Prints a conversation as its snapshots come in.
struct Transcript {
    local_user_id: String,
    counterpart_name: String,
    shown: HashSet<MessageId>,
    // Content of own messages printed while still local.
    unconfirmed: Vec<(String, Option<String>)>,
}

impl Transcript {
    fn new(local_user_id: String, counterpart_name: String) -> Self {
        Self {
            local_user_id,
            counterpart_name,
            shown: HashSet::new(),
            unconfirmed: Vec::new(),
        }
    }

    fn apply(&mut self, update: ChatUpdate) {
        match update {
            ChatUpdate::Messages(messages) => {
                for message in messages.iter().rev() {
                    self.show(message);
                }
            }
            ChatUpdate::Feed(FeedState::Live) => {}
            ChatUpdate::Feed(FeedState::Reconnecting) => println!("(reconnecting...)"),
            ChatUpdate::Feed(FeedState::Offline(reason)) => {
                println!("(offline: {}; /reconnect to retry)", reason)
            }
            ChatUpdate::SendFailed { error, .. } => println!("! Not delivered: {}", error),
            ChatUpdate::Rejected(reason) => println!("! {}", reason),
        }
    }

    fn show(&mut self, message: &Message) {
        if !self.shown.insert(message.id.clone()) {
            return;
        }

        let own = message.is_from(&self.local_user_id);
        let content = (message.body.clone(), message.attachment_url.clone());
        if own && message.id.is_local() {
            self.unconfirmed.push(content);
        } else if own {
            // The confirmed copy of a line already printed.
            if let Some(idx) = self.unconfirmed.iter().position(|c| *c == content) {
                self.unconfirmed.remove(idx);
                return;
            }
        }

        let who = if own { "You" } else { self.counterpart_name.as_str() };
        let time = message.created_at.with_timezone(&Local).format("%H:%M");
        match (message.display_text(), message.image_url()) {
            (Some(text), Some(url)) => println!("[{}] {}: {} [image: {}]", time, who, text, url),
            (Some(text), None) => println!("[{}] {}: {}", time, who, text),
            (None, Some(url)) => println!("[{}] {}: [image: {}]", time, who, url),
            (None, None) => {}
        }
    }
}
