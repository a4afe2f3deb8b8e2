//! Terminal chat client for wayfarer.
//!
//! Reads lines from stdin: plain text is sent to the assistant, and lines
//! starting with `/` are commands (see `/help`). The transcript goes to
//! stdout; tracing output goes to stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wayfarer::audio::capture::CpalMicrophone;
use wayfarer::audio::playback::CpalPlayback;
use wayfarer::auth::StaticIdentity;
use wayfarer::backend::LangGraphBackend;
use wayfarer::dashboard::{Dashboard, HeadlessMap};
use wayfarer::speech::ElevenLabsClient;
use wayfarer::store::{MemoryThreadStore, SupabaseThreadStore, ThreadStore};
use wayfarer::{AssistantConfig, ChatError, ChatSession, Message, SessionEvent, VoiceServices};

/// Terminal chat and voice client for a travel assistant.
#[derive(Parser, Debug)]
#[command(name = "wayfarer", version, about)]
struct Cli {
    /// TOML config (default: the user config directory).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Signed-in user id; overrides the config and `WAYFARER_USER_ID`.
    #[arg(short, long)]
    user: Option<String>,

    /// Keep thread rows in memory only.
    #[arg(long)]
    offline: bool,

    /// List audio devices and exit.
    #[arg(long)]
    devices: bool,
}

fn print_help() {
    println!("Commands:");
    println!("  /voice       start voice mode (listens again after each reply)");
    println!("  /stop        stop listening and send what was heard");
    println!("  /mute        mute or unmute the microphone");
    println!("  /new         start a new chat");
    println!("  /history     list chats");
    println!("  /select N    switch to chat N from /history");
    println!("  /quit        exit");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wayfarer=info")),
        )
        .init();

    let args = Cli::parse();

    if args.devices {
        return list_devices();
    }

    let mut config = AssistantConfig::load(args.config.as_deref())?;
    config.apply_env();
    if let Some(user) = args.user {
        config.store.user_id = Some(user);
    }

    let identity = match config.store.user_id.clone() {
        Some(user) => StaticIdentity::signed_in(user),
        None => StaticIdentity::anonymous(),
    };

    let dashboard = match Dashboard::open(&identity, Arc::new(HeadlessMap), &config.map).await {
        Ok(dashboard) => dashboard,
        Err(ChatError::NotAuthorized) => {
            println!("Not authorized. Please login first.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let session = build_session(&config, identity, args.offline);
    let voice_mode = Arc::new(AtomicBool::new(false));
    tokio::spawn(print_events(session.clone(), Arc::clone(&voice_mode)));

    println!("Wayfarer v{} ({})", env!("CARGO_PKG_VERSION"), dashboard.title());
    if !session.has_voice() {
        println!("(voice disabled: no speech service key configured)");
    }
    session.initialize().await;
    print_transcript(&session.messages().await);
    println!("Type /help for commands.");

    run_repl(&session, &voice_mode).await;

    if session.is_recording() {
        let _ = session.stop_listening().await;
    }
    info!("wayfarer shut down");
    Ok(())
}

fn build_session(config: &AssistantConfig, identity: StaticIdentity, offline: bool) -> ChatSession {
    let store: Arc<dyn ThreadStore> = match SupabaseThreadStore::from_config(&config.store) {
        Some(store) if !offline => Arc::new(store),
        _ => {
            info!("thread rows kept in memory");
            Arc::new(MemoryThreadStore::new())
        }
    };

    let session = ChatSession::new(
        config.chat.clone(),
        Arc::new(LangGraphBackend::new(&config.backend)),
        store,
        Arc::new(identity),
    );

    match ElevenLabsClient::new(&config.speech) {
        Ok(client) => {
            let client = Arc::new(client);
            session.with_voice(VoiceServices {
                stt: client.clone(),
                tts: client,
                output: Arc::new(CpalPlayback::new(&config.audio)),
                microphone: Arc::new(CpalMicrophone::new(&config.audio)),
                silence: config.silence.clone(),
            })
        }
        Err(e) => {
            warn!(error = %e, "voice disabled");
            session
        }
    }
}

async fn run_repl(session: &ChatSession, voice_mode: &Arc<AtomicBool>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "stdin closed");
                    break;
                }
            },
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "/quit" | "/exit" => break,
            "/help" => print_help(),
            "/voice" => {
                voice_mode.store(true, Ordering::Release);
                match session.start_listening(true).await {
                    Ok(()) => println!("(listening; pause to send)"),
                    Err(e) => println!("(cannot listen: {e})"),
                }
            }
            "/stop" => {
                voice_mode.store(false, Ordering::Release);
                let session = session.clone();
                tokio::spawn(async move {
                    if let Err(e) = session.stop_listening().await {
                        println!("(cannot stop: {e})");
                    }
                });
            }
            "/mute" => match session.toggle_mute() {
                Ok(true) => println!("(muted)"),
                Ok(false) => println!("(unmuted)"),
                Err(e) => println!("({e})"),
            },
            "/new" => {
                let entry = session.new_chat().await;
                if entry.thread_id.is_none() {
                    println!("(backend unreachable; chat is local only)");
                }
            }
            "/history" => {
                for (index, entry) in session.history().await.iter().enumerate() {
                    println!(
                        "{:>3}. {}  {}  [{}]",
                        index + 1,
                        entry.title,
                        entry.last_message,
                        entry.timestamp.format("%Y-%m-%d %H:%M")
                    );
                }
            }
            "/select" => {
                let history = session.history().await;
                let choice = rest
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| history.get(i));
                match choice {
                    Some(entry) => session.select_chat(&entry.id).await,
                    None => println!("(no such chat; see /history)"),
                }
            }
            _ if command.starts_with('/') => println!("(unknown command {command}; try /help)"),
            _ => {
                let session = session.clone();
                let text = line.to_owned();
                tokio::spawn(async move {
                    session.send_user_text(&text).await;
                });
            }
        }
    }
}

async fn print_events(session: ChatSession, voice_mode: Arc<AtomicBool>) {
    let mut events = session.subscribe();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event printer fell behind");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match event {
            SessionEvent::MessageAppended(message) => print_message(&message),
            SessionEvent::TranscriptReset { .. } => print_transcript(&session.messages().await),
            SessionEvent::TypingChanged { active: true } => println!("  ..."),
            SessionEvent::TranscriptEmpty => println!("(didn't catch that)"),
            SessionEvent::TranscriptionFailed { error } => println!("(transcription failed: {error})"),
            SessionEvent::PlaybackFailed { error } => println!("(could not speak reply: {error})"),
            SessionEvent::PersistenceFailed { error, .. } => println!("(chat not saved: {error})"),
            SessionEvent::ResumeListening => {
                if voice_mode.load(Ordering::Acquire) && !session.is_recording() {
                    if let Err(e) = session.start_listening(true).await {
                        println!("(cannot listen: {e})");
                    }
                }
            }
            SessionEvent::TypingChanged { active: false }
            | SessionEvent::ThreadCreated(_)
            | SessionEvent::ThreadPersisted(_)
            | SessionEvent::StaleReplyDiscarded { .. } => {}
        }
    }
}

fn print_message(message: &Message) {
    let who = match message.sender {
        wayfarer::Sender::User => "you",
        wayfarer::Sender::Assistant => "assistant",
        wayfarer::Sender::System => "system",
    };
    println!("[{}] {who}: {}", message.timestamp.format("%H:%M"), message.text);
}

fn print_transcript(messages: &[Message]) {
    println!("────────");
    for message in messages {
        print_message(message);
    }
}

fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in CpalMicrophone::list_input_devices()? {
        println!("  - {name}");
    }

    println!("\nOutput devices:");
    for name in CpalPlayback::list_output_devices()? {
        println!("  - {name}");
    }
    Ok(())
}
