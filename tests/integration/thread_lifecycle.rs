//! Thread creation, persistence, history loading, and chat switching.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use wayfarer::auth::StaticIdentity;
use wayfarer::backend::{BackendMessage, MessageContent, MessageKind};
use wayfarer::message::{GREETING, NEW_CHAT_TITLE, ThreadRecord, WELCOME_CHAT_ID};
use wayfarer::store::{MemoryThreadStore, ThreadStore as _};
use wayfarer::{ChatError, Sender, SessionEvent, TurnOutcome};

use crate::helpers::{
    Call, FailingStore, ScriptedBackend, Scripted, USER, session_with, text_session,
    wait_for_event,
};

fn row(thread: &str, user: &str, title: &str, age_minutes: i64) -> ThreadRecord {
    ThreadRecord {
        thread_id: thread.into(),
        user_id: user.into(),
        title: title.into(),
        last_message: "Start a conversation...".into(),
        created_at: Utc::now() - Duration::minutes(age_minutes),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Thread creation and persistence
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn created_thread_is_active_and_saved_for_the_user() {
    let backend = ScriptedBackend::new();
    let (session, store) = text_session(backend);
    let mut events = session.subscribe();

    let thread = session.create_thread().await.unwrap();
    assert_eq!(session.active_thread().await, Some(thread.clone()));
    assert_eq!(session.thread_ids().await, vec![thread.clone()]);

    wait_for_event(&mut events, |e| matches!(e, SessionEvent::ThreadPersisted(_))).await;
    let rows = store.list_for_user(USER).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].thread_id, thread.as_str());
    assert_eq!(rows[0].title, NEW_CHAT_TITLE);
}

#[tokio::test]
async fn failed_save_is_reported_and_thread_stays_usable() {
    let backend = ScriptedBackend::new();
    backend.push_run(Scripted::reply("Still here"));
    let session = session_with(
        backend,
        Arc::new(FailingStore),
        StaticIdentity::signed_in(USER),
    );
    let mut events = session.subscribe();

    let thread = session.create_thread().await.unwrap();
    let failed = wait_for_event(&mut events, |e| {
        matches!(e, SessionEvent::PersistenceFailed { .. })
    })
    .await;
    assert!(matches!(
        failed,
        SessionEvent::PersistenceFailed { ref thread_id, ref error }
            if *thread_id == thread && error.contains("read-only")
    ));

    session.send_user_text("Hello").await;
    assert_eq!(session.messages().await.pop().unwrap().text, "Still here");
}

#[tokio::test]
async fn anonymous_thread_is_not_saved() {
    let backend = ScriptedBackend::new();
    let store = MemoryThreadStore::new();
    let session = session_with(backend, Arc::new(store.clone()), StaticIdentity::anonymous());
    let mut events = session.subscribe();

    session.create_thread().await.unwrap();
    wait_for_event(&mut events, |e| {
        matches!(e, SessionEvent::PersistenceFailed { .. })
    })
    .await;
    assert!(store.is_empty().await);
}

// ────────────────────────────────────────────────────────────────────────────
// History
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn history_lists_only_this_users_threads_newest_first() {
    let backend = ScriptedBackend::new();
    let (session, store) = text_session(backend);
    store.push(row("t-old", USER, "Groceries", 60)).await;
    store.push(row("t-other", "u-2", "Not mine", 5)).await;
    store.push(row("t-new", USER, "Weekend trip", 1)).await;

    let entries = session.load_history().await.unwrap();
    let titles: Vec<&str> = entries.iter().map(|e| e.title.as_str()).collect();
    assert_eq!(titles, vec!["Weekend trip", "Groceries"]);
    assert_eq!(session.history().await, entries);
    assert!(entries.iter().all(|e| e.thread_id.is_some()));
    assert_eq!(session.thread_ids().await.len(), 2);
}

#[tokio::test]
async fn history_needs_a_signed_in_user() {
    let backend = ScriptedBackend::new();
    let session = session_with(
        backend,
        Arc::new(MemoryThreadStore::new()),
        StaticIdentity::anonymous(),
    );

    assert!(matches!(
        session.load_history().await,
        Err(ChatError::NotAuthorized)
    ));
    let history = session.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, WELCOME_CHAT_ID);
}

#[tokio::test]
async fn initialize_opens_a_thread_and_survives_a_broken_store() {
    let backend = ScriptedBackend::new();
    let session = session_with(
        backend.clone(),
        Arc::new(FailingStore),
        StaticIdentity::signed_in(USER),
    );

    let thread = session.initialize().await;
    assert!(thread.is_some());
    assert_eq!(backend.threads_created(), 1);
    assert_eq!(session.history().await[0].id, WELCOME_CHAT_ID);
}

// ────────────────────────────────────────────────────────────────────────────
// Switching chats
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn selecting_a_chat_without_thread_resets_to_greeting() {
    let backend = ScriptedBackend::new();
    backend.fail_thread_creation(true);
    let (session, _) = text_session(backend);
    session.send_user_text("Hello").await;
    assert_eq!(session.messages().await.len(), 3);

    session.select_chat(WELCOME_CHAT_ID).await;
    let messages = session.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, GREETING);
    assert!(session.active_thread().await.is_none());

    session.select_chat("no-such-chat").await;
    assert_eq!(session.messages().await.len(), 1);
}

#[tokio::test]
async fn lazily_created_thread_is_remembered_by_its_chat() {
    let backend = ScriptedBackend::new();
    backend.fail_thread_creation(true);
    let (session, _) = text_session(backend.clone());
    let entry = session.new_chat().await;
    assert!(entry.thread_id.is_none());

    backend.fail_thread_creation(false);
    backend.push_run(Scripted::reply("Noted"));
    backend.set_state(
        "thread-1",
        Scripted::Messages(vec![
            BackendMessage::text(MessageKind::Human, "Remember the ferry times"),
            BackendMessage::text(MessageKind::Ai, "Noted"),
        ]),
    );
    session.send_user_text("Remember the ferry times").await;

    let history = session.history().await;
    assert_eq!(history[0].id, entry.id);
    assert_eq!(
        history[0].thread_id.as_ref().map(|t| t.as_str()),
        Some("thread-1")
    );

    session.select_chat(WELCOME_CHAT_ID).await;
    session.select_chat(&entry.id).await;
    let texts: Vec<String> = session
        .messages()
        .await
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert_eq!(texts, vec!["Remember the ferry times", "Noted"]);
}

#[tokio::test]
async fn switching_chats_while_a_thread_is_created_keeps_the_selected_thread() {
    let backend = ScriptedBackend::new();
    backend.set_state(
        "t-x",
        Scripted::Messages(vec![
            BackendMessage::text(MessageKind::Human, "Book a table"),
            BackendMessage::text(MessageKind::Ai, "Done for 7pm."),
        ]),
    );
    backend.push_run(Scripted::reply("Answer for the old chat"));
    backend.push_run(Scripted::reply("Answer for chat x"));
    let (session, store) = text_session(backend.clone());
    store.push(row("t-x", USER, "Dinner", 4)).await;
    session.load_history().await.unwrap();

    let release = backend.hold_next(Call::CreateThread);
    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.send_user_text("first").await })
    };
    backend.wait_for(Call::CreateThread).await;

    session.select_chat("t-x").await;
    release.send(()).unwrap();
    assert_eq!(pending.await.unwrap(), TurnOutcome::Discarded);

    assert_eq!(session.active_chat().await, "t-x");
    assert_eq!(
        session.active_thread().await.map(|t| t.to_string()),
        Some("t-x".to_owned())
    );
    assert!(session.thread_ids().await.iter().any(|t| t.as_str() == "thread-1"));

    session.send_user_text("second").await;
    let runs: Vec<(String, String)> = backend
        .run_calls()
        .into_iter()
        .map(|(thread, text)| (thread.to_string(), text))
        .collect();
    assert_eq!(
        runs,
        vec![
            ("thread-1".to_owned(), "first".to_owned()),
            ("t-x".to_owned(), "second".to_owned()),
        ]
    );
    assert_eq!(session.messages().await.pop().unwrap().text, "Answer for chat x");
}

#[tokio::test]
async fn a_load_finishing_after_another_switch_is_dropped() {
    let backend = ScriptedBackend::new();
    backend.set_state(
        "t-a",
        Scripted::Messages(vec![BackendMessage::text(MessageKind::Ai, "From chat A")]),
    );
    backend.set_state(
        "t-b",
        Scripted::Messages(vec![BackendMessage::text(MessageKind::Ai, "From chat B")]),
    );
    let (session, store) = text_session(backend.clone());
    store.push(row("t-a", USER, "A", 2)).await;
    store.push(row("t-b", USER, "B", 1)).await;
    session.load_history().await.unwrap();

    let release = backend.hold_next(Call::State);
    let slow = {
        let session = session.clone();
        tokio::spawn(async move { session.select_chat("t-a").await })
    };
    backend.wait_for(Call::State).await;

    session.select_chat("t-b").await;
    release.send(()).unwrap();
    slow.await.unwrap();

    let messages = session.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "From chat B");
    assert_eq!(session.active_chat().await, "t-b");
    assert_eq!(
        session.active_thread().await.map(|t| t.to_string()),
        Some("t-b".to_owned())
    );
}

#[tokio::test]
async fn selecting_a_saved_chat_rebuilds_its_transcript() {
    let backend = ScriptedBackend::new();
    backend.set_state(
        "t-trip",
        Scripted::Messages(vec![
            BackendMessage::text(MessageKind::Human, "Find me a hotel"),
            BackendMessage {
                kind: MessageKind::Ai,
                content: MessageContent::from_value(json!([
                    {"type": "text", "text": "Here are three options."}
                ])),
                timestamp: None,
            },
            BackendMessage {
                kind: MessageKind::Ai,
                content: MessageContent::from_value(json!({"weird": true})),
                timestamp: None,
            },
            BackendMessage::text(MessageKind::Tool, ""),
            BackendMessage::text(MessageKind::System, "Summary saved"),
        ]),
    );
    let (session, store) = text_session(backend);
    store.push(row("t-trip", USER, "Trip", 3)).await;
    session.load_history().await.unwrap();

    session.select_chat("t-trip").await;
    let messages = session.messages().await;
    let shown: Vec<(&str, Sender, &str)> = messages
        .iter()
        .map(|m| (m.id.as_str(), m.sender, m.text.as_str()))
        .collect();
    assert_eq!(
        shown,
        vec![
            ("t-trip-0", Sender::User, "Find me a hotel"),
            ("t-trip-1", Sender::Assistant, "Here are three options."),
            ("t-trip-4", Sender::System, "Summary saved"),
        ]
    );
    assert_eq!(
        session.active_thread().await.map(|t| t.to_string()),
        Some("t-trip".to_owned())
    );
}

#[tokio::test]
async fn unloadable_or_empty_thread_shows_greeting() {
    let backend = ScriptedBackend::new();
    backend.set_state("t-empty", Scripted::Messages(Vec::new()));
    // "t-broken" has no scripted state, so fetching it fails.
    let (session, store) = text_session(backend);
    store.push(row("t-empty", USER, "Empty", 2)).await;
    store.push(row("t-broken", USER, "Broken", 1)).await;
    session.load_history().await.unwrap();

    for chat in ["t-empty", "t-broken"] {
        session.select_chat(chat).await;
        let messages = session.messages().await;
        assert_eq!(messages.len(), 1, "chat {chat}");
        assert_eq!(messages[0].text, GREETING);
        assert_eq!(session.active_chat().await, chat);
    }
}

#[tokio::test]
async fn new_chat_is_prepended_and_shown() {
    let backend = ScriptedBackend::new();
    let (session, _) = text_session(backend);

    let entry = session.new_chat().await;
    assert_eq!(entry.title, NEW_CHAT_TITLE);
    assert!(entry.thread_id.is_some());

    let history = session.history().await;
    assert_eq!(history[0], entry);
    assert_eq!(history.len(), 2);
    assert_eq!(session.active_chat().await, entry.id);
    assert_eq!(session.active_thread().await, entry.thread_id);
    assert_eq!(session.messages().await[0].text, GREETING);
}

#[tokio::test]
async fn new_chat_without_backend_is_local_only() {
    let backend = ScriptedBackend::new();
    backend.fail_thread_creation(true);
    let (session, _) = text_session(backend);

    let entry = session.new_chat().await;
    assert!(entry.thread_id.is_none());
    assert!(session.active_thread().await.is_none());
    assert_eq!(session.history().await[0].id, entry.id);

    // Selecting it later still just shows the greeting.
    session.select_chat(&entry.id).await;
    assert_eq!(session.messages().await.len(), 1);
}
