//! Voice turns: capture, transcription, spoken replies, and resume.

use std::time::{Duration, Instant};

use wayfarer::voice::CaptureState;
use wayfarer::{ChatError, Sender, SessionEvent, TurnOutcome};

use crate::helpers::{
    FakeStt, ScriptedBackend, Scripted, drain_events, text_session, voice_session, wait_for_event,
};

#[tokio::test]
async fn text_only_session_has_no_voice_operations() {
    let (session, _) = text_session(ScriptedBackend::new());
    assert!(!session.has_voice());
    assert!(session.capture_state().is_none());
    assert!(matches!(
        session.start_listening(true).await,
        Err(ChatError::VoiceUnavailable)
    ));
    assert!(matches!(
        session.toggle_mute(),
        Err(ChatError::VoiceUnavailable)
    ));
}

#[tokio::test]
async fn silence_sends_the_utterance_and_the_reply_is_spoken() {
    let rig = voice_session(FakeStt::hearing("What's the weather?"), false);
    rig.backend.push_run(Scripted::reply("Sunny all day."));
    let mut events = rig.session.subscribe();

    rig.session.start_listening(true).await.unwrap();
    assert_eq!(
        rig.session.capture_state(),
        Some(CaptureState::Recording { muted: false })
    );

    let start = Instant::now();
    rig.microphone.speak(start, 0, 800, 0.4).await;
    rig.microphone.speak(start, 800, 3200, 0.0).await;

    wait_for_event(&mut events, |e| matches!(e, SessionEvent::ResumeListening)).await;

    let messages = rig.session.messages().await;
    let shown: Vec<(Sender, &str)> = messages.iter().map(|m| (m.sender, m.text.as_str())).collect();
    assert_eq!(
        shown[1..],
        [
            (Sender::User, "What's the weather?"),
            (Sender::Assistant, "Sunny all day."),
        ]
    );
    assert_eq!(rig.output.played(), vec!["Sunny all day.".to_owned()]);
    assert_eq!(rig.stt.calls(), 1);
    assert_eq!(rig.session.capture_state(), Some(CaptureState::Idle));
    assert!(!rig.session.is_speaking());
}

#[tokio::test]
async fn empty_transcript_drops_the_turn() {
    let rig = voice_session(FakeStt::hearing(""), false);
    let mut events = rig.session.subscribe();

    rig.session.start_listening(false).await.unwrap();
    rig.microphone.speak(Instant::now(), 0, 320, 0.4).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let outcome = rig.session.stop_listening().await.unwrap();
    assert_eq!(outcome, TurnOutcome::Ignored);
    assert_eq!(rig.stt.calls(), 1);
    assert!(rig.backend.run_calls().is_empty());
    assert_eq!(rig.session.messages().await.len(), 1);

    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(e, SessionEvent::TranscriptEmpty)));
    assert!(!events
        .iter()
        .any(|e| matches!(e, SessionEvent::MessageAppended(_))));
}

#[tokio::test]
async fn failed_transcription_is_reported_not_sent() {
    let rig = voice_session(FakeStt::failing(), false);
    let mut events = rig.session.subscribe();

    rig.session.start_listening(true).await.unwrap();
    rig.microphone.speak(Instant::now(), 0, 320, 0.4).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        rig.session.stop_listening().await.unwrap(),
        TurnOutcome::Ignored
    );
    let failed = wait_for_event(&mut events, |e| {
        matches!(e, SessionEvent::TranscriptionFailed { .. })
    })
    .await;
    assert!(matches!(
        failed,
        SessionEvent::TranscriptionFailed { ref error } if error.contains("unavailable")
    ));
    assert!(rig.backend.run_calls().is_empty());
}

#[tokio::test]
async fn muted_recording_buffers_nothing() {
    let rig = voice_session(FakeStt::hearing("should not be heard"), false);

    rig.session.start_listening(true).await.unwrap();
    assert!(rig.session.toggle_mute().unwrap());
    assert_eq!(
        rig.session.capture_state(),
        Some(CaptureState::Recording { muted: true })
    );

    rig.microphone.speak(Instant::now(), 0, 4000, 0.0).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rig.session.is_recording(), "muted silence must not end the turn");

    assert_eq!(
        rig.session.stop_listening().await.unwrap(),
        TurnOutcome::Ignored
    );
    assert_eq!(rig.stt.calls(), 0);
}

#[tokio::test]
async fn second_start_while_recording_is_rejected() {
    let rig = voice_session(FakeStt::hearing("hi"), false);
    rig.session.start_listening(false).await.unwrap();
    assert!(matches!(
        rig.session.start_listening(false).await,
        Err(ChatError::RecordingActive)
    ));
    let _ = rig.session.stop_listening().await;
}

#[tokio::test]
async fn typed_text_while_recording_is_spoken() {
    let rig = voice_session(FakeStt::hearing("unused"), false);
    rig.backend.push_run(Scripted::reply("Heard you."));

    rig.session.start_listening(false).await.unwrap();
    rig.session.send_user_text("Typing instead").await;

    assert_eq!(rig.output.played(), vec!["Heard you.".to_owned()]);
    let _ = rig.session.stop_listening().await;
}

#[tokio::test]
async fn playback_failure_keeps_the_text_reply() {
    let rig = voice_session(FakeStt::hearing("unused"), true);
    rig.backend.push_run(Scripted::reply("You won't hear this."));
    let mut events = rig.session.subscribe();

    let outcome = rig.session.respond("Say something", true).await;
    assert!(matches!(outcome, TurnOutcome::Replied(ref m) if m.text == "You won't hear this."));
    assert!(rig.output.played().is_empty());
    assert!(!rig.session.is_speaking());

    let events = drain_events(&mut events);
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::PlaybackFailed { .. })));
    assert!(!events
        .iter()
        .any(|e| matches!(e, SessionEvent::ResumeListening)));
}
