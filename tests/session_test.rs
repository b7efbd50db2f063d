//! End-to-end session engine tests with scripted providers
//!
//! Drives the per-call actor through the media-facing seed scenarios:
//! greeting playback, endpointing, barge-in, tool calls, provider failure,
//! and duration/teardown bookkeeping.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use voiceline::config::ProviderKeys;
use voiceline::providers::{
    LanguageModel, LlmMessage, LlmResponse, LlmToolSpec, ProviderError, SpeechToText,
    TextToSpeech, ToolCallRequest,
};
use voiceline::session::{
    ClientControl, Outbound, ServerEvent, Session, SessionControl, SessionParams, SessionRegistry,
};
use voiceline::storage::CallStore;
use voiceline::types::{Assistant, Call, CallKind, FirstMessageMode};

// ─── Scripted providers ──────────────────────────────────────

struct ScriptedStt {
    results: Mutex<VecDeque<Result<String, String>>>,
}

impl ScriptedStt {
    fn new(results: Vec<Result<&str, &str>>) -> Self {
        Self {
            results: Mutex::new(
                results
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
        }
    }
}

#[async_trait::async_trait]
impl SpeechToText for ScriptedStt {
    async fn transcribe(&self, _pcm: &[u8]) -> Result<String, ProviderError> {
        match self.results.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(ProviderError::new("mock-stt", message)),
            None => Ok(String::new()),
        }
    }
}

struct ScriptedLlm {
    responses: Mutex<VecDeque<LlmResponse>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedLlm {
    fn new(responses: Vec<LlmResponse>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait::async_trait]
impl LanguageModel for ScriptedLlm {
    async fn generate(
        &self,
        _messages: &[LlmMessage],
        _tools: &[LlmToolSpec],
    ) -> Result<LlmResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::new("mock-llm", "no scripted response left"))
    }
}

struct FixedTts {
    bytes: usize,
}

#[async_trait::async_trait]
impl TextToSpeech for FixedTts {
    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>, ProviderError> {
        Ok(vec![0u8; self.bytes])
    }

    fn sample_rate(&self) -> u32 {
        24_000
    }
}

fn content(text: &str) -> LlmResponse {
    LlmResponse {
        content: Some(text.to_string()),
        tool_calls: Vec::new(),
        usage: None,
    }
}

fn tool_call(name: &str, arguments: serde_json::Value) -> LlmResponse {
    LlmResponse {
        content: None,
        tool_calls: vec![ToolCallRequest {
            id: "call_abc".to_string(),
            name: name.to_string(),
            arguments,
        }],
        usage: None,
    }
}

// ─── Harness ─────────────────────────────────────────────────

struct Harness {
    control: mpsc::Sender<SessionControl>,
    outbound: mpsc::Receiver<Outbound>,
    registry: Arc<SessionRegistry>,
    store: CallStore,
    _recordings: tempfile::TempDir,
}

async fn spawn_session(
    assistant: Assistant,
    stt: Box<dyn SpeechToText>,
    llm: Box<dyn LanguageModel>,
    tts: Box<dyn TextToSpeech>,
) -> Harness {
    let store = CallStore::open_in_memory().unwrap();
    let call = Call::new(
        "call_test".to_string(),
        "org_test".to_string(),
        CallKind::Web,
        assistant.id.clone(),
    );
    store.create_call(&call).await.unwrap();

    let registry = SessionRegistry::new();
    let recordings = tempfile::tempdir().unwrap();
    let (outbound_tx, outbound_rx) = mpsc::channel(256);
    let params = SessionParams {
        call_id: call.id.clone(),
        org_id: call.org_id.clone(),
        assistant,
        egress_sample_rate: 24_000,
        store: store.clone(),
        registry: registry.clone(),
        provider_keys: ProviderKeys::default(),
        recordings_dir: recordings.path().to_path_buf(),
    };
    let (session, handle, control_rx) = Session::with_providers(params, outbound_tx, stt, llm, tts);
    registry.register(handle.clone()).await.unwrap();
    tokio::spawn(session.run(control_rx));

    Harness {
        control: handle.sender(),
        outbound: outbound_rx,
        registry,
        store,
        _recordings: recordings,
    }
}

fn fast_assistant() -> Assistant {
    Assistant {
        id: "asst_test".to_string(),
        name: "Test".to_string(),
        silence_timeout_ms: 50,
        first_message: None,
        first_message_mode: FirstMessageMode::AssistantWaitsForUser,
        ..Default::default()
    }
}

fn voice_frame() -> Vec<u8> {
    (0..4096)
        .flat_map(|i: i32| {
            let s: i16 = if i % 2 == 0 { 1000 } else { -1000 };
            s.to_le_bytes()
        })
        .collect()
}

fn silence_frame() -> Vec<u8> {
    vec![0u8; 8192]
}

/// Next server event, skipping audio frames
async fn next_event(harness: &mut Harness) -> ServerEvent {
    loop {
        let out = tokio::time::timeout(Duration::from_secs(3), harness.outbound.recv())
            .await
            .expect("timed out waiting for event")
            .expect("outbound channel closed");
        match out {
            Outbound::Event(event) => return event,
            Outbound::Audio(_) | Outbound::Close => continue,
        }
    }
}

/// Speak one utterance: voice, then silence past the endpointing timeout
async fn speak_utterance(harness: &Harness) {
    harness
        .control
        .send(SessionControl::Audio(voice_frame()))
        .await
        .unwrap();
    harness
        .control
        .send(SessionControl::Audio(silence_frame()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    harness
        .control
        .send(SessionControl::Audio(silence_frame()))
        .await
        .unwrap();
}

// ─── Scenarios ───────────────────────────────────────────────

#[tokio::test]
async fn happy_path_greeting_then_turn() {
    let assistant = Assistant {
        first_message: Some("Hi.".to_string()),
        first_message_mode: FirstMessageMode::AssistantSpeaksFirst,
        ..fast_assistant()
    };
    let (llm, _) = ScriptedLlm::new(vec![content("It is 3 pm.")]);
    let mut harness = spawn_session(
        assistant,
        Box::new(ScriptedStt::new(vec![Ok("what time is it")])),
        Box::new(llm),
        Box::new(FixedTts { bytes: 4800 }),
    )
    .await;

    assert!(matches!(next_event(&mut harness).await, ServerEvent::CallStarted { .. }));
    assert_eq!(
        next_event(&mut harness).await,
        ServerEvent::AssistantMessage { text: "Hi.".into() }
    );
    assert_eq!(next_event(&mut harness).await, ServerEvent::AssistantSpeaking);
    assert_eq!(next_event(&mut harness).await, ServerEvent::AssistantAudioDone);

    // The greeting is persisted once, at t=0
    let messages = harness.store.messages_for_call("call_test").await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "Hi.");
    assert_eq!(messages[0].timestamp_ms, 0);

    speak_utterance(&harness).await;
    assert_eq!(next_event(&mut harness).await, ServerEvent::SpeechStarted);
    assert_eq!(next_event(&mut harness).await, ServerEvent::SpeechEnded);
    assert_eq!(next_event(&mut harness).await, ServerEvent::AssistantThinking);
    assert_eq!(
        next_event(&mut harness).await,
        ServerEvent::TranscriptFinal { text: "what time is it".into() }
    );
    assert_eq!(
        next_event(&mut harness).await,
        ServerEvent::AssistantMessage { text: "It is 3 pm.".into() }
    );
    assert_eq!(next_event(&mut harness).await, ServerEvent::AssistantSpeaking);
    assert_eq!(next_event(&mut harness).await, ServerEvent::AssistantAudioDone);

    harness
        .control
        .send(SessionControl::Client(ClientControl::End))
        .await
        .unwrap();
    assert!(matches!(
        next_event(&mut harness).await,
        ServerEvent::CallEnded { reason, .. } if reason == "client-request"
    ));

    // Teardown finalises the row and empties the registry
    tokio::time::sleep(Duration::from_millis(50)).await;
    let call = harness.store.get_call("call_test").await.unwrap().unwrap();
    assert_eq!(call.ended_reason.as_deref(), Some("client-request"));
    assert!(call.duration_seconds.is_some());
    assert!(call.user_recording_uri.is_some());
    assert_eq!(harness.registry.len().await, 0);
}

#[tokio::test]
async fn interruption_invalidates_playback() {
    // Long audio keeps the session speaking while the user barges in
    let (llm, _) = ScriptedLlm::new(vec![content("Let me explain at length..."), content("Sure.")]);
    let mut harness = spawn_session(
        fast_assistant(),
        Box::new(ScriptedStt::new(vec![Ok("tell me everything"), Ok("never mind")])),
        Box::new(llm),
        Box::new(FixedTts { bytes: 480_000 }), // 10 s at 24 kHz
    )
    .await;

    assert!(matches!(next_event(&mut harness).await, ServerEvent::CallStarted { .. }));
    speak_utterance(&harness).await;
    loop {
        if next_event(&mut harness).await == ServerEvent::AssistantSpeaking {
            break;
        }
    }

    // Barge in while speaking
    harness
        .control
        .send(SessionControl::Audio(voice_frame()))
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut harness).await,
        ServerEvent::AssistantInterrupted {
            clear_audio: true,
            reason: "user-speech".into()
        }
    );
    assert_eq!(next_event(&mut harness).await, ServerEvent::SpeechStarted);

    // No audio.done for the interrupted synthesis; the new utterance
    // endpoints and gets a normal response
    harness
        .control
        .send(SessionControl::Audio(silence_frame()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    harness
        .control
        .send(SessionControl::Audio(silence_frame()))
        .await
        .unwrap();

    assert_eq!(next_event(&mut harness).await, ServerEvent::SpeechEnded);
    assert_eq!(next_event(&mut harness).await, ServerEvent::AssistantThinking);
    assert_eq!(
        next_event(&mut harness).await,
        ServerEvent::TranscriptFinal { text: "never mind".into() }
    );
    assert_eq!(
        next_event(&mut harness).await,
        ServerEvent::AssistantMessage { text: "Sure.".into() }
    );
}

#[tokio::test]
async fn transfer_tool_stops_the_turn() {
    let (llm, llm_calls) = ScriptedLlm::new(vec![tool_call(
        "transferCall",
        json!({"destination": "+15551234"}),
    )]);
    let mut harness = spawn_session(
        fast_assistant(),
        Box::new(ScriptedStt::new(vec![Ok("transfer me to sales")])),
        Box::new(llm),
        Box::new(FixedTts { bytes: 4800 }),
    )
    .await;

    assert!(matches!(next_event(&mut harness).await, ServerEvent::CallStarted { .. }));
    speak_utterance(&harness).await;
    loop {
        let event = next_event(&mut harness).await;
        if let ServerEvent::ToolCalled { name, .. } = &event {
            assert_eq!(name, "transferCall");
            break;
        }
    }
    assert_eq!(
        next_event(&mut harness).await,
        ServerEvent::TransferStarted { destination: "+15551234".into() }
    );

    // No synthesis on this turn, and the model is not re-invoked
    assert_eq!(llm_calls.load(Ordering::SeqCst), 1);
    harness
        .control
        .send(SessionControl::Client(ClientControl::End))
        .await
        .unwrap();
    assert!(matches!(next_event(&mut harness).await, ServerEvent::CallEnded { .. }));
}

#[tokio::test]
async fn end_call_tool_ends_the_session() {
    let (llm, _) = ScriptedLlm::new(vec![tool_call("endCall", json!({"reason": "done"}))]);
    let mut harness = spawn_session(
        fast_assistant(),
        Box::new(ScriptedStt::new(vec![Ok("goodbye")])),
        Box::new(llm),
        Box::new(FixedTts { bytes: 4800 }),
    )
    .await;

    assert!(matches!(next_event(&mut harness).await, ServerEvent::CallStarted { .. }));
    speak_utterance(&harness).await;
    loop {
        let event = next_event(&mut harness).await;
        if matches!(event, ServerEvent::ToolCalled { .. }) {
            break;
        }
    }
    assert!(matches!(
        next_event(&mut harness).await,
        ServerEvent::CallEnded { reason, .. } if reason == "assistant-ended"
    ));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let call = harness.store.get_call("call_test").await.unwrap().unwrap();
    assert_eq!(call.ended_reason.as_deref(), Some("assistant-ended"));
}

#[tokio::test]
async fn tool_round_feeds_results_back() {
    let (llm, llm_calls) = ScriptedLlm::new(vec![
        tool_call("pressDigits", json!({"digits": "1"})),
        content("Pressed it."),
    ]);
    let mut harness = spawn_session(
        fast_assistant(),
        Box::new(ScriptedStt::new(vec![Ok("press one")])),
        Box::new(llm),
        Box::new(FixedTts { bytes: 4800 }),
    )
    .await;

    assert!(matches!(next_event(&mut harness).await, ServerEvent::CallStarted { .. }));
    speak_utterance(&harness).await;
    loop {
        let event = next_event(&mut harness).await;
        if matches!(event, ServerEvent::ToolCalled { .. }) {
            break;
        }
    }
    let result = next_event(&mut harness).await;
    match result {
        ServerEvent::ToolResult { name, result } => {
            assert_eq!(name, "pressDigits");
            assert_eq!(result["action"], "dtmf");
        }
        other => panic!("expected tool.result, got {:?}", other),
    }
    // A tool-only response never emits assistant.message; generation is
    // re-invoked with the tool output
    assert_eq!(
        next_event(&mut harness).await,
        ServerEvent::AssistantMessage { text: "Pressed it.".into() }
    );
    assert_eq!(llm_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn stt_failure_is_recoverable() {
    let (llm, llm_calls) = ScriptedLlm::new(vec![content("Second time lucky.")]);
    let mut harness = spawn_session(
        fast_assistant(),
        Box::new(ScriptedStt::new(vec![Err("HTTP 500"), Ok("hello again")])),
        Box::new(llm),
        Box::new(FixedTts { bytes: 4800 }),
    )
    .await;

    assert!(matches!(next_event(&mut harness).await, ServerEvent::CallStarted { .. }));
    speak_utterance(&harness).await;
    assert_eq!(next_event(&mut harness).await, ServerEvent::SpeechStarted);
    assert_eq!(next_event(&mut harness).await, ServerEvent::SpeechEnded);
    assert_eq!(next_event(&mut harness).await, ServerEvent::AssistantThinking);
    // The failed turn surfaces an error, closes with audio.done, no message
    assert!(matches!(
        next_event(&mut harness).await,
        ServerEvent::Error { code, .. } if code == "provider_error"
    ));
    assert_eq!(next_event(&mut harness).await, ServerEvent::AssistantAudioDone);
    assert_eq!(llm_calls.load(Ordering::SeqCst), 0);

    // The call is still alive and the next turn works
    speak_utterance(&harness).await;
    loop {
        let event = next_event(&mut harness).await;
        if event == (ServerEvent::AssistantMessage { text: "Second time lucky.".into() }) {
            break;
        }
    }
}

#[tokio::test]
async fn empty_transcript_skips_the_model() {
    let (llm, llm_calls) = ScriptedLlm::new(vec![content("never spoken")]);
    let mut harness = spawn_session(
        fast_assistant(),
        Box::new(ScriptedStt::new(vec![Ok("")])),
        Box::new(llm),
        Box::new(FixedTts { bytes: 4800 }),
    )
    .await;

    assert!(matches!(next_event(&mut harness).await, ServerEvent::CallStarted { .. }));
    speak_utterance(&harness).await;
    assert_eq!(next_event(&mut harness).await, ServerEvent::SpeechStarted);
    assert_eq!(next_event(&mut harness).await, ServerEvent::SpeechEnded);
    assert_eq!(next_event(&mut harness).await, ServerEvent::AssistantThinking);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(llm_calls.load(Ordering::SeqCst), 0);
    // No user message was appended
    let messages = harness.store.messages_for_call("call_test").await.unwrap();
    assert!(messages.is_empty());
}

#[tokio::test]
async fn max_duration_ends_the_call() {
    let assistant = Assistant {
        max_call_duration_secs: 1,
        ..fast_assistant()
    };
    let (llm, _) = ScriptedLlm::new(vec![]);
    let mut harness = spawn_session(
        assistant,
        Box::new(ScriptedStt::new(vec![])),
        Box::new(llm),
        Box::new(FixedTts { bytes: 4800 }),
    )
    .await;

    assert!(matches!(next_event(&mut harness).await, ServerEvent::CallStarted { .. }));
    assert!(matches!(
        next_event(&mut harness).await,
        ServerEvent::CallEnded { reason, .. } if reason == "max-duration"
    ));
}

#[tokio::test]
async fn end_is_idempotent() {
    let (llm, _) = ScriptedLlm::new(vec![]);
    let mut harness = spawn_session(
        fast_assistant(),
        Box::new(ScriptedStt::new(vec![])),
        Box::new(llm),
        Box::new(FixedTts { bytes: 4800 }),
    )
    .await;

    assert!(matches!(next_event(&mut harness).await, ServerEvent::CallStarted { .. }));
    for _ in 0..3 {
        harness
            .control
            .send(SessionControl::End {
                reason: "api-request".to_string(),
            })
            .await
            .unwrap();
    }

    // Exactly one call.ended, then the channel drains to Close and ends
    let mut ended = 0;
    while let Ok(Some(out)) =
        tokio::time::timeout(Duration::from_secs(2), harness.outbound.recv()).await
    {
        if matches!(out, Outbound::Event(ServerEvent::CallEnded { .. })) {
            ended += 1;
        }
    }
    assert_eq!(ended, 1);
}
