//! Per-call voice session engine
//!
//! One actor per call: a single consumer loop drains the control channel
//! (audio frames, client control, timer ticks, end requests), so every
//! handler is serialized and the history, buffers, and state machine are
//! race-free. Outbound traffic goes through a second channel drained by
//! the socket sender task.
//!
//! Pipeline per turn: VAD → endpointing → STT → LLM (tool loop) → TTS.
//! Barge-in invalidates in-flight synthesis through a monotonic generation
//! counter rather than cancelling the provider request.

pub mod cost;
pub mod events;
pub mod recording;
pub mod registry;
pub mod state;

pub use events::{ClientControl, ServerEvent};
pub use registry::{LatencyAverages, SessionHandle, SessionInfo, SessionRegistry};
pub use state::SessionState;

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::audio::playback_duration_ms;
use crate::config::ProviderKeys;
use crate::error::EngineResult;
use crate::providers::{self, LanguageModel, LlmMessage, SpeechToText, TextToSpeech};
use crate::session::cost::compute_cost;
use crate::session::recording::RecordingBuffers;
use crate::storage::CallStore;
use crate::tools::{ToolExecutor, TOOL_END_CALL, TOOL_TRANSFER};
use crate::types::{Assistant, CallMessage, Role, ToolKind, ToolSpec, TurnLatencies};
use crate::vad::EnergyVad;

/// Hard ceiling on the configured silence timeout, keeping conversational
/// latency bounded irrespective of assistant config
const SILENCE_TIMEOUT_CAP_MS: u64 = 1200;

/// Minimum playback delay before returning to listening
const MIN_PLAYBACK_DELAY_MS: u64 = 500;

/// Padding added to the computed playback duration
const PLAYBACK_PADDING_MS: u64 = 200;

/// Guard against endless tool-call chains in one turn
const MAX_TOOL_ROUNDS: usize = 8;

/// Control-channel capacity; audio frames arrive at ~8/s
const CONTROL_QUEUE_SIZE: usize = 256;

/// Messages consumed by the session actor, one at a time
#[derive(Debug)]
pub enum SessionControl {
    /// A binary PCM frame from the client
    Audio(Vec<u8>),
    /// A parsed text control frame from the client
    Client(ClientControl),
    /// The playback timer for a synthesis generation elapsed
    PlaybackDone { synthesis_id: u64 },
    /// Max call duration reached
    MaxDuration,
    /// End with an explicit reason (api-request, server-shutdown, ...)
    End { reason: String },
    /// The transport closed without an `end` frame
    Disconnected,
}

/// Frames the session pushes toward the socket
#[derive(Debug)]
pub enum Outbound {
    Event(ServerEvent),
    Audio(Vec<u8>),
    Close,
}

/// Construction inputs for a session
pub struct SessionParams {
    pub call_id: String,
    pub org_id: String,
    pub assistant: Assistant,
    /// Egress PCM rate: 24 kHz web, 16 kHz carrier bridge
    pub egress_sample_rate: u32,
    pub store: CallStore,
    pub registry: Arc<SessionRegistry>,
    pub provider_keys: ProviderKeys,
    pub recordings_dir: std::path::PathBuf,
}

pub struct Session {
    call_id: String,
    assistant: Assistant,
    stt: Box<dyn SpeechToText>,
    llm: Box<dyn LanguageModel>,
    tts: Box<dyn TextToSpeech>,
    tools: ToolExecutor,
    store: CallStore,
    registry: Arc<SessionRegistry>,
    recordings_dir: std::path::PathBuf,
    outbound: mpsc::Sender<Outbound>,
    control_tx: mpsc::Sender<SessionControl>,

    state: SessionState,
    history: Vec<LlmMessage>,
    input_buffer: Vec<u8>,
    recording: RecordingBuffers,
    vad: EnergyVad,
    silence_start: Option<Instant>,
    is_speaking: bool,
    /// Monotonic synthesis generation; the sole authority on whether a
    /// synthesis is still current
    synthesis_id: u64,
    egress_sample_rate: u32,
    started_at: DateTime<Utc>,
    started_instant: Instant,
    ended: bool,

    stt_samples: Vec<u64>,
    llm_samples: Vec<u64>,
    tts_samples: Vec<u64>,
    message_count: usize,

    info: Arc<std::sync::RwLock<SessionInfo>>,
    ended_tx: watch::Sender<bool>,
}

impl Session {
    /// Build a session and its management handle, instantiating the three
    /// provider adapters from the assistant's config. The returned receiver
    /// feeds `run`; the handle goes into the registry.
    pub fn new(
        params: SessionParams,
        outbound: mpsc::Sender<Outbound>,
    ) -> EngineResult<(Self, SessionHandle, mpsc::Receiver<SessionControl>)> {
        let stt = providers::stt_for(&params.assistant, &params.provider_keys)?;
        let llm = providers::llm_for(&params.assistant, &params.provider_keys)?;
        let tts = providers::tts_for(
            &params.assistant,
            &params.provider_keys,
            params.egress_sample_rate,
        )?;
        Ok(Self::with_providers(params, outbound, stt, llm, tts))
    }

    /// Build a session around explicit provider instances
    pub fn with_providers(
        params: SessionParams,
        outbound: mpsc::Sender<Outbound>,
        stt: Box<dyn SpeechToText>,
        llm: Box<dyn LanguageModel>,
        tts: Box<dyn TextToSpeech>,
    ) -> (Self, SessionHandle, mpsc::Receiver<SessionControl>) {
        let SessionParams {
            call_id,
            org_id: _,
            mut assistant,
            egress_sample_rate,
            store,
            registry,
            provider_keys: _,
            recordings_dir,
        } = params;

        // The end-call ability is a flag on the assistant; surface it as a
        // tool definition when no endCall tool is configured explicitly.
        if assistant.end_call_enabled
            && !assistant.tools.iter().any(|t| t.kind == ToolKind::EndCall)
        {
            assistant.tools.push(ToolSpec {
                id: "builtin-end-call".to_string(),
                name: TOOL_END_CALL.to_string(),
                kind: ToolKind::EndCall,
                description: String::new(),
                parameters: None,
                server_url: None,
                destinations: Vec::new(),
                transfer_mode: Default::default(),
                knowledge_base_id: None,
            });
        }

        let tools = ToolExecutor::new(assistant.tools.clone());

        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE_SIZE);
        let (ended_tx, ended_rx) = watch::channel(false);
        let started_at = Utc::now();
        let info = Arc::new(std::sync::RwLock::new(SessionInfo {
            call_id: call_id.clone(),
            state: SessionState::Idle,
            started_at,
            message_count: 0,
            average_latency: LatencyAverages::default(),
        }));
        let handle = SessionHandle::new(
            call_id.clone(),
            control_tx.clone(),
            info.clone(),
            ended_rx,
        );

        let history = vec![LlmMessage::system(&assistant.system_prompt)];
        let vad = EnergyVad::from_sensitivity(assistant.endpointing_sensitivity);

        let session = Self {
            call_id,
            assistant,
            stt,
            llm,
            tts,
            tools,
            store,
            registry,
            recordings_dir,
            outbound,
            control_tx,
            state: SessionState::Idle,
            history,
            input_buffer: Vec::new(),
            recording: RecordingBuffers::new(&handle.call_id),
            vad,
            silence_start: None,
            is_speaking: false,
            synthesis_id: 0,
            egress_sample_rate,
            started_at,
            started_instant: Instant::now(),
            ended: false,
            stt_samples: Vec::new(),
            llm_samples: Vec::new(),
            tts_samples: Vec::new(),
            message_count: 0,
            info,
            ended_tx,
        };
        (session, handle, control_rx)
    }

    /// Drive the session until it ends. All handlers run on this task.
    pub async fn run(mut self, mut control: mpsc::Receiver<SessionControl>) {
        self.start().await;

        while !self.ended {
            let Some(msg) = control.recv().await else {
                break;
            };
            match msg {
                SessionControl::Audio(frame) => self.handle_audio(&frame).await,
                SessionControl::Client(ClientControl::End) => self.end("client-request").await,
                SessionControl::Client(ClientControl::Interrupt) => self.handle_interrupt().await,
                SessionControl::Client(ClientControl::Config) => {}
                SessionControl::PlaybackDone { synthesis_id } => {
                    self.handle_playback_done(synthesis_id).await
                }
                SessionControl::MaxDuration => self.end("max-duration").await,
                SessionControl::End { reason } => self.end(&reason).await,
                SessionControl::Disconnected => self.end("client-disconnect").await,
            }
        }

        if !self.ended {
            // Channel closed without an end: transport went away
            self.end("client-disconnect").await;
        }
    }

    async fn start(&mut self) {
        info!("Session {} starting (assistant {})", self.call_id, self.assistant.id);
        if let Err(e) = self.store.mark_in_progress(&self.call_id, self.started_at).await {
            error!("Failed to mark call {} in progress: {}", self.call_id, e);
        }
        self.emit(ServerEvent::CallStarted {
            call_id: self.call_id.clone(),
            assistant: json!({ "id": self.assistant.id, "name": self.assistant.name }),
        })
        .await;

        // Max-duration watchdog feeds the control queue like any other tick
        let max_duration = Duration::from_secs(self.assistant.max_call_duration_secs);
        let watchdog = self.control_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(max_duration).await;
            let _ = watchdog.send(SessionControl::MaxDuration).await;
        });

        let first_message = match self.assistant.first_message_mode {
            crate::types::FirstMessageMode::AssistantSpeaksFirst => {
                self.assistant.first_message.clone().filter(|m| !m.is_empty())
            }
            crate::types::FirstMessageMode::AssistantWaitsForUser => None,
        };

        match first_message {
            Some(text) => {
                self.history.push(LlmMessage::assistant(&text));
                self.emit(ServerEvent::AssistantMessage { text: text.clone() }).await;
                let message = CallMessage::new(&self.call_id, Role::Assistant, &text, 0);
                self.persist(message).await;
                self.synthesize_and_play(&text).await;
            }
            None => self.set_state(SessionState::Listening),
        }
    }

    /// Route one ingress PCM frame through recording, barge-in, and the
    /// VAD/endpointing bookkeeping.
    async fn handle_audio(&mut self, frame: &[u8]) {
        if self.state == SessionState::Terminated {
            return;
        }
        self.recording.append_user(frame);

        if self.state == SessionState::Speaking && self.assistant.interruption_enabled {
            if self.vad.has_voice(frame) {
                self.handle_interrupt().await;
                self.input_buffer.extend_from_slice(frame);
                self.is_speaking = true;
                self.silence_start = None;
                self.emit(ServerEvent::SpeechStarted).await;
            }
            return;
        }

        self.input_buffer.extend_from_slice(frame);
        if self.vad.has_voice(frame) {
            if !self.is_speaking {
                self.emit(ServerEvent::SpeechStarted).await;
            }
            self.is_speaking = true;
            self.silence_start = None;
            if self.state == SessionState::Idle {
                self.set_state(SessionState::Listening);
            }
        } else if self.is_speaking {
            match self.silence_start {
                None => {
                    self.silence_start = Some(Instant::now());
                    debug!("Endpointing: silence onset on {}", self.call_id);
                }
                Some(onset) => {
                    let timeout = self.assistant.silence_timeout_ms.min(SILENCE_TIMEOUT_CAP_MS);
                    if onset.elapsed() > Duration::from_millis(timeout)
                        && self.state == SessionState::Listening
                    {
                        self.is_speaking = false;
                        self.silence_start = None;
                        self.emit(ServerEvent::SpeechEnded).await;
                        self.process_user_speech().await;
                    }
                }
            }
        }
    }

    /// Endpointing fired: transcribe the buffered utterance and respond
    async fn process_user_speech(&mut self) {
        let audio = std::mem::take(&mut self.input_buffer);
        self.emit(ServerEvent::AssistantThinking).await;
        self.set_state(SessionState::Thinking);

        let t0 = Instant::now();
        let transcript = match self.stt.transcribe(&audio).await {
            Ok(t) => t,
            Err(e) => {
                warn!("STT failed on {}: {}", self.call_id, e);
                self.recover_turn("provider_error", &e.to_string()).await;
                return;
            }
        };
        let stt_latency = t0.elapsed().as_millis() as u64;
        self.stt_samples.push(stt_latency);

        if transcript.is_empty() {
            debug!("Empty transcript on {}, back to listening", self.call_id);
            self.set_state(SessionState::Listening);
            return;
        }

        self.emit(ServerEvent::TranscriptFinal {
            text: transcript.clone(),
        })
        .await;
        self.history.push(LlmMessage::user(&transcript));
        let mut message = CallMessage::new(
            &self.call_id,
            Role::User,
            &transcript,
            self.elapsed_ms(),
        );
        message.latencies = TurnLatencies {
            stt_ms: Some(stt_latency),
            ..Default::default()
        };
        self.persist(message).await;

        self.generate_response().await;
    }

    /// The LLM/tool loop: call the model, execute any requested tools, and
    /// re-invoke so the model sees the tool outputs; speak the final
    /// content. Built-in call-control tools are intercepted before the
    /// executor.
    async fn generate_response(&mut self) {
        let definitions = self.tools.definitions();

        for round in 0..MAX_TOOL_ROUNDS {
            let t0 = Instant::now();
            let response = match self.llm.generate(&self.history, &definitions).await {
                Ok(r) => r,
                Err(e) => {
                    warn!("LLM failed on {}: {}", self.call_id, e);
                    self.recover_turn("provider_error", &e.to_string()).await;
                    return;
                }
            };
            let llm_latency = t0.elapsed().as_millis() as u64;
            self.llm_samples.push(llm_latency);

            if response.has_tool_calls() {
                let content = response.content.clone().unwrap_or_default();
                self.history.push(LlmMessage::assistant_with_tools(
                    content,
                    response.tool_calls.clone(),
                ));

                for tc in &response.tool_calls {
                    self.emit(ServerEvent::ToolCalled {
                        name: tc.name.clone(),
                        arguments: tc.arguments.clone(),
                    })
                    .await;

                    if tc.name == TOOL_END_CALL {
                        self.end("assistant-ended").await;
                        return;
                    }
                    if tc.name == TOOL_TRANSFER {
                        let destination = tc
                            .arguments
                            .get("destination")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string();
                        // The carrier-side leg patch is driven by the
                        // telephony adapter; the session only announces it.
                        self.emit(ServerEvent::TransferStarted { destination }).await;
                        self.set_state(SessionState::Listening);
                        return;
                    }

                    let result = self.tools.execute(&tc.name, &tc.arguments).await;
                    self.emit(ServerEvent::ToolResult {
                        name: tc.name.clone(),
                        result: result.clone(),
                    })
                    .await;
                    self.history
                        .push(LlmMessage::tool_result(&tc.id, result.to_string()));
                    let mut message = CallMessage::new(
                        &self.call_id,
                        Role::Tool,
                        &result.to_string(),
                        self.elapsed_ms(),
                    );
                    message.tool_name = Some(tc.name.clone());
                    message.tool_arguments = Some(tc.arguments.clone());
                    message.tool_result = Some(result);
                    self.persist(message).await;
                }
                // Re-invoke the model with the tool outputs in history
                continue;
            }

            match response.content {
                Some(content) if !content.is_empty() => {
                    self.history.push(LlmMessage::assistant(&content));
                    self.emit(ServerEvent::AssistantMessage {
                        text: content.clone(),
                    })
                    .await;
                    let mut message = CallMessage::new(
                        &self.call_id,
                        Role::Assistant,
                        &content,
                        self.elapsed_ms(),
                    );
                    message.latencies = TurnLatencies {
                        llm_ms: Some(llm_latency),
                        ..Default::default()
                    };
                    self.persist(message).await;
                    self.synthesize_and_play(&content).await;
                }
                _ => {
                    debug!("Empty LLM turn on {} (round {})", self.call_id, round);
                    self.set_state(SessionState::Listening);
                }
            }
            return;
        }

        warn!("Tool loop exceeded {} rounds on {}", MAX_TOOL_ROUNDS, self.call_id);
        self.set_state(SessionState::Listening);
    }

    /// Synthesize and ship one assistant utterance. The generation counter
    /// decides, after the provider returns, whether the audio is still
    /// wanted; interruption does not cancel the HTTP call.
    async fn synthesize_and_play(&mut self, text: &str) {
        self.set_state(SessionState::Speaking);
        self.synthesis_id += 1;
        let sid = self.synthesis_id;

        let t0 = Instant::now();
        let audio = match self.tts.synthesize(text).await {
            Ok(a) => a,
            Err(e) => {
                warn!("TTS failed on {}: {}", self.call_id, e);
                self.recover_turn("provider_error", &e.to_string()).await;
                return;
            }
        };
        let tts_latency = t0.elapsed().as_millis() as u64;
        self.tts_samples.push(tts_latency);
        self.update_info();

        if self.state != SessionState::Speaking || self.synthesis_id != sid {
            debug!(
                "Discarding stale synthesis {} on {} (current {})",
                sid, self.call_id, self.synthesis_id
            );
            return;
        }

        self.emit(ServerEvent::AssistantSpeaking).await;
        self.recording.append_assistant(&audio);
        let duration_ms = playback_duration_ms(audio.len(), self.egress_sample_rate);
        let _ = self.outbound.send(Outbound::Audio(audio)).await;

        let delay = Duration::from_millis(
            (duration_ms + PLAYBACK_PADDING_MS).max(MIN_PLAYBACK_DELAY_MS),
        );
        let timer = self.control_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timer
                .send(SessionControl::PlaybackDone { synthesis_id: sid })
                .await;
        });
    }

    /// Playback timer elapsed; only the current generation may close out
    /// the speaking state.
    async fn handle_playback_done(&mut self, synthesis_id: u64) {
        if self.state == SessionState::Speaking && self.synthesis_id == synthesis_id {
            self.set_state(SessionState::Listening);
            self.is_speaking = false;
            self.input_buffer.clear();
            self.emit(ServerEvent::AssistantAudioDone).await;
        }
    }

    /// Barge-in: invalidate the in-flight synthesis and tell the client to
    /// flush its playback queue.
    async fn handle_interrupt(&mut self) {
        if self.state != SessionState::Speaking {
            return;
        }
        self.synthesis_id += 1;
        self.set_state(SessionState::Listening);
        self.emit(ServerEvent::AssistantInterrupted {
            clear_audio: true,
            reason: "user-speech".to_string(),
        })
        .await;
        self.input_buffer.clear();
    }

    /// Recoverable per-turn failure: report, close the turn, listen again
    async fn recover_turn(&mut self, code: &str, message: &str) {
        self.emit(ServerEvent::Error {
            code: code.to_string(),
            message: message.to_string(),
        })
        .await;
        self.emit(ServerEvent::AssistantAudioDone).await;
        self.set_state(SessionState::Listening);
    }

    /// Idempotent teardown: finalise the call row, emit `call.ended`, flush
    /// recordings, close the transport, deregister.
    async fn end(&mut self, reason: &str) {
        if self.ended {
            return;
        }
        self.ended = true;
        info!("Session {} ending: {}", self.call_id, reason);

        let ended_at = Utc::now();
        let duration_seconds = (ended_at - self.started_at).num_seconds().max(0) as u64;
        let costs = compute_cost(duration_seconds);

        if let Err(e) = self
            .store
            .complete_call(&self.call_id, reason, ended_at, duration_seconds, costs)
            .await
        {
            // Do not leave the session pinned to the registry over a dead DB
            error!("Failed to finalise call {}: {}", self.call_id, e);
        }

        self.emit(ServerEvent::CallEnded {
            reason: reason.to_string(),
            duration: duration_seconds,
            costs: serde_json::to_value(costs).unwrap_or_default(),
        })
        .await;

        match self.recording.flush(&self.recordings_dir).await {
            Ok((user, assistant)) => {
                if let Err(e) = self
                    .store
                    .set_recording_uris(
                        &self.call_id,
                        &user.to_string_lossy(),
                        &assistant.to_string_lossy(),
                    )
                    .await
                {
                    error!("Failed to store recording URIs for {}: {}", self.call_id, e);
                }
            }
            Err(e) => error!("Failed to flush recordings for {}: {}", self.call_id, e),
        }

        let _ = self.outbound.send(Outbound::Close).await;
        self.set_state(SessionState::Terminated);
        self.registry.deregister(&self.call_id).await;
        let _ = self.ended_tx.send(true);
    }

    // ─── Small helpers ───────────────────────────────────────

    async fn emit(&self, event: ServerEvent) {
        let _ = self.outbound.send(Outbound::Event(event)).await;
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            warn!(
                "Illegal transition {} -> {} on {}",
                self.state, next, self.call_id
            );
            return;
        }
        debug!("Session {}: {} -> {}", self.call_id, self.state, next);
        self.state = next;
        self.update_info();
    }

    async fn persist(&mut self, message: CallMessage) {
        self.message_count += 1;
        self.update_info();
        if let Err(e) = self.store.insert_message(&message).await {
            warn!("Failed to persist message on {}: {}", self.call_id, e);
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started_instant.elapsed().as_millis() as u64
    }

    fn update_info(&self) {
        let mut info = self
            .info
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        info.state = self.state;
        info.message_count = self.message_count;
        info.average_latency = LatencyAverages {
            stt_ms: average(&self.stt_samples),
            llm_ms: average(&self.llm_samples),
            tts_ms: average(&self.tts_samples),
        };
    }
}

fn average(samples: &[u64]) -> Option<u64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<u64>() / samples.len() as u64)
}
