//! The conversation session state machine.

use crate::classify::{self, OutcomeDetector};
use crate::error::EngineError;
use dialflow_adapters::{ChatMessage, LanguageModel, SpeechToText, SttStream, TextToSpeech};
use dialflow_types::CallOutcome;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Per-call engine configuration. The orchestrator fills `voice_id`,
/// `llm_model`, and the prompt/greeting from the agent config and lead
/// context; the rest are pipeline tunables with phone-grade defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub voice_id: String,
    pub llm_model: String,
    /// System prompt pushed as the first history entry.
    pub system_prompt: String,
    /// The opening line spoken after the call connects.
    pub greeting: String,
    pub temperature: f32,
    /// Replies are spoken aloud; keep them short.
    pub max_reply_tokens: u32,
    /// Hard cap on user turns before the engine wraps up.
    pub max_turns: u32,
    /// Silence gap that finalizes a buffered utterance.
    pub silence_threshold_ms: u64,
    /// Minimum buffered audio before a batch transcription is worth it.
    pub min_buffer_bytes: usize,
    /// Outbound frame size matching the transport cadence
    /// (160 bytes = 20 ms of 8 kHz mulaw).
    pub frame_bytes: usize,
    /// Grace period between the closing line and engine shutdown.
    pub end_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            voice_id: "default".to_string(),
            llm_model: "gpt-4o-mini".to_string(),
            system_prompt: "You are a friendly outbound sales representative. \
                Keep every reply to one or two short sentences suitable for a \
                phone call."
                .to_string(),
            greeting: "Hi, this is Alex calling — do you have a quick minute?".to_string(),
            temperature: 0.7,
            max_reply_tokens: 100,
            max_turns: 30,
            silence_threshold_ms: 800,
            min_buffer_bytes: 3_200,
            frame_bytes: 160,
            end_grace_ms: 2_000,
        }
    }
}

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Greeting,
    Listening,
    Speaking,
    Ended,
}

/// Events emitted toward the audio transport.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// One outbound audio frame for the carrier leg.
    Media(Vec<u8>),
    /// Flush any queued outbound audio (barge-in).
    Clear,
    /// The engine decided the call is over.
    Ended(CallOutcome),
}

/// End-of-call analysis handed back to the transport.
#[derive(Debug, Clone)]
pub struct CallReport {
    pub outcome: CallOutcome,
    pub user_turns: u32,
    pub transcript: String,
    pub summary: String,
}

/// One live call's conversation engine.
///
/// Audio frame processing never blocks the receive path: transcription and
/// completion run as detached tasks, and a single `is_processing` guard
/// prevents two overlapping completion requests for the same call.
pub struct ConversationEngine {
    config: EngineConfig,
    stt: Arc<dyn SpeechToText>,
    tts: Arc<dyn TextToSpeech>,
    llm: Arc<dyn LanguageModel>,
    events: mpsc::Sender<EngineEvent>,

    state: Mutex<EngineState>,
    history: Mutex<Vec<ChatMessage>>,
    detector: Mutex<OutcomeDetector>,
    user_turns: AtomicU32,
    is_processing: AtomicBool,
    /// Bumped on barge-in; an in-flight synthesis stream aborts when the
    /// epoch it captured is stale.
    speak_epoch: AtomicU64,
    ending: AtomicBool,

    buffer: Mutex<Vec<u8>>,
    last_voice_at: Mutex<Option<Instant>>,
    stream: tokio::sync::Mutex<Option<Box<dyn SttStream>>>,
}

fn recover<'a, T>(
    guard: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>,
) -> MutexGuard<'a, T> {
    guard.unwrap_or_else(PoisonError::into_inner)
}

/// Heuristic voice-activity check for 8 kHz mulaw frames. The bytes 0xFF
/// and 0x7F encode zero amplitude; a frame is voiced when more than a tenth
/// of its samples deviate from them.
fn is_voiced(frame: &[u8]) -> bool {
    if frame.is_empty() {
        return false;
    }
    let active = frame.iter().filter(|&&b| b != 0xff && b != 0x7f).count();
    active * 10 > frame.len()
}

impl ConversationEngine {
    /// Creates an engine bound to one call. `events` is the transport-side
    /// channel for outbound audio and control signals.
    pub fn new(
        config: EngineConfig,
        stt: Arc<dyn SpeechToText>,
        tts: Arc<dyn TextToSpeech>,
        llm: Arc<dyn LanguageModel>,
        events: mpsc::Sender<EngineEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            stt,
            tts,
            llm,
            events,
            state: Mutex::new(EngineState::Idle),
            history: Mutex::new(Vec::new()),
            detector: Mutex::new(OutcomeDetector::new()),
            user_turns: AtomicU32::new(0),
            is_processing: AtomicBool::new(false),
            speak_epoch: AtomicU64::new(0),
            ending: AtomicBool::new(false),
            buffer: Mutex::new(Vec::new()),
            last_voice_at: Mutex::new(None),
            stream: tokio::sync::Mutex::new(None),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        *recover(self.state.lock())
    }

    fn set_state(&self, next: EngineState) {
        *recover(self.state.lock()) = next;
    }

    /// Number of finalized user turns so far.
    pub fn user_turns(&self) -> u32 {
        self.user_turns.load(Ordering::SeqCst)
    }

    /// Starts the session: pushes the system prompt, opens a streaming
    /// transcription session (falling back to buffered batch transcription
    /// when unavailable), and speaks the opening line.
    pub async fn start(self: &Arc<Self>) -> Result<(), EngineError> {
        self.set_state(EngineState::Greeting);
        recover(self.history.lock()).push(ChatMessage::system(&self.config.system_prompt));

        match self.stt.open_stream().await {
            Ok(Some(stream)) => {
                *self.stream.lock().await = Some(stream);
                tracing::debug!("streaming transcription session opened");
            }
            Ok(None) => {
                tracing::debug!("streaming transcription unavailable, using buffered fallback");
            }
            Err(e) => {
                tracing::warn!("failed to open streaming transcription, using buffered fallback: {e}");
            }
        }

        // Silence ticker: finalizes a buffered utterance when the carrier
        // stops delivering voiced frames.
        let ticker = Arc::clone(self);
        let tick = Duration::from_millis((self.config.silence_threshold_ms / 4).max(10));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tick).await;
                if ticker.state() == EngineState::Ended {
                    break;
                }
                ticker.maybe_dispatch_buffer();
            }
        });

        let greeting = self.config.greeting.clone();
        self.speak(&greeting).await?;
        Ok(())
    }

    /// Feeds one inbound audio frame.
    ///
    /// A frame arriving while the engine is speaking is a barge-in: the
    /// synthesis stream is aborted, the transport is told to clear queued
    /// outbound audio, and the engine returns to listening before the frame
    /// is consumed.
    pub async fn process_audio(self: &Arc<Self>, frame: &[u8]) -> Result<(), EngineError> {
        if self.state() == EngineState::Ended {
            return Ok(());
        }

        if self.state() == EngineState::Speaking {
            self.barge_in();
        }

        let mut stream_slot = self.stream.lock().await;
        if let Some(stream) = stream_slot.as_mut() {
            stream.send_audio(frame).await?;
            let mut finals = Vec::new();
            while let Some(transcript) = stream.next_transcript().await {
                if transcript.is_final && !transcript.text.trim().is_empty() {
                    finals.push(transcript.text);
                }
            }
            drop(stream_slot);
            for text in finals {
                let engine = Arc::clone(self);
                tokio::spawn(async move { engine.handle_finalized(text).await });
            }
            return Ok(());
        }
        drop(stream_slot);

        if is_voiced(frame) {
            recover(self.buffer.lock()).extend_from_slice(frame);
            *recover(self.last_voice_at.lock()) = Some(Instant::now());
        }
        self.maybe_dispatch_buffer();
        Ok(())
    }

    /// Interrupts an in-flight synthesis stream. Emits exactly one `Clear`
    /// per interruption: the state check and transition happen under the
    /// same lock.
    fn barge_in(&self) {
        let mut state = recover(self.state.lock());
        if *state != EngineState::Speaking {
            return;
        }
        *state = EngineState::Listening;
        drop(state);

        self.speak_epoch.fetch_add(1, Ordering::SeqCst);
        // The clear signal must not be lost: if the channel is momentarily
        // full of stale media frames, deliver it from a detached task.
        if let Err(tokio::sync::mpsc::error::TrySendError::Full(event)) =
            self.events.try_send(EngineEvent::Clear)
        {
            let events = self.events.clone();
            tokio::spawn(async move {
                if events.send(event).await.is_err() {
                    tracing::debug!("transport gone before clear signal");
                }
            });
        }
        tracing::debug!("barge-in: synthesis aborted, listening");
    }

    /// Dispatches the accumulation buffer once it has enough audio and the
    /// silence threshold has elapsed. Runs from both the frame path and the
    /// silence ticker; the detached task re-checks the processing guard.
    fn maybe_dispatch_buffer(self: &Arc<Self>) {
        if self.state() != EngineState::Listening || self.is_processing.load(Ordering::SeqCst) {
            return;
        }

        let audio = {
            let mut buffer = recover(self.buffer.lock());
            let last_voice = *recover(self.last_voice_at.lock());
            let silence_elapsed = last_voice.map(|t| {
                t.elapsed() >= Duration::from_millis(self.config.silence_threshold_ms)
            });
            if buffer.len() < self.config.min_buffer_bytes || silence_elapsed != Some(true) {
                return;
            }
            *recover(self.last_voice_at.lock()) = None;
            std::mem::take(&mut *buffer)
        };

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if engine.is_processing.swap(true, Ordering::SeqCst) {
                return;
            }
            match engine.stt.transcribe(&audio).await {
                Ok(text) if !text.trim().is_empty() => {
                    if let Err(e) = engine.run_turn(text).await {
                        tracing::error!("turn failed: {e}");
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("batch transcription failed: {e}"),
            }
            engine.is_processing.store(false, Ordering::SeqCst);
        });
    }

    /// Streaming-path entry: one finalized transcript, guarded against
    /// overlapping completions.
    async fn handle_finalized(self: Arc<Self>, text: String) {
        if self.is_processing.swap(true, Ordering::SeqCst) {
            tracing::debug!("completion already in flight, dropping transcript");
            return;
        }
        if let Err(e) = self.run_turn(text).await {
            tracing::error!("turn failed: {e}");
        }
        self.is_processing.store(false, Ordering::SeqCst);
    }

    /// One full user turn: history, opt-out and turn-cap checks, completion,
    /// classification, synthesis.
    async fn run_turn(self: &Arc<Self>, text: String) -> Result<(), EngineError> {
        if self.state() == EngineState::Ended || self.ending.load(Ordering::SeqCst) {
            return Ok(());
        }

        let turns = self.user_turns.fetch_add(1, Ordering::SeqCst) + 1;
        recover(self.history.lock()).push(ChatMessage::user(&text));
        recover(self.detector.lock()).observe(&text);
        tracing::debug!(turn = turns, transcript = %text, "finalized user turn");

        if classify::is_opt_out(&text) {
            recover(self.detector.lock()).observe_opt_out();
            self.ending.store(true, Ordering::SeqCst);
            self.speak("No problem — I'll take you off our list. Have a good day.")
                .await?;
            let engine = Arc::clone(self);
            let grace = Duration::from_millis(self.config.end_grace_ms);
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                engine.finish().await;
            });
            return Ok(());
        }

        if turns >= self.config.max_turns {
            self.ending.store(true, Ordering::SeqCst);
            self.speak("Thanks for your time today — I'll follow up by email. Goodbye!")
                .await?;
            self.finish().await;
            return Ok(());
        }

        let messages = recover(self.history.lock()).clone();
        let reply = self
            .llm
            .complete(
                &messages,
                &self.config.llm_model,
                self.config.temperature,
                self.config.max_reply_tokens,
            )
            .await?;
        recover(self.history.lock()).push(ChatMessage::assistant(&reply));
        self.speak(&reply).await?;
        Ok(())
    }

    /// Synthesizes `text` and streams it to the transport in
    /// transport-cadence frames. Transmission aborts mid-stream when a
    /// barge-in bumps the epoch.
    async fn speak(self: &Arc<Self>, text: &str) -> Result<(), EngineError> {
        {
            let mut state = recover(self.state.lock());
            if *state == EngineState::Ended {
                return Ok(());
            }
            *state = EngineState::Speaking;
        }
        let epoch = self.speak_epoch.load(Ordering::SeqCst);

        let audio = match self.tts.synthesize(text, &self.config.voice_id).await {
            Ok(audio) => audio,
            Err(e) => {
                self.set_state(EngineState::Listening);
                return Err(e.into());
            }
        };

        for chunk in audio.chunks(self.config.frame_bytes.max(1)) {
            if self.speak_epoch.load(Ordering::SeqCst) != epoch
                || self.state() == EngineState::Ended
            {
                tracing::debug!("synthesis stream aborted");
                return Ok(());
            }
            self.events
                .send(EngineEvent::Media(chunk.to_vec()))
                .await
                .map_err(|_| EngineError::TransportClosed)?;
        }

        // Only hand the floor back if nothing interrupted us meanwhile.
        let mut state = recover(self.state.lock());
        if *state == EngineState::Speaking && self.speak_epoch.load(Ordering::SeqCst) == epoch {
            *state = EngineState::Listening;
        }
        Ok(())
    }

    /// Internal end path (opt-out, turn cap): flips to `Ended` and tells the
    /// transport. Idempotent.
    async fn finish(self: &Arc<Self>) {
        {
            let mut state = recover(self.state.lock());
            if *state == EngineState::Ended {
                return;
            }
            *state = EngineState::Ended;
        }
        let outcome = classify::final_outcome(
            recover(self.detector.lock()).detected(),
            self.user_turns(),
        );
        if self.events.send(EngineEvent::Ended(outcome)).await.is_err() {
            tracing::debug!("transport gone before end event");
        }
    }

    /// Stops the session: closes the transcription stream and computes the
    /// final outcome: the explicit detection when present, otherwise the
    /// turn-count heuristic.
    pub async fn stop(&self) -> CallReport {
        self.set_state(EngineState::Ended);

        if let Some(mut stream) = self.stream.lock().await.take() {
            if let Err(e) = stream.close().await {
                tracing::warn!("failed to close transcription stream: {e}");
            }
        }

        let user_turns = self.user_turns();
        let outcome =
            classify::final_outcome(recover(self.detector.lock()).detected(), user_turns);

        let history = recover(self.history.lock()).clone();
        let transcript = history
            .iter()
            .filter(|m| m.role != dialflow_adapters::ChatRole::System)
            .map(|m| {
                let speaker = match m.role {
                    dialflow_adapters::ChatRole::User => "lead",
                    _ => "agent",
                };
                format!("{speaker}: {}", m.content)
            })
            .collect::<Vec<_>>()
            .join("\n");
        let summary = format!("{user_turns} lead turns; outcome: {}", outcome.as_str());

        CallReport {
            outcome,
            user_turns,
            transcript,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dialflow_adapters::mock::{MockLanguageModel, MockSpeechToText, MockTextToSpeech};
    use tokio::time::{sleep, timeout};

    const VOICED: [u8; 160] = [0x10; 160];

    struct Fixture {
        engine: Arc<ConversationEngine>,
        events: mpsc::Receiver<EngineEvent>,
        tts: Arc<MockTextToSpeech>,
        llm: Arc<MockLanguageModel>,
    }

    fn fixture_with(config: EngineConfig, stt: MockSpeechToText, capacity: usize) -> Fixture {
        let stt = Arc::new(stt);
        let tts = Arc::new(MockTextToSpeech::new());
        let llm = Arc::new(MockLanguageModel::new());
        let (tx, rx) = mpsc::channel(capacity);
        let engine = ConversationEngine::new(
            config,
            stt as Arc<dyn SpeechToText>,
            tts.clone() as Arc<dyn TextToSpeech>,
            llm.clone() as Arc<dyn LanguageModel>,
            tx,
        );
        Fixture {
            engine,
            events: rx,
            tts,
            llm,
        }
    }

    fn quick_config() -> EngineConfig {
        EngineConfig {
            silence_threshold_ms: 40,
            min_buffer_bytes: 160,
            end_grace_ms: 20,
            ..EngineConfig::default()
        }
    }

    /// Drains every event currently queued, without waiting.
    fn drain(events: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        timeout(Duration::from_secs(2), async {
            while !cond() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn start_speaks_greeting_then_listens() {
        let mut fx = fixture_with(quick_config(), MockSpeechToText::new(), 256);
        fx.engine.start().await.expect("start");

        assert_eq!(fx.engine.state(), EngineState::Listening);
        let synthesized = fx.tts.synthesized();
        assert_eq!(synthesized.len(), 1);
        assert!(synthesized[0].0.contains("quick minute"));

        let media_frames = drain(&mut fx.events)
            .into_iter()
            .filter(|e| matches!(e, EngineEvent::Media(_)))
            .count();
        assert!(media_frames > 0, "greeting audio should be emitted");
    }

    #[tokio::test]
    async fn buffered_turn_runs_completion_and_replies() {
        let stt = MockSpeechToText::new();
        stt.script_utterance("how much does it cost");
        let mut fx = fixture_with(quick_config(), stt, 256);
        fx.llm.script_reply("It starts at ninety-nine a month.");

        fx.engine.start().await.expect("start");
        drain(&mut fx.events);

        for _ in 0..4 {
            fx.engine.process_audio(&VOICED).await.expect("frame");
        }
        // Silence: the ticker finalizes the utterance after the threshold.
        let tts = fx.tts.clone();
        wait_for(move || tts.synthesized().len() >= 2).await;

        let synthesized = fx.tts.synthesized();
        assert_eq!(synthesized[1].0, "It starts at ninety-nine a month.");
        // System prompt + user turn were sent to the model.
        assert_eq!(fx.llm.request_history_lens(), vec![2]);

        // Pricing signal detected: explicit outcome, not the heuristic.
        let report = fx.engine.stop().await;
        assert_eq!(report.outcome, CallOutcome::FollowUp);
        assert_eq!(report.user_turns, 1);
        assert!(report.transcript.contains("lead: how much does it cost"));
    }

    #[tokio::test]
    async fn barge_in_emits_exactly_one_clear() {
        let mut fx = fixture_with(quick_config(), MockSpeechToText::new(), 4);
        fx.engine.start().await.expect("start");
        // Greeting audio may still be queued; flush it.
        while fx.engine.state() != EngineState::Listening {
            drain(&mut fx.events);
            sleep(Duration::from_millis(5)).await;
        }
        drain(&mut fx.events);

        // A long utterance: 400 chars -> 3200 bytes -> 20 frames, far more
        // than the channel capacity, so speak() is still mid-stream when the
        // inbound frame arrives.
        let engine = fx.engine.clone();
        let speak_task =
            tokio::spawn(async move { engine.speak(&"a".repeat(400)).await });

        // Wait until synthesis is streaming.
        let recv = timeout(Duration::from_secs(2), fx.events.recv())
            .await
            .expect("media in time")
            .expect("channel open");
        assert!(matches!(recv, EngineEvent::Media(_)));
        assert_eq!(fx.engine.state(), EngineState::Speaking);

        fx.engine.process_audio(&VOICED).await.expect("frame");
        assert_eq!(fx.engine.state(), EngineState::Listening);

        // Collect everything that arrives until the channel goes quiet
        // BEFORE joining the speak task: draining is what unblocks its
        // in-flight send so the epoch check can abort it. The clear signal
        // may be delivered from a detached task.
        let mut events = Vec::new();
        while let Ok(Some(event)) =
            timeout(Duration::from_millis(200), fx.events.recv()).await
        {
            events.push(event);
        }
        speak_task.await.expect("join").expect("speak");
        let clears = events
            .iter()
            .filter(|e| matches!(e, EngineEvent::Clear))
            .count();
        assert_eq!(clears, 1, "exactly one clear per interruption");

        let media_frames = events
            .iter()
            .filter(|e| matches!(e, EngineEvent::Media(_)))
            .count();
        assert!(media_frames < 20, "synthesis stream must abort mid-stream");

        // A second frame while listening must not emit another clear.
        fx.engine.process_audio(&VOICED).await.expect("frame");
        let clears = drain(&mut fx.events)
            .iter()
            .filter(|e| matches!(e, EngineEvent::Clear))
            .count();
        assert_eq!(clears, 0);
    }

    #[tokio::test]
    async fn opt_out_ends_call_with_classified_outcome() {
        let stt = MockSpeechToText::new();
        stt.script_utterance("please take me off your list");
        let mut fx = fixture_with(quick_config(), stt, 256);

        fx.engine.start().await.expect("start");
        drain(&mut fx.events);

        for _ in 0..4 {
            fx.engine.process_audio(&VOICED).await.expect("frame");
        }

        let engine = fx.engine.clone();
        wait_for(move || engine.state() == EngineState::Ended).await;

        // The closing line was spoken without consulting the model.
        assert!(fx.llm.request_history_lens().is_empty());
        let ended = drain(&mut fx.events)
            .into_iter()
            .find_map(|e| match e {
                EngineEvent::Ended(outcome) => Some(outcome),
                _ => None,
            });
        assert_eq!(ended, Some(CallOutcome::NotInterested));

        let report = fx.engine.stop().await;
        assert_eq!(report.outcome, CallOutcome::NotInterested);
    }

    #[tokio::test]
    async fn turn_cap_wraps_up_the_call() {
        let stt = MockSpeechToText::new();
        stt.script_utterance("hello there");
        stt.script_utterance("go on");
        let config = EngineConfig {
            max_turns: 2,
            ..quick_config()
        };
        let mut fx = fixture_with(config, stt, 256);
        fx.llm.script_reply("Glad to hear it.");

        fx.engine.start().await.expect("start");
        drain(&mut fx.events);

        // First turn: normal completion.
        for _ in 0..4 {
            fx.engine.process_audio(&VOICED).await.expect("frame");
        }
        let tts = fx.tts.clone();
        wait_for(move || tts.synthesized().len() >= 2).await;

        // Second turn: hits the cap, wrap-up spoken, engine ends.
        for _ in 0..4 {
            fx.engine.process_audio(&VOICED).await.expect("frame");
        }
        let engine = fx.engine.clone();
        wait_for(move || engine.state() == EngineState::Ended).await;

        let synthesized = fx.tts.synthesized();
        assert_eq!(synthesized.len(), 3, "greeting, reply, wrap-up");
        assert!(synthesized[2].0.contains("Thanks for your time"));
        // Only the first turn reached the model.
        assert_eq!(fx.llm.request_history_lens().len(), 1);
    }

    #[tokio::test]
    async fn silent_call_classifies_as_voicemail() {
        let fx = fixture_with(quick_config(), MockSpeechToText::new(), 256);
        fx.engine.start().await.expect("start");

        let report = fx.engine.stop().await;
        assert_eq!(report.outcome, CallOutcome::Voicemail);
        assert_eq!(report.user_turns, 0);
    }

    #[tokio::test]
    async fn streaming_transcription_path_drives_turns() {
        let stt = MockSpeechToText::new().with_streaming();
        stt.script_utterance("I'm interested, tell me more");
        let mut fx = fixture_with(quick_config(), stt, 256);
        fx.llm.script_reply("Great — we help teams ship faster.");

        fx.engine.start().await.expect("start");
        drain(&mut fx.events);

        fx.engine.process_audio(&VOICED).await.expect("frame");
        let tts = fx.tts.clone();
        wait_for(move || tts.synthesized().len() >= 2).await;

        assert_eq!(fx.llm.request_history_lens(), vec![2]);
        let report = fx.engine.stop().await;
        assert_eq!(report.outcome, CallOutcome::FollowUp);
    }

    #[test]
    fn voice_activity_heuristic() {
        assert!(is_voiced(&VOICED));
        assert!(!is_voiced(&[0xff; 160]));
        assert!(!is_voiced(&[]));
        let mut mostly_silent = [0xff; 160];
        mostly_silent[0] = 0x10;
        assert!(!is_voiced(&mostly_silent));
    }
}
