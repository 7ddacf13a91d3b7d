//! Turn orchestration: transcribe, persist, complete, synthesize.
//!
//! A turn appends exactly one user and one assistant message. Transcription
//! failure appends nothing; completion failure leaves the user message in
//! place; synthesis failure only drops the audio.

use crate::audio::AudioStore;
use crate::error::ServiceError;
use crate::providers::Providers;
use crate::with_conn;
use parley_db::DbPool;
use parley_sessions::{
    append_message, attach_audio_url, get_session, recent_messages, Message, NewMessage,
};
use parley_types::{AudioFormat, Role};
use parley_voice::{prompt, SpeechRequest, SynthesizedAudio, Transcription, VoiceError};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Base delay between synthesis attempts; grows linearly per attempt.
const SYNTHESIS_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Sessions with a turn in flight.
///
/// Uses `std::sync::Mutex`: every critical section is a single set
/// operation and never spans an `.await`.
#[derive(Clone, Default)]
pub struct SessionLocks {
    busy: Arc<Mutex<HashSet<String>>>,
}

/// Marks a session busy until dropped.
pub struct SessionGuard {
    busy: Arc<Mutex<HashSet<String>>>,
    session_id: String,
}

impl SessionLocks {
    /// Claims `session_id`, or returns `None` if a turn is already running.
    pub fn try_acquire(&self, session_id: &str) -> Option<SessionGuard> {
        let mut busy = self.busy.lock().unwrap_or_else(|e| e.into_inner());
        if !busy.insert(session_id.to_string()) {
            return None;
        }
        Some(SessionGuard {
            busy: self.busy.clone(),
            session_id: session_id.to_string(),
        })
    }

    pub fn is_busy(&self, session_id: &str) -> bool {
        self.busy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(session_id)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.busy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.session_id);
    }
}

/// What the user submitted.
#[derive(Debug, Clone)]
pub enum TurnInput {
    Text(String),
    Audio {
        data: Vec<u8>,
        format: AudioFormat,
        language: Option<String>,
    },
}

/// Per-turn synthesis options.
#[derive(Debug, Clone, Default)]
pub struct TurnOptions {
    pub synthesize: bool,
    pub voice: Option<String>,
    pub language: Option<String>,
}

/// Synthesized reply audio after it has been stored.
#[derive(Debug, Clone)]
pub struct StoredAudio {
    pub url: String,
    pub format: AudioFormat,
    pub data: Vec<u8>,
}

/// Result of a completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub session_id: String,
    pub transcription: Option<Transcription>,
    pub user_message: Message,
    pub assistant_message: Message,
    pub audio: Option<StoredAudio>,
}

/// Progress notifications emitted while a turn runs.
#[derive(Debug, Clone)]
pub enum TurnProgress {
    TranscriptionStarted,
    /// The transcript has been stored as the user message `message_id`.
    TranscriptionCompleted {
        transcription: Transcription,
        message_id: String,
    },
    ResponseGenerationStarted,
    ResponseReady { text: String, message_id: String },
    AudioGenerationStarted,
}

/// Progress sink for callers that do not stream progress.
pub fn ignore_progress(_: TurnProgress) {}

/// Drives one conversational turn against the store and the providers.
#[derive(Clone)]
pub struct Orchestrator {
    pool: DbPool,
    providers: Providers,
    locks: SessionLocks,
    audio: AudioStore,
    history_window: usize,
    synthesis_retries: u32,
}

impl Orchestrator {
    pub fn new(
        pool: DbPool,
        providers: Providers,
        audio: AudioStore,
        history_window: usize,
        synthesis_retries: u32,
    ) -> Self {
        Self {
            pool,
            providers,
            locks: SessionLocks::default(),
            audio,
            history_window,
            synthesis_retries,
        }
    }

    pub fn providers(&self) -> &Providers {
        &self.providers
    }

    pub fn locks(&self) -> &SessionLocks {
        &self.locks
    }

    /// Runs a full turn for `session_id`.
    pub async fn run_turn(
        &self,
        session_id: &str,
        input: TurnInput,
        options: &TurnOptions,
        progress: &(dyn Fn(TurnProgress) + Send + Sync),
    ) -> Result<TurnOutcome, ServiceError> {
        let _guard = self
            .locks
            .try_acquire(session_id)
            .ok_or_else(|| ServiceError::SessionBusy(session_id.to_string()))?;

        let sid = session_id.to_string();
        with_conn(&self.pool, move |conn| get_session(conn, &sid)).await?;

        let (user_text, transcription) = match input {
            TurnInput::Text(text) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    return Err(ServiceError::Validation("message text must not be blank".to_string()));
                }
                (text, None)
            }
            TurnInput::Audio {
                data,
                format,
                language,
            } => {
                progress(TurnProgress::TranscriptionStarted);
                let t = self
                    .providers
                    .transcriber
                    .transcribe(&data, format, language.as_deref())
                    .await
                    .map_err(ServiceError::transcription)?;
                if t.text.trim().is_empty() {
                    return Err(ServiceError::TranscriptionFailed(
                        "transcript is empty".to_string(),
                    ));
                }
                tracing::info!(
                    session_id,
                    chars = t.text.len(),
                    confidence = ?t.confidence,
                    "audio transcribed"
                );
                (t.text.clone(), Some(t))
            }
        };

        let user_message = {
            let params = NewMessage::new(session_id, Role::User, user_text)
                .with_metadata(user_metadata(transcription.as_ref()));
            with_conn(&self.pool, move |conn| append_message(conn, &params)).await?
        };
        if let Some(t) = &transcription {
            progress(TurnProgress::TranscriptionCompleted {
                transcription: t.clone(),
                message_id: user_message.message_id.clone(),
            });
        }

        progress(TurnProgress::ResponseGenerationStarted);
        let sid = session_id.to_string();
        let window = self.history_window;
        let history = with_conn(&self.pool, move |conn| recent_messages(conn, &sid, window)).await?;
        let turns = prompt::conversation_turns(history.iter().map(|m| (m.role, m.content.as_str())));

        let completion = self
            .providers
            .chat
            .complete(&turns)
            .await
            .map_err(ServiceError::completion)?;

        let assistant_message = {
            let mut metadata = json!({ "model": completion.model });
            if let Some(tokens) = completion.tokens_used {
                metadata["tokens_used"] = json!(tokens);
            }
            let params = NewMessage::new(session_id, Role::Assistant, completion.text)
                .with_metadata(metadata);
            with_conn(&self.pool, move |conn| append_message(conn, &params)).await?
        };
        progress(TurnProgress::ResponseReady {
            text: assistant_message.content.clone(),
            message_id: assistant_message.message_id.clone(),
        });

        let mut outcome = TurnOutcome {
            session_id: session_id.to_string(),
            transcription,
            user_message,
            assistant_message,
            audio: None,
        };

        if options.synthesize {
            progress(TurnProgress::AudioGenerationStarted);
            outcome.audio = self.attach_speech(&mut outcome.assistant_message, options).await;
        }

        Ok(outcome)
    }

    /// Synthesizes, stores and links audio for an assistant message.
    /// Failures are logged and yield `None`.
    async fn attach_speech(
        &self,
        message: &mut Message,
        options: &TurnOptions,
    ) -> Option<StoredAudio> {
        let request = SpeechRequest {
            text: message.content.clone(),
            voice: options.voice.clone(),
            language: options.language.clone(),
        };

        let audio = match self.synthesize_with_retry(&request).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(
                    session_id = %message.session_id,
                    message_id = %message.message_id,
                    error = %e,
                    "synthesis failed, returning reply without audio"
                );
                return None;
            }
        };

        let url = match self.audio.save(&message.message_id, audio.format, &audio.data).await {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(message_id = %message.message_id, error = %e, "failed to store synthesized audio");
                return None;
            }
        };

        let message_id = message.message_id.clone();
        let link = url.clone();
        if let Err(e) = with_conn(&self.pool, move |conn| attach_audio_url(conn, &message_id, &link)).await {
            tracing::warn!(message_id = %message.message_id, error = %e, "failed to attach audio url");
            return None;
        }
        message.audio_url = Some(url.clone());

        Some(StoredAudio {
            url,
            format: audio.format,
            data: audio.data,
        })
    }

    /// Calls the synthesizer, retrying transient failures up to the
    /// configured count.
    pub async fn synthesize_with_retry(
        &self,
        request: &SpeechRequest,
    ) -> Result<SynthesizedAudio, VoiceError> {
        let mut attempt = 0u32;
        loop {
            match self.providers.synthesizer.synthesize(request).await {
                Ok(audio) => return Ok(audio),
                Err(e) if e.is_transient() && attempt < self.synthesis_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, "transient synthesis failure, retrying");
                    tokio::time::sleep(SYNTHESIS_RETRY_DELAY * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Summarizes a session's full history with the conversation engine.
    pub async fn summarize(&self, session_id: &str) -> Result<String, ServiceError> {
        let sid = session_id.to_string();
        let history = with_conn(&self.pool, move |conn| parley_sessions::list_messages(conn, &sid)).await?;
        if history.is_empty() {
            return Ok("No conversation to summarize.".to_string());
        }

        let turns = prompt::summary_turns(history.iter().map(|m| (m.role, m.content.as_str())));
        let completion = self
            .providers
            .chat
            .complete(&turns)
            .await
            .map_err(ServiceError::completion)?;
        Ok(completion.text)
    }
}

fn user_metadata(transcription: Option<&Transcription>) -> Value {
    let mut meta = Map::new();
    match transcription {
        None => {
            meta.insert("source".into(), json!("text"));
        }
        Some(t) => {
            meta.insert("source".into(), json!("audio"));
            if let Some(c) = t.confidence {
                meta.insert("confidence".into(), json!(c));
            }
            if let Some(lang) = &t.language {
                meta.insert("language".into(), json!(lang));
            }
            if let Some(d) = t.duration_secs {
                meta.insert("duration_secs".into(), json!(d));
            }
        }
    }
    Value::Object(meta)
}
