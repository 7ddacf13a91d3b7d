use async_trait::async_trait;
use parley_types::AudioFormat;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::SynthesisConfig;
use crate::stt::executable_available;
use crate::{
    resolve_voice, validate_speech_text, wav, HealthStatus, SpeechRequest, SynthesizedAudio,
    Synthesizer, VoiceError,
};

/// espeak-ng speaking rate at speed 1.0, in words per minute.
const ESPEAK_BASE_WPM: f32 = 175.0;

#[derive(Debug, Clone)]
enum Engine {
    Piper { model: PathBuf, sample_rate: u32 },
    Espeak,
}

/// Offline synthesis.
///
/// Runs `piper` when a voice model is configured and `espeak-ng` otherwise.
/// Both produce WAV: piper's raw s16le output is wrapped in a header, and
/// espeak-ng already writes a WAV stream to stdout.
#[derive(Debug, Clone)]
pub struct LocalSynthesizer {
    engine: Engine,
    piper_binary: PathBuf,
    voice: String,
    speed: f32,
    timeout: Duration,
}

impl LocalSynthesizer {
    pub fn new(config: &SynthesisConfig) -> Self {
        let engine = match &config.piper_model {
            Some(model) if !model.trim().is_empty() => Engine::Piper {
                model: PathBuf::from(model),
                sample_rate: config.piper_sample_rate,
            },
            _ => Engine::Espeak,
        };
        let voice = match &engine {
            Engine::Piper { model, .. } => model
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "piper".to_string()),
            Engine::Espeak => "espeak-ng".to_string(),
        };
        Self {
            engine,
            piper_binary: PathBuf::from(&config.piper_binary),
            voice,
            speed: config.speed.clamp(0.25, 4.0),
            timeout: config.timeout(),
        }
    }

    async fn run_piper(&self, model: &Path, text: &str) -> Result<Vec<u8>, VoiceError> {
        if !model.is_file() {
            return Err(VoiceError::Config(format!("piper model not found: {}", model.display())));
        }

        // Length scale is the inverse of speed: 2.0x speed halves durations.
        let mut command = Command::new(&self.piper_binary);
        command
            .arg("--model")
            .arg(model)
            .arg("--output_raw")
            .arg("--length_scale")
            .arg((1.0 / self.speed).to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| VoiceError::Config(format!("failed to spawn piper: {e}")))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Transport("failed to open piper stdin".to_string()))?;
        let input = text.to_string();
        let write_task = tokio::spawn(async move { stdin.write_all(input.as_bytes()).await });

        let output = self.wait(child.wait_with_output(), "piper").await?;

        match write_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(VoiceError::Transport(format!("failed to write to piper: {e}"))),
            Err(e) => return Err(VoiceError::Transport(format!("stdin task failed: {e}"))),
        }

        Ok(output.stdout)
    }

    async fn run_espeak(&self, text: &str, language: Option<&str>) -> Result<Vec<u8>, VoiceError> {
        let wpm = (ESPEAK_BASE_WPM * self.speed).round() as u32;
        let mut command = Command::new("espeak-ng");
        command
            .arg("--stdout")
            .arg("-s")
            .arg(wpm.to_string());
        if let Some(lang) = language {
            command.arg("-v").arg(lang);
        }
        command
            .arg(text)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| VoiceError::Config(format!("failed to spawn espeak-ng: {e}")))?;
        let output = self.wait(child.wait_with_output(), "espeak-ng").await?;
        Ok(output.stdout)
    }

    async fn wait(
        &self,
        fut: impl std::future::Future<Output = std::io::Result<Output>>,
        program: &str,
    ) -> Result<Output, VoiceError> {
        let output = tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| VoiceError::Timeout(self.timeout))?
            .map_err(|e| VoiceError::Transport(format!("failed to wait for {program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(program, status = %output.status, stderr = %stderr.trim(), "synthesis process failed");
            return Err(VoiceError::Rejected(format!("{program} exited with {}", output.status)));
        }
        Ok(output)
    }
}

#[async_trait]
impl Synthesizer for LocalSynthesizer {
    fn name(&self) -> &str {
        match self.engine {
            Engine::Piper { .. } => "piper",
            Engine::Espeak => "espeak-ng",
        }
    }

    fn voices(&self) -> Vec<String> {
        vec![self.voice.clone()]
    }

    async fn synthesize(&self, request: &SpeechRequest) -> Result<SynthesizedAudio, VoiceError> {
        validate_speech_text(&request.text)?;
        let voice = resolve_voice(request.voice.as_deref(), &self.voices(), &self.voice);

        let data = match &self.engine {
            Engine::Piper { model, sample_rate } => {
                let pcm = self.run_piper(model, &request.text).await?;
                if pcm.is_empty() {
                    return Err(VoiceError::InvalidResponse("piper produced no audio".to_string()));
                }
                wav::encode_pcm16(&pcm, *sample_rate, 1).map_err(|e| {
                    VoiceError::InvalidResponse(format!("failed to wrap piper audio: {e}"))
                })?
            }
            Engine::Espeak => {
                let data = self.run_espeak(&request.text, request.language.as_deref()).await?;
                if data.len() <= wav::WAV_HEADER_LEN {
                    return Err(VoiceError::InvalidResponse("espeak-ng produced no audio".to_string()));
                }
                data
            }
        };

        Ok(SynthesizedAudio {
            data,
            format: AudioFormat::Wav,
            voice,
        })
    }

    async fn health(&self) -> HealthStatus {
        let ok = match &self.engine {
            Engine::Piper { model, .. } => executable_available(&self.piper_binary) && model.is_file(),
            Engine::Espeak => executable_available(Path::new("espeak-ng")),
        };
        HealthStatus::from_ok(ok)
    }
}
