use async_trait::async_trait;
use parley_types::AudioFormat;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::TranscriptionConfig;
use crate::confidence::estimate_confidence;
use crate::{wav, HealthStatus, Transcriber, Transcription, VoiceError};

/// Offline transcription through a `whisper.cpp` executable.
///
/// Audio is piped to the binary over stdin; whisper.cpp only reads WAV, so
/// other containers and unreadable WAV data are rejected up front.
#[derive(Debug, Clone)]
pub struct WhisperCppTranscriber {
    binary_path: PathBuf,
    model_path: PathBuf,
    timeout: Duration,
}

impl WhisperCppTranscriber {
    pub fn new(config: &TranscriptionConfig) -> Self {
        Self {
            binary_path: PathBuf::from(&config.whisper_binary),
            model_path: PathBuf::from(&config.whisper_model),
            timeout: config.timeout(),
        }
    }
}

#[async_trait]
impl Transcriber for WhisperCppTranscriber {
    fn name(&self) -> &str {
        "whisper-cpp"
    }

    async fn transcribe(
        &self,
        audio: &[u8],
        format: AudioFormat,
        language: Option<&str>,
    ) -> Result<Transcription, VoiceError> {
        if format != AudioFormat::Wav {
            return Err(VoiceError::InvalidInput(format!(
                "local transcription accepts wav only, got {format}"
            )));
        }
        let features = wav::features(audio)
            .ok_or_else(|| VoiceError::InvalidInput("audio is not a readable wav".to_string()))?;

        // -f - reads from stdin; -nt drops timestamps so stdout is plain text.
        let mut command = Command::new(&self.binary_path);
        command
            .arg("-m")
            .arg(&self.model_path)
            .arg("-nt")
            .arg("-f")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(lang) = language {
            command.arg("-l").arg(lang);
        }

        let mut child = command
            .spawn()
            .map_err(|e| VoiceError::Config(format!("failed to spawn whisper.cpp: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Transport("failed to open whisper.cpp stdin".to_string()))?;
        let input = audio.to_vec();
        // Write concurrently so a full stdout pipe cannot deadlock the child.
        let write_task = tokio::spawn(async move { stdin.write_all(&input).await });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| VoiceError::Timeout(self.timeout))?
            .map_err(|e| VoiceError::Transport(format!("failed to read whisper.cpp output: {e}")))?;

        match write_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(VoiceError::Transport(format!("failed to write audio: {e}"))),
            Err(e) => return Err(VoiceError::Transport(format!("stdin task failed: {e}"))),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(status = %output.status, stderr = %stderr.trim(), "whisper.cpp failed");
            return Err(VoiceError::Rejected(format!("whisper.cpp exited with {}", output.status)));
        }

        let text = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        Ok(Transcription {
            confidence: Some(estimate_confidence(&text, Some(&features))),
            language: language.map(str::to_string),
            duration_secs: Some(features.duration_secs),
            text,
        })
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus::from_ok(executable_available(&self.binary_path) && self.model_path.is_file())
    }
}

/// Whether `program` names an existing file, either directly or via `PATH`.
pub(crate) fn executable_available(program: &Path) -> bool {
    if program.components().count() > 1 || program.is_absolute() {
        return program.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}
