//! Audio upload validation and synthesized audio storage.

use crate::error::ServiceError;
use parley_types::AudioFormat;
use std::path::{Path, PathBuf};

/// URL prefix under which stored audio is served.
pub const AUDIO_URL_PREFIX: &str = "/audio";

/// Checks an uploaded audio payload and resolves its format from the file
/// name (no extension means WAV).
pub fn validate_upload(
    data: &[u8],
    file_name: Option<&str>,
    max_bytes: usize,
) -> Result<AudioFormat, ServiceError> {
    if data.is_empty() {
        return Err(ServiceError::Validation("audio payload is empty".to_string()));
    }
    if data.len() > max_bytes {
        return Err(ServiceError::Validation(format!(
            "audio payload is {} bytes (limit: {} bytes)",
            data.len(),
            max_bytes
        )));
    }

    let name = file_name.unwrap_or_default();
    AudioFormat::from_file_name(name).ok_or_else(|| {
        let supported: Vec<&str> = AudioFormat::ALL.iter().map(|f| f.extension()).collect();
        ServiceError::Validation(format!(
            "unsupported audio format for {name:?}; supported: {}",
            supported.join(", ")
        ))
    })
}

/// Directory of synthesized replies, one file per assistant message.
#[derive(Debug, Clone)]
pub struct AudioStore {
    dir: PathBuf,
}

impl AudioStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `<message_id>.<ext>` and returns its retrieval URL.
    pub async fn save(
        &self,
        message_id: &str,
        format: AudioFormat,
        data: &[u8],
    ) -> std::io::Result<String> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let file_name = format!("{message_id}.{}", format.extension());
        tokio::fs::write(self.dir.join(&file_name), data).await?;
        Ok(format!("{AUDIO_URL_PREFIX}/{file_name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_checks() {
        assert!(matches!(
            validate_upload(&[], Some("a.wav"), 10),
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            validate_upload(&[0; 11], Some("a.wav"), 10),
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            validate_upload(&[0; 4], Some("notes.txt"), 10),
            Err(ServiceError::Validation(_))
        ));
        assert_eq!(validate_upload(&[0; 4], Some("clip.webm"), 10).unwrap(), AudioFormat::Webm);
        assert_eq!(validate_upload(&[0; 4], None, 10).unwrap(), AudioFormat::Wav);
    }

    #[tokio::test]
    async fn save_writes_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = AudioStore::new(dir.path().join("nested"));

        let url = store.save("msg-1", AudioFormat::Mp3, b"ID3").await.unwrap();
        assert_eq!(url, "/audio/msg-1.mp3");
        assert_eq!(std::fs::read(dir.path().join("nested/msg-1.mp3")).unwrap(), b"ID3");
    }
}
