use std::path::{Path, PathBuf};

use async_trait::async_trait;
use shared::protocol::{DICTATION_FILENAME, DICTATION_MIME};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{ClientError, ClientResult};

const FILE_CHUNK_BYTES: usize = 16 * 1024;

/// Encoded audio delivered by a capture device, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub sequence: u64,
    pub data: Vec<u8>,
}

/// Source of dictation audio (microphone, file, test script).
#[async_trait]
pub trait AudioInput: Send + Sync {
    fn name(&self) -> &str;

    /// Acquires the device. Fails with [`ClientError::Device`] when it is
    /// missing or access is denied.
    async fn open(&self) -> ClientResult<Box<dyn AudioDevice>>;
}

/// An acquired input device.
#[async_trait]
pub trait AudioDevice: Send {
    fn mime_type(&self) -> &str;

    fn file_name(&self) -> String {
        DICTATION_FILENAME.to_string()
    }

    /// Begins capture. Chunks arrive on the returned channel until release.
    async fn start(&mut self) -> ClientResult<mpsc::Receiver<AudioChunk>>;

    /// Stops capture and returns the device. Must close the chunk channel and
    /// must be safe to call after a failed `start`.
    fn release(&mut self);
}

/// Scoped ownership of an [`AudioDevice`]: released exactly once, either
/// explicitly or on drop.
pub struct DeviceGuard {
    input: String,
    device: Option<Box<dyn AudioDevice>>,
}

impl DeviceGuard {
    pub fn new(input: impl Into<String>, device: Box<dyn AudioDevice>) -> Self {
        Self {
            input: input.into(),
            device: Some(device),
        }
    }

    pub async fn start(&mut self) -> ClientResult<mpsc::Receiver<AudioChunk>> {
        match self.device.as_deref_mut() {
            Some(device) => device.start().await,
            None => Err(ClientError::Device(format!(
                "audio input '{}' was already released",
                self.input
            ))),
        }
    }

    pub fn mime_type(&self) -> String {
        self.device
            .as_deref()
            .map(|device| device.mime_type().to_string())
            .unwrap_or_else(|| DICTATION_MIME.to_string())
    }

    pub fn file_name(&self) -> String {
        self.device
            .as_deref()
            .map(|device| device.file_name())
            .unwrap_or_else(|| DICTATION_FILENAME.to_string())
    }

    pub fn is_held(&self) -> bool {
        self.device.is_some()
    }

    pub fn release(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.release();
            debug!(input = %self.input, "audio: device released");
        }
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Plays an encoded audio file through the capture pipeline.
pub struct FileAudioInput {
    path: PathBuf,
    name: String,
}

impl FileAudioInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = format!("file:{}", path.display());
        Self { path, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AudioInput for FileAudioInput {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self) -> ClientResult<Box<dyn AudioDevice>> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|err| {
            ClientError::Device(format!(
                "audio input '{}' unavailable: {err}",
                self.path.display()
            ))
        })?;
        let mime_type = match mime_guess::from_path(&self.path).first() {
            Some(mime) if mime.type_() == mime_guess::mime::AUDIO => mime.essence_str().to_string(),
            _ => DICTATION_MIME.to_string(),
        };
        let extension = self
            .path
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned())
            .unwrap_or_else(|| "webm".to_string());
        info!(input = %self.name, bytes = bytes.len(), "audio: file input opened");
        Ok(Box::new(FileAudioDevice {
            bytes: Some(bytes),
            mime_type,
            file_name: format!("dictation.{extension}"),
        }))
    }
}

/// Replays the whole file as soon as capture starts; the channel closes once
/// the last chunk is queued.
struct FileAudioDevice {
    bytes: Option<Vec<u8>>,
    mime_type: String,
    file_name: String,
}

#[async_trait]
impl AudioDevice for FileAudioDevice {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn file_name(&self) -> String {
        self.file_name.clone()
    }

    async fn start(&mut self) -> ClientResult<mpsc::Receiver<AudioChunk>> {
        let bytes = self
            .bytes
            .take()
            .ok_or_else(|| ClientError::Device("file input already started".into()))?;
        let chunks: Vec<&[u8]> = bytes.chunks(FILE_CHUNK_BYTES).collect();
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for (sequence, data) in chunks.into_iter().enumerate() {
            tx.try_send(AudioChunk {
                sequence: sequence as u64,
                data: data.to_vec(),
            })
            .map_err(|err| ClientError::Device(format!("file input stalled: {err}")))?;
        }
        Ok(rx)
    }

    fn release(&mut self) {
        self.bytes = None;
    }
}

#[cfg(test)]
mod tests {
    use std::{
        env, fs,
        time::{SystemTime, UNIX_EPOCH},
    };

    use super::*;

    #[tokio::test]
    async fn missing_file_is_a_device_error() {
        let input = FileAudioInput::new("/nonexistent/dictation.webm");
        let err = input.open().await.err().expect("must fail");
        assert!(matches!(err, ClientError::Device(_)), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn file_input_streams_every_byte_in_order() {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = env::temp_dir().join(format!("cabinet_audio_{suffix}.wav"));
        let payload: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &payload).expect("write audio");

        let input = FileAudioInput::new(&path);
        let mut guard = DeviceGuard::new(input.name(), input.open().await.expect("open"));
        assert_eq!(guard.file_name(), "dictation.wav");
        assert!(guard.mime_type().starts_with("audio/"));

        let mut rx = guard.start().await.expect("start");
        let mut received = Vec::new();
        let mut expected_sequence = 0;
        while let Some(chunk) = rx.recv().await {
            assert_eq!(chunk.sequence, expected_sequence);
            expected_sequence += 1;
            received.extend_from_slice(&chunk.data);
        }
        guard.release();
        assert!(!guard.is_held());
        assert_eq!(received, payload);

        fs::remove_file(path).expect("cleanup");
    }
}
