use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::audio_models::AudioFormat;
use crate::models::error::VoiceError;
use crate::processing::wav_format;

/// Streaming WAV file writer for the optional recording output path.
///
/// ```text
/// [44-byte WAV header, sizes patched on close]
/// [raw PCM data...]
/// ```
///
/// Only ever driven from the control thread; the real-time fill path never
/// touches the file system.
pub struct WavFileWriter {
    file_path: PathBuf,
    file: Option<BufWriter<File>>,
    data_bytes: u64,
}

impl WavFileWriter {
    pub fn new(file_path: PathBuf) -> Self {
        Self {
            file_path,
            file: None,
            data_bytes: 0,
        }
    }

    /// Create the file and write a placeholder header.
    pub fn open(&mut self, format: &AudioFormat) -> Result<(), VoiceError> {
        if self.file.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    VoiceError::Storage(format!("failed to create directory: {}", e))
                })?;
            }
        }

        let file = File::create(&self.file_path)
            .map_err(|e| VoiceError::Storage(format!("failed to create file: {}", e)))?;
        let mut file = BufWriter::new(file);

        let header = wav_format::generate_wav_header(format, 0);
        file.write_all(&header)
            .map_err(|e| VoiceError::Storage(format!("write failed: {}", e)))?;

        self.file = Some(file);
        self.data_bytes = 0;
        Ok(())
    }

    pub fn write(&mut self, pcm: &[u8]) -> Result<(), VoiceError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| VoiceError::Storage("file is not open for writing".into()))?;
        file.write_all(pcm)
            .map_err(|e| VoiceError::Storage(format!("write failed: {}", e)))?;
        self.data_bytes += pcm.len() as u64;
        Ok(())
    }

    /// Patch the header sizes, flush, and return the file's SHA-256.
    pub fn close(&mut self) -> Result<String, VoiceError> {
        let writer = self
            .file
            .take()
            .ok_or_else(|| VoiceError::Storage("file is not open".into()))?;
        let mut file = writer
            .into_inner()
            .map_err(|e| VoiceError::Storage(format!("flush failed: {}", e.error())))?;

        let mut header = [0u8; wav_format::WAV_HEADER_SIZE];
        wav_format::patch_sizes(&mut header, self.data_bytes);

        file.seek(SeekFrom::Start(4))
            .map_err(|e| VoiceError::Storage(e.to_string()))?;
        file.write_all(&header[4..8])
            .map_err(|e| VoiceError::Storage(e.to_string()))?;
        file.seek(SeekFrom::Start(40))
            .map_err(|e| VoiceError::Storage(e.to_string()))?;
        file.write_all(&header[40..44])
            .map_err(|e| VoiceError::Storage(e.to_string()))?;
        file.flush().map_err(|e| VoiceError::Storage(e.to_string()))?;

        sha256_file(&self.file_path)
    }

    pub fn data_bytes(&self) -> u64 {
        self.data_bytes
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

/// Write `pcm` as a complete WAV file at `path`. Returns the file's SHA-256.
pub fn write_wav_file(path: &Path, format: &AudioFormat, pcm: &[u8]) -> Result<String, VoiceError> {
    let mut writer = WavFileWriter::new(path.to_path_buf());
    writer.open(format)?;
    writer.write(pcm)?;
    writer.close()
}

/// SHA-256 hex digest of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex_encode(&Sha256::digest(data))
}

fn sha256_file(path: &Path) -> Result<String, VoiceError> {
    let data = fs::read(path)
        .map_err(|e| VoiceError::Storage(format!("failed to read file for checksum: {}", e)))?;
    Ok(sha256_hex(&data))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
