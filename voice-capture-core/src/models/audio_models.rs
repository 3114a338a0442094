use serde::{Deserialize, Serialize};

use super::error::VoiceError;

/// PCM stream format of a capture session.
///
/// Fixed when a session starts and immutable for its lifetime. One packet is
/// one frame: a sample for every channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    pub const MIN_SAMPLE_RATE: u32 = 8_000;
    pub const MAX_SAMPLE_RATE: u32 = 192_000;

    pub fn new(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
        }
    }

    /// 16 kHz mono 16-bit, the rate speech backends expect.
    pub fn speech() -> Self {
        Self::new(16_000, 1, 16)
    }

    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample / 8) as usize
    }

    /// Bytes per packet (frame). Also the WAV block alignment.
    pub fn bytes_per_packet(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.bytes_per_packet() as u32
    }

    /// Byte size of a buffer holding `duration_ms` of audio, rounded down to
    /// whole packets and never smaller than one packet.
    pub fn buffer_bytes_for(&self, duration_ms: u32) -> usize {
        let packets = (self.sample_rate as u64 * duration_ms as u64 / 1000).max(1) as usize;
        packets * self.bytes_per_packet()
    }

    pub fn duration_secs(&self, byte_count: u64) -> f64 {
        let rate = self.byte_rate();
        if rate == 0 {
            return 0.0;
        }
        byte_count as f64 / rate as f64
    }

    pub fn validate(&self) -> Result<(), VoiceError> {
        if !(Self::MIN_SAMPLE_RATE..=Self::MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(VoiceError::Configuration(format!(
                "unsupported sample rate: {}",
                self.sample_rate
            )));
        }
        if ![1, 2].contains(&self.channels) {
            return Err(VoiceError::Configuration(format!(
                "unsupported channel count: {}",
                self.channels
            )));
        }
        if ![8, 16].contains(&self.bits_per_sample) {
            return Err(VoiceError::Configuration(format!(
                "unsupported bits per sample: {}",
                self.bits_per_sample
            )));
        }
        Ok(())
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::speech()
    }
}

/// Transport type for an audio device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioTransportType {
    BuiltIn,
    Bluetooth,
    BluetoothLE,
    Usb,
    Virtual,
    Unknown,
}

/// An audio input device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSource {
    pub id: String,
    pub name: String,
    pub is_default: bool,
    pub transport_type: Option<AudioTransportType>,
}

/// Buffer pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers allocated at engine construction. Constant.
    pub allocated: usize,
    /// Buffers currently queued for hardware fill.
    pub queued: usize,
    /// Buffers handed to the drain path since construction.
    pub fills: u64,
    /// Buffers returned to the fill rotation since construction.
    pub recycles: u64,
}
