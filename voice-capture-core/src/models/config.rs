use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::{Map, Value};

use super::audio_models::AudioFormat;
use super::error::VoiceError;

/// Fixed configuration of the capture engine.
///
/// Chosen once at construction. Smaller buffers lower latency, more buffers
/// mean more fill callbacks per second.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Number of rotating capture buffers (default: 3).
    pub buffer_count: usize,

    /// Audio held by one buffer, in milliseconds (default: 100).
    pub buffer_duration_ms: u32,

    /// Format used when a recording does not override the sample rate.
    pub default_format: AudioFormat,

    /// Seconds of audio per in-memory payload segment (default: 15). The first
    /// segment is reserved at start; longer recordings add segments.
    pub payload_reserve_secs: u32,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), VoiceError> {
        if self.buffer_count == 0 {
            return Err(VoiceError::Configuration("buffer count must be positive".into()));
        }
        if self.buffer_duration_ms == 0 {
            return Err(VoiceError::Configuration(
                "buffer duration must be positive".into(),
            ));
        }
        self.default_format.validate()
    }

    /// Largest buffer any supported format can need, so the pool never has
    /// to grow after construction.
    pub fn max_buffer_bytes(&self) -> usize {
        let widest = AudioFormat::new(AudioFormat::MAX_SAMPLE_RATE, 2, 16);
        widest.buffer_bytes_for(self.buffer_duration_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_count: 3,
            buffer_duration_ms: 100,
            default_format: AudioFormat::speech(),
            payload_reserve_secs: 15,
        }
    }
}

/// Caller-supplied options for one recording.
///
/// Everything except the sample rate, output path and channel is forwarded
/// verbatim to the recognition backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingOptions {
    /// Overrides the engine's default sample rate for this recording.
    pub sample_rate: Option<u32>,

    /// When set, the captured audio is also written here as a WAV file.
    pub output_file_path: Option<PathBuf>,

    /// Recognition service key. Required.
    pub api_key: Option<String>,

    /// Free-form request parameters.
    pub params: HashMap<String, String>,

    /// Free-form form-data fields.
    pub form_data: HashMap<String, String>,

    /// Caller tag echoed in every event of this recording.
    pub channel: u32,

    /// Recognition locale, forwarded as the `locale` parameter.
    pub locale: Option<String>,
}

impl RecordingOptions {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Default::default()
        }
    }

    /// Parse an options bag as sent by a host bridge.
    ///
    /// Unrecognized keys are ignored. Recognized keys with the wrong type fail.
    pub fn from_json_map(map: &Map<String, Value>) -> Result<Self, VoiceError> {
        let mut options = Self::default();
        for (key, value) in map {
            match key.as_str() {
                "sampleRate" => {
                    let rate = value
                        .as_u64()
                        .and_then(|r| u32::try_from(r).ok())
                        .ok_or_else(|| type_error(key, "an unsigned integer"))?;
                    options.sample_rate = Some(rate);
                }
                "outputFilePath" => {
                    let path = value.as_str().ok_or_else(|| type_error(key, "a string"))?;
                    options.output_file_path = Some(PathBuf::from(path));
                }
                "apiKey" => {
                    let api_key = value.as_str().ok_or_else(|| type_error(key, "a string"))?;
                    options.api_key = Some(api_key.to_string());
                }
                "params" => options.params = string_map(key, value)?,
                "formData" => options.form_data = string_map(key, value)?,
                "channel" => {
                    options.channel = value
                        .as_u64()
                        .and_then(|c| u32::try_from(c).ok())
                        .ok_or_else(|| type_error(key, "an unsigned integer"))?;
                }
                "locale" => {
                    let locale = value.as_str().ok_or_else(|| type_error(key, "a string"))?;
                    options.locale = Some(locale.to_string());
                }
                other => log::debug!("ignoring unrecognized recording option '{}'", other),
            }
        }
        Ok(options)
    }

    pub fn from_json_str(json: &str) -> Result<Self, VoiceError> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| VoiceError::Configuration(format!("invalid options JSON: {}", e)))?;
        match value {
            Value::Object(map) => Self::from_json_map(&map),
            _ => Err(VoiceError::Configuration("options must be a JSON object".into())),
        }
    }

    pub fn validate(&self) -> Result<(), VoiceError> {
        match self.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => {}
            _ => return Err(VoiceError::Configuration("missing required option: apiKey".into())),
        }
        if let Some(rate) = self.sample_rate {
            if !(AudioFormat::MIN_SAMPLE_RATE..=AudioFormat::MAX_SAMPLE_RATE).contains(&rate) {
                return Err(VoiceError::Configuration(format!(
                    "sampleRate out of range: {}",
                    rate
                )));
            }
        }
        Ok(())
    }

    /// `base` with this recording's sample-rate override applied.
    pub fn effective_format(&self, base: AudioFormat) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate.unwrap_or(base.sample_rate),
            ..base
        }
    }

    /// Request parameters as sent to the backend, including the locale.
    pub fn request_params(&self) -> HashMap<String, String> {
        let mut params = self.params.clone();
        if let Some(ref locale) = self.locale {
            params
                .entry("locale".to_string())
                .or_insert_with(|| locale.clone());
        }
        params
    }
}

fn type_error(key: &str, expected: &str) -> VoiceError {
    VoiceError::Configuration(format!("option '{}' must be {}", key, expected))
}

fn string_map(key: &str, value: &Value) -> Result<HashMap<String, String>, VoiceError> {
    let object = value.as_object().ok_or_else(|| type_error(key, "an object"))?;
    let mut out = HashMap::with_capacity(object.len());
    for (field, v) in object {
        let text = match v {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => {
                return Err(VoiceError::Configuration(format!(
                    "option '{}.{}' must be a string, number or boolean",
                    key, field
                )))
            }
        };
        out.insert(field.clone(), text);
    }
    Ok(out)
}
