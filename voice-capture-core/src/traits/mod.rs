pub mod audio_input;
pub mod event_sink;
pub mod recognition_backend;
