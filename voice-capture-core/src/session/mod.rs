pub mod engine;
mod notifier;
pub mod submitter;
pub mod voice_session;
