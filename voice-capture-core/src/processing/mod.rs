pub mod buffer_pool;
pub mod pcm;
pub mod wav_format;
