//! `audio/mod.rs` – public façade for the WAV helpers
//!
//! After `use crate::audio::*` you get:
//!   * WAV decoding to interleaved `f32`  → `read_wav()`
//!   * mono prompt loading                → `load_prompt_clip()`
//!   * 16-bit PCM export                  → `write_wav()`

pub mod wav;

pub use wav::{load_prompt_clip, read_wav, write_wav};
