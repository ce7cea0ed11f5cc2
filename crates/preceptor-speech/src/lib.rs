//! Speech provider gateways.
//!
//! Both gateways front interchangeable providers behind a trait, pick the
//! provider once at construction (substituting the configured fallback when
//! the primary lacks credentials), and never raise from the transcribe or
//! synthesize path: provider failures are logged and collapse to "no result".

pub mod stt;
pub mod tts;
pub mod wav;

pub use stt::{SttGateway, SttProvider};
pub use tts::{TtsGateway, TtsProvider};
