//! HTTP Handlers

mod cache;
mod ping;
mod playback;
mod tts;
mod websocket;

pub use cache::*;
pub use ping::*;
pub use playback::*;
pub use tts::*;
pub use websocket::*;
