//! Core waifu library (session loop, audio playback, terminal input, HTTP client, config).

pub mod audio;
pub mod client;
pub mod config;
pub mod interrupt;
pub mod logging;
pub mod presentation;
pub mod session;
pub mod terminal;
