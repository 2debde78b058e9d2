//! Chatfolio Realtime Backend
//!
//! Server side of a Messenger chat extension: a shared portfolio the
//! participants of a conversation edit together, kept consistent across
//! their webviews through a room-based socket protocol backed by SQLite.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod rate_limit;
