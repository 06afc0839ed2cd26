// Shared foundation for the quizboard crates: data model, wire protocol,
// configuration and the backend request capability.

pub mod config;
pub mod http;
pub mod model;
pub mod protocol;
