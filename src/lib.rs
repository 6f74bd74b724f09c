pub mod bridge;
pub mod commands;
pub mod config;
pub mod discord;
pub mod error;
pub mod ledger;
pub mod markdown;
pub mod media;
pub mod metrics;
pub mod platform;
pub mod relay;
pub mod store;
pub mod telegram;
pub mod voice;
