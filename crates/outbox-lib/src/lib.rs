pub mod attachment;
pub mod channel;
pub mod channel_actor;
pub mod commands;
pub mod config;
pub mod hooks;
pub mod log;
pub mod media;
pub mod message;
pub mod permissions;
pub mod pipeline;
pub mod preview;
pub mod sources;
pub mod state;
pub mod util;
pub mod worker;
