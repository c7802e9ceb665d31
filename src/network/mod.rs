//! TCP transport: broadcast server, paced source and reconnecting client

pub mod client;
pub mod pacer;
pub mod server;

pub use client::StreamClient;
pub use pacer::{FrameSink, Pacer};
pub use server::BroadcastServer;
