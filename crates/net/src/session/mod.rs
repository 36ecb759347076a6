mod client;
mod config;
mod game;

pub use client::{ConnectionStatus, NetClient};
pub use config::SessionConfig;
pub use game::{FollowTarget, GameSession};
