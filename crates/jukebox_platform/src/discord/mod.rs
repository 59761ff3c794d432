#![forbid(unsafe_code)]

mod model;

pub mod gateway;
pub mod rest;

pub use gateway::{DEFAULT_GATEWAY_URL, GatewayConfig, GatewayEvent, GatewaySession, INTENT_GUILDS, Presence, ReadyInfo};
pub use rest::{DEFAULT_API_BASE, DiscordRest, DiscordRestConfig};
