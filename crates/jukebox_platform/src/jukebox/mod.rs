#![forbid(unsafe_code)]

pub mod adapter;
pub mod client;

pub use adapter::{DEFAULT_NOTIFICATION_CAPACITY, Subscription, SubscriptionHandle, classify, subscribe};
pub use client::{JukeboxClient, decode_notification_stream};
