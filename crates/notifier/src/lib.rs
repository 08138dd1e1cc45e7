//! Push delivery over Firebase Cloud Messaging.
//!
//! `FcmClient` implements `PushChannel` against the FCM HTTP v1 API;
//! `TokenSource` supplies its bearer tokens from a service-account key or a
//! fixed token.

pub mod auth;
pub mod fcm;

pub use auth::{ServiceAccountKey, TokenSource};
pub use fcm::FcmClient;
