//! API Gateway: accepts connections over TCP, mutual-TLS, and a local
//! stream socket, each running the same newline-delimited JSON command
//! loop against the shared broker and state store.

pub mod auth;
pub mod connection;
pub mod framed_sender;
pub mod listeners;
pub mod tls;

pub use listeners::GatewayHandles;
