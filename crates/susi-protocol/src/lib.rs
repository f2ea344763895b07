//! Wire types for the Susi event-bus protocol.
//!
//! This crate has no I/O and no tokio dependency: it only defines the
//! JSON frame schema exchanged with gateway clients, the in-process
//! [`Event`] type published through the broker, and glob-topic matching.

mod event;
mod frame;
mod glob;

pub use event::{AuthLevel, Event, SUPERUSER, UNSET};
pub use frame::{Frame, FrameKind, Request};
pub use glob::{is_glob, topic_matches};
