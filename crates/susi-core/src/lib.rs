//! In-process actors implementing the Susi message fabric: the event
//! broker, the dotted-key state store, the session registry, and the
//! request/response helpers layered on top of the broker.
//!
//! Every mutable subsystem here is owned by exactly one task; other
//! tasks interact with it only by posting commands into its bounded
//! input queue.

pub mod broker;
pub mod ids;
pub mod request;
pub mod session;
pub mod state;

pub use broker::BrokerHandle;
pub use session::SessionHandle;
pub use state::StateHandle;
