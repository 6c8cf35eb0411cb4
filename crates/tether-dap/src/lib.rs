//! tether-dap: client-side Debug Adapter Protocol core.
//!
//! This crate frames and unframes DAP messages, correlates responses with
//! the requests that caused them, drives the session handshake, and fans
//! out adapter events to subscribers. It runs over any [`Transport`].

pub mod capabilities;
pub mod codec;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod session;
pub mod state;
pub mod subscriber;
pub mod transport;

// Re-export key types for convenience.
pub use capabilities::Capabilities;
pub use codec::{FrameBuffer, FrameScan};
pub use error::DapError;
pub use protocol::*;
pub use registry::{PendingRequest, ResponseHandler, SequenceRegistry};
pub use session::{DapSession, LaunchRequest, ProtocolSettings, SessionOptions};
pub use state::{SessionState, StateMachine};
pub use subscriber::Subscriber;
pub use transport::{ReadCallback, ReadEvent, StreamTransport, Transport, TransportState};
