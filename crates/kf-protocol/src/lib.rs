//! kf-protocol: Wire framing for UDP traffic tunnelled over a TCP stream
//!
//! Kubernetes port-forwarding only carries TCP, so UDP forwards go through a
//! proxy pod. Each datagram is written to the stream as a length-prefixed
//! frame and unpacked on the other side.

pub mod codec;
pub mod error;
pub mod frame;

pub use codec::UdpFrameCodec;
pub use error::ProtocolError;
pub use frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
