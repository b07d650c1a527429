//! POS wire protocol: POSLOYALTY framing, XML payloads, request dispatch.

pub mod dispatch;
pub mod error;
pub mod framing;
pub mod xml;

pub use dispatch::Dispatcher;
pub use error::ProtocolError;
pub use framing::PosFrameCodec;
