//! Inbound stream registry
//!
//! ```text
//!   protocol session ──open()──► StreamsManager ──on_stream_registered──► application
//!          │                          │
//!     push_frame()               Arc<InboundStream>
//!          │                          │
//!          └──► broadcast::Sender ──► subscribe() ──► outbound forwarders
//! ```
//!
//! Frames carry `bytes::Bytes`, so every subscriber shares the publisher's
//! allocation. Closing a stream drops its sender; subscribers drain what is
//! buffered and then see the channel closed.

pub mod error;
pub mod frame;
pub mod store;
pub mod stream;

pub use error::RegistryError;
pub use frame::{BroadcastFrame, FrameType};
pub use store::{StreamListener, StreamsManager};
pub use stream::{InboundStream, StreamType};
