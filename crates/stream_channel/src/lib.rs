pub mod channel;
pub mod error;
pub mod line;
pub mod memory;
pub mod message;

pub use channel::{IncomingHandler, MessageSink, MessageSource};
pub use error::ChannelError;
pub use line::{LineSink, LineSource};
pub use memory::MemoryBus;
pub use message::{StreamMessage, SubscriptionId};
