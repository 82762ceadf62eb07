//! Observers that hand frames off to slower consumers, keeping broadcasts short

pub mod channel;
pub mod ringbuf;

pub use self::channel::ChannelObserver;
pub use self::ringbuf::FrameQueue;
