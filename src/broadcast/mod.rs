pub mod observable;
pub mod observer;

pub use observable::{Observable, Publisher};
pub use observer::{Observer, Passthrough, Relay};
