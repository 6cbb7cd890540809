//! Event bus (C9, §4.7): typed pub/sub decoupling producers from observers.

pub mod bus;
pub mod types;

pub use bus::EventBus;
pub use types::Event;
