//! Stock room handlers.

mod relay;

pub use relay::RelayRoom;
