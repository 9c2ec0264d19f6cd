pub mod buffer;
pub mod coordinator;
pub mod filter;

pub use buffer::EventBuffer;
pub use coordinator::{CoordinatorState, StreamCoordinator};
pub use filter::StreamFilter;
