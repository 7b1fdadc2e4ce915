pub mod backoff;
pub mod circular_buffer;
pub mod clock;
pub mod frame;
pub mod health;
pub mod types;

pub use backoff::*;
pub use circular_buffer::*;
pub use clock::*;
pub use frame::*;
pub use health::*;
pub use types::*;
