pub mod codec;
pub mod publisher;
pub mod subscriber;
pub mod tracker;

pub use codec::*;
pub use publisher::*;
pub use subscriber::*;
pub use tracker::*;
