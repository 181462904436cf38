pub mod embedded;
pub mod persistence;
pub mod registry;

pub use embedded::*;
pub use persistence::*;
pub use registry::*;
