//! Payloads, broker model and the transport boundary

pub mod entities;
pub mod errors;
pub mod events;
pub mod repositories;
pub mod services;
pub mod transport;
pub mod value_objects;

pub use entities::*;
pub use errors::*;
pub use events::*;
pub use repositories::*;
pub use services::*;
pub use transport::*;
pub use value_objects::*;
