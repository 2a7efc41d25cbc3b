pub mod channel;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod gateway;
pub mod instance;
pub mod pairing;
pub mod store;

pub use config::Config;
pub use error::ConnectError;
pub use events::Event;
pub use instance::{ConnectionState, InstanceHandle, InstanceManager, derive_instance_name};
