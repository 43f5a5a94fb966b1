//! Nerve configuration generation
//!
//! 1. `fanout` turns one service into its registration entries
//! 2. `assemble` merges every local service into one document
//! 3. `model` defines that document and its deterministic serialization

pub mod assemble;
pub mod fanout;
pub mod model;

pub use assemble::{assemble, collect_services, ClassWeights, HostContext, ServiceGroup};
pub use fanout::{hacheck_uri, FanOut, FanOutSettings, ServiceInstance};
pub use model::{HealthCheck, NerveConfiguration, RegistrationEntry};
