//! nerve-tools: host-side plumbing for service registration
//!
//! Two tools share this library:
//! - `configure-nerve` generates the nerve registration config for every
//!   service on the host, validates it and installs it, reloading or
//!   restarting nerve as needed
//! - `updown-service` marks one local service up or down and waits until
//!   the service mesh agrees
//!
//! Environment collaborators (topology, ZooKeeper discovery, labels, the
//! service inventory, nerve process control, hacheck) sit behind traits so
//! the generation and apply logic can run against fakes.

pub mod apply;
pub mod config;
pub mod descriptor;
pub mod inventory;
pub mod labels;
pub mod mesh;
pub mod nerve;
pub mod net;
pub mod topology;
pub mod updown;

pub use config::Config;
