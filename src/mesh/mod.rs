//! Service mesh integration
//!
//! - `ingress`: envoy ingress listeners, used when generating nerve config
//! - `eds`: envoy endpoint snapshots, used to wait for up/down convergence

pub mod eds;
pub mod ingress;

pub use ingress::{resolve_ingress, IngressKey, IngressMapping};
