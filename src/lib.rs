//! Container discovery for a host-resident monitoring agent.
//!
//! Services advertise themselves with `flexDiscovery*` labels or
//! environment variables.  A [`Discovery`] pass matches those
//! advertisements with running containers, resolves each target's
//! address and port, and materializes the named probe configuration
//! templates for them.

pub mod annotations;
pub mod config;
pub mod directive;
pub mod discovery;
pub mod error;
pub mod fanout;
pub mod identity;
pub mod matcher;
pub mod resolver;
pub mod runtime;
pub mod template;
pub mod types;

pub use config::{Config, DiscoverySettings};
pub use directive::Directive;
pub use discovery::{Discovery, PassSummary};
pub use error::DiscoveryError;
pub use template::{SynthesizedConfig, TemplateStore};
