pub mod correlator;
pub mod error;
pub mod frame;
pub mod gateway;
pub mod identity;
pub mod pending;
pub mod registry;
pub mod socket;

pub(crate) use correlator::RequestCorrelator;
pub(crate) use error::BridgeError;
pub(crate) use gateway::ConnectionGateway;
pub(crate) use identity::{HttpIdentityVerifier, IdentityVerifier, StaticTokenVerifier};
pub(crate) use registry::SessionRegistry;
