//! Transport primitives for the Unix-domain path.

#[cfg(unix)]
mod capability;

#[cfg(unix)]
pub use capability::{CapabilityChannel, CapabilityPreference, CapabilityTier};

#[cfg(unix)]
pub(crate) use capability::generate_socket_path;
