//! Helpers shared by the workspace's tests: free local ports and throwaway
//! TLS material.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod port_allocator;
pub mod tls_material;

pub use port_allocator::allocate_port;
pub use tls_material::write_self_signed;
