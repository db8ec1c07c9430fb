//! Concrete boundary implementations for the Arcana economic subsystem.
//!
//! - [`memory_store`]: in-process document store with the atomic
//!   read-modify-write semantics the services rely on. Used in tests and
//!   as the offline/dev backend.
//! - [`gateway`]: reqwest-based remote API gateway with the fixed error
//!   taxonomy and the 401 session-teardown side effect.
//! - [`ip_guard`]: best-effort public-IP duplicate-account gate.

pub mod gateway;
pub mod ip_guard;
pub mod memory_store;

pub use gateway::RemoteApiGateway;
pub use ip_guard::{IpDuplicateGuard, PublicIpClient};
pub use memory_store::InMemoryDocumentStore;
