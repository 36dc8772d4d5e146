//! Shared logic for the primary and standby binaries: the user registry,
//! flat-file persistence, unary RPC handling, the heartbeat state machine,
//! and the failover supervisor.

pub mod heartbeat;
pub mod persistence;
pub mod registry;
pub mod rpc;
pub mod supervisor;
pub mod username;

pub use persistence::{PersistenceError, Store};
pub use registry::{CoreError, LoginOutcome, Registry, UserHandle};
pub use username::{Username, UsernameError};
