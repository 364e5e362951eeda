//! Register node runtime: register store, access service and socket server.

pub mod backing;
mod error;
pub mod node;
pub mod paths;
pub mod protocol;
pub mod server;
pub mod service;
pub mod store;

pub use backing::{Backing, JsonFileBacking, MemoryBacking, PersistedRegister};
pub use error::NodeError;
pub use node::{init_tracing, Node};
pub use protocol::{
    access_register, list_registers, register_name_at, send_request, wait_for_node, NodeRequest,
    NodeResponse,
};
pub use service::{AccessFailure, AccessService};
pub use store::{CoercionPolicy, Computed, ComputedRegister, Lookup, RegisterStore, StoreBuilder};
