//! Conduit Core: shared domain model for the Conduit fleet.
//!
//! This crate holds everything the control plane and the node agent agree
//! on: the entity model (nodes, tariffs, slots), the capacity-aware slot
//! allocator, the credential generator, and the wire DTOs exchanged over
//! the node API. It is a pure library with no async runtime so both
//! binaries (and their tests) can use it directly.
//!
//! # Data/control flow
//!
//! ```text
//! payment ──> allocator::plan_batch ──> Slot rows bound to Nodes
//!                                             │
//!                 agent polls desired state <─┘
//!                 agent reports usage via heartbeat
//! ```

pub mod allocator;
pub mod credential;
pub mod error;
pub mod model;
pub mod wire;

pub use allocator::plan_batch;
pub use credential::CredentialGenerator;
pub use error::AllocationError;
pub use model::{Credential, Node, NodeKind, NodeStatus, SlotStatus, Tariff, TunnelProtocol};
