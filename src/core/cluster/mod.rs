// src/core/cluster/mod.rs

//! Multi-instance coordination: the Server Registry & Quorum (C4), the
//! Polling Lease Manager (C5), the Channel Registry & Remote Dispatcher
//! (C6), and the Mode Controller (C7).

pub mod dispatch;
pub mod lease;
pub mod mode;
pub mod poll_authority;
pub mod registry;

pub use dispatch::{ChannelRegistry, RemoteDispatcher};
pub use lease::LeaseManager;
pub use mode::ModeController;
pub use poll_authority::ClusterPollAuthority;
pub use registry::{ServerRecord, ServerRegistry, ServerStatus};
