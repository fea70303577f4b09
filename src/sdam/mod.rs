//! Server discovery and monitoring: heartbeats, the topology state machine, and server
//! selection.

pub(crate) mod description;
mod monitor;
pub mod public;
mod server;
mod topology;

use std::time::Duration;

pub use self::public::{ServerInfo, ServerType, TopologyType};

pub(crate) use self::{
    description::{
        server::{ServerDescription, TopologyVersion},
        topology::{
            server_selection::{self, SelectedServer},
            TopologyDescription,
        },
    },
    monitor::Monitor,
    server::Server,
    topology::{HandshakePhase, Topology, TopologyUpdater, TopologyWatcher},
};

pub(crate) const DEFAULT_HEARTBEAT_FREQUENCY: Duration = Duration::from_secs(10);

/// The minimum amount of time a monitor waits between checks, even when an immediate check has
/// been requested.
pub(crate) const MIN_HEARTBEAT_FREQUENCY: Duration = Duration::from_millis(500);
