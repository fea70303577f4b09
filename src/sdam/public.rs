//! Public views of the driver's topology state.

use std::{fmt, time::Duration};

use serde::Serialize;

use crate::{bson::DateTime, options::ServerAddress, selection_criteria::TagSet};

pub use super::description::{server::ServerType, topology::TopologyType};

/// A description of the most up-to-date information known about a server.
#[derive(Clone, Debug, Serialize)]
pub struct ServerInfo {
    pub(crate) description: super::ServerDescription,
}

impl ServerInfo {
    pub(crate) fn new(description: super::ServerDescription) -> Self {
        Self { description }
    }

    /// Gets the address of the server.
    pub fn address(&self) -> &ServerAddress {
        &self.description.address
    }

    /// Gets the weighted average of the time it has taken for a server check to round-trip
    /// from the driver to the server.
    ///
    /// This is the value that the driver uses internally to determine the latency window as
    /// part of server selection.
    pub fn average_round_trip_time(&self) -> Option<Duration> {
        self.description.average_round_trip_time
    }

    /// Gets the last time that the driver's monitoring thread for the server updated the
    /// internal information about the server.
    pub fn last_update_time(&self) -> Option<DateTime> {
        self.description.last_update_time
    }

    /// Gets the type of the server.
    pub fn server_type(&self) -> ServerType {
        self.description.server_type
    }

    /// Gets the tags associated with the server.
    pub fn tags(&self) -> Option<&TagSet> {
        self.description.tags()
    }

    /// Gets the error that occurred in the most recent server check, if any.
    pub fn error(&self) -> Option<&str> {
        self.description.reply.as_ref().err().map(String::as_str)
    }
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ Address: {}, Type: {:?}",
            self.address(),
            self.server_type()
        )?;

        if let Some(avg_rtt) = self.average_round_trip_time() {
            write!(f, ", Average RTT: {:?}", avg_rtt)?;
        }

        if let Some(error) = self.error() {
            write!(f, ", Error: {}", error)?;
        }

        write!(f, " }}")
    }
}

/// A description of the most up-to-date information known about a topology.
#[derive(Clone, Debug, Serialize)]
pub struct TopologyDescription {
    pub(crate) description: super::description::topology::TopologyDescription,
}

impl TopologyDescription {
    /// Gets the type of the topology.
    pub fn topology_type(&self) -> TopologyType {
        self.description.topology_type
    }

    /// Gets the replica set name of the topology, if any.
    pub fn set_name(&self) -> Option<&str> {
        self.description.set_name.as_deref()
    }

    /// Gets the compatibility error between the driver and the deployment, if any.
    pub fn compatibility_error(&self) -> Option<&str> {
        self.description.compatibility_error.as_deref()
    }

    /// Gets the descriptions of the servers in the topology.
    pub fn servers(&self) -> Vec<ServerInfo> {
        self.description
            .servers
            .values()
            .map(|sd| ServerInfo::new(sd.clone()))
            .collect()
    }
}

impl fmt::Display for TopologyDescription {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.description)
    }
}

impl From<super::description::topology::TopologyDescription> for TopologyDescription {
    fn from(description: super::description::topology::TopologyDescription) -> Self {
        Self { description }
    }
}

impl serde::Serialize for super::description::topology::TopologyDescription {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("topologyType", &self.topology_type)?;
        if let Some(ref set_name) = self.set_name {
            map.serialize_entry("setName", set_name)?;
        }
        if let Some(ref error) = self.compatibility_error {
            map.serialize_entry("compatibilityError", error)?;
        }
        map.serialize_entry(
            "servers",
            &self
                .servers
                .iter()
                .map(|(address, sd)| (address.to_string(), sd))
                .collect::<std::collections::HashMap<_, _>>(),
        )?;
        map.end()
    }
}
