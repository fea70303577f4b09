use std::time::Duration;

use pretty_assertions::assert_eq;

use super::{TopologyDescription, TopologyType};
use crate::{
    bson::oid::ObjectId,
    doc,
    error::Error,
    hello::{HelloCommandResponse, HelloReply},
    options::{ClientOptions, ServerAddress},
    sdam::description::server::{ServerDescription, ServerType},
};

fn address(name: &str) -> ServerAddress {
    ServerAddress::Tcp {
        host: name.to_string(),
        port: Some(27017),
    }
}

fn description_from(address: ServerAddress, mut body: crate::bson::Document) -> ServerDescription {
    body.insert("minWireVersion", 6);
    body.insert("maxWireVersion", 17);
    body.insert("ok", 1);
    let command_response: HelloCommandResponse =
        crate::bson::from_document(body.clone()).unwrap();
    let reply = HelloReply {
        server_address: address.clone(),
        command_response,
        raw_command_response: body,
        cluster_time: None,
    };
    ServerDescription::new_from_hello_reply(address, reply, Duration::from_millis(10))
}

fn standalone(addr: ServerAddress) -> ServerDescription {
    description_from(addr, doc! {})
}

fn mongos(addr: ServerAddress) -> ServerDescription {
    description_from(addr, doc! { "msg": "isdbgrid" })
}

fn rs_primary(addr: ServerAddress, hosts: &[&str]) -> ServerDescription {
    rs_primary_with_version(addr, hosts, 1, ObjectId::new())
}

fn rs_primary_with_version(
    addr: ServerAddress,
    hosts: &[&str],
    set_version: i32,
    election_id: ObjectId,
) -> ServerDescription {
    description_from(
        addr,
        doc! {
            "setName": "rs",
            "isWritablePrimary": true,
            "hosts": hosts.iter().map(|h| format!("{}:27017", h)).collect::<Vec<_>>(),
            "setVersion": set_version,
            "electionId": election_id,
        },
    )
}

fn rs_secondary(addr: ServerAddress, hosts: &[&str]) -> ServerDescription {
    description_from(
        addr,
        doc! {
            "setName": "rs",
            "secondary": true,
            "hosts": hosts.iter().map(|h| format!("{}:27017", h)).collect::<Vec<_>>(),
        },
    )
}

fn topology_with_seeds(seeds: &[&str]) -> TopologyDescription {
    let mut topology = TopologyDescription::default();
    let options = ClientOptions::builder()
        .hosts(seeds.iter().map(|s| address(s)).collect::<Vec<_>>())
        .build();
    topology.initialize(&options);
    topology
}

#[test]
fn single_seed_standalone_transitions_to_single() {
    let mut topology = topology_with_seeds(&["a"]);
    assert_eq!(topology.topology_type(), TopologyType::Unknown);

    topology.update(standalone(address("a"))).unwrap();
    assert_eq!(topology.topology_type(), TopologyType::Single);
}

#[test]
fn multi_seed_standalone_is_dropped() {
    let mut topology = topology_with_seeds(&["a", "b"]);
    topology.update(standalone(address("a"))).unwrap();

    assert_eq!(topology.topology_type(), TopologyType::Unknown);
    assert!(!topology.servers.contains_key(&address("a")));
    assert!(topology.servers.contains_key(&address("b")));
}

#[test]
fn mongos_transitions_to_sharded_and_drops_non_mongos() {
    let mut topology = topology_with_seeds(&["a", "b"]);
    topology.update(mongos(address("a"))).unwrap();
    assert_eq!(topology.topology_type(), TopologyType::Sharded);

    // A replica set member reporting into a sharded topology is dropped.
    topology
        .update(rs_secondary(address("b"), &["b"]))
        .unwrap();
    assert_eq!(topology.topology_type(), TopologyType::Sharded);
    assert!(!topology.servers.contains_key(&address("b")));
}

#[test]
fn primary_discovery_adds_peers_and_removes_strays() {
    let mut topology = topology_with_seeds(&["a", "stray"]);
    topology
        .update(rs_primary(address("a"), &["a", "b", "c"]))
        .unwrap();

    assert_eq!(topology.topology_type(), TopologyType::ReplicaSetWithPrimary);
    assert_eq!(topology.set_name.as_deref(), Some("rs"));
    for host in ["a", "b", "c"] {
        assert!(topology.servers.contains_key(&address(host)), "{}", host);
    }
    // Not in the primary's host list: removed.
    assert!(!topology.servers.contains_key(&address("stray")));
}

#[test]
fn secondary_discovery_without_primary() {
    let mut topology = topology_with_seeds(&["b"]);
    topology
        .update(rs_secondary(address("b"), &["a", "b"]))
        .unwrap();

    assert_eq!(topology.topology_type(), TopologyType::ReplicaSetNoPrimary);
    assert!(topology.servers.contains_key(&address("a")));

    topology.update(rs_primary(address("a"), &["a", "b"])).unwrap();
    assert_eq!(topology.topology_type(), TopologyType::ReplicaSetWithPrimary);
}

#[test]
fn stale_primary_is_ignored() {
    let old_election = ObjectId::parse_str("000000000000000000000001").unwrap();
    let new_election = ObjectId::parse_str("000000000000000000000002").unwrap();

    let mut topology = topology_with_seeds(&["a", "b"]);
    topology
        .update(rs_primary_with_version(
            address("a"),
            &["a", "b"],
            2,
            new_election,
        ))
        .unwrap();
    assert_eq!(topology.topology_type(), TopologyType::ReplicaSetWithPrimary);

    // A stale claimant with a lower (setVersion, electionId) does not unseat the reigning
    // primary; its own description resets to Unknown pending a re-check.
    topology
        .update(rs_primary_with_version(
            address("b"),
            &["a", "b"],
            2,
            old_election,
        ))
        .unwrap();

    assert_eq!(
        topology.servers.get(&address("a")).unwrap().server_type,
        ServerType::RsPrimary
    );
    assert_eq!(
        topology.servers.get(&address("b")).unwrap().server_type,
        ServerType::Unknown
    );
    assert_eq!(topology.topology_type(), TopologyType::ReplicaSetWithPrimary);
}

#[test]
fn newer_primary_replaces_older_one() {
    let mut topology = topology_with_seeds(&["a", "b"]);
    topology
        .update(rs_primary_with_version(
            address("a"),
            &["a", "b"],
            1,
            ObjectId::parse_str("000000000000000000000001").unwrap(),
        ))
        .unwrap();

    topology
        .update(rs_primary_with_version(
            address("b"),
            &["a", "b"],
            2,
            ObjectId::parse_str("000000000000000000000002").unwrap(),
        ))
        .unwrap();

    // The old primary's description resets to Unknown so its monitor re-checks it.
    assert_eq!(
        topology.servers.get(&address("b")).unwrap().server_type,
        ServerType::RsPrimary
    );
    assert_eq!(
        topology.servers.get(&address("a")).unwrap().server_type,
        ServerType::Unknown
    );
}

#[test]
fn primary_error_demotes_to_no_primary() {
    let mut topology = topology_with_seeds(&["a", "b"]);
    topology.update(rs_primary(address("a"), &["a", "b"])).unwrap();
    assert_eq!(topology.topology_type(), TopologyType::ReplicaSetWithPrimary);

    topology
        .update(ServerDescription::new_from_error(
            address("a"),
            Error::internal("connection reset"),
        ))
        .unwrap();

    assert_eq!(topology.topology_type(), TopologyType::ReplicaSetNoPrimary);
    assert_eq!(
        topology.servers.get(&address("a")).unwrap().server_type,
        ServerType::Unknown
    );
}

#[test]
fn set_name_mismatch_drops_server() {
    let mut topology = topology_with_seeds(&["a", "b"]);
    topology.update(rs_primary(address("a"), &["a", "b"])).unwrap();

    let impostor = description_from(
        address("b"),
        doc! { "setName": "other", "secondary": true, "hosts": ["b:27017"] },
    );
    topology.update(impostor).unwrap();

    assert!(!topology.servers.contains_key(&address("b")));
}

#[test]
fn wire_version_mismatch_sets_compatibility_error() {
    let mut topology = topology_with_seeds(&["a"]);

    let mut body = doc! {};
    body.insert("ok", 1);
    let ancient = {
        let mut body = body.clone();
        body.insert("minWireVersion", 0);
        body.insert("maxWireVersion", 2);
        let command_response: HelloCommandResponse =
            crate::bson::from_document(body.clone()).unwrap();
        let reply = HelloReply {
            server_address: address("a"),
            command_response,
            raw_command_response: body,
            cluster_time: None,
        };
        ServerDescription::new_from_hello_reply(address("a"), reply, Duration::from_millis(1))
    };

    topology.update(ancient).unwrap();
    assert!(topology.compatibility_error().is_some());

    // Selection fails fast while the incompatibility stands.
    let criteria = crate::selection_criteria::SelectionCriteria::ReadPreference(
        crate::selection_criteria::ReadPreference::Primary,
    );
    assert!(topology.suitable_servers_in_latency_window(&criteria).is_err());
}

#[test]
fn logical_session_timeout_is_minimum_across_data_bearing_servers() {
    let mut topology = topology_with_seeds(&["a", "b"]);
    topology
        .update(description_from(
            address("a"),
            doc! {
                "setName": "rs",
                "isWritablePrimary": true,
                "hosts": ["a:27017", "b:27017"],
                "logicalSessionTimeoutMinutes": 30,
            },
        ))
        .unwrap();
    assert_eq!(
        topology.logical_session_timeout,
        Some(Duration::from_secs(30 * 60))
    );

    topology
        .update(description_from(
            address("b"),
            doc! {
                "setName": "rs",
                "secondary": true,
                "hosts": ["a:27017", "b:27017"],
                "logicalSessionTimeoutMinutes": 10,
            },
        ))
        .unwrap();
    assert_eq!(
        topology.logical_session_timeout,
        Some(Duration::from_secs(10 * 60))
    );
}

#[test]
fn cluster_time_advances_monotonically() {
    use crate::bson::Timestamp;

    let mut topology = topology_with_seeds(&["a"]);
    let older = crate::client::session::ClusterTime {
        cluster_time: Timestamp { time: 10, increment: 1 },
        signature: doc! {},
    };
    let newer = crate::client::session::ClusterTime {
        cluster_time: Timestamp { time: 10, increment: 2 },
        signature: doc! {},
    };

    topology.advance_cluster_time(&newer);
    topology.advance_cluster_time(&older);
    assert_eq!(topology.cluster_time(), Some(&newer));
}
