use std::{collections::HashMap, sync::Arc, time::Duration};

use pretty_assertions::assert_eq;

use super::attempt_to_select_server;
use crate::{
    bson::DateTime,
    doc,
    hello::{HelloCommandResponse, HelloReply},
    options::ServerAddress,
    sdam::{
        description::{server::ServerDescription, topology::TopologyType},
        Server,
        TopologyDescription,
    },
    selection_criteria::{ReadPreference, ReadPreferenceOptions, SelectionCriteria},
};

fn address(name: &str) -> ServerAddress {
    ServerAddress::Tcp {
        host: name.to_string(),
        port: Some(27017),
    }
}

fn hello_reply(address: &ServerAddress, body: crate::bson::Document) -> HelloReply {
    let command_response: HelloCommandResponse = crate::bson::from_document(body.clone()).unwrap();
    HelloReply {
        server_address: address.clone(),
        command_response,
        raw_command_response: body,
        cluster_time: None,
    }
}

fn server_description(
    address: ServerAddress,
    mut body: crate::bson::Document,
    rtt: Duration,
) -> ServerDescription {
    body.insert("minWireVersion", 6);
    body.insert("maxWireVersion", 17);
    body.insert("ok", 1);
    let reply = hello_reply(&address, body);
    ServerDescription::new_from_hello_reply(address, reply, rtt)
}

fn primary(address: ServerAddress, rtt: Duration, last_write: DateTime) -> ServerDescription {
    server_description(
        address,
        doc! {
            "setName": "rs",
            "isWritablePrimary": true,
            "lastWrite": { "lastWriteDate": last_write },
        },
        rtt,
    )
}

fn secondary(address: ServerAddress, rtt: Duration, last_write: DateTime) -> ServerDescription {
    server_description(
        address,
        doc! {
            "setName": "rs",
            "secondary": true,
            "lastWrite": { "lastWriteDate": last_write },
        },
        rtt,
    )
}

fn replica_set(servers: Vec<ServerDescription>) -> TopologyDescription {
    TopologyDescription {
        single_seed: false,
        topology_type: TopologyType::ReplicaSetWithPrimary,
        set_name: Some("rs".to_string()),
        heartbeat_freq: Some(Duration::from_secs(10)),
        servers: servers
            .into_iter()
            .map(|sd| (sd.address.clone(), sd))
            .collect(),
        ..Default::default()
    }
}

fn suitable_addresses(
    topology: &TopologyDescription,
    read_pref: ReadPreference,
) -> Vec<ServerAddress> {
    let criteria = SelectionCriteria::ReadPreference(read_pref);
    let mut addresses: Vec<_> = topology
        .suitable_servers_in_latency_window(&criteria)
        .unwrap()
        .into_iter()
        .map(|sd| sd.address.clone())
        .collect();
    addresses.sort_by_key(|a| a.to_string());
    addresses
}

#[test]
fn primary_mode_selects_the_primary() {
    let now = DateTime::now();
    let topology = replica_set(vec![
        primary(address("a"), Duration::from_millis(10), now),
        secondary(address("b"), Duration::from_millis(20), now),
        secondary(address("c"), Duration::from_millis(100), now),
    ]);

    assert_eq!(
        suitable_addresses(&topology, ReadPreference::Primary),
        vec![address("a")]
    );
}

#[test]
fn nearest_mode_applies_the_latency_window() {
    let now = DateTime::now();
    let topology = replica_set(vec![
        primary(address("a"), Duration::from_millis(10), now),
        secondary(address("b"), Duration::from_millis(20), now),
        secondary(address("c"), Duration::from_millis(100), now),
    ]);

    // minRTT = 10ms, default local threshold = 15ms: only a (10ms) and b (20ms) qualify.
    assert_eq!(
        suitable_addresses(&topology, ReadPreference::Nearest { options: None }),
        vec![address("a"), address("b")]
    );
}

#[test]
fn pick_of_two_prefers_the_lower_operation_count() {
    let now = DateTime::now();
    let topology = replica_set(vec![
        primary(address("a"), Duration::from_millis(10), now),
        secondary(address("b"), Duration::from_millis(20), now),
        secondary(address("c"), Duration::from_millis(100), now),
    ]);

    let servers: HashMap<ServerAddress, Arc<Server>> = [
        (address("a"), Server::new_mocked(address("a"), 5)),
        (address("b"), Server::new_mocked(address("b"), 2)),
        (address("c"), Server::new_mocked(address("c"), 0)),
    ]
    .into_iter()
    .collect();

    let criteria = SelectionCriteria::ReadPreference(ReadPreference::Nearest { options: None });

    // The window holds exactly {a, b}; both get sampled every time, and b's lower operation
    // count wins. c never appears despite having the lowest count of all.
    for _ in 0..20 {
        let selected = attempt_to_select_server(&criteria, &topology, &servers)
            .unwrap()
            .expect("a server should be selected");
        assert_eq!(selected.address, address("b"));
    }
}

#[test]
fn selected_server_guard_tracks_operation_count() {
    let now = DateTime::now();
    let topology = replica_set(vec![primary(address("a"), Duration::from_millis(10), now)]);
    let server = Server::new_mocked(address("a"), 0);
    let servers: HashMap<_, _> = [(address("a"), server.clone())].into_iter().collect();

    let criteria = SelectionCriteria::ReadPreference(ReadPreference::Primary);
    let selected = attempt_to_select_server(&criteria, &topology, &servers)
        .unwrap()
        .expect("a server should be selected");
    assert_eq!(server.operation_count(), 1);
    drop(selected);
    assert_eq!(server.operation_count(), 0);
}

#[test]
fn max_staleness_filters_lagging_secondaries() {
    let now = DateTime::now();
    let behind_5s = DateTime::from_millis(now.timestamp_millis() - 5_000);
    let behind_120s = DateTime::from_millis(now.timestamp_millis() - 120_000);

    let topology = replica_set(vec![
        primary(address("p"), Duration::from_millis(10), now),
        secondary(address("s1"), Duration::from_millis(10), behind_5s),
        secondary(address("s2"), Duration::from_millis(10), behind_120s),
    ]);

    let read_pref = ReadPreference::Nearest {
        options: Some(
            ReadPreferenceOptions::builder()
                .max_staleness(Duration::from_secs(90))
                .build(),
        ),
    };

    // s2 lags 120s + 10s heartbeat allowance > 90s and is filtered out.
    assert_eq!(
        suitable_addresses(&topology, read_pref),
        vec![address("p"), address("s1")]
    );
}

#[test]
fn max_staleness_below_floor_is_rejected() {
    let now = DateTime::now();
    let topology = replica_set(vec![
        primary(address("p"), Duration::from_millis(10), now),
        secondary(address("s"), Duration::from_millis(10), now),
    ]);

    let read_pref = ReadPreference::Secondary {
        options: Some(
            ReadPreferenceOptions::builder()
                .max_staleness(Duration::from_secs(30))
                .build(),
        ),
    };
    let criteria = SelectionCriteria::ReadPreference(read_pref);

    assert!(topology.suitable_servers_in_latency_window(&criteria).is_err());
}

#[test]
fn zero_max_staleness_is_disabled() {
    let now = DateTime::now();
    let ancient = DateTime::from_millis(now.timestamp_millis() - 3_600_000);
    let topology = replica_set(vec![
        primary(address("p"), Duration::from_millis(10), now),
        secondary(address("s"), Duration::from_millis(10), ancient),
    ]);

    let read_pref = ReadPreference::Secondary {
        options: Some(
            ReadPreferenceOptions::builder()
                .max_staleness(Duration::from_secs(0))
                .build(),
        ),
    };

    // Zero means "no staleness filtering", so even an hour-stale secondary is suitable.
    assert_eq!(suitable_addresses(&topology, read_pref), vec![address("s")]);
}

#[test]
fn tag_sets_filter_in_order() {
    let now = DateTime::now();
    let tagged_east = server_description(
        address("east"),
        doc! {
            "setName": "rs",
            "secondary": true,
            "tags": { "dc": "east" },
            "lastWrite": { "lastWriteDate": now },
        },
        Duration::from_millis(10),
    );
    let tagged_west = server_description(
        address("west"),
        doc! {
            "setName": "rs",
            "secondary": true,
            "tags": { "dc": "west" },
            "lastWrite": { "lastWriteDate": now },
        },
        Duration::from_millis(10),
    );

    let topology = replica_set(vec![
        primary(address("p"), Duration::from_millis(10), now),
        tagged_east,
        tagged_west,
    ]);

    let tag_set = |dc: &str| {
        let mut tags = std::collections::HashMap::new();
        tags.insert("dc".to_string(), dc.to_string());
        tags
    };

    // The first tag set matching any server wins; "dc:north" matches nothing and falls
    // through to "dc:west".
    let read_pref = ReadPreference::Secondary {
        options: Some(
            ReadPreferenceOptions::builder()
                .tag_sets(vec![tag_set("north"), tag_set("west")])
                .build(),
        ),
    };
    assert_eq!(suitable_addresses(&topology, read_pref), vec![address("west")]);

    // No matching tag set empties the suitable set.
    let read_pref = ReadPreference::Secondary {
        options: Some(
            ReadPreferenceOptions::builder()
                .tag_sets(vec![tag_set("north")])
                .build(),
        ),
    };
    assert_eq!(suitable_addresses(&topology, read_pref), Vec::new());
}

#[test]
fn unknown_topology_has_no_suitable_servers() {
    let topology = TopologyDescription {
        topology_type: TopologyType::Unknown,
        servers: [(address("a"), ServerDescription::new(&address("a")))]
            .into_iter()
            .collect(),
        ..Default::default()
    };

    assert_eq!(
        suitable_addresses(&topology, ReadPreference::Primary),
        Vec::new()
    );
}
