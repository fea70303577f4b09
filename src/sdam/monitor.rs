use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use super::{
    description::server::{ServerDescription, TopologyVersion},
    TopologyUpdater,
    TopologyWatcher,
    DEFAULT_HEARTBEAT_FREQUENCY,
    MIN_HEARTBEAT_FREQUENCY,
};
use crate::{
    cmap::{establish::ConnectionEstablisher, conn::PendingConnection, Connection},
    error::{Error, Result},
    event::{
        emit,
        sdam::{
            SdamEvent,
            ServerHeartbeatFailedEvent,
            ServerHeartbeatStartedEvent,
            ServerHeartbeatSucceededEvent,
        },
        EventHandler,
    },
    hello::{hello_command, run_hello, AwaitableHelloOptions, HelloReply},
    options::{ClientOptions, ServerAddress},
    runtime,
    runtime::WorkerHandleListener,
};

/// The smoothing factor of the round-trip-time moving average. The first sample seeds the
/// average; each later sample contributes this fraction of its value.
const RTT_ALPHA: f64 = 0.2;

/// Monitor that performs regular heartbeats to determine server status. One runs per known
/// server address, stopping once the server is removed from the topology.
pub(crate) struct Monitor {
    address: ServerAddress,
    connection: Option<Connection>,

    /// The most recent topology version returned by the server. Its presence indicates that
    /// the server supports awaitable hellos, which also moves round-trip timing to the
    /// dedicated RTT stream.
    topology_version: Option<TopologyVersion>,

    /// Handle to the RTT stream, spawned lazily when the server turns out to support
    /// awaitable hellos.
    rtt_monitor: Option<RttMonitorHandle>,

    rtt: Arc<Mutex<RttInfo>>,

    topology_updater: TopologyUpdater,
    topology_watcher: TopologyWatcher,
    event_handler: Option<EventHandler<SdamEvent>>,
    handle_listener: WorkerHandleListener,
    client_options: ClientOptions,
    establisher: ConnectionEstablisher,
}

impl Monitor {
    pub(crate) fn start(
        address: ServerAddress,
        topology_updater: TopologyUpdater,
        topology_watcher: TopologyWatcher,
        event_handler: Option<EventHandler<SdamEvent>>,
        handle_listener: WorkerHandleListener,
        client_options: ClientOptions,
        establisher: ConnectionEstablisher,
    ) {
        let monitor = Self {
            address,
            connection: None,
            topology_version: None,
            rtt_monitor: None,
            rtt: Arc::new(Mutex::new(RttInfo::default())),
            topology_updater,
            topology_watcher,
            event_handler,
            handle_listener,
            client_options,
            establisher,
        };

        runtime::spawn(monitor.execute());
    }

    async fn execute(mut self) {
        let heartbeat_frequency = self
            .client_options
            .heartbeat_freq
            .unwrap_or(DEFAULT_HEARTBEAT_FREQUENCY);

        while self.is_alive() {
            self.check_server().await;

            // An awaitable hello returns when the server's state changes, so the next check
            // should start right away, pausing only to notice this server being dropped
            // from the topology.
            if self.topology_version.is_some() {
                let handle_dropped = tokio::select! {
                    biased;
                    _ = self.handle_listener.wait_for_all_handle_drops() => true,
                    _ = std::future::ready(()) => false,
                };
                if handle_dropped || !self.is_alive() {
                    break;
                }
                continue;
            }

            let mut check_requests = self
                .topology_watcher
                .subscribe_to_topology_check_requests();

            // Always wait the minimum frequency, then until either the full heartbeat
            // interval elapses or an operation requests an immediate check.
            let wait = async {
                runtime::delay_for(MIN_HEARTBEAT_FREQUENCY).await;
                let _ = runtime::timeout(
                    heartbeat_frequency.saturating_sub(MIN_HEARTBEAT_FREQUENCY),
                    check_requests.wait_for_check_request(),
                )
                .await;
            };

            tokio::select! {
                _ = wait => {}
                _ = self.handle_listener.wait_for_all_handle_drops() => break,
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.topology_watcher.is_alive()
    }

    /// Checks the server by running a hello command, publishing the resulting server
    /// description to the topology.
    async fn check_server(&mut self) {
        let check_result = match self.perform_hello().await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                let previous_description = self
                    .topology_watcher
                    .peek_latest()
                    .description
                    .get_server_description(&self.address)
                    .cloned();

                // A network error against a previously known server gets one immediate retry
                // on a fresh connection before the server is marked Unknown.
                if e.is_network_error()
                    && previous_description
                        .map(|sd| sd.is_available())
                        .unwrap_or(false)
                {
                    self.reset_connection();
                    self.perform_hello().await
                } else {
                    Err(e)
                }
            }
        };

        match check_result {
            Ok(reply) => {
                let average_rtt = self
                    .rtt
                    .lock()
                    .map(|rtt| rtt.average)
                    .ok()
                    .flatten()
                    .unwrap_or(Duration::ZERO);
                let server_description = ServerDescription::new_from_hello_reply(
                    self.address.clone(),
                    reply,
                    average_rtt,
                );
                self.topology_updater.update(server_description).await;
            }
            Err(e) => {
                self.reset_connection();
                self.topology_updater
                    .handle_monitor_error(self.address.clone(), e)
                    .await;
            }
        }
    }

    /// Sends a single hello (or awaitable hello) on the monitoring connection, establishing
    /// it first if necessary, and emits the heartbeat events for the exchange.
    async fn perform_hello(&mut self) -> Result<HelloReply> {
        let awaited = self.topology_version.is_some() && self.connection.is_some();
        emit(&self.event_handler, || {
            SdamEvent::ServerHeartbeatStarted(ServerHeartbeatStartedEvent {
                server_address: self.address.clone(),
                awaited,
            })
        });

        let start = Instant::now();
        let result = self.hello_round_trip(awaited).await;
        let duration = start.elapsed();

        match result {
            Ok(ref reply) => {
                if !awaited {
                    // Round-trip samples come from non-awaited hellos only; an awaited hello
                    // blocks server-side for up to maxAwaitTimeMS and says nothing about
                    // latency.
                    if let Ok(mut rtt) = self.rtt.lock() {
                        rtt.add_sample(duration);
                    }
                }

                let supports_awaitable = reply.command_response.topology_version.is_some();
                self.topology_version = reply.command_response.topology_version;
                if supports_awaitable && self.rtt_monitor.is_none() {
                    self.rtt_monitor = Some(RttMonitorHandle::start(
                        self.address.clone(),
                        self.rtt.clone(),
                        self.topology_watcher.clone(),
                        self.establisher.clone(),
                        self.client_options.heartbeat_freq.unwrap_or(DEFAULT_HEARTBEAT_FREQUENCY),
                    ));
                }

                let reply_doc = reply.raw_command_response.clone();
                emit(&self.event_handler, || {
                    SdamEvent::ServerHeartbeatSucceeded(ServerHeartbeatSucceededEvent {
                        duration,
                        reply: reply_doc,
                        server_address: self.address.clone(),
                        awaited,
                    })
                });
            }
            Err(ref e) => {
                self.topology_version = None;
                let failure = e.clone();
                emit(&self.event_handler, || {
                    SdamEvent::ServerHeartbeatFailed(ServerHeartbeatFailedEvent {
                        duration,
                        failure,
                        server_address: self.address.clone(),
                        awaited,
                    })
                });
            }
        }

        result
    }

    async fn hello_round_trip(&mut self, awaited: bool) -> Result<HelloReply> {
        match self.connection {
            Some(ref mut conn) => {
                let options = if awaited {
                    // The topology version was checked when `awaited` was computed.
                    self.topology_version.map(|topology_version| AwaitableHelloOptions {
                        topology_version,
                        max_await_time: self
                            .client_options
                            .heartbeat_freq
                            .unwrap_or(DEFAULT_HEARTBEAT_FREQUENCY),
                    })
                } else {
                    None
                };
                let command = hello_command(
                    self.client_options.load_balanced,
                    conn.stream_description().ok().map(|sd| sd.hello_ok),
                    options,
                );
                run_hello(conn, command).await
            }
            None => {
                // The monitoring connection's handshake doubles as the first heartbeat.
                let pending = PendingConnection {
                    id: 0,
                    address: self.address.clone(),
                    generation: 0,
                    socket_timeout: self.client_options.socket_timeout,
                };
                let (connection, reply) = self.establisher.establish_connection(pending).await?;
                self.connection = Some(connection);
                Ok(reply)
            }
        }
    }

    fn reset_connection(&mut self) {
        self.connection = None;
        self.topology_version = None;
        if let Ok(mut rtt) = self.rtt.lock() {
            *rtt = RttInfo::default();
        }
    }
}

/// The exponentially weighted moving average of heartbeat round trip times for one server.
#[derive(Debug, Default)]
struct RttInfo {
    average: Option<Duration>,
}

impl RttInfo {
    fn add_sample(&mut self, sample: Duration) {
        match self.average {
            Some(old_avg) => {
                self.average = Some(Duration::from_secs_f64(
                    sample.as_secs_f64() * RTT_ALPHA + old_avg.as_secs_f64() * (1.0 - RTT_ALPHA),
                ))
            }
            None => self.average = Some(sample),
        }
    }
}

/// Handle to the companion task that keeps the round-trip estimate fresh while the main
/// monitor stream is blocked in awaitable hellos.
struct RttMonitorHandle {
    _handle: tokio::task::JoinHandle<()>,
}

impl RttMonitorHandle {
    fn start(
        address: ServerAddress,
        rtt: Arc<Mutex<RttInfo>>,
        topology_watcher: TopologyWatcher,
        establisher: ConnectionEstablisher,
        frequency: Duration,
    ) -> Self {
        let handle = runtime::spawn(async move {
            let mut connection: Option<Connection> = None;

            while topology_watcher.is_alive() {
                let start = Instant::now();
                let result = match connection {
                    Some(ref mut conn) => {
                        let command = hello_command(
                            None,
                            conn.stream_description().ok().map(|sd| sd.hello_ok),
                            None,
                        );
                        run_hello(conn, command).await.map(drop)
                    }
                    None => {
                        let pending = PendingConnection {
                            id: 0,
                            address: address.clone(),
                            generation: 0,
                            socket_timeout: None,
                        };
                        match establisher.establish_connection(pending).await {
                            Ok((conn, _)) => {
                                connection = Some(conn);
                                Ok(())
                            }
                            Err(e) => Err(e),
                        }
                    }
                };

                match result {
                    Ok(()) => {
                        if let Ok(mut rtt) = rtt.lock() {
                            rtt.add_sample(start.elapsed());
                        }
                    }
                    Err(_) => {
                        // The main monitor stream handles error reporting; this stream just
                        // drops its connection and tries again next round.
                        connection = None;
                    }
                }

                runtime::delay_for(frequency).await;
            }
        });

        Self { _handle: handle }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::RttInfo;

    #[test]
    fn ewma_seeding_and_smoothing() {
        let mut rtt = RttInfo::default();

        rtt.add_sample(Duration::from_millis(100));
        assert_eq!(rtt.average, Some(Duration::from_millis(100)));

        rtt.add_sample(Duration::from_millis(200));
        // 0.2 * 200ms + 0.8 * 100ms
        assert_eq!(rtt.average, Some(Duration::from_millis(120)));
    }
}
