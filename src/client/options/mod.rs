//! Contains the types for client options and connection string parsing.

#[cfg(test)]
mod test;

use std::{
    collections::HashSet,
    fmt::{self, Display, Formatter},
    hash::{Hash, Hasher},
    str::FromStr,
    time::Duration,
};

use derivative::Derivative;
use lazy_static::lazy_static;
use serde::{de::Error as SerdeError, Deserialize, Deserializer, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    bson::Document,
    concern::{Acknowledgment, ReadConcern, ReadConcernLevel, WriteConcern},
    error::{Error, ErrorKind, Result},
    event::{cmap::CmapEvent, command::CommandEvent, sdam::SdamEvent, EventHandler},
    sdam::MIN_HEARTBEAT_FREQUENCY,
    selection_criteria::{ReadPreference, SelectionCriteria, TagSet},
    srv::SrvResolver,
};

pub(crate) const DEFAULT_PORT: u16 = 27017;

lazy_static! {
    /// Reserved characters as defined by [Section 2.2 of RFC-3986](https://tools.ietf.org/html/rfc3986#section-2.2).
    /// Usernames / passwords that contain these characters must instead include the URL encoded
    /// version of them when included as part of the connection string.
    static ref USERINFO_RESERVED_CHARACTERS: HashSet<&'static char> = {
        [':', '/', '?', '#', '[', ']', '@'].iter().collect()
    };

    static ref ILLEGAL_DATABASE_CHARACTERS: HashSet<&'static char> = {
        ['/', '\\', ' ', '"', '$'].iter().collect()
    };
}

/// The location of a single server, as written in a connection string.
///
/// Only TCP endpoints are supported. The port is optional in the source text; everywhere the
/// driver needs a concrete port, an absent one resolves to [`DEFAULT_PORT`]. Two addresses
/// that differ only in the spelling of that default compare (and hash) as the same server.
#[derive(Clone, Debug, Eq, Serialize)]
#[non_exhaustive]
pub enum ServerAddress {
    /// A TCP endpoint.
    Tcp {
        /// The hostname or IP address of the server.
        host: String,

        /// The port the server listens on, when one was given explicitly.
        port: Option<u16>,
    },
}

impl ServerAddress {
    /// Parses a `host[:port]` string into a `ServerAddress`.
    ///
    /// The hostname is lowercased; an explicit port must be a decimal integer in `1..=65535`.
    pub fn parse(address: impl AsRef<str>) -> Result<Self> {
        let address = address.as_ref();
        let invalid = |reason: &str| {
            Error::invalid_argument(format!("invalid server address {:?}: {}", address, reason))
        };

        let (host, port) = match address.rsplit_once(':') {
            None => (address, None),
            Some((host, _)) if host.contains(':') => {
                return Err(invalid("at most one ':' separator is allowed"));
            }
            Some((host, port_text)) => {
                let port = port_text
                    .parse::<u16>()
                    .ok()
                    .filter(|port| *port != 0)
                    .ok_or_else(|| {
                        invalid("the port must be an integer between 1 and 65535")
                    })?;
                (host, Some(port))
            }
        };

        if host.is_empty() {
            return Err(invalid("the hostname is empty"));
        }

        Ok(ServerAddress::Tcp {
            host: host.to_lowercase(),
            port,
        })
    }

    pub(crate) fn host(&self) -> &str {
        let Self::Tcp { host, .. } = self;
        host
    }

    pub(crate) fn port(&self) -> Option<u16> {
        let Self::Tcp { port, .. } = self;
        *port
    }

    /// The port this address connects to, with an absent port resolved to the default.
    pub(crate) fn resolved_port(&self) -> u16 {
        self.port().unwrap_or(DEFAULT_PORT)
    }
}

// Equality and hashing treat "host" and "host:27017" as the same server, so both must go
// through `resolved_port`.
impl PartialEq for ServerAddress {
    fn eq(&self, other: &Self) -> bool {
        (self.host(), self.resolved_port()) == (other.host(), other.resolved_port())
    }
}

impl Hash for ServerAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.host(), self.resolved_port()).hash(state);
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::Tcp {
            host: "localhost".to_string(),
            port: None,
        }
    }
}

impl FromStr for ServerAddress {
    type Err = Error;

    fn from_str(address: &str) -> Result<Self> {
        ServerAddress::parse(address)
    }
}

impl<'de> Deserialize<'de> for ServerAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(D::Error::custom)
    }
}

impl Display for ServerAddress {
    fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
        write!(fmt, "{}:{}", self.host(), self.resolved_port())
    }
}

/// Specifies whether TLS configuration should be used with the operations that the
/// [`Client`](crate::Client) performs.
///
/// The driver treats the TLS engine itself as a transport primitive supplied by the embedding
/// application; these options are parsed, validated and carried to the transport layer.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
#[allow(clippy::large_enum_variant)]
pub enum Tls {
    /// Enable TLS with the specified options.
    Enabled(TlsOptions),

    /// Do not use TLS.
    Disabled,
}

impl From<TlsOptions> for Tls {
    fn from(options: TlsOptions) -> Self {
        Self::Enabled(options)
    }
}

/// Specifies the TLS configuration that the [`Client`](crate::Client) should use.
#[derive(Clone, Debug, Default, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct TlsOptions {
    /// Whether or not the client should return an error if the server presents an invalid
    /// certificate.
    pub allow_invalid_certificates: Option<bool>,

    /// Path to the CA file that the client should use for TLS.
    pub ca_file_path: Option<std::path::PathBuf>,

    /// Path to the certificate file that the client should present to the server.
    pub cert_key_file_path: Option<std::path::PathBuf>,
}

/// A struct containing authentication information.
///
/// Some fields (mechanism, properties) are parsed and validated but consumed by the
/// authentication transport primitive rather than the driver core.
#[derive(Clone, Default, Derivative, PartialEq, TypedBuilder)]
#[derivative(Debug)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct Credential {
    /// The username to authenticate with. This applies to all mechanisms but may be omitted
    /// when authenticating via MONGODB-X509.
    pub username: Option<String>,

    /// The database used to authenticate. This applies to all mechanisms and defaults to
    /// "admin".
    pub source: Option<String>,

    /// The password to authenticate with. This does not apply to all mechanisms.
    #[derivative(Debug = "ignore")]
    pub password: Option<String>,

    /// Which authentication mechanism to use. If not provided, one will be negotiated with the
    /// server.
    pub mechanism: Option<String>,

    /// Additional properties for the given mechanism.
    pub mechanism_properties: Option<Document>,
}

/// Contains the options that can be used to create a new [`Client`](crate::Client).
#[derive(Clone, Derivative, TypedBuilder)]
#[derivative(Debug)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct ClientOptions {
    /// The initial list of seeds that the Client should connect to.
    ///
    /// Note that by default, the driver will autodiscover other nodes in the cluster. To
    /// connect directly to a single server (rather than autodiscovering the rest of the
    /// cluster), set the `direct_connection` field to `true`.
    #[builder(default = vec![ServerAddress::Tcp {
        host: "localhost".to_string(),
        port: Some(27017),
    }])]
    pub hosts: Vec<ServerAddress>,

    /// The application name that the Client will send to the server as part of the handshake.
    /// This can be used in combination with the server logs to determine which Client is
    /// connected to a server.
    pub app_name: Option<String>,

    /// The compressors that the Client is willing to use in the order they are specified in
    /// the configuration. The Client sends this list of compressors to the server. The server
    /// responds with the intersection of its supported compressors; the winner is recorded on
    /// each connection's stream description.
    pub compressors: Option<Vec<String>>,

    /// The connect timeout passed to the transport when establishing new connections.
    ///
    /// The default value is 10 seconds.
    pub connect_timeout: Option<Duration>,

    /// The credential to use for authenticating connections.
    pub credential: Option<Credential>,

    /// The default database for this client.
    ///
    /// If no database is provided in an operation's context, this will be used.
    pub default_database: Option<String>,

    /// Specifies whether the Client should directly connect to a single host rather than
    /// autodiscover all servers in the cluster.
    pub direct_connection: Option<bool>,

    /// The amount of time each monitoring task waits between sending a heartbeat to its
    /// respective server to check its status.
    ///
    /// The default value is 10 seconds.
    pub heartbeat_freq: Option<Duration>,

    /// Whether or not the client is connecting to a load balancer.
    pub load_balanced: Option<bool>,

    /// The amount of latency beyond that of the suitable server with the minimum latency that
    /// is acceptable for a read operation.
    ///
    /// The default value is 15 ms.
    pub local_threshold: Option<Duration>,

    /// The amount of time that a connection can remain idle in a connection pool before being
    /// closed. A value of zero indicates that connections should not be closed due to being
    /// idle.
    ///
    /// By default, connections will not be closed due to being idle.
    pub max_idle_time: Option<Duration>,

    /// The maximum amount of connections that the Client should allow to be created in a
    /// connection pool for a given server.
    ///
    /// The default value is 10.
    pub max_pool_size: Option<u32>,

    /// The minimum number of connections that should be available in a server's connection
    /// pool at a given time.
    ///
    /// The default value is 0.
    pub min_pool_size: Option<u32>,

    /// The default read concern for operations performed on the Client.
    pub read_concern: Option<ReadConcern>,

    /// The name of the replica set that the Client should connect to.
    pub repl_set_name: Option<String>,

    /// Whether or not the client should retry a read operation if the operation fails.
    ///
    /// The default value is true.
    pub retry_reads: Option<bool>,

    /// Whether or not the client should retry a write operation if the operation fails.
    ///
    /// The default value is true.
    pub retry_writes: Option<bool>,

    /// The default selection criteria for operations performed on the Client.
    pub selection_criteria: Option<SelectionCriteria>,

    /// The amount of time the Client should attempt to select a server for an operation before
    /// timing out.
    ///
    /// The default value is 30 seconds.
    pub server_selection_timeout: Option<Duration>,

    /// The amount of time the Client should wait for data on a socket read before timing out.
    pub socket_timeout: Option<Duration>,

    /// The TLS configuration for the Client to use in its connections with the server.
    ///
    /// By default, TLS is disabled.
    pub tls: Option<Tls>,

    /// The amount of time a checkout request is allowed to wait for a connection to become
    /// available in a server's pool.
    ///
    /// By default, checkout requests wait for as long as server selection allows.
    pub wait_queue_timeout: Option<Duration>,

    /// The default write concern for operations performed on the Client.
    pub write_concern: Option<WriteConcern>,

    /// The handler that should process all command-monitoring events emitted by the client.
    #[derivative(Debug = "ignore")]
    #[builder(setter(strip_option))]
    pub command_event_handler: Option<EventHandler<CommandEvent>>,

    /// The handler that should process all connection-pool events emitted by the client.
    #[derivative(Debug = "ignore")]
    #[builder(setter(strip_option))]
    pub cmap_event_handler: Option<EventHandler<CmapEvent>>,

    /// The handler that should process all server-discovery events emitted by the client.
    #[derivative(Debug = "ignore")]
    #[builder(setter(strip_option))]
    pub sdam_event_handler: Option<EventHandler<SdamEvent>>,

    /// Command and reply documents larger than this many bytes are elided when embedded in
    /// command-monitoring events.
    ///
    /// The default value is 10 000 bytes.
    pub max_event_document_length_bytes: Option<usize>,

    /// Information about the original connection string, used to distinguish SRV-derived
    /// configurations.
    #[builder(default, setter(skip))]
    #[derivative(Debug = "ignore")]
    pub(crate) original_srv_hostname: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ClientOptions {
    /// Parses a connection string into a `ClientOptions` struct.
    ///
    /// If the string uses the `mongodb+srv` scheme, an SRV lookup determines the seed list
    /// and a TXT lookup supplies extra options (only `authSource`, `replicaSet` and
    /// `loadBalanced` may appear there).
    pub async fn parse(s: impl AsRef<str>) -> Result<Self> {
        let parser = ClientOptionsParser::parse(s.as_ref())?;
        let srv = parser.srv;
        let auth_source_present = parser.auth_source.is_some();
        let load_balanced_present = parser.load_balanced.is_some();
        let mut options: ClientOptions = parser.into();

        if srv {
            let hostname = options.hosts[0].host().to_string();
            let resolver = SrvResolver::new().await?;
            let config = resolver.resolve_client_options(&hostname).await?;

            options.hosts = config.hosts;
            options.original_srv_hostname = Some(hostname);

            // Per the SRV rules, TXT-provided options never override URI-provided ones.
            if !auth_source_present {
                if let Some(auth_source) = config.auth_source {
                    if let Some(ref mut credential) = options.credential {
                        credential.source = Some(auth_source);
                    }
                }
            }
            if options.repl_set_name.is_none() {
                options.repl_set_name = config.replica_set;
            }
            if !load_balanced_present {
                options.load_balanced = config.load_balanced;
            }

            // SRV-derived deployments default to TLS on.
            if options.tls.is_none() {
                options.tls = Some(Tls::Enabled(Default::default()));
            }
        }

        options.validate()?;
        Ok(options)
    }

    /// Parses a `mongodb://` connection string without performing any DNS resolution.
    pub(crate) fn parse_without_srv_resolution(s: &str) -> Result<Self> {
        let parser = ClientOptionsParser::parse(s)?;
        if parser.srv {
            return Err(ErrorKind::InvalidArgument {
                message: "SRV-style URIs require DNS resolution; use `ClientOptions::parse`"
                    .to_string(),
            }
            .into());
        }
        let options: ClientOptions = parser.into();
        options.validate()?;
        Ok(options)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(ErrorKind::InvalidArgument {
                message: "connection string must contain at least one host".to_string(),
            }
            .into());
        }

        if let Some(true) = self.direct_connection {
            if self.hosts.len() > 1 {
                return Err(ErrorKind::InvalidArgument {
                    message: "cannot specify multiple seeds with directConnection=true"
                        .to_string(),
                }
                .into());
            }
            if self.load_balanced == Some(true) {
                return Err(ErrorKind::InvalidArgument {
                    message: "cannot specify directConnection=true with loadBalanced=true"
                        .to_string(),
                }
                .into());
            }
        }

        if self.load_balanced == Some(true) {
            if self.hosts.len() > 1 {
                return Err(ErrorKind::InvalidArgument {
                    message: "cannot specify multiple seeds with loadBalanced=true".to_string(),
                }
                .into());
            }
            if self.repl_set_name.is_some() {
                return Err(ErrorKind::InvalidArgument {
                    message: "cannot specify replicaSet with loadBalanced=true".to_string(),
                }
                .into());
            }
        }

        if let Some(heartbeat_freq) = self.heartbeat_freq {
            if heartbeat_freq < MIN_HEARTBEAT_FREQUENCY {
                return Err(ErrorKind::InvalidArgument {
                    message: format!(
                        "'heartbeatFrequencyMS' must be at least {}, but {} was given",
                        MIN_HEARTBEAT_FREQUENCY.as_millis(),
                        heartbeat_freq.as_millis()
                    ),
                }
                .into());
            }
        }

        if let (Some(max), Some(min)) = (self.max_pool_size, self.min_pool_size) {
            if max != 0 && max < min {
                return Err(ErrorKind::InvalidArgument {
                    message: format!(
                        "minPoolSize ({}) cannot exceed maxPoolSize ({})",
                        min, max
                    ),
                }
                .into());
            }
        }

        if let Some(ref write_concern) = self.write_concern {
            write_concern.validate()?;
        }

        Ok(())
    }
}

/// Helper struct the connection-string parser builds up field by field before conversion into
/// `ClientOptions`.
#[derive(Debug, Default)]
struct ClientOptionsParser {
    hosts: Vec<ServerAddress>,
    srv: bool,
    app_name: Option<String>,
    tls: Option<Tls>,
    auth_source: Option<String>,
    auth_mechanism: Option<String>,
    auth_mechanism_properties: Option<Document>,
    compressors: Option<Vec<String>>,
    connect_timeout: Option<Duration>,
    credential: Option<Credential>,
    default_database: Option<String>,
    direct_connection: Option<bool>,
    heartbeat_freq: Option<Duration>,
    load_balanced: Option<bool>,
    local_threshold: Option<Duration>,
    max_idle_time: Option<Duration>,
    max_pool_size: Option<u32>,
    min_pool_size: Option<u32>,
    max_staleness: Option<Duration>,
    read_concern: Option<ReadConcern>,
    read_preference: Option<ReadPreference>,
    read_preference_tags: Option<Vec<TagSet>>,
    repl_set_name: Option<String>,
    retry_reads: Option<bool>,
    retry_writes: Option<bool>,
    server_selection_timeout: Option<Duration>,
    socket_timeout: Option<Duration>,
    wait_queue_timeout: Option<Duration>,
    write_concern: Option<WriteConcern>,
}

impl From<ClientOptionsParser> for ClientOptions {
    fn from(parser: ClientOptionsParser) -> Self {
        ClientOptions {
            hosts: parser.hosts,
            app_name: parser.app_name,
            compressors: parser.compressors,
            connect_timeout: parser.connect_timeout,
            credential: parser.credential,
            default_database: parser.default_database,
            direct_connection: parser.direct_connection,
            heartbeat_freq: parser.heartbeat_freq,
            load_balanced: parser.load_balanced,
            local_threshold: parser.local_threshold,
            max_idle_time: parser.max_idle_time,
            max_pool_size: parser.max_pool_size,
            min_pool_size: parser.min_pool_size,
            read_concern: parser.read_concern,
            repl_set_name: parser.repl_set_name,
            retry_reads: parser.retry_reads,
            retry_writes: parser.retry_writes,
            selection_criteria: parser.read_preference.map(Into::into),
            server_selection_timeout: parser.server_selection_timeout,
            socket_timeout: parser.socket_timeout,
            tls: parser.tls,
            wait_queue_timeout: parser.wait_queue_timeout,
            write_concern: parser.write_concern,
            command_event_handler: None,
            cmap_event_handler: None,
            sdam_event_handler: None,
            max_event_document_length_bytes: None,
            original_srv_hostname: None,
        }
    }
}

/// Splits the string at the given index, omitting the character at the index. Empty sides
/// collapse to `None`.
fn exclusive_split_at(s: &str, i: usize) -> (Option<&str>, Option<&str>) {
    let (l, r) = s.split_at(i);

    let lhs = if l.is_empty() { None } else { Some(l) };
    let rhs = if r.len() > 1 { Some(&r[1..]) } else { None };

    (lhs, rhs)
}

fn percent_decode(s: &str, err_message: &str) -> Result<String> {
    match percent_encoding::percent_decode_str(s).decode_utf8() {
        Ok(result) => Ok(result.to_string()),
        Err(_) => Err(ErrorKind::InvalidArgument {
            message: err_message.to_string(),
        }
        .into()),
    }
}

fn validate_userinfo(s: &str, userinfo_type: &str) -> Result<()> {
    if s.chars().any(|c| USERINFO_RESERVED_CHARACTERS.contains(&c)) {
        return Err(ErrorKind::InvalidArgument {
            message: format!("{} must be URL encoded", userinfo_type),
        }
        .into());
    }

    // All instances of '%' in the username must be part of an percent-encoded substring. This
    // means that there must be two hexidecimal digits following any '%' in the username.
    if s.split('%')
        .skip(1)
        .any(|part| part.len() < 2 || part[0..2].chars().any(|c| !c.is_ascii_hexdigit()))
    {
        return Err(ErrorKind::InvalidArgument {
            message: "username/password cannot contain unescaped %".to_string(),
        }
        .into());
    }

    Ok(())
}

impl ClientOptionsParser {
    fn parse(s: &str) -> Result<Self> {
        let end_of_scheme = match s.find("://") {
            Some(index) => index,
            None => {
                return Err(ErrorKind::InvalidArgument {
                    message: "connection string contains no scheme".to_string(),
                }
                .into())
            }
        };

        let srv = match &s[..end_of_scheme] {
            "mongodb" => false,
            "mongodb+srv" => true,
            _ => {
                return Err(ErrorKind::InvalidArgument {
                    message: format!("invalid connection string scheme: {}", &s[..end_of_scheme]),
                }
                .into())
            }
        };

        let after_scheme = &s[end_of_scheme + 3..];

        let (pre_slash, post_slash) = match after_scheme.find('/') {
            Some(slash_index) => match exclusive_split_at(after_scheme, slash_index) {
                (Some(section), o) => (section, o),
                (None, _) => {
                    return Err(ErrorKind::InvalidArgument {
                        message: "missing hosts".to_string(),
                    }
                    .into())
                }
            },
            None => {
                if after_scheme.find('?').is_some() {
                    return Err(ErrorKind::InvalidArgument {
                        message: "missing delimiting slash between hosts and options".to_string(),
                    }
                    .into());
                }
                (after_scheme, None)
            }
        };

        let (database, options_section) = match post_slash {
            Some(section) => match section.find('?') {
                Some(index) => exclusive_split_at(section, index),
                None => (post_slash, None),
            },
            None => (None, None),
        };

        let db = match database {
            Some(db) => {
                let decoded = percent_decode(db, "database name must be URL encoded")?;
                if decoded
                    .chars()
                    .any(|c| ILLEGAL_DATABASE_CHARACTERS.contains(&c))
                {
                    return Err(ErrorKind::InvalidArgument {
                        message: "illegal character in database name".to_string(),
                    }
                    .into());
                }
                Some(decoded)
            }
            None => None,
        };

        let (authentication_requested, cred_section, hosts_section) = match pre_slash.rfind('@') {
            Some(index) => {
                // If '@' is in the host section, it MUST be interpreted as a request for
                // authentication, even if the credentials are empty.
                let (creds, hosts) = exclusive_split_at(pre_slash, index);
                match hosts {
                    Some(hs) => (true, creds, hs),
                    None => {
                        return Err(ErrorKind::InvalidArgument {
                            message: "missing hosts".to_string(),
                        }
                        .into())
                    }
                }
            }
            None => (false, None, pre_slash),
        };

        let (username, password) = match cred_section {
            Some(creds) => match creds.find(':') {
                Some(index) => match exclusive_split_at(creds, index) {
                    (username, None) => (username, Some("")),
                    (username, password) => (username, password),
                },
                None => (Some(creds), None), // Lack of ":" implies the whole string is username
            },
            None => (None, None),
        };

        let hosts: Result<Vec<_>> = hosts_section.split(',').map(ServerAddress::parse).collect();
        let hosts = hosts?;

        if srv {
            if hosts.len() != 1 {
                return Err(ErrorKind::InvalidArgument {
                    message: "exactly one host must be specified with 'mongodb+srv'".into(),
                }
                .into());
            }

            if hosts[0].port().is_some() {
                return Err(ErrorKind::InvalidArgument {
                    message: "a port cannot be specified with 'mongodb+srv'".into(),
                }
                .into());
            }
        }

        let mut options = ClientOptionsParser {
            hosts,
            srv,
            default_database: db.clone(),
            ..Default::default()
        };

        if let Some(opts) = options_section {
            options.parse_options(opts)?;
        }

        // Set username and password.
        if let Some(u) = username {
            let credential = options.credential.get_or_insert_with(Default::default);
            validate_userinfo(u, "username")?;
            let decoded_u = percent_decode(u, "username must be URL encoded")?;

            credential.username = Some(decoded_u);

            if let Some(pass) = password {
                validate_userinfo(pass, "password")?;
                let decoded_p = percent_decode(pass, "password must be URL encoded")?;
                credential.password = Some(decoded_p)
            }
        }

        if options.auth_source.as_deref() == Some("") {
            return Err(ErrorKind::InvalidArgument {
                message: "empty authSource provided".to_string(),
            }
            .into());
        }

        match options.auth_mechanism.take() {
            Some(mechanism) => {
                let credential = options.credential.get_or_insert_with(Default::default);
                credential.source = options.auth_source.clone().or_else(|| Some("admin".into()));
                if let Some(doc) = options.auth_mechanism_properties.take() {
                    credential.mechanism_properties = Some(doc);
                }
                credential.mechanism = Some(mechanism);
            }
            None => {
                if let Some(ref mut credential) = options.credential {
                    // If credentials exist (i.e. username is specified) but no mechanism, the
                    // default source is chosen from the following list in order (skipping null
                    // ones): authSource option, connection string db, "admin".
                    credential.source = options
                        .auth_source
                        .clone()
                        .or(db)
                        .or_else(|| Some("admin".into()));
                } else if authentication_requested {
                    return Err(ErrorKind::InvalidArgument {
                        message: "username and mechanism both not provided, but authentication \
                                  was requested"
                            .to_string(),
                    }
                    .into());
                }
            }
        };

        Ok(options)
    }

    fn parse_options(&mut self, options: &str) -> Result<()> {
        if options.is_empty() {
            return Ok(());
        }

        let mut keys: Vec<String> = Vec::new();

        for option_pair in options.split('&') {
            let (key, value) = match option_pair.find('=') {
                Some(index) => option_pair.split_at(index),
                None => {
                    return Err(ErrorKind::InvalidArgument {
                        message: format!(
                            "connection string options is not a `key=value` pair: {}",
                            option_pair,
                        ),
                    }
                    .into())
                }
            };

            let lowercase_key = key.to_lowercase();
            if lowercase_key != "readpreferencetags" && keys.contains(&lowercase_key) {
                return Err(ErrorKind::InvalidArgument {
                    message: "repeated options are not allowed in the connection string"
                        .to_string(),
                }
                .into());
            }
            keys.push(lowercase_key.clone());

            // Skip leading '=' in value.
            self.parse_option_pair(
                &lowercase_key,
                percent_encoding::percent_decode(&value.as_bytes()[1..])
                    .decode_utf8_lossy()
                    .as_ref(),
            )?;
        }

        if let Some(tags) = self.read_preference_tags.take() {
            self.read_preference = match self.read_preference.take() {
                Some(read_pref) => Some(read_pref.with_tags(tags)?),
                None => {
                    return Err(ErrorKind::InvalidArgument {
                        message: "cannot set read preference tags without also setting read \
                                  preference mode"
                            .to_string(),
                    }
                    .into())
                }
            };
        }

        if let Some(max_staleness) = self.max_staleness.take() {
            self.read_preference = match self.read_preference.take() {
                Some(read_pref) => Some(read_pref.with_max_staleness(max_staleness)?),
                None => {
                    return Err(ErrorKind::InvalidArgument {
                        message: "cannot set max staleness without also setting read preference \
                                  mode"
                            .to_string(),
                    }
                    .into())
                }
            };
        }

        if let Some(true) = self.direct_connection {
            if self.srv {
                return Err(ErrorKind::InvalidArgument {
                    message: "cannot use SRV-style URI with directConnection=true".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }

    /// Applies one already-lowercased `key=value` pair from the options section.
    fn parse_option_pair(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "appname" => {
                self.app_name = Some(value.into());
            }
            "authmechanism" => {
                self.auth_mechanism = Some(value.to_string());
            }
            "authsource" => self.auth_source = Some(value.to_string()),
            "authmechanismproperties" => {
                let mut properties = Document::new();
                for entry in value.split(',') {
                    let (prop, prop_value) = match entry.split_once(':') {
                        Some((p, v)) if !p.is_empty() && !v.is_empty() => (p, v),
                        _ => {
                            return Err(Error::invalid_argument(format!(
                                "authMechanismProperties entries must take the form \
                                 `key:value`, got {:?}",
                                entry
                            )))
                        }
                    };
                    properties.insert(prop, prop_value);
                }
                self.auth_mechanism_properties = Some(properties);
            }
            "compressors" => {
                let compressors: Vec<String> = value
                    .split(',')
                    .filter(|name| !name.is_empty())
                    .map(String::from)
                    .collect();
                self.compressors = if compressors.is_empty() {
                    None
                } else {
                    Some(compressors)
                };
            }
            "connecttimeoutms" => {
                self.connect_timeout = Some(parse_millis_option(key, value)?);
            }
            "directconnection" => {
                self.direct_connection = Some(parse_bool_option(key, value)?);
            }
            "heartbeatfrequencyms" => {
                self.heartbeat_freq = Some(parse_millis_option(key, value)?);
            }
            "journal" => {
                self.write_concern.get_or_insert_with(Default::default).journal =
                    Some(parse_bool_option(key, value)?);
            }
            "loadbalanced" => {
                self.load_balanced = Some(parse_bool_option(key, value)?);
            }
            "localthresholdms" => {
                self.local_threshold = Some(parse_millis_option(key, value)?);
            }
            "maxidletimems" => {
                self.max_idle_time = Some(parse_millis_option(key, value)?);
            }
            "maxstalenessseconds" => {
                let seconds = parse_int_option(key, value)?;
                // Zero disables the staleness filter; any positive value must meet the
                // 90-second floor.
                if (1..90).contains(&seconds) {
                    return Err(Error::invalid_argument(
                        "`maxStalenessSeconds` must be zero (disabled) or at least 90",
                    ));
                }
                self.max_staleness = Some(Duration::from_secs(seconds));
            }
            "maxpoolsize" => {
                self.max_pool_size = Some(parse_u32_option(key, value)?);
            }
            "minpoolsize" => {
                self.min_pool_size = Some(parse_u32_option(key, value)?);
            }
            "readconcernlevel" => {
                self.read_concern = Some(ReadConcernLevel::from_str(value).into());
            }
            "readpreference" => {
                self.read_preference = Some(match &value.to_lowercase()[..] {
                    "primary" => ReadPreference::Primary,
                    "secondary" => ReadPreference::Secondary { options: None },
                    "primarypreferred" => ReadPreference::PrimaryPreferred { options: None },
                    "secondarypreferred" => ReadPreference::SecondaryPreferred { options: None },
                    "nearest" => ReadPreference::Nearest { options: None },
                    other => {
                        return Err(Error::invalid_argument(format!(
                            "unknown read preference mode {:?}",
                            other
                        )))
                    }
                });
            }
            "readpreferencetags" => {
                // Each occurrence of this option contributes one tag set; an empty value is
                // the match-anything set.
                let mut tag_set = TagSet::new();
                for entry in value.split(',').filter(|entry| !entry.is_empty()) {
                    let (tag, tag_value) = entry.split_once(':').ok_or_else(|| {
                        Error::invalid_argument(format!(
                            "read preference tags must take the form `key:value`, got {:?}",
                            entry
                        ))
                    })?;
                    tag_set.insert(tag.to_string(), tag_value.to_string());
                }
                self.read_preference_tags
                    .get_or_insert_with(Vec::new)
                    .push(tag_set);
            }
            "replicaset" => {
                self.repl_set_name = Some(value.to_string());
            }
            "retrywrites" => {
                self.retry_writes = Some(parse_bool_option(key, value)?);
            }
            "retryreads" => {
                self.retry_reads = Some(parse_bool_option(key, value)?);
            }
            "serverselectiontimeoutms" => {
                self.server_selection_timeout = Some(parse_millis_option(key, value)?);
            }
            "sockettimeoutms" => {
                self.socket_timeout = Some(parse_millis_option(key, value)?);
            }
            "tls" | "ssl" => {
                let enable = parse_bool_option(key, value)?;
                match (&self.tls, enable) {
                    (Some(Tls::Enabled(_)), false) | (Some(Tls::Disabled), true) => {
                        return Err(Error::invalid_argument(
                            "the `tls` and `ssl` options cannot disagree",
                        ));
                    }
                    (Some(_), _) => {}
                    (None, true) => self.tls = Some(Tls::Enabled(Default::default())),
                    (None, false) => self.tls = Some(Tls::Disabled),
                }
            }
            "tlsinsecure" | "tlsallowinvalidcertificates" => {
                let allow = parse_bool_option(key, value)?;
                self.tls_options_mut(key)?.allow_invalid_certificates = Some(allow);
            }
            "tlscafile" => {
                self.tls_options_mut(key)?.ca_file_path = Some(value.into());
            }
            "tlscertificatekeyfile" => {
                self.tls_options_mut(key)?.cert_key_file_path = Some(value.into());
            }
            "w" => {
                let w = match value.parse::<u32>() {
                    Ok(nodes) => Acknowledgment::Nodes(nodes),
                    // A numeric value that isn't a valid node count is a malformed option
                    // rather than a custom write concern name.
                    Err(_) if value.parse::<i64>().is_ok() => {
                        return Err(Error::invalid_argument(
                            "the `w` connection string option must name a write concern or \
                             give a non-negative node count",
                        ))
                    }
                    Err(_) => value.into(),
                };
                self.write_concern.get_or_insert_with(Default::default).w = Some(w);
            }
            "waitqueuetimeoutms" => {
                self.wait_queue_timeout = Some(parse_millis_option(key, value)?);
            }
            "wtimeoutms" => {
                self.write_concern.get_or_insert_with(Default::default).w_timeout =
                    Some(parse_millis_option(key, value)?);
            }
            other => {
                return Err(Error::invalid_argument(format!(
                    "unrecognized connection string option: {}",
                    other
                )));
            }
        }

        Ok(())
    }

    /// The TLS options to modify for a `tls*` sub-option, implying `tls=true` when nothing
    /// was decided yet and rejecting the sub-option when TLS is explicitly off.
    fn tls_options_mut(&mut self, key: &str) -> Result<&mut TlsOptions> {
        match self
            .tls
            .get_or_insert_with(|| Tls::Enabled(Default::default()))
        {
            Tls::Enabled(ref mut options) => Ok(options),
            Tls::Disabled => Err(Error::invalid_argument(format!(
                "`{}` requires TLS, but the connection string disables it",
                key
            ))),
        }
    }
}

fn parse_bool_option(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Error::invalid_argument(format!(
            "the `{}` connection string option expects \"true\" or \"false\", got {:?}",
            key, value
        ))),
    }
}

fn parse_int_option(key: &str, value: &str) -> Result<u64> {
    value.parse::<u64>().map_err(|_| {
        Error::invalid_argument(format!(
            "the `{}` connection string option expects a non-negative integer, got {:?}",
            key, value
        ))
    })
}

fn parse_millis_option(key: &str, value: &str) -> Result<Duration> {
    parse_int_option(key, value).map(Duration::from_millis)
}

fn parse_u32_option(key: &str, value: &str) -> Result<u32> {
    value.parse::<u32>().map_err(|_| {
        Error::invalid_argument(format!(
            "the `{}` connection string option expects an unsigned integer, got {:?}",
            key, value
        ))
    })
}
