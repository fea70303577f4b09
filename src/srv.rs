//! Seed-list discovery for `mongodb+srv` connection strings.
//!
//! The single hostname in an SRV-style URI stands in for the deployment: an SRV query on
//! `_mongodb._tcp.<hostname>` produces the seed addresses, and an optional TXT record on the
//! hostname itself supplies a restricted set of extra URI options.

use hickory_resolver::{config::ResolverConfig, error::ResolveErrorKind, TokioAsyncResolver};

use crate::{
    error::{Error, ErrorKind, Result},
    options::ServerAddress,
};

/// Everything learned by resolving an SRV-style hostname.
#[derive(Debug, Default)]
pub(crate) struct ResolvedConfig {
    pub(crate) hosts: Vec<ServerAddress>,
    pub(crate) auth_source: Option<String>,
    pub(crate) replica_set: Option<String>,
    pub(crate) load_balanced: Option<bool>,
}

pub(crate) struct SrvResolver {
    resolver: TokioAsyncResolver,
}

impl SrvResolver {
    pub(crate) async fn new() -> Result<Self> {
        Ok(Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), Default::default()),
        })
    }

    pub(crate) async fn resolve_client_options(&self, hostname: &str) -> Result<ResolvedConfig> {
        let mut config = ResolvedConfig {
            hosts: self.lookup_seed_hosts(hostname).await?,
            ..Default::default()
        };
        self.apply_txt_options(hostname, &mut config).await?;
        Ok(config)
    }

    async fn lookup_seed_hosts(&self, hostname: &str) -> Result<Vec<ServerAddress>> {
        let domain_suffix = parent_domain_suffix(hostname)?;

        let lookup = self
            .resolver
            .srv_lookup(format!("_mongodb._tcp.{}", hostname))
            .await?;

        let mut seeds = Vec::new();
        for record in lookup.iter() {
            let target = record.target().to_utf8();
            // Resolvers hand targets back in absolute form; the trailing root dot goes.
            let host = target.trim_end_matches('.').to_lowercase();

            // A target outside the queried domain would let a spoofed DNS reply redirect the
            // client, so every seed must sit strictly below the hostname's parent domain.
            if !host.ends_with(&domain_suffix) || host.len() == domain_suffix.len() {
                return Err(ErrorKind::DnsResolve {
                    message: format!(
                        "SRV record for {} has target {} outside of domain {}",
                        hostname,
                        host,
                        &domain_suffix[1..],
                    ),
                }
                .into());
            }

            seeds.push(ServerAddress::Tcp {
                host,
                port: Some(record.port()),
            });
        }

        if seeds.is_empty() {
            return Err(ErrorKind::DnsResolve {
                message: format!("no SRV records found for {}", hostname),
            }
            .into());
        }

        Ok(seeds)
    }

    /// Merges the options carried by the hostname's TXT record, if one exists, into the
    /// config. Only `authSource`, `replicaSet` and `loadBalanced` may appear there.
    async fn apply_txt_options(&self, hostname: &str, config: &mut ResolvedConfig) -> Result<()> {
        let lookup = match self.resolver.txt_lookup(hostname).await {
            Ok(lookup) => lookup,
            // A hostname without TXT records simply carries no extra options.
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => {
                return Ok(())
            }
            Err(e) => return Err(Error::from(e)),
        };

        let mut records = lookup.iter();
        let record = match records.next() {
            Some(record) => record,
            None => return Ok(()),
        };
        if records.next().is_some() {
            return Err(ErrorKind::DnsResolve {
                message: format!(
                    "{} has multiple TXT records, but an SRV-style URI permits at most one",
                    hostname,
                ),
            }
            .into());
        }

        // A single TXT record may be split into several character strings; they concatenate
        // into one options string.
        let options: String = record
            .txt_data()
            .iter()
            .map(|chunk| String::from_utf8_lossy(chunk))
            .collect();

        for pair in options.split('&') {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                Error::from(ErrorKind::DnsResolve {
                    message: format!(
                        "TXT record for {} contains {:?}, which is not a `key=value` pair",
                        hostname, pair,
                    ),
                })
            })?;

            match key.to_lowercase().as_str() {
                "authsource" => config.auth_source = Some(value.to_string()),
                "replicaset" => config.replica_set = Some(value.to_string()),
                "loadbalanced" => {
                    config.load_balanced = Some(match value {
                        "true" => true,
                        "false" => false,
                        other => {
                            return Err(ErrorKind::DnsResolve {
                                message: format!(
                                    "TXT option `loadBalanced` must be a boolean, got {:?}",
                                    other,
                                ),
                            }
                            .into())
                        }
                    })
                }
                other => {
                    return Err(ErrorKind::DnsResolve {
                        message: format!(
                            "TXT records may only carry `authSource`, `replicaSet` and \
                             `loadBalanced`, but {} sets `{}`",
                            hostname, other,
                        ),
                    }
                    .into())
                }
            }
        }

        Ok(())
    }
}

/// The domain an SRV seed must belong to: everything past the hostname's first label, with a
/// leading dot so that suffix matching cannot stop in the middle of a label. The hostname
/// itself needs at least three labels for such a domain to be meaningful.
fn parent_domain_suffix(hostname: &str) -> Result<String> {
    match hostname.split_once('.') {
        Some((first_label, parent)) if !first_label.is_empty() && parent.contains('.') => {
            Ok(format!(".{}", parent.to_lowercase()))
        }
        _ => Err(Error::invalid_argument(format!(
            "SRV-style hostname {:?} must have at least three '.'-separated labels",
            hostname
        ))),
    }
}

#[cfg(test)]
mod test {
    use super::parent_domain_suffix;

    #[test]
    fn parent_domain_requires_three_labels() {
        assert_eq!(
            parent_domain_suffix("cluster0.Example.com").unwrap(),
            ".example.com"
        );
        assert!(parent_domain_suffix("example.com").is_err());
        assert!(parent_domain_suffix("localhost").is_err());
        assert!(parent_domain_suffix(".example.com").is_err());
    }
}
