//! Construction-time configuration for the relay.
//!
//! [`RelayConfig`] is deserialisable so embedding applications can load it
//! from their own configuration format. Callbacks cannot be expressed here and
//! are registered on [`crate::hub::RelayBuilder`] instead.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::AddressParseError,
    payload::EncodingOptions,
    reassembly::DEFAULT_MAX_BUFFERED_BYTES,
    source::BackoffConfig,
};

/// Port used when an endpoint does not specify one.
pub const DEFAULT_PORT: u16 = 50001;

/// Delay between outbound reconnection attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Frames a target may hold before further records are dropped.
pub const DEFAULT_TARGET_QUEUE_CAPACITY: usize = 1024;

/// Host and port of a source or target.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointAddress {
    /// Host name or IP literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl EndpointAddress {
    /// Create an address from its parts.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `HOST` or `HOST:PORT`, applying [`DEFAULT_PORT`].
    ///
    /// Bracketed IPv6 literals (`[::1]:50001`) are accepted.
    ///
    /// # Errors
    ///
    /// Returns [`AddressParseError`] when the host is empty, an IPv6 literal
    /// is unterminated, or the port is not a number.
    ///
    /// # Examples
    ///
    /// ```
    /// use raddec_relay::config::EndpointAddress;
    ///
    /// assert_eq!(
    ///     EndpointAddress::parse("10.0.0.1").expect("valid"),
    ///     EndpointAddress::new("10.0.0.1", 50001)
    /// );
    /// assert_eq!(
    ///     EndpointAddress::parse("[::1]:9000").expect("valid"),
    ///     EndpointAddress::new("::1", 9000)
    /// );
    /// ```
    pub fn parse(input: &str) -> Result<Self, AddressParseError> {
        let (host, port) = if let Some(rest) = input.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| {
                AddressParseError::UnterminatedIpv6 {
                    input: input.to_owned(),
                }
            })?;
            (host, tail.strip_prefix(':'))
        } else {
            match input.rsplit_once(':') {
                Some((host, port)) if !host.contains(':') => (host, Some(port)),
                _ => (input, None),
            }
        };
        if host.is_empty() {
            return Err(AddressParseError::MissingHost {
                input: input.to_owned(),
            });
        }
        let port = match port {
            Some(port) => port
                .parse()
                .map_err(|source| AddressParseError::InvalidPort {
                    input: input.to_owned(),
                    source,
                })?,
            None => DEFAULT_PORT,
        };
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// One configured source or target.
///
/// Entries without an `address` are skipped at construction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Host to listen on (sources) or connect to (targets).
    pub address: Option<String>,
    /// Port, [`DEFAULT_PORT`] when absent.
    pub port: Option<u16>,
}

impl EndpointConfig {
    /// Resolve into an address, or `None` when no host was configured.
    #[must_use]
    pub fn resolve(&self) -> Option<EndpointAddress> {
        let host = self.address.as_ref()?;
        Some(EndpointAddress::new(
            host.clone(),
            self.port.unwrap_or(DEFAULT_PORT),
        ))
    }
}

/// Declarative relay configuration.
///
/// # Examples
///
/// ```
/// use raddec_relay::config::{EndpointConfig, RelayConfig};
///
/// let config = RelayConfig {
///     targets: vec![EndpointConfig {
///         address: Some("127.0.0.1".into()),
///         port: None,
///     }],
///     ..RelayConfig::default()
/// };
/// assert!(config.enable_forwarding);
/// assert_eq!(config.target_addresses()[0].port, 50001);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Listening endpoints, in order.
    pub sources: Vec<EndpointConfig>,
    /// Outbound endpoints; order fixes target indices.
    pub targets: Vec<EndpointConfig>,
    /// Forward every inbound record to all targets.
    pub enable_forwarding: bool,
    /// Options passed to the record codec when encoding.
    pub encoding_options: EncodingOptions,
    /// Fixed delay between reconnection attempts, in milliseconds.
    pub retry_delay_ms: u64,
    /// Bound on buffered partial-frame bytes per inbound connection.
    pub max_buffered_bytes: usize,
    /// Frames queued per connected target before records are dropped.
    pub target_queue_capacity: usize,
    /// Back-off applied between failed listener binds and accepts.
    pub listener_backoff: BackoffConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            targets: Vec::new(),
            enable_forwarding: true,
            encoding_options: EncodingOptions::default(),
            retry_delay_ms: 1000,
            max_buffered_bytes: DEFAULT_MAX_BUFFERED_BYTES,
            target_queue_capacity: DEFAULT_TARGET_QUEUE_CAPACITY,
            listener_backoff: BackoffConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Addresses of configured sources, skipping entries without a host.
    #[must_use]
    pub fn source_addresses(&self) -> Vec<EndpointAddress> {
        self.sources.iter().filter_map(EndpointConfig::resolve).collect()
    }

    /// Addresses of configured targets, skipping entries without a host.
    #[must_use]
    pub fn target_addresses(&self) -> Vec<EndpointAddress> {
        self.targets.iter().filter_map(EndpointConfig::resolve).collect()
    }

    /// Reconnection delay, never shorter than one millisecond.
    #[must_use]
    pub fn retry_delay(&self) -> Duration { Duration::from_millis(self.retry_delay_ms.max(1)) }
}
