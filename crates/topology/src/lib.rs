//! Derives a node's network identity and the address of the cluster's founding
//! member from the four naming segments handed to every instance.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::TopologyError;

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

static SEPARATOR: &str = ".";

static ORDINAL_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<base>.+)-(?P<ordinal>[0-9]+)$").unwrap());

/// The four hierarchical naming segments of an instance.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NamingSegments {
    /// Instance name carrying the ordinal, e.g. `app-2`.
    pub instance: String,

    /// Service group, e.g. `svc`.
    pub service: String,

    /// Namespace, e.g. `ns`.
    pub namespace: String,

    /// Cluster suffix, e.g. `cluster.local`.
    pub cluster_suffix: String,
}

impl NamingSegments {
    /// Creates a new set of naming segments.
    pub fn new(
        instance: impl Into<String>,
        service: impl Into<String>,
        namespace: impl Into<String>,
        cluster_suffix: impl Into<String>,
    ) -> Self {
        Self {
            instance: instance.into(),
            service: service.into(),
            namespace: namespace.into(),
            cluster_suffix: cluster_suffix.into(),
        }
    }

    fn join(&self, instance: &str) -> String {
        [
            instance,
            &self.service,
            &self.namespace,
            &self.cluster_suffix,
        ]
        .join(SEPARATOR)
    }

    fn validate(&self) -> Result<(), TopologyError> {
        for (name, value) in [
            ("instance", &self.instance),
            ("service", &self.service),
            ("namespace", &self.namespace),
            ("cluster suffix", &self.cluster_suffix),
        ] {
            if value.trim().is_empty() {
                return Err(TopologyError::EmptySegment(name));
            }
        }

        if self.instance.contains(SEPARATOR) {
            return Err(TopologyError::InvalidInstance(self.instance.clone()));
        }

        Ok(())
    }
}

/// Ordinal-derived network identity of this node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeIdentity {
    base: String,
    ordinal: String,
    segments: NamingSegments,
}

impl NodeIdentity {
    /// Parses the instance ordinal out of the naming segments.
    ///
    /// # Errors
    ///
    /// Returns an error if a segment is empty or the instance name has no
    /// numeric `-<ordinal>` suffix.
    pub fn parse(segments: NamingSegments) -> Result<Self, TopologyError> {
        segments.validate()?;

        let captures = ORDINAL_SUFFIX
            .captures(&segments.instance)
            .ok_or_else(|| TopologyError::InvalidOrdinal(segments.instance.clone()))?;

        let base = captures["base"].to_string();
        let ordinal = captures["ordinal"].to_string();

        Ok(Self {
            base,
            ordinal,
            segments,
        })
    }

    /// Ordinal digits exactly as they appear in the instance name.
    #[must_use]
    pub fn ordinal(&self) -> &str {
        &self.ordinal
    }

    /// Full network name of this instance.
    #[must_use]
    pub fn address(&self) -> String {
        self.segments.join(&self.segments.instance)
    }

    /// Network name of the instance with ordinal zero in the same group.
    #[must_use]
    pub fn founder_address(&self) -> String {
        self.segments.join(&format!("{}-0", self.base))
    }

    /// Whether this instance's ordinal suffix is exactly `-0`.
    #[must_use]
    pub fn is_founder(&self) -> bool {
        self.ordinal == "0"
    }
}

/// Where this node sits in the cluster.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ClusterTopology {
    self_address: String,
    founder_address: String,
    is_founder: bool,
}

impl ClusterTopology {
    /// Derives the topology from naming segments.
    ///
    /// # Errors
    ///
    /// Returns an error if the segments do not describe a valid ordinal
    /// instance.
    pub fn resolve(segments: NamingSegments) -> Result<Self, TopologyError> {
        let identity = NodeIdentity::parse(segments)?;

        let topology = Self {
            self_address: identity.address(),
            founder_address: identity.founder_address(),
            is_founder: identity.is_founder(),
        };

        debug!(
            self_address = %topology.self_address,
            founder_address = %topology.founder_address,
            is_founder = topology.is_founder,
            "resolved cluster topology"
        );

        Ok(topology)
    }

    /// Network name of this node.
    #[must_use]
    pub fn self_address(&self) -> &str {
        &self.self_address
    }

    /// Network name of the founding member.
    #[must_use]
    pub fn founder_address(&self) -> &str {
        &self.founder_address
    }

    /// Whether this node bootstraps the cluster.
    #[must_use]
    pub const fn is_founder(&self) -> bool {
        self.is_founder
    }

    /// `host:port` of this node for the given service port.
    #[must_use]
    pub fn peer_address(&self, port: u16) -> String {
        format!("{}:{port}", self.self_address)
    }

    /// `host:port` of the founder for the given service port.
    #[must_use]
    pub fn founder_peer_address(&self, port: u16) -> String {
        format!("{}:{port}", self.founder_address)
    }

    /// Peers a fresh replica should contact first: none for the founder, the
    /// founder otherwise.
    #[must_use]
    pub fn seed_peers(&self, port: u16) -> Vec<String> {
        if self.is_founder {
            Vec::new()
        } else {
            vec![self.founder_peer_address(port)]
        }
    }
}

impl fmt::Display for ClusterTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_founder {
            write!(f, "{} (founder)", self.self_address)
        } else {
            write!(f, "{} (joining {})", self.self_address, self.founder_address)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segments(instance: &str) -> NamingSegments {
        NamingSegments::new(instance, "svc", "ns", "cluster.local")
    }

    #[test]
    fn test_founder_topology() {
        let topology = ClusterTopology::resolve(segments("app-0")).unwrap();

        assert_eq!(topology.self_address(), "app-0.svc.ns.cluster.local");
        assert!(topology.is_founder());
        assert_eq!(topology.founder_address(), topology.self_address());
        assert!(topology.seed_peers(9000).is_empty());
    }

    #[test]
    fn test_joiner_topology() {
        let topology = ClusterTopology::resolve(segments("app-2")).unwrap();

        assert_eq!(topology.self_address(), "app-2.svc.ns.cluster.local");
        assert!(!topology.is_founder());
        assert_eq!(topology.founder_address(), "app-0.svc.ns.cluster.local");
        assert_eq!(
            topology.seed_peers(9000),
            vec!["app-0.svc.ns.cluster.local:9000".to_string()]
        );
    }

    #[test]
    fn test_founder_address_matches_zero_ordinal_self_address() {
        for ordinal in ["1", "7", "12", "305"] {
            let joiner = ClusterTopology::resolve(segments(&format!("db-{ordinal}"))).unwrap();
            let founder = ClusterTopology::resolve(segments("db-0")).unwrap();

            assert_eq!(joiner.founder_address(), founder.self_address());
        }
    }

    #[test]
    fn test_base_name_may_contain_dashes() {
        let topology = ClusterTopology::resolve(segments("my-app-3")).unwrap();

        assert_eq!(topology.founder_address(), "my-app-0.svc.ns.cluster.local");
    }

    #[test]
    fn test_founder_requires_exact_zero_suffix() {
        assert!(!ClusterTopology::resolve(segments("app-10")).unwrap().is_founder());
        assert!(!ClusterTopology::resolve(segments("app-00")).unwrap().is_founder());
        assert!(ClusterTopology::resolve(segments("app-0")).unwrap().is_founder());
    }

    #[test]
    fn test_rejects_missing_or_non_numeric_ordinal() {
        for instance in ["app", "app-", "app-x", "app-1a", "-", "0"] {
            assert_eq!(
                ClusterTopology::resolve(segments(instance)),
                Err(TopologyError::InvalidOrdinal(instance.to_string())),
                "{instance} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_non_ascii_digit_ordinal() {
        for instance in ["app-\u{663}", "app-\u{ff11}"] {
            assert_eq!(
                ClusterTopology::resolve(segments(instance)),
                Err(TopologyError::InvalidOrdinal(instance.to_string()))
            );
        }
    }

    #[test]
    fn test_rejects_empty_segments() {
        let result = ClusterTopology::resolve(NamingSegments::new("app-0", "", "ns", "local"));

        assert_eq!(result, Err(TopologyError::EmptySegment("service")));
    }

    #[test]
    fn test_rejects_dotted_instance() {
        let result = ClusterTopology::resolve(segments("app.x-1"));

        assert!(matches!(result, Err(TopologyError::InvalidInstance(_))));
    }

    #[test]
    fn test_peer_addresses() {
        let topology = ClusterTopology::resolve(segments("app-1")).unwrap();

        assert_eq!(topology.peer_address(9000), "app-1.svc.ns.cluster.local:9000");
        assert_eq!(
            topology.founder_peer_address(9000),
            "app-0.svc.ns.cluster.local:9000"
        );
    }
}
