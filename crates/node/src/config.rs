use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use fleet_topology::NamingSegments;
use tracing::Level;

/// Process configuration, read once at startup from flags with environment
/// fallbacks.
#[derive(Clone, Debug, Parser)]
#[command(version, about = "Runs one member of a replicated SQL fleet", long_about = None)]
pub struct NodeConfig {
    /// Directory holding `tls.crt` and `tls.key`.
    #[arg(long, env = "CERT_PATH")]
    pub cert_path: PathBuf,

    /// Instance name carrying the ordinal, e.g. `app-2`.
    #[arg(long, env = "POD_NAME")]
    pub pod_name: String,

    /// Service group segment.
    #[arg(long, env = "SERVICE_NAME")]
    pub service_name: String,

    /// Namespace segment.
    #[arg(long, env = "NAMESPACE")]
    pub namespace: String,

    /// Cluster suffix segment.
    #[arg(long, env = "CLUSTER_SUFFIX")]
    pub cluster_suffix: String,

    /// Replica data directory.
    #[arg(long, env = "FLEET_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Logical database served over HTTP.
    #[arg(long, env = "FLEET_DB_NAME", default_value = "test")]
    pub db_name: String,

    /// Inter-node port.
    #[arg(long, env = "FLEET_RAFT_PORT", default_value_t = 9000)]
    pub raft_port: u16,

    /// Client-facing HTTP port.
    #[arg(long, env = "FLEET_HTTP_PORT", default_value_t = 8080)]
    pub http_port: u16,

    /// Directory of `<version>_<name>.up.sql` scripts.
    #[arg(long, env = "FLEET_MIGRATIONS_DIR", default_value = "./sql/migrations")]
    pub migrations_dir: PathBuf,

    /// Seconds to wait for in-flight requests on shutdown.
    #[arg(long, env = "FLEET_DRAIN_TIMEOUT_SECS", default_value_t = 5)]
    pub drain_timeout_secs: u64,

    /// Seconds to wait for leadership to move on shutdown.
    #[arg(long, env = "FLEET_HANDOVER_TIMEOUT_SECS", default_value_t = 10)]
    pub handover_timeout_secs: u64,

    /// Seconds to wait for the cluster to become ready. Waits until a
    /// termination signal when unset.
    #[arg(long, env = "FLEET_READY_TIMEOUT_SECS")]
    pub ready_timeout_secs: Option<u64>,

    /// Process log level.
    #[arg(long, env = "FLEET_LOG_LEVEL", default_value_t = Level::INFO)]
    pub log_level: Level,
}

impl NodeConfig {
    /// Naming segments used to resolve the topology.
    #[must_use]
    pub fn naming_segments(&self) -> NamingSegments {
        NamingSegments::new(
            &self.pod_name,
            &self.service_name,
            &self.namespace,
            &self.cluster_suffix,
        )
    }

    /// Address the inter-node server binds.
    #[must_use]
    pub const fn raft_listen_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.raft_port))
    }

    /// Address the client-facing server binds.
    #[must_use]
    pub const fn http_listen_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.http_port))
    }

    /// Drain bound.
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    /// Handover bound.
    #[must_use]
    pub const fn handover_timeout(&self) -> Duration {
        Duration::from_secs(self.handover_timeout_secs)
    }

    /// Optional readiness bound.
    #[must_use]
    pub fn ready_timeout(&self) -> Option<Duration> {
        self.ready_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 11] = [
        "fleet-node",
        "--cert-path",
        "/certs",
        "--pod-name",
        "app-2",
        "--service-name",
        "svc",
        "--namespace",
        "ns",
        "--cluster-suffix",
        "cluster.local",
    ];

    #[test]
    fn test_defaults() {
        let config = NodeConfig::try_parse_from(REQUIRED).unwrap();

        assert_eq!(config.db_name, "test");
        assert_eq!(config.raft_port, 9000);
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.drain_timeout(), Duration::from_secs(5));
        assert_eq!(config.handover_timeout(), Duration::from_secs(10));
        assert_eq!(config.ready_timeout(), None);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(
            config.naming_segments(),
            NamingSegments::new("app-2", "svc", "ns", "cluster.local")
        );
    }

    #[test]
    fn test_overrides() {
        let args = REQUIRED.iter().copied().chain([
            "--http-port",
            "18080",
            "--ready-timeout-secs",
            "30",
            "--log-level",
            "debug",
        ]);
        let config = NodeConfig::try_parse_from(args).unwrap();

        assert_eq!(config.http_listen_addr().port(), 18080);
        assert_eq!(config.ready_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    fn test_missing_segment_is_rejected() {
        let args = REQUIRED.iter().copied().take(9);

        assert!(NodeConfig::try_parse_from(args).is_err());
    }
}
