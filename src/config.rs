use std::env;
use std::net::SocketAddr;

/// Runtime configuration for the engine, loaded from the environment.
///
/// Every knob has a default so a bare `.env` with just
/// `SWITCHVAULT_ENCRYPTION_KEY` is enough to boot.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub database_url: String,
    /// 32-byte AES-256-GCM key, hex encoded (64 chars).
    pub encryption_key: String,
    /// Granularity of the scheduler clock tick.
    pub tick_seconds: u64,
    /// Upper bound on concurrently running worker jobs across all devices.
    pub worker_pool_size: usize,
    pub ssh_connect_timeout_secs: u64,
    /// Total-operation deadline for a single backup capture.
    pub ssh_op_timeout_secs: u64,
    /// Immediate retries on connect/timeout failures before giving up.
    pub backup_retries: u32,
    pub snmp_timeout_secs: u64,
    pub snmp_max_interfaces: usize,
    pub ping_timeout_secs: u64,
    /// Consecutive fully-failed polls before a device-unreachable event.
    pub unreachable_threshold: u32,
    /// Per-device cap on stored metric samples; oldest are evicted.
    pub metric_retention_per_device: u64,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, String> {
        let listen_addr = env_or("SWITCHVAULT_LISTEN_ADDR", "127.0.0.1:8200")
            .parse::<SocketAddr>()
            .map_err(|e| format!("SWITCHVAULT_LISTEN_ADDR is not a valid socket address: {e}"))?;

        let database_url = env_or("DATABASE_URL", "sqlite://switchvault.db?mode=rwc");

        let encryption_key = env::var("SWITCHVAULT_ENCRYPTION_KEY")
            .map_err(|_| "SWITCHVAULT_ENCRYPTION_KEY must be set (64 hex chars)".to_string())?;
        if hex::decode(&encryption_key).map(|k| k.len()) != Ok(32) {
            return Err("SWITCHVAULT_ENCRYPTION_KEY must decode to 32 bytes".to_string());
        }

        Ok(ServerConfig {
            listen_addr,
            database_url,
            encryption_key,
            tick_seconds: parse_or("SWITCHVAULT_TICK_SECONDS", 5)?,
            worker_pool_size: parse_or("SWITCHVAULT_WORKER_POOL_SIZE", 8)?,
            ssh_connect_timeout_secs: parse_or("SWITCHVAULT_SSH_CONNECT_TIMEOUT_SECS", 10)?,
            ssh_op_timeout_secs: parse_or("SWITCHVAULT_SSH_OP_TIMEOUT_SECS", 60)?,
            backup_retries: parse_or("SWITCHVAULT_BACKUP_RETRIES", 2)?,
            snmp_timeout_secs: parse_or("SWITCHVAULT_SNMP_TIMEOUT_SECS", 2)?,
            snmp_max_interfaces: parse_or("SWITCHVAULT_SNMP_MAX_INTERFACES", 64)?,
            ping_timeout_secs: parse_or("SWITCHVAULT_PING_TIMEOUT_SECS", 5)?,
            unreachable_threshold: parse_or("SWITCHVAULT_UNREACHABLE_THRESHOLD", 3)?,
            metric_retention_per_device: parse_or("SWITCHVAULT_METRIC_RETENTION", 10_000)?,
        })
    }

    /// Configuration used by tests: in-memory database, fixed key.
    pub fn for_tests() -> Self {
        ServerConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            database_url: "sqlite::memory:".to_string(),
            encryption_key: "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f"
                .to_string(),
            tick_seconds: 1,
            worker_pool_size: 4,
            ssh_connect_timeout_secs: 1,
            ssh_op_timeout_secs: 2,
            backup_retries: 0,
            snmp_timeout_secs: 1,
            snmp_max_interfaces: 8,
            ping_timeout_secs: 1,
            unreachable_threshold: 2,
            metric_retention_per_device: 100,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| format!("{key} is invalid: {e}")),
        Err(_) => Ok(default),
    }
}
