use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::admission::DEFAULT_QUEUE_CAPACITY;
use crate::arbiter::ArbiterConfig;
use crate::processor::ProcessorEndpoints;
use crate::settlement::{SettlementConfig, SettlementGuarantee, SettlementPolicy};

// ============================================================================
// Configuration
// ============================================================================
//
// Read once at startup from environment variables. Every key has a default
// so a bare `payment_gateway` starts a single in-memory replica.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("LEDGER_BACKEND=shared requires COORDINATION_BACKEND=redis")]
    SharedLedgerWithoutRedis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinationBackend {
    Memory,
    Redis,
}

impl FromStr for CoordinationBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(CoordinationBackend::Memory),
            "redis" => Ok(CoordinationBackend::Redis),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerBackend {
    /// Per-replica ledger, merged with the peer at summary time.
    Local,
    /// One ledger in the coordination store, seen by every replica.
    Shared,
}

impl FromStr for LedgerBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(LedgerBackend::Local),
            "shared" => Ok(LedgerBackend::Shared),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PolicyName {
    Arbiter,
    DefaultFirst,
}

impl FromStr for PolicyName {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "arbiter" => Ok(PolicyName::Arbiter),
            "default-first" => Ok(PolicyName::DefaultFirst),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub internal_listen_addr: SocketAddr,
    pub replica_id: String,
    pub coordination: CoordinationBackend,
    pub ledger: LedgerBackend,
    pub redis_url: String,
    pub queue_capacity: usize,
    pub workers: usize,
    pub processors: ProcessorEndpoints,
    pub arbiter: ArbiterConfig,
    pub settlement: SettlementConfig,
    pub peer_url: Option<String>,
    pub peer_timeout: Duration,
    pub summary_delay: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup: &lookup };

        let coordination = env.parse("COORDINATION_BACKEND", CoordinationBackend::Memory)?;
        let ledger = env.parse("LEDGER_BACKEND", LedgerBackend::Local)?;
        if ledger == LedgerBackend::Shared && coordination != CoordinationBackend::Redis {
            return Err(ConfigError::SharedLedgerWithoutRedis);
        }

        let policy = match env.parse("SETTLEMENT_POLICY", PolicyName::Arbiter)? {
            PolicyName::Arbiter => SettlementPolicy::FollowArbiter,
            PolicyName::DefaultFirst => SettlementPolicy::DefaultFirst {
                default_attempts: env.parse("DEFAULT_ATTEMPTS", 3)?,
                retry_delay: env.millis("RETRY_DELAY_MS", 5)?,
            },
        };
        let guarantee = match env.get("SETTLEMENT_GUARANTEE").as_deref() {
            None | Some("at-least-once") => SettlementGuarantee::AtLeastOnce,
            Some("ledger-checked") => SettlementGuarantee::LedgerChecked,
            Some(other) => return Err(invalid("SETTLEMENT_GUARANTEE", other)),
        };

        let workers: usize = env.parse("WORKERS", 8)?;
        if workers == 0 {
            return Err(invalid("WORKERS", "0"));
        }

        Ok(Self {
            listen_addr: env.parse("LISTEN_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            internal_listen_addr: env
                .parse("INTERNAL_LISTEN_ADDR", SocketAddr::from(([0, 0, 0, 0], 9090)))?,
            replica_id: env
                .get("REPLICA_ID")
                .or_else(|| env.get("HOSTNAME"))
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            coordination,
            ledger,
            redis_url: env
                .get("REDIS_URL")
                .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            queue_capacity: env.parse("QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?,
            workers,
            processors: ProcessorEndpoints {
                default_url: env
                    .get("PROCESSOR_DEFAULT_URL")
                    .unwrap_or_else(|| "http://payment-processor-default:8080".to_string()),
                fallback_url: env
                    .get("PROCESSOR_FALLBACK_URL")
                    .unwrap_or_else(|| "http://payment-processor-fallback:8080".to_string()),
                payment_timeout: env.millis("PROCESSOR_TIMEOUT_MS", 3000)?,
                probe_timeout: env.millis("HEALTH_PROBE_TIMEOUT_MS", 1000)?,
            },
            arbiter: ArbiterConfig {
                tick_interval: env.millis("HEALTH_TICK_MS", 6000)?,
                lock_ttl: env.millis("HEALTH_LOCK_TTL_MS", 10_000)?,
                probe_timeout: env.millis("HEALTH_PROBE_TIMEOUT_MS", 1000)?,
                decision_ttl: None,
            },
            settlement: SettlementConfig {
                policy,
                guarantee,
                requeue_delay: env.millis("REQUEUE_DELAY_MS", 10)?,
                max_attempts: env.optional("MAX_SETTLEMENT_ATTEMPTS")?,
                ..SettlementConfig::default()
            },
            peer_url: env.get("PEER_URL"),
            peer_timeout: env.millis("PEER_TIMEOUT_MS", 3000)?,
            summary_delay: env.millis("SUMMARY_DELAY_MS", 0)?,
        })
    }
}

fn invalid(key: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
    }
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    /// Non-empty value of `key`.
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.trim().is_empty())
    }

    fn optional<T: FromStr>(&self, key: &'static str) -> Result<Option<T>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse().map(Some).map_err(|_| invalid(key, &raw)),
        }
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        Ok(self.optional(key)?.unwrap_or(default))
    }

    fn millis(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.parse(key, default).map(Duration::from_millis)
    }
}
