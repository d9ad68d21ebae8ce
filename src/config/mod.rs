//! Configuration module - environment variable parsing

mod settings;

pub use settings::{
    AgentSettings, ArenaSettings, HitPolicy, InfluenceZones, NicknamePolicy, PopulationSettings,
    SettingsPatch, SimSettings, TickMode,
};

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit logs as JSON lines
    pub log_json: bool,
    /// Allowed client origins for CORS (comma-separated), any origin if unset
    pub client_origin: Option<String>,

    /// Simulation ticks per second
    pub tick_rate: u32,
    /// State broadcasts per second
    pub sync_rate: u32,
    pub tick_mode: TickMode,
    /// Seed for the world RNG, random when unset
    pub world_seed: Option<u64>,
    /// How often observers receive a telemetry summary
    pub telemetry_interval: Duration,
    /// How often agent controllers are scored and replaced
    pub evaluation_interval: Duration,

    pub sim: SimSettings,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosted environments provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let mut sim = SimSettings::default();
        sim.population.bots = parse_or("BOTS", sim.population.bots)?;
        sim.population.agents = parse_or("AGENTS", sim.population.agents)?;
        sim.population.asteroids = parse_or("ASTEROIDS", sim.population.asteroids)?;
        sim.population.health = parse_or("MAX_HEALTH", sim.population.health)?;
        sim.population.fire_rate = parse_or("FIRE_RATE", sim.population.fire_rate)?;
        sim.hit_policy = parse_or("HIT_POLICY", sim.hit_policy)?;
        sim.max_projectiles = parse_or("MAX_PROJECTILES", sim.max_projectiles)?;

        let config = Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_json: parse_or("LOG_JSON", false)?,
            client_origin: env::var("CLIENT_ORIGIN").ok(),

            tick_rate: parse_or("TICK_RATE", 60)?,
            sync_rate: parse_or("SYNC_RATE", 30)?,
            tick_mode: parse_or("TICK_MODE", TickMode::Measured)?,
            world_seed: env::var("WORLD_SEED")
                .ok()
                .map(|s| s.parse().map_err(|_| ConfigError::Invalid("WORLD_SEED")))
                .transpose()?,
            telemetry_interval: Duration::from_millis(parse_or("TELEMETRY_INTERVAL_MS", 1000)?),
            evaluation_interval: Duration::from_secs(parse_or("EVALUATION_INTERVAL_SECS", 10)?),

            sim,
        };
        config.validate()?;
        Ok(config)
    }

    /// Every rate and period the session turns into a timer must be non-zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid("TICK_RATE"));
        }
        if self.sync_rate == 0 {
            return Err(ConfigError::Invalid("SYNC_RATE"));
        }
        if self.telemetry_interval.is_zero() {
            return Err(ConfigError::Invalid("TELEMETRY_INTERVAL_MS"));
        }
        if self.evaluation_interval.is_zero() {
            return Err(ConfigError::Invalid("EVALUATION_INTERVAL_SECS"));
        }
        Ok(())
    }

    /// Target duration of one simulation tick
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate as f64)
    }

    /// Target duration between state broadcasts
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.sync_rate as f64)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            log_json: false,
            client_origin: None,
            tick_rate: 60,
            sync_rate: 30,
            tick_mode: TickMode::Measured,
            world_seed: None,
            telemetry_interval: Duration::from_secs(1),
            evaluation_interval: Duration::from_secs(10),
            sim: SimSettings::default(),
        }
    }
}

/// Read an optional variable, keeping `default` when unset
fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
