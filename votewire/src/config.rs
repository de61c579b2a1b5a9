use crate::breaker::BreakerConfig;
use crate::Result;

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};

const DEFAULT_ENDPOINT: &str = "tcp -h localhost -p 10000";
const DEFAULT_AUDIT_DIR: &str = "./logs_votacion";
const DEFAULT_OUTBOX_DIR: &str = "./votos_temp";
const CONFIG_PATH_VAR: &str = "VOTEWIRE_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "config.properties";

/// Operator configuration, loaded from a `key=value` properties file.
///
/// Recognised keys: `ReceptorVotos.Endpoints`,
/// `RegistroAuditoria.Directorio`, `AlmacenTemporal.Directorio`,
/// `CircuitBreaker.UmbralFallos`, `CircuitBreaker.EsperaInicialMs`,
/// `CircuitBreaker.EsperaMaximaMs`, `Consolidador.VotantesRegistrados`.
/// Lines starting with `#` are comments; unknown keys are ignored with a
/// warning; a missing file means defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub receiver_endpoint: String,
    pub audit_dir: PathBuf,
    pub outbox_dir: PathBuf,
    pub breaker: BreakerConfig,
    pub registered_voters: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            receiver_endpoint: DEFAULT_ENDPOINT.to_owned(),
            audit_dir: PathBuf::from(DEFAULT_AUDIT_DIR),
            outbox_dir: PathBuf::from(DEFAULT_OUTBOX_DIR),
            breaker: BreakerConfig::default(),
            registered_voters: 0,
        }
    }
}

impl Config {
    /// Load from the file named by `VOTEWIRE_CONFIG`, falling back to
    /// `./config.properties`, falling back to defaults.
    pub fn load_default() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Config::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Config::default();
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(_) => {
                info!(
                    "config file {} not found, using defaults",
                    path.display()
                );
                return Ok(config);
            }
        };

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = match line.split_once('=') {
                Some((key, value)) => (key.trim(), value.trim()),
                None => {
                    warn!("ignoring malformed config line: {}", line);
                    continue;
                }
            };

            match key {
                "ReceptorVotos.Endpoints" => config.receiver_endpoint = value.to_owned(),
                "RegistroAuditoria.Directorio" => config.audit_dir = PathBuf::from(value),
                "AlmacenTemporal.Directorio" => config.outbox_dir = PathBuf::from(value),
                "CircuitBreaker.UmbralFallos" => {
                    parse_into(value, key, &mut config.breaker.failure_threshold)
                }
                "CircuitBreaker.EsperaInicialMs" => {
                    let mut ms = config.breaker.initial_backoff.as_millis() as u64;
                    parse_into(value, key, &mut ms);
                    config.breaker.initial_backoff = Duration::from_millis(ms);
                }
                "CircuitBreaker.EsperaMaximaMs" => {
                    let mut ms = config.breaker.max_backoff.as_millis() as u64;
                    parse_into(value, key, &mut ms);
                    config.breaker.max_backoff = Duration::from_millis(ms);
                }
                "Consolidador.VotantesRegistrados" => {
                    parse_into(value, key, &mut config.registered_voters)
                }
                _ => warn!("ignoring unknown config key: {}", key),
            }
        }

        info!(
            "configuration loaded from {}: endpoint {}",
            path.display(),
            config.receiver_endpoint
        );
        Ok(config)
    }
}

fn parse_into<T: std::str::FromStr>(value: &str, key: &str, slot: &mut T) {
    match value.parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!("ignoring unparseable value for {}: {}", key, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/config.properties")).unwrap();
        assert_eq!(config.receiver_endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.registered_voters, 0);
    }

    #[test]
    fn recognised_keys_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.properties");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "# tallier endpoint").unwrap();
        writeln!(file, "ReceptorVotos.Endpoints=tcp -h central -p 9000").unwrap();
        writeln!(file, "AlmacenTemporal.Directorio=/var/votewire/outbox").unwrap();
        writeln!(file, "CircuitBreaker.UmbralFallos=5").unwrap();
        writeln!(file, "CircuitBreaker.EsperaInicialMs=1000").unwrap();
        writeln!(file, "Consolidador.VotantesRegistrados=4200").unwrap();
        writeln!(file, "Desconocido.Clave=x").unwrap();
        writeln!(file, "sin separador").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.receiver_endpoint, "tcp -h central -p 9000");
        assert_eq!(config.outbox_dir, PathBuf::from("/var/votewire/outbox"));
        assert_eq!(config.audit_dir, PathBuf::from(DEFAULT_AUDIT_DIR));
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.initial_backoff, Duration::from_millis(1000));
        assert_eq!(config.breaker.max_backoff, Duration::from_millis(300_000));
        assert_eq!(config.registered_voters, 4200);
    }

    #[test]
    fn bad_numbers_keep_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.properties");
        std::fs::write(&path, "CircuitBreaker.UmbralFallos=muchos\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.breaker.failure_threshold, 3);
    }
}
