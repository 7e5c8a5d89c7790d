use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Reads, parses and validates a TOML config file
///
/// # Arguments
///
/// * `path` - Path to the TOML file
///
/// # Returns
///
/// * `Ok(Config)` - Parsed and validated configuration
/// * `Err(ConfigError)` - Unreadable, malformed or invalid file
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use gleaner::config::load_config;
///
/// let config = load_config(Path::new("gleaner.toml")).unwrap();
/// println!("Workers: {}", config.crawler.concurrency);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    load_config_with_hash(path).map(|(config, _)| config)
}

/// Parses and validates configuration text
///
/// # Arguments
///
/// * `content` - TOML source; missing sections and keys take their defaults
///
/// # Returns
///
/// * `Ok(Config)` - Validated configuration
/// * `Err(ConfigError::Parse)` - Malformed TOML or unknown value
/// * `Err(ConfigError::Validation)` - Values out of range
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Hex SHA-256 of a config file's bytes, as stored in job snapshots
///
/// # Arguments
///
/// * `path` - Config file to hash
///
/// # Returns
///
/// * `Ok(String)` - 64 lowercase hex characters
/// * `Err(ConfigError::Io)` - File could not be read
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    Ok(hash_bytes(&std::fs::read(path)?))
}

/// Loads a config file together with the hash of the exact bytes parsed
///
/// # Returns
///
/// * `Ok((Config, String))` - Validated config and its hex SHA-256
/// * `Err(ConfigError)` - Unreadable, non-UTF-8, malformed or invalid file
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let bytes = std::fs::read(path)?;
    let text = std::str::from_utf8(&bytes).map_err(|e| {
        ConfigError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })?;
    let config = parse_config(text)?;
    Ok((config, hash_bytes(&bytes)))
}

/// Loads `path` if given, otherwise validated defaults with no hash
///
/// # Arguments
///
/// * `path` - Optional config file from the command line
///
/// # Returns
///
/// * `Ok((Config, Some(hash)))` - File loaded
/// * `Ok((Config, None))` - No file given; defaults used
/// * `Err(ConfigError)` - As for [`load_config_with_hash`]
pub fn load_or_default(path: Option<&Path>) -> Result<(Config, Option<String>), ConfigError> {
    let Some(path) = path else {
        let config = Config::default();
        validate(&config)?;
        return Ok((config, None));
    };
    let (config, hash) = load_config_with_hash(path)?;
    Ok((config, Some(hash)))
}

fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
