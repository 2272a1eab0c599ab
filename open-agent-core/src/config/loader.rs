use super::AgentOptions;
use super::error::ConfigError;
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// Load and validate agent options from a TOML file.
pub fn load_options(path: &Path) -> Result<AgentOptions, ConfigError> {
    debug!(path = %path.display(), "Reading agent options file");

    let content = fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            ConfigError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    let options: AgentOptions = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    options.validate()?;

    debug!(
        path = %path.display(),
        max_turns = options.max_turns,
        mode = %options.permission_mode,
        agents = options.agents.len(),
        "Agent options loaded"
    );
    Ok(options)
}
