use killswitch_core::config::{Config, IdentityConfig, CONFIG_FILE};
use std::path::{Path, PathBuf};

use crate::client::Identity;

/// Resolve the config file path.
///
/// Priority:
/// 1. `--config` flag / `KILLSWITCH_CONFIG` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `killswitch.yaml`
/// 3. Fall back to `cwd/killswitch.yaml`
pub fn resolve_config(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_upward(&cwd).unwrap_or_else(|| cwd.join(CONFIG_FILE))
}

fn find_upward(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        match dir.parent() {
            Some(p) => dir = p.to_path_buf(),
            None => return None,
        }
    }
}

/// Directory that relative store and log paths resolve against.
pub fn base_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Client identity: flags and env vars first, then the config's `identity`
/// section, then the server defaults. An unreadable config is ignored here;
/// client commands can talk to a server configured elsewhere.
pub fn resolve_identity(
    config_path: &Path,
    header: Option<String>,
    token: Option<String>,
) -> Identity {
    let configured = Config::load(config_path)
        .map(|c| c.identity)
        .unwrap_or_default();
    let IdentityConfig {
        header: config_header,
        token: config_token,
    } = configured;
    Identity {
        header: header.unwrap_or(config_header),
        token: token.or(config_token),
    }
}
