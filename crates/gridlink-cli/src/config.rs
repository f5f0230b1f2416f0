//! Configuration vault – reads/writes `~/.gridlink/config.toml`.

use gridlink_types::{FrameConvention, GridlinkConfig, LinkKind, SourceKind};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Return the config path: `$GRIDLINK_CONFIG` when set, otherwise
/// `~/.gridlink/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(explicit) = std::env::var("GRIDLINK_CONFIG")
        && !explicit.is_empty()
    {
        return PathBuf::from(explicit);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".gridlink").join("config.toml")
}

/// Load the config from disk, falling back to defaults when the file does
/// not exist.  Environment overrides are applied in both cases.
pub fn load() -> Result<GridlinkConfig, String> {
    let path = config_path();
    let mut cfg = load_from(&path)?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<GridlinkConfig>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: GridlinkConfig =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `GRIDLINK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `GRIDLINK_DEVICE` | `link.device` |
/// | `GRIDLINK_LINK_KIND` | `link.kind` (`serial`, `udp`, `log`) |
/// | `GRIDLINK_MSG_RATE_MAX` | `dispatch.message_rate_max` |
/// | `GRIDLINK_FRAME_MODE` | `dispatch.frame_mode` (`body_frd`, `global`) |
/// | `GRIDLINK_SOURCE` | `source` (`sim`, `replay`, `replay:<path>`) |
///
/// Unparseable values are ignored with a warning.
pub fn apply_env_overrides(cfg: &mut GridlinkConfig) {
    if let Ok(v) = std::env::var("GRIDLINK_DEVICE") {
        cfg.link.device = v;
    }
    if let Ok(v) = std::env::var("GRIDLINK_LINK_KIND") {
        match parse_link_kind(&v) {
            Some(kind) => cfg.link.kind = kind,
            None => warn!(value = %v, "ignoring GRIDLINK_LINK_KIND"),
        }
    }
    if let Ok(v) = std::env::var("GRIDLINK_MSG_RATE_MAX") {
        match v.parse::<f64>() {
            Ok(rate) => cfg.dispatch.message_rate_max = rate,
            Err(_) => warn!(value = %v, "ignoring GRIDLINK_MSG_RATE_MAX"),
        }
    }
    if let Ok(v) = std::env::var("GRIDLINK_FRAME_MODE") {
        match v.parse::<FrameConvention>() {
            Ok(mode) => cfg.dispatch.frame_mode = mode,
            Err(e) => warn!(error = %e, "ignoring GRIDLINK_FRAME_MODE"),
        }
    }
    if let Ok(v) = std::env::var("GRIDLINK_SOURCE") {
        if v == "sim" {
            cfg.source.kind = SourceKind::Sim;
        } else if v == "replay" {
            cfg.source.kind = SourceKind::Replay;
            cfg.source.path = None;
        } else if let Some(path) = v.strip_prefix("replay:")
            && !path.is_empty()
        {
            cfg.source.kind = SourceKind::Replay;
            cfg.source.path = Some(path.to_string());
        } else {
            warn!(value = %v, "ignoring GRIDLINK_SOURCE");
        }
    }
}

fn parse_link_kind(s: &str) -> Option<LinkKind> {
    match s {
        "serial" => Some(LinkKind::Serial),
        "udp" => Some(LinkKind::Udp),
        "log" => Some(LinkKind::Log),
        _ => None,
    }
}

/// Save the config to a specific path, creating the parent directory if
/// necessary.
pub(crate) fn save_to(cfg: &GridlinkConfig, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Owner read/write, group/other read (rw-r--r--) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
