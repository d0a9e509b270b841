use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{Error, Result, env_subst::substitute_env, schema::HunterConfig};

/// Config file names, checked in order.
pub const CONFIG_FILENAMES: &[&str] = &["hunter.toml", "hunter.yaml", "hunter.yml", "hunter.json"];

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "hunter")
}

/// User-global config directory, e.g. `~/.config/hunter/`.
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().to_path_buf())
}

/// Default location for the execution database, e.g. `~/.local/share/hunter/`.
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// First config file in `./`, then in [`config_dir`].
pub fn find_config_file() -> Option<PathBuf> {
    find_config_in(Path::new(".")).or_else(|| config_dir().and_then(|dir| find_config_in(&dir)))
}

fn find_config_in(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Read `path`, substitute `${ENV}` placeholders and parse by extension.
pub fn load_config(path: &Path) -> Result<HunterConfig> {
    let raw = substitute_env(&read(path)?);
    parse_config(&raw, path)
}

/// Like [`load_config`] but untyped, for validation.
pub fn load_config_value(path: &Path) -> Result<serde_json::Value> {
    let raw = substitute_env(&read(path)?);
    parse_config_value(&raw, path)
}

/// Load `explicit` if given, else the first discovered file, else defaults.
///
/// Returns the path that was loaded, if any.
pub fn discover_and_load(explicit: Option<&Path>) -> Result<(HunterConfig, Option<PathBuf>)> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => find_config_file(),
    };
    match path {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            Ok((load_config(&path)?, Some(path)))
        },
        None => {
            debug!("no config file found, using defaults");
            Ok((HunterConfig::default(), None))
        },
    }
}

/// Write `contents` to `path`, creating parent directories. Refuses to
/// overwrite an existing file unless `force`.
pub fn write_config_file(path: &Path, contents: &str, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(Error::Write {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::AlreadyExists, "file exists"),
        });
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|source| Error::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, contents).map_err(|source| Error::Write {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "wrote config");
    Ok(())
}

fn extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("toml")
}

pub(crate) fn parse_config(raw: &str, path: &Path) -> Result<HunterConfig> {
    match extension(path) {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        ext => Err(Error::UnsupportedFormat {
            extension: ext.to_string(),
        }),
    }
}

pub(crate) fn parse_config_value(raw: &str, path: &Path) -> Result<serde_json::Value> {
    match extension(path) {
        "toml" => {
            let v: toml::Value = toml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "yaml" | "yml" => {
            let v: serde_yaml::Value = serde_yaml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "json" => Ok(serde_json::from_str(raw)?),
        ext => Err(Error::UnsupportedFormat {
            extension: ext.to_string(),
        }),
    }
}
