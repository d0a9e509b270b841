//! Configuration discovery, loading and validation.
//!
//! Config files: `hunter.toml`, `hunter.yaml`, `hunter.yml` or `hunter.json`,
//! searched in `./` then the user config dir (`~/.config/hunter/`).
//! `${VAR}` and `${VAR:-fallback}` are substituted before parsing.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod template;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{
        config_dir, data_dir, discover_and_load, find_config_file, load_config,
        write_config_file,
    },
    schema::{
        HeartbeatSection, HistorySection, HunterConfig, JobEntry, MetricsSection,
        SchedulerSection, SupervisorSection, TelegramSection,
    },
    template::default_config_template,
    validate::{BUILTIN_JOB_NAMES, Diagnostic, Severity, ValidationResult, validate, validate_str},
};
