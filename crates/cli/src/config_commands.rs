use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

use hunter_config::{
    Severity, ValidationResult, default_config_template, validate, write_config_file,
};

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// `hunter check`: validate the config and print diagnostics. Errors fail
/// the command.
pub fn check(config: Option<&Path>, verbose: bool) -> Result<()> {
    let result = validate(config);
    print_diagnostics(&result, verbose);

    let errors = result.count(Severity::Error);
    if errors > 0 {
        bail!("{errors} config error(s)");
    }
    Ok(())
}

fn print_diagnostics(result: &ValidationResult, verbose: bool) {
    if let Some(path) = &result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    let mut shown = 0;
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }
        let color = match d.severity {
            Severity::Error => RED,
            Severity::Warning => YELLOW,
            Severity::Info => CYAN,
        };
        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{}{RESET} {}", d.severity, d.message);
        } else {
            eprintln!("  {BOLD}{color}{}{RESET} {}: {}", d.severity, d.path, d.message);
        }
        shown += 1;
    }
    if shown > 0 {
        eprintln!();
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);
    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }
}

/// `hunter init`: write the documented starter config.
pub fn init(path: Option<PathBuf>, timezone: &str, force: bool) -> Result<PathBuf> {
    let path = path.unwrap_or_else(|| PathBuf::from("hunter.toml"));
    write_config_file(&path, &default_config_template(timezone), force)?;
    eprintln!("Wrote {}", path.display());
    Ok(path)
}
