//! systemd service and timer units that trigger scheduled runs.
//!
//! Targets sharing an `interval` share one service/timer pair. The interval
//! is used verbatim as the timer's `OnCalendar=` expression.

use crate::config::Config;
use crate::utils::errors::ConfigError;
use nix::unistd::{Group, User};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const UNIT_NAME_PREFIX: &str = "backup-runner-generated-";

/// Account the generated services run as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunAs {
    pub user: String,
    pub group: String,
}

impl RunAs {
    /// Look up `user` and its primary group.
    pub fn lookup(user: &str) -> Result<Self, ConfigError> {
        let account = User::from_name(user)
            .map_err(|e| ConfigError::Invalid(format!("unable to look up user \"{}\": {}", user, e)))?
            .ok_or_else(|| ConfigError::Invalid(format!("user \"{}\" does not exist", user)))?;

        let group = Group::from_gid(account.gid)
            .ok()
            .flatten()
            .map(|g| g.name)
            .unwrap_or_else(|| user.to_string());

        Ok(Self {
            user: account.name,
            group,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitPair {
    pub base_name: String,
    pub interval: String,
    pub targets: Vec<String>,
    pub service: String,
    pub timer: String,
}

impl UnitPair {
    pub fn service_file_name(&self) -> String {
        format!("{}{}.service", UNIT_NAME_PREFIX, self.base_name)
    }

    pub fn timer_file_name(&self) -> String {
        format!("{}{}.timer", UNIT_NAME_PREFIX, self.base_name)
    }
}

/// The interval when it is usable in a file name, the target names otherwise.
pub fn unit_base_name(interval: &str, targets: &[String]) -> String {
    if interval.contains([' ', '*', ':', '/']) {
        targets.concat()
    } else {
        interval.to_string()
    }
}

pub fn service_unit(targets: &[String], exe: &Path, run_as: Option<&RunAs>) -> String {
    let names = targets.join(",");
    let run_as = run_as
        .map(|r| format!("User={}\nGroup={}\n", r.user, r.group))
        .unwrap_or_default();

    format!(
        "[Unit]\n\
         Description=Backups {names} through backup-runner\n\
         Wants=network-online.target\n\
         After=network-online.target\n\
         \n\
         [Service]\n\
         Type=oneshot\n\
         {run_as}\
         ExecStart={exe} --targets {names} --backup\n",
        exe = exe.display(),
    )
}

pub fn timer_unit(targets: &[String], interval: &str) -> String {
    format!(
        "[Unit]\n\
         Description=Trigger backups for target(s): {}\n\
         \n\
         [Timer]\n\
         OnCalendar={}\n\
         Persistent=true\n\
         \n\
         [Install]\n\
         WantedBy=timers.target\n",
        targets.join(", "),
        interval
    )
}

/// Build one unit pair per distinct interval among `targets`.
///
/// Targets without an interval cannot be scheduled and are skipped.
pub fn generate_units(
    config: &Config,
    targets: &[String],
    exe: &Path,
    run_as: Option<&RunAs>,
) -> Vec<UnitPair> {
    let mut by_interval: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for name in targets {
        let interval = config
            .targets
            .get(name)
            .and_then(|t| t.interval.as_deref())
            .map(str::trim)
            .filter(|i| !i.is_empty());

        match interval {
            Some(interval) => by_interval.entry(interval).or_default().push(name.clone()),
            None => warn!("Target \"{}\" has no interval, no timer generated", name),
        }
    }

    by_interval
        .into_iter()
        .map(|(interval, names)| UnitPair {
            base_name: unit_base_name(interval, &names),
            interval: interval.to_string(),
            service: service_unit(&names, exe, run_as),
            timer: timer_unit(&names, interval),
            targets: names,
        })
        .collect()
}

/// Write every unit pair into `dir`, overwriting existing files.
pub fn write_units(dir: &Path, units: &[UnitPair]) -> std::io::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;

    let mut written = Vec::with_capacity(units.len() * 2);
    for unit in units {
        for (file_name, content) in [
            (unit.service_file_name(), &unit.service),
            (unit.timer_file_name(), &unit.timer),
        ] {
            let path = dir.join(file_name);
            std::fs::write(&path, content)?;
            info!(
                "Wrote {} (interval {}, targets {})",
                path.display(),
                unit.interval,
                unit.targets.join(", ")
            );
            written.push(path);
        }
    }

    Ok(written)
}

/// Remove service and timer files in `dir` that earlier installs generated.
///
/// Only files carrying [`UNIT_NAME_PREFIX`] are touched. A missing `dir`
/// has nothing to clean.
pub fn clean_units(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut removed = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let generated = name.starts_with(UNIT_NAME_PREFIX)
            && (name.ends_with(".service") || name.ends_with(".timer"));
        if !generated || !entry.file_type()?.is_file() {
            continue;
        }

        let path = entry.path();
        std::fs::remove_file(&path)?;
        info!("Removed stale unit {}", path.display());
        removed.push(path);
    }

    removed.sort();
    Ok(removed)
}
