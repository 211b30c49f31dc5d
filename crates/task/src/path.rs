// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Path resolution for spec-declared paths (`base_config_path`, scopes):
//! `{DIRNAME}` / `{ROOTDIR}` substitution, `~` expansion, then resolved
//! relative to a task directory.

use std::path::{Path, PathBuf};

/// Resolve `raw` against `task_dir`, substituting `{DIRNAME}` with
/// `task_dir`'s own file name and `{ROOTDIR}` with `root_dir`. A leading
/// `~` is expanded to the user's home directory. Relative paths are joined
/// onto `task_dir`; absolute paths are returned as-is (after substitution).
pub fn resolve_path(raw: &str, task_dir: &Path, root_dir: &Path) -> PathBuf {
    let dirname = task_dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let rootdir = root_dir.to_string_lossy().to_string();

    let substituted = raw.replace("{DIRNAME}", &dirname).replace("{ROOTDIR}", &rootdir);
    let expanded = expand_tilde(&substituted);

    if expanded.is_absolute() {
        expanded
    } else {
        task_dir.join(expanded)
    }
}

fn expand_tilde(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(raw)
}

#[cfg(test)]
#[path = "path_tests.rs"]
mod tests;
