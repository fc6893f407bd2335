// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration discovery and parsing.
//!
//! The default file is searched in the current working directory, the
//! user's home directory, and (outside Windows) `/etc`, under the names
//! `.auto-ssh.{yaml,yml,json}` and `auto-ssh/config.{yaml,yml,json}`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::BaseDirs;

use super::types::Configuration;

const DOTFILE_STEM: &str = ".auto-ssh";
const SUBDIR_STEM: &str = "auto-ssh/config";
const EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

impl Configuration {
    /// Load configuration from an explicit file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration file {}", path.display()))?;
        let config = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse JSON configuration {}", path.display()))?
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("failed to parse YAML configuration {}", path.display()))?
        };
        Ok(config)
    }

    /// Load the explicitly named file, or the first default file found in
    /// the search path. A missing default file is not an error; the
    /// daemon starts with an empty configuration.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match discover() {
            Some(path) => {
                tracing::debug!("using configuration file {}", path.display());
                Self::load(&path)
            }
            None => {
                tracing::debug!("no configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

/// Walk the search roots and return the first default file that exists.
fn discover() -> Option<PathBuf> {
    for root in search_roots() {
        for stem in [DOTFILE_STEM, SUBDIR_STEM] {
            for ext in EXTENSIONS {
                let candidate = root.join(format!("{stem}.{ext}"));
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
    }
    None
}

fn search_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd);
    }
    if let Some(dirs) = BaseDirs::new() {
        roots.push(dirs.home_dir().to_path_buf());
    }
    if !cfg!(windows) {
        roots.push(PathBuf::from("/etc"));
    }
    roots
}
