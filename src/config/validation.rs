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

//! Accumulated validation output.
//!
//! Configuration validation never stops at the first problem; every
//! error, warning, and note lands here so the operator sees the whole
//! picture in one pass. The daemon refuses to start only when the bag
//! holds at least one error.

use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Error,
    Warn,
    Info,
}

impl Level {
    fn prefix(self) -> &'static str {
        match self {
            Level::Error => "  Error -",
            Level::Warn => "  Warn  -",
            Level::Info => "  Info  -",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationEntry {
    level: Level,
    message: String,
}

impl ValidationEntry {
    pub fn is_error(&self) -> bool {
        self.level == Level::Error
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Bag of validation findings gathered while building the registries.
#[derive(Debug, Default)]
pub struct Validations {
    has_errors: bool,
    entries: Vec<ValidationEntry>,
}

impl Validations {
    pub fn error(&mut self, message: impl Into<String>) {
        self.has_errors = true;
        self.entries.push(ValidationEntry {
            level: Level::Error,
            message: message.into(),
        });
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.entries.push(ValidationEntry {
            level: Level::Warn,
            message: message.into(),
        });
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.entries.push(ValidationEntry {
            level: Level::Info,
            message: message.into(),
        });
    }

    pub fn has_entries(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.has_errors
    }

    pub fn entries(&self) -> &[ValidationEntry] {
        &self.entries
    }

    /// Render the findings for the operator. With `verbose` off only
    /// errors are shown; warnings and notes appear when it is on.
    pub fn render(&self, verbose: bool) -> Option<String> {
        if !self.has_entries() || (!self.has_errors && !verbose) {
            return None;
        }
        let mut out = String::new();
        if self.has_errors {
            out.push_str("One or more configuration validation errors were generated:\n");
        } else {
            out.push_str("One or more configuration validation warnings were generated:\n");
        }
        for entry in &self.entries {
            if entry.is_error() || verbose {
                let _ = writeln!(out, "{} {}", entry.level.prefix(), entry.message);
            }
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_bag_renders_nothing() {
        let validations = Validations::default();
        assert!(!validations.has_entries());
        assert!(!validations.has_errors());
        assert!(validations.render(true).is_none());
    }

    #[test]
    fn test_errors_always_render() {
        let mut validations = Validations::default();
        validations.error("tunnel name cannot be blank");
        assert!(validations.has_errors());
        let out = validations.render(false).unwrap();
        assert!(out.contains("validation errors"));
        assert!(out.contains("  Error - tunnel name cannot be blank"));
    }

    #[test]
    fn test_warnings_render_only_verbose() {
        let mut validations = Validations::default();
        validations.warn("host (db) not using a known_hosts file");
        validations.info("tunnel (web) validated");
        assert!(!validations.has_errors());
        assert!(validations.render(false).is_none());
        let out = validations.render(true).unwrap();
        assert!(out.contains("validation warnings"));
        assert!(out.contains("  Warn  - host (db)"));
        assert!(out.contains("  Info  - tunnel (web)"));
    }

    #[test]
    fn test_mixed_levels_without_verbose_show_errors_only() {
        let mut validations = Validations::default();
        validations.warn("minor");
        validations.error("major");
        let out = validations.render(false).unwrap();
        assert!(out.contains("major"));
        assert!(!out.contains("minor"));
    }
}
