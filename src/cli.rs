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

//! Command line interface definition.

use std::path::PathBuf;

use clap::Parser;

/// Automatic SSH tunnel daemon.
#[derive(Parser, Debug)]
#[command(
    name = "assh",
    version,
    about = "Maintains a declared set of local TCP listeners forwarded over authenticated SSH"
)]
pub struct Cli {
    /// Configuration file (default: .auto-ssh.{yaml,yml,json} in the
    /// working directory, home directory, or /etc)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Override the stats monitor port; zero or negative disables it
    #[arg(long, value_name = "PORT", allow_negative_numbers = true)]
    pub stats_port: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["assh"]);
        assert!(cli.config.is_none());
        assert_eq!(cli.verbose, 0);
        assert!(cli.stats_port.is_none());
    }

    #[test]
    fn test_flags() {
        let cli = Cli::parse_from(["assh", "-c", "/tmp/t.yaml", "-vv", "--stats-port", "-1"]);
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/tmp/t.yaml")));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.stats_port, Some(-1));
    }
}
