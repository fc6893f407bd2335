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

//! assh: an automatic SSH tunnel daemon.
//!
//! The daemon maintains a declared set of local TCP listeners and
//! forwards each accepted connection over an authenticated SSH transport
//! to a remote endpoint, the long-running equivalent of many `ssh -L`
//! invocations at once, with single-hop jump-host support, host-key
//! pinning, and a push-based stats monitor.

pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod managers;
pub mod ssh;

pub use app::Application;
pub use cli::Cli;
pub use config::Configuration;
pub use error::Error;
