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

//! Error types shared across the daemon.
//!
//! Configuration-time kinds accumulate in a [`crate::config::Validations`]
//! bag so the operator sees every problem in a single pass; runtime kinds
//! terminate only the task that raised them.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the registries, engines, and supporting containers.
#[derive(Debug, Error)]
pub enum Error {
    /// A host or tunnel name appeared more than once in the configuration.
    #[error("{kind} name ({name}) redefined")]
    DuplicateName { kind: &'static str, name: String },

    /// An address did not match the `host[:port]` syntax.
    #[error("invalid address ({address}): required syntax is <host>:<port>")]
    InvalidAddress { address: String },

    /// The host portion of an address did not resolve.
    #[error("address host ({host}) cannot be resolved")]
    UnresolvableHost { host: String },

    /// The port portion of an address was outside `[1, 65535]`.
    #[error("port ({port}) out of range: must be between 1 and 65535")]
    PortOutOfRange { port: String },

    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("{path} is a directory")]
    IsDirectory { path: PathBuf },

    /// A file or value failed to parse (config, identity, known-hosts).
    #[error("parse error in {what}: {reason}")]
    ParseError { what: String, reason: String },

    /// The presented server key conflicts with the pinned key.
    #[error("the authenticity of host '{host}' can't be established")]
    HostKeyMismatch { host: String },

    /// A host named itself as its own jump host.
    #[error("host ({host}) jump_host cannot reference itself")]
    SelfJump { host: String },

    /// A jump host itself has a jump host; only one hop is supported.
    #[error("host ({host}) requires multi-hop jumps which are not supported")]
    MultiHopJump { host: String },

    /// A tunnel referenced a host that failed validation.
    #[error("host ({host}) is invalid")]
    HostInvalid { host: String },

    #[error("listen on {address} failed: {source}")]
    ListenFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("dial to {address} failed: {reason}")]
    DialFailed { address: String, reason: String },

    /// A write consumed fewer bytes than were read.
    #[error("short write")]
    ShortWrite,

    /// A write reported consuming more bytes than it was given.
    #[error("invalid write result")]
    InvalidWrite,

    /// The container is full and eviction is disabled.
    #[error("capacity exceeded")]
    CapacityExceeded,

    /// The key is present and replacement is disabled.
    #[error("key exists")]
    KeyExists,

    #[error("{what} ({id}) not found")]
    NotFound { what: &'static str, id: String },
}

pub type Result<T> = std::result::Result<T, Error>;
