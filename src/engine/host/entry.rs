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

//! One SSH host: identity material, host-key policy, and a lazily opened
//! client shared by every tunnel that forwards through it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use russh::keys::PrivateKey;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::config::{Address, HostConfig, Metadata, Validations};
use crate::error::Error;
use crate::ssh::{Client, KnownHostsManager, SshStream};

pub struct HostEntry {
    id: String,
    name: String,
    username: String,
    identity: String,
    passphrase: Option<Zeroizing<String>>,
    known_hosts_path: String,
    jump_host: String,
    metadata: Option<Metadata>,
    remote: RwLock<Address>,
    valid: AtomicBool,
    referenced: AtomicBool,
    signer: Option<Arc<PrivateKey>>,
    known_hosts: Option<Arc<KnownHostsManager>>,
    /// Lazily dialed SSH session; open and dial are serialized through
    /// this mutex.
    client: Mutex<Option<Client>>,
}

impl HostEntry {
    pub(super) fn from_config(config: &HostConfig) -> Self {
        Self {
            id: config.effective_id(),
            name: config.name.trim().to_string(),
            username: config.username.trim().to_string(),
            identity: config.identity.trim().to_string(),
            passphrase: config
                .passphrase
                .as_ref()
                .map(|p| Zeroizing::new(p.trim().to_string()))
                .filter(|p| !p.is_empty()),
            known_hosts_path: config.known_hosts.trim().to_string(),
            jump_host: config.jump_host.trim().to_string(),
            metadata: config.metadata.clone(),
            remote: RwLock::new(config.remote_address.clone()),
            valid: AtomicBool::new(true),
            referenced: AtomicBool::new(false),
            signer: None,
            known_hosts: None,
            client: Mutex::new(None),
        }
    }

    /// Validate the host and resolve its shared material. Signers and
    /// known-hosts managers are cached by path across hosts.
    pub(super) fn validate(
        &mut self,
        default_username: &str,
        identities: &mut HashMap<String, Arc<PrivateKey>>,
        host_keys: &mut HashMap<String, Arc<KnownHostsManager>>,
        validations: &mut Validations,
    ) -> bool {
        if self.name.is_empty() {
            validations.error("host name cannot be blank");
            self.valid.store(false, Ordering::Relaxed);
        }
        let name = self.name.clone();

        if self.username.is_empty() {
            validations.info(format!(
                "host ({name}) will use default username: {default_username}"
            ));
            self.username = default_username.to_string();
        }

        self.validate_known_hosts(&name, host_keys, validations);
        self.validate_identity(&name, identities, validations);

        {
            let mut remote = self.remote.write().unwrap();
            if remote.is_blank() {
                validations.error(format!("host ({name}) requires an address"));
                self.valid.store(false, Ordering::Relaxed);
            } else if !remote.validate(
                "host",
                &name,
                "address",
                // A host behind a jump resolves at the jump layer.
                !self.jump_host.is_empty(),
                true,
                validations,
            ) {
                self.valid.store(false, Ordering::Relaxed);
            }
        }

        if !self.jump_host.is_empty() {
            if self.jump_host == self.id {
                validations.error(Error::SelfJump { host: name.clone() }.to_string());
                self.valid.store(false, Ordering::Relaxed);
            } else {
                // Host-key pinning for this session happens at the jump
                // layer; the inner connection rides the jump tunnel.
                self.known_hosts_path.clear();
                self.known_hosts = None;
            }
        }

        if self.known_hosts.is_none() && self.known_hosts_path.is_empty() {
            self.known_hosts = Some(Arc::new(KnownHostsManager::insecure()));
        }

        let valid = self.valid.load(Ordering::Relaxed);
        if valid {
            validations.info(format!("host ({name}) validated"));
        }
        valid
    }

    fn validate_known_hosts(
        &mut self,
        name: &str,
        host_keys: &mut HashMap<String, Arc<KnownHostsManager>>,
        validations: &mut Validations,
    ) {
        if self.known_hosts_path.is_empty() {
            validations.warn(format!("host ({name}) not using a known_hosts file"));
            return;
        }
        if let Some(manager) = host_keys.get(&self.known_hosts_path) {
            self.known_hosts = Some(Arc::clone(manager));
            return;
        }
        let path = Path::new(&self.known_hosts_path);
        if let Some(reason) = unreadable_file(path) {
            validations.error(format!(
                "host ({name}) known_hosts file ({}) cannot be read: {reason}",
                self.known_hosts_path
            ));
            self.valid.store(false, Ordering::Relaxed);
            return;
        }
        match KnownHostsManager::parse(path) {
            Ok((manager, notes)) => {
                for note in notes {
                    validations.info(note);
                }
                let manager = Arc::new(manager);
                host_keys.insert(self.known_hosts_path.clone(), Arc::clone(&manager));
                self.known_hosts = Some(manager);
            }
            Err(err) => {
                validations.error(format!(
                    "host ({name}) known_hosts file ({}) cannot be read: {err}",
                    self.known_hosts_path
                ));
                self.valid.store(false, Ordering::Relaxed);
            }
        }
    }

    fn validate_identity(
        &mut self,
        name: &str,
        identities: &mut HashMap<String, Arc<PrivateKey>>,
        validations: &mut Validations,
    ) {
        if self.identity.is_empty() {
            validations.error(format!("host ({name}) missing identity file"));
            self.valid.store(false, Ordering::Relaxed);
            return;
        }
        if let Some(signer) = identities.get(&self.identity) {
            self.signer = Some(Arc::clone(signer));
            return;
        }
        let path = Path::new(&self.identity);
        if let Some(reason) = unreadable_file(path) {
            validations.error(format!(
                "host ({name}) identity file ({}) cannot be read: {reason}",
                self.identity
            ));
            self.valid.store(false, Ordering::Relaxed);
            return;
        }
        let passphrase = self.passphrase.as_ref().map(|p| p.as_str());
        match russh::keys::load_secret_key(path, passphrase) {
            Ok(key) => {
                let signer = Arc::new(key);
                identities.insert(self.identity.clone(), Arc::clone(&signer));
                self.signer = Some(signer);
            }
            Err(err) => {
                validations.error(format!(
                    "host ({name}) identity file ({}) cannot be decoded: {err}",
                    self.identity
                ));
                self.valid.store(false, Ordering::Relaxed);
            }
        }
    }

    /// Ensure the SSH session is open, dialing lazily on first use.
    pub async fn open(&self) -> crate::error::Result<()> {
        let mut slot = self.client.lock().await;
        self.open_locked(&mut slot).await?;
        Ok(())
    }

    async fn open_locked<'a>(
        &self,
        slot: &'a mut Option<Client>,
    ) -> crate::error::Result<&'a Client> {
        if slot.as_ref().is_some_and(|client| client.is_closed()) {
            *slot = None;
        }
        match slot {
            Some(client) => Ok(client),
            None => {
                let remote = self.remote.read().unwrap().to_string();
                let (Some(signer), Some(known_hosts)) = (&self.signer, &self.known_hosts) else {
                    return Err(Error::HostInvalid {
                        host: self.name.clone(),
                    });
                };
                debug!("host ({}) dialing {remote}", self.name);
                let client = Client::connect(
                    &remote,
                    &self.username,
                    Arc::clone(signer),
                    Arc::clone(known_hosts),
                )
                .await
                .map_err(|err| Error::DialFailed {
                    address: remote,
                    reason: err.to_string(),
                })?;
                Ok(slot.insert(client))
            }
        }
    }

    /// Open a channel through the host's SSH session to `target`. A dead
    /// session is dropped and redialed once before giving up.
    pub async fn dial(&self, target: &str) -> crate::error::Result<SshStream> {
        let mut slot = self.client.lock().await;
        let client = self.open_locked(&mut slot).await?;
        match client.open_direct_tcpip(target).await {
            Ok(stream) => Ok(stream),
            Err(err) => {
                warn!(
                    "host ({}) channel to {target} failed, redialing: {err}",
                    self.name
                );
                *slot = None;
                let client = self.open_locked(&mut slot).await?;
                client
                    .open_direct_tcpip(target)
                    .await
                    .map_err(|err| Error::DialFailed {
                        address: target.to_string(),
                        reason: err.to_string(),
                    })
            }
        }
    }

    pub async fn close(&self) {
        let mut slot = self.client.lock().await;
        if let Some(client) = slot.take() {
            let _ = client.disconnect().await;
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn known_hosts_path(&self) -> &str {
        &self.known_hosts_path
    }

    pub fn jump_host(&self) -> &str {
        &self.jump_host
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    pub fn remote(&self) -> Address {
        self.remote.read().unwrap().clone()
    }

    /// Rewrite the effective remote; used when a jump tunnel takes over
    /// this host's transport.
    pub(super) fn set_remote(&self, address: Address) {
        *self.remote.write().unwrap() = address;
    }

    pub fn valid(&self) -> bool {
        self.valid.load(Ordering::Relaxed)
    }

    pub(super) fn invalidate(&self) {
        self.valid.store(false, Ordering::Relaxed);
    }

    /// Mark the host as used by at least one tunnel.
    pub fn referenced(&self) {
        self.referenced.store(true, Ordering::Relaxed);
    }

    pub fn is_referenced(&self) -> bool {
        self.referenced.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for HostEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostEntry")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("remote", &self.remote.read().unwrap().to_string())
            .field("valid", &self.valid())
            .finish_non_exhaustive()
    }
}

fn unreadable_file(path: &Path) -> Option<String> {
    match std::fs::metadata(path) {
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Some("file not found".to_string())
        }
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
            Some("permission denied".to_string())
        }
        Err(err) => Some(err.to_string()),
        Ok(meta) if meta.is_dir() => Some("file is a directory".to_string()),
        Ok(_) => None,
    }
}
