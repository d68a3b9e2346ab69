//! SMB adapter over libsmbclient
//!
//! [`SmbConnector`] authenticates with NTLM credentials (user, password,
//! domain) against one share and yields an [`SmbBackend`] bound to that
//! client. SMB has no notion of unix ownership, so `chown` succeeds
//! without doing anything.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dirmirror_core::config::BackendConfig;
use dirmirror_core::domain::{DirEntry, EntryKind, EntryMeta, RelPath};
use dirmirror_core::ports::{Backend, BackendError, BackendKind, ByteStream, OpenFlags, DIR_MODE};
use pavao::{
    SmbClient, SmbCredentials, SmbDirentType, SmbMode, SmbOpenOptions, SmbOptions, SmbStat,
};
use tracing::{debug, instrument, trace};

use crate::lifecycle::{Connector, LifecycleManager};
use crate::registry::{BackendProvider, ProviderOptions};

const S_IFMT: u32 = 0o170_000;
const S_IFDIR: u32 = 0o040_000;
const S_IFREG: u32 = 0o100_000;
const S_IFLNK: u32 = 0o120_000;

fn smb_err(path: impl std::fmt::Display, err: pavao::SmbError) -> BackendError {
    BackendError::Protocol {
        backend: BackendKind::Smb,
        path: path.to_string(),
        message: err.to_string(),
    }
}

/// Share-relative form of a path: always absolute, slash-separated
fn share_path(base: &str, path: &RelPath) -> String {
    let remote = path.to_remote(base);
    if remote.starts_with('/') {
        remote
    } else {
        format!("/{remote}")
    }
}

// ============================================================================
// Connector
// ============================================================================

/// NTLM credentials and share coordinates
pub struct SmbConnector {
    host: String,
    port: u16,
    share: String,
    username: String,
    password: String,
    domain: String,
    base: PathBuf,
}

impl SmbConnector {
    /// # Errors
    /// Returns [`BackendError::Config`] when no share name is configured.
    pub fn from_config(config: &BackendConfig) -> Result<Self, BackendError> {
        if config.share_name.is_empty() {
            return Err(BackendError::Config("smb backend needs a share-name".into()));
        }
        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            share: config.share_name.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            domain: config.domain.clone(),
            base: config.path.clone(),
        })
    }

    fn server_url(&self) -> String {
        format!("smb://{}:{}", self.host, self.port)
    }
}

impl Connector for SmbConnector {
    type Backend = SmbBackend;

    fn kind(&self) -> BackendKind {
        BackendKind::Smb
    }

    fn target(&self) -> String {
        format!("{}/{}", self.server_url(), self.share)
    }

    #[instrument(skip(self), fields(endpoint = %self.target()))]
    fn connect(&self) -> Result<SmbBackend, BackendError> {
        let credentials = SmbCredentials::default()
            .server(self.server_url())
            .share(format!("/{}", self.share.trim_start_matches('/')))
            .username(&self.username)
            .password(&self.password)
            .workgroup(&self.domain);

        let client = SmbClient::new(credentials, SmbOptions::default().one_share_per_server(true))
            .map_err(|e| BackendError::Connection {
                target: self.target(),
                message: e.to_string(),
            })?;

        let base = self.base.to_string_lossy().into_owned();
        // libsmbclient connects lazily; probe the base so auth failures surface here.
        client
            .list_dir(share_path(&base, &RelPath::root()))
            .map_err(|e| BackendError::Connection {
                target: self.target(),
                message: e.to_string(),
            })?;
        debug!("smb share mounted");

        Ok(SmbBackend {
            base: self.base.clone(),
            base_str: base,
            client,
        })
    }

    fn disconnect(&self, backend: SmbBackend) -> Result<(), BackendError> {
        drop(backend);
        Ok(())
    }
}

/// Registry constructor for the `smb` tag
pub(crate) fn smb_provider(
    config: &BackendConfig,
    options: &ProviderOptions,
) -> Result<Box<dyn BackendProvider>, BackendError> {
    let connector = SmbConnector::from_config(config)?;
    Ok(Box::new(
        LifecycleManager::new(connector).with_max_age(options.session_max_age),
    ))
}

// ============================================================================
// Backend
// ============================================================================

/// Backend bound to one authenticated SMB client
pub struct SmbBackend {
    base: PathBuf,
    base_str: String,
    client: SmbClient,
}

fn kind_from_mode(mode: u32) -> EntryKind {
    match mode & S_IFMT {
        S_IFDIR => EntryKind::Dir,
        S_IFREG => EntryKind::File,
        S_IFLNK => EntryKind::Symlink,
        _ => EntryKind::Other,
    }
}

fn meta_from(stat: &SmbStat) -> EntryMeta {
    let mode = u32::from(stat.mode);
    EntryMeta {
        kind: kind_from_mode(mode),
        size: stat.size,
        mode: Some(mode & 0o7777),
        modified: Some(DateTime::<Utc>::from(stat.modified)),
    }
}

impl SmbBackend {
    fn remote(&self, path: &RelPath) -> String {
        share_path(&self.base_str, path)
    }

    fn absolute(root: &Path, path: &RelPath) -> String {
        share_path(&root.to_string_lossy(), path)
    }

    fn mkdir_chain(&self, target: &str) -> Result<(), BackendError> {
        let mut current = String::new();
        for component in target.split('/').filter(|c| !c.is_empty()) {
            current.push('/');
            current.push_str(component);
            if self.is_dir(&current) {
                continue;
            }
            if let Err(e) = self.client.mkdir(&current, SmbMode::from(DIR_MODE)) {
                if !self.is_dir(&current) {
                    return Err(smb_err(&current, e));
                }
            }
        }
        Ok(())
    }

    fn is_dir(&self, remote: &str) -> bool {
        matches!(self.client.stat(remote), Ok(stat) if kind_from_mode(u32::from(stat.mode)) == EntryKind::Dir)
    }

    /// Whether `name` appears in the listing of `parent`
    fn listed_in_parent(&self, path: &RelPath) -> Result<bool, BackendError> {
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return Ok(true);
        };
        let listing = self
            .client
            .list_dir(self.remote(&parent))
            .map_err(|e| smb_err(&parent, e))?;
        Ok(listing.iter().any(|d| d.name() == name))
    }
}

impl Backend for SmbBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Smb
    }

    fn base_path(&self) -> &Path {
        &self.base
    }

    fn read_dir(&self, dir: &RelPath) -> Result<Vec<DirEntry>, BackendError> {
        let listing = self
            .client
            .list_dir(self.remote(dir))
            .map_err(|e| smb_err(dir, e))?;

        let mut entries = Vec::with_capacity(listing.len());
        for dirent in listing {
            let name = dirent.name();
            if name == "." || name == ".." {
                continue;
            }
            let kind = match dirent.get_type() {
                SmbDirentType::Dir => EntryKind::Dir,
                SmbDirentType::File => EntryKind::File,
                SmbDirentType::Link => EntryKind::Symlink,
                _ => EntryKind::Other,
            };
            let mut meta = EntryMeta::file(0);
            meta.kind = kind;
            entries.push(DirEntry::new(name, meta));
        }
        Ok(entries)
    }

    fn mkdir_all(&self, path: &RelPath) -> Result<(), BackendError> {
        self.mkdir_chain(&self.remote(path))
    }

    fn mkdir_all_absolute(&self, root: &Path, path: &RelPath) -> Result<(), BackendError> {
        self.mkdir_chain(&Self::absolute(root, path))
    }

    fn open(&self, path: &RelPath) -> Result<Box<dyn ByteStream + '_>, BackendError> {
        self.open_with_flags(path, OpenFlags::read_only(), 0)
    }

    fn create(&self, path: &RelPath) -> Result<Box<dyn ByteStream + '_>, BackendError> {
        self.open_with_flags(path, OpenFlags::create_truncate(), 0o666)
    }

    fn open_with_flags(
        &self,
        path: &RelPath,
        flags: OpenFlags,
        perm: u32,
    ) -> Result<Box<dyn ByteStream + '_>, BackendError> {
        let options = SmbOpenOptions::default()
            .read(flags.read)
            .write(flags.write)
            .append(flags.append)
            .create(flags.create)
            .truncate(flags.truncate)
            .mode(perm);
        let file = self
            .client
            .open_with(self.remote(path), options)
            .map_err(|e| smb_err(path, e))?;
        Ok(Box::new(file))
    }

    fn chmod(&self, path: &RelPath, mode: u32) -> Result<(), BackendError> {
        self.client
            .chmod(self.remote(path), SmbMode::from(mode))
            .map_err(|e| smb_err(path, e))
    }

    fn chown(&self, path: &RelPath, _uid: u32, _gid: u32) -> Result<(), BackendError> {
        trace!(path = %path, "chown is a no-op on smb");
        Ok(())
    }

    fn remove(&self, path: &RelPath) -> Result<(), BackendError> {
        let remote = self.remote(path);
        let result = if self.is_dir(&remote) {
            self.client.rmdir(&remote)
        } else {
            self.client.unlink(&remote)
        };
        result.map_err(|e| smb_err(path, e))
    }

    fn move_to(&self, path: &RelPath, dest_root: &Path) -> Result<(), BackendError> {
        self.client
            .rename(self.remote(path), Self::absolute(dest_root, path))
            .map_err(|e| smb_err(path, e))
    }

    fn stat_no_follow(&self, path: &RelPath) -> Result<Option<EntryMeta>, BackendError> {
        match self.client.stat(self.remote(path)) {
            Ok(stat) => Ok(Some(meta_from(&stat))),
            // The client does not expose a portable not-found code, so
            // confirm absence through the parent listing.
            Err(e) => {
                if self.listed_in_parent(path)? {
                    Err(smb_err(path, e))
                } else {
                    Ok(None)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_path_is_absolute() {
        let p = RelPath::new("a/b.txt").unwrap();
        assert_eq!(share_path("incoming", &p), "/incoming/a/b.txt");
        assert_eq!(share_path("/incoming/", &p), "/incoming/a/b.txt");
        assert_eq!(share_path("", &p), "/a/b.txt");
        assert_eq!(share_path("", &RelPath::root()), "/");
    }

    #[test]
    fn test_kind_from_mode() {
        assert_eq!(kind_from_mode(0o040_755), EntryKind::Dir);
        assert_eq!(kind_from_mode(0o100_644), EntryKind::File);
        assert_eq!(kind_from_mode(0o120_777), EntryKind::Symlink);
        assert_eq!(kind_from_mode(0o020_000), EntryKind::Other);
    }

    #[test]
    fn test_connector_requires_share() {
        let config = BackendConfig::smb("nas", 445, "", "in").with_credentials("u", "p");
        assert!(matches!(
            SmbConnector::from_config(&config),
            Err(BackendError::Config(_))
        ));
    }

    #[test]
    fn test_connector_target() {
        let config = BackendConfig::smb("nas.local", 445, "scans", "in")
            .with_credentials("scanner", "pw")
            .with_domain("WORKGROUP");
        let connector = SmbConnector::from_config(&config).unwrap();
        assert_eq!(connector.target(), "smb://nas.local:445/scans");
        assert_eq!(connector.kind(), BackendKind::Smb);
    }
}
