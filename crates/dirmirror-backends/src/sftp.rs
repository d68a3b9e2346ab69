//! SFTP adapter over libssh2
//!
//! [`SftpConnector`] performs the SSH handshake (10 s connect timeout,
//! known-hosts verification, public-key authentication) and yields an
//! [`SftpBackend`] bound to that session. Sessions are aged and replaced by
//! [`crate::LifecycleManager`].

use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::DateTime;
use dirmirror_core::config::{resolve_known_hosts, BackendConfig};
use dirmirror_core::domain::{DirEntry, EntryKind, EntryMeta, RelPath};
use dirmirror_core::ports::{Backend, BackendError, BackendKind, ByteStream, OpenFlags, DIR_MODE};
use ssh2::{CheckResult, ErrorCode, FileStat, KnownHostFileKind, OpenType, Session, Sftp};
use tracing::{debug, instrument, warn};

use crate::lifecycle::{Connector, LifecycleManager};
use crate::registry::{BackendProvider, ProviderOptions};

/// Handshake and socket timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// SFTP status codes (draft-ietf-secsh-filexfer)
const FX_NO_SUCH_FILE: i32 = 2;
const FX_DIR_NOT_EMPTY: i32 = 18;

fn sftp_err(path: impl std::fmt::Display, err: ssh2::Error) -> BackendError {
    match err.code() {
        ErrorCode::SFTP(FX_NO_SUCH_FILE) => BackendError::NotFound(path.to_string()),
        ErrorCode::SFTP(FX_DIR_NOT_EMPTY) => BackendError::NotEmpty(path.to_string()),
        _ => BackendError::Protocol {
            backend: BackendKind::Sftp,
            path: path.to_string(),
            message: err.message().to_string(),
        },
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Everything needed to open an SFTP session
pub struct SftpConnector {
    host: String,
    port: u16,
    username: String,
    private_key: String,
    passphrase: Option<String>,
    known_hosts: Option<PathBuf>,
    base: PathBuf,
}

impl SftpConnector {
    /// Builds a connector from a descriptor.
    ///
    /// The identity file is read here, so an unreadable key is a startup
    /// error rather than a per-pass connection failure.
    ///
    /// # Errors
    /// Returns [`BackendError::Config`] when no identity file is configured
    /// or it cannot be read.
    pub fn from_config(config: &BackendConfig) -> Result<Self, BackendError> {
        let identity = config
            .identity_file
            .as_ref()
            .ok_or_else(|| BackendError::Config("sftp backend needs an identity-file".into()))?;
        let private_key = std::fs::read_to_string(identity).map_err(|e| {
            BackendError::Config(format!(
                "cannot read identity file {}: {e}",
                identity.display()
            ))
        })?;

        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            private_key,
            passphrase: Some(config.password.clone()).filter(|p| !p.is_empty()),
            known_hosts: resolve_known_hosts(config.known_hosts.as_deref()),
            base: config.path.clone(),
        })
    }

    fn conn_err(&self, message: impl Into<String>) -> BackendError {
        BackendError::Connection {
            target: self.target(),
            message: message.into(),
        }
    }

    fn open_socket(&self) -> Result<TcpStream, BackendError> {
        let addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| self.conn_err(format!("cannot resolve host: {e}")))?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(self.conn_err(match last_err {
            Some(e) => e.to_string(),
            None => "host resolved to no addresses".to_string(),
        }))
    }

    fn verify_host_key(&self, session: &Session) -> Result<(), BackendError> {
        let path = self
            .known_hosts
            .as_ref()
            .ok_or_else(|| self.conn_err("no known-hosts file available"))?;

        let mut known_hosts = session
            .known_hosts()
            .map_err(|e| self.conn_err(e.message().to_string()))?;
        known_hosts
            .read_file(path, KnownHostFileKind::OpenSSH)
            .map_err(|e| self.conn_err(format!("cannot read {}: {}", path.display(), e.message())))?;

        let (key, _) = session
            .host_key()
            .ok_or_else(|| self.conn_err("server sent no host key"))?;

        match known_hosts.check_port(&self.host, self.port, key) {
            CheckResult::Match => Ok(()),
            CheckResult::NotFound => Err(self.conn_err(format!(
                "host key not present in {}",
                path.display()
            ))),
            CheckResult::Mismatch => Err(self.conn_err("host key mismatch")),
            CheckResult::Failure => Err(self.conn_err("host key check failed")),
        }
    }
}

impl Connector for SftpConnector {
    type Backend = SftpBackend;

    fn kind(&self) -> BackendKind {
        BackendKind::Sftp
    }

    fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }

    #[instrument(skip(self), fields(endpoint = %self.target()))]
    fn connect(&self) -> Result<SftpBackend, BackendError> {
        let tcp = self.open_socket()?;

        let mut session = Session::new().map_err(|e| self.conn_err(e.message().to_string()))?;
        session.set_timeout(CONNECT_TIMEOUT.as_millis() as u32);
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| self.conn_err(format!("handshake: {}", e.message())))?;

        self.verify_host_key(&session)?;

        session
            .userauth_pubkey_memory(
                &self.username,
                None,
                &self.private_key,
                self.passphrase.as_deref(),
            )
            .map_err(|e| self.conn_err(format!("authentication: {}", e.message())))?;
        if !session.authenticated() {
            return Err(self.conn_err("authentication rejected"));
        }

        let sftp = session
            .sftp()
            .map_err(|e| self.conn_err(format!("sftp subsystem: {}", e.message())))?;
        debug!("sftp subsystem ready");

        Ok(SftpBackend {
            base: self.base.clone(),
            session,
            sftp,
        })
    }

    fn disconnect(&self, backend: SftpBackend) -> Result<(), BackendError> {
        let SftpBackend { session, sftp, .. } = backend;
        drop(sftp);
        session
            .disconnect(None, "closing", None)
            .map_err(|e| self.conn_err(e.message().to_string()))
    }
}

/// Registry constructor for the `sftp` tag
pub(crate) fn sftp_provider(
    config: &BackendConfig,
    options: &ProviderOptions,
) -> Result<Box<dyn BackendProvider>, BackendError> {
    let connector = SftpConnector::from_config(config)?;
    Ok(Box::new(
        LifecycleManager::new(connector).with_max_age(options.session_max_age),
    ))
}

// ============================================================================
// Backend
// ============================================================================

/// Backend bound to one authenticated SFTP session
pub struct SftpBackend {
    base: PathBuf,
    session: Session,
    sftp: Sftp,
}

impl SftpBackend {
    fn remote(&self, path: &RelPath) -> PathBuf {
        PathBuf::from(path.to_remote(&self.base.to_string_lossy()))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn mkdir_chain(&self, target: &Path) -> Result<(), BackendError> {
        let mut current = PathBuf::new();
        for component in target.components() {
            current.push(component);
            if current.parent().is_none() {
                // "/" or a bare prefix
                continue;
            }
            match self.sftp.lstat(&current) {
                Ok(stat) if stat.is_dir() => continue,
                Ok(_) => {
                    return Err(BackendError::Protocol {
                        backend: BackendKind::Sftp,
                        path: current.display().to_string(),
                        message: "exists and is not a directory".to_string(),
                    })
                }
                Err(e) if matches!(e.code(), ErrorCode::SFTP(FX_NO_SUCH_FILE)) => {}
                Err(e) => return Err(sftp_err(current.display(), e)),
            }
            match self.sftp.mkdir(&current, DIR_MODE as i32) {
                // The server umask applies to mkdir; force the mode afterwards.
                Ok(()) => {
                    if let Err(e) = self.sftp.setstat(&current, dir_mode_stat()) {
                        debug!(
                            path = %current.display(),
                            error = %e,
                            "chmod of new directory failed"
                        );
                    }
                }
                // Lost a race with another creator.
                Err(e) => {
                    if !matches!(self.sftp.lstat(&current), Ok(stat) if stat.is_dir()) {
                        return Err(sftp_err(current.display(), e));
                    }
                }
            }
        }
        Ok(())
    }
}

fn meta_from(stat: &FileStat) -> EntryMeta {
    let ft = stat.file_type();
    let kind = if ft.is_symlink() {
        EntryKind::Symlink
    } else if ft.is_dir() {
        EntryKind::Dir
    } else if ft.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    };

    EntryMeta {
        kind,
        size: stat.size.unwrap_or(0),
        mode: stat.perm.map(|p| p & 0o7777),
        modified: stat
            .mtime
            .and_then(|secs| DateTime::from_timestamp(secs as i64, 0)),
    }
}

fn setstat_only(perm: Option<u32>, uid: Option<u32>, gid: Option<u32>) -> FileStat {
    FileStat {
        size: None,
        uid,
        gid,
        perm,
        atime: None,
        mtime: None,
    }
}

fn dir_mode_stat() -> FileStat {
    setstat_only(Some(DIR_MODE), None, None)
}

impl Backend for SftpBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sftp
    }

    fn base_path(&self) -> &Path {
        &self.base
    }

    fn read_dir(&self, dir: &RelPath) -> Result<Vec<DirEntry>, BackendError> {
        let listing = self
            .sftp
            .readdir(&self.remote(dir))
            .map_err(|e| sftp_err(dir, e))?;

        let mut entries = Vec::with_capacity(listing.len());
        for (path, stat) in listing {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                warn!(
                    dir = %dir,
                    path = %path.display(),
                    "skipping entry with non-UTF-8 name"
                );
                continue;
            };
            if name == "." || name == ".." {
                continue;
            }
            entries.push(DirEntry::new(name, meta_from(&stat)));
        }
        Ok(entries)
    }

    fn mkdir_all(&self, path: &RelPath) -> Result<(), BackendError> {
        self.mkdir_chain(&self.remote(path))
    }

    fn mkdir_all_absolute(&self, root: &Path, path: &RelPath) -> Result<(), BackendError> {
        self.mkdir_chain(Path::new(&path.to_remote(&root.to_string_lossy())))
    }

    fn open(&self, path: &RelPath) -> Result<Box<dyn ByteStream + '_>, BackendError> {
        let file = self
            .sftp
            .open(&self.remote(path))
            .map_err(|e| sftp_err(path, e))?;
        Ok(Box::new(file))
    }

    fn create(&self, path: &RelPath) -> Result<Box<dyn ByteStream + '_>, BackendError> {
        let file = self
            .sftp
            .create(&self.remote(path))
            .map_err(|e| sftp_err(path, e))?;
        Ok(Box::new(file))
    }

    fn open_with_flags(
        &self,
        path: &RelPath,
        flags: OpenFlags,
        perm: u32,
    ) -> Result<Box<dyn ByteStream + '_>, BackendError> {
        let mut mode = ssh2::OpenFlags::empty();
        if flags.read {
            mode |= ssh2::OpenFlags::READ;
        }
        if flags.write {
            mode |= ssh2::OpenFlags::WRITE;
        }
        if flags.append {
            mode |= ssh2::OpenFlags::APPEND;
        }
        if flags.create {
            mode |= ssh2::OpenFlags::CREATE;
        }
        if flags.truncate {
            mode |= ssh2::OpenFlags::TRUNCATE;
        }

        let file = self
            .sftp
            .open_mode(&self.remote(path), mode, perm as i32, OpenType::File)
            .map_err(|e| sftp_err(path, e))?;
        Ok(Box::new(file))
    }

    fn chmod(&self, path: &RelPath, mode: u32) -> Result<(), BackendError> {
        self.sftp
            .setstat(&self.remote(path), setstat_only(Some(mode), None, None))
            .map_err(|e| sftp_err(path, e))
    }

    fn chown(&self, path: &RelPath, uid: u32, gid: u32) -> Result<(), BackendError> {
        self.sftp
            .setstat(&self.remote(path), setstat_only(None, Some(uid), Some(gid)))
            .map_err(|e| sftp_err(path, e))
    }

    fn remove(&self, path: &RelPath) -> Result<(), BackendError> {
        let remote = self.remote(path);
        let stat = self.sftp.lstat(&remote).map_err(|e| sftp_err(path, e))?;
        let result = if stat.is_dir() {
            self.sftp.rmdir(&remote)
        } else {
            self.sftp.unlink(&remote)
        };
        result.map_err(|e| sftp_err(path, e))
    }

    fn move_to(&self, path: &RelPath, dest_root: &Path) -> Result<(), BackendError> {
        let target = PathBuf::from(path.to_remote(&dest_root.to_string_lossy()));
        self.sftp
            .rename(&self.remote(path), &target, None)
            .map_err(|e| sftp_err(path, e))
    }

    fn stat_no_follow(&self, path: &RelPath) -> Result<Option<EntryMeta>, BackendError> {
        match self.sftp.lstat(&self.remote(path)) {
            Ok(stat) => Ok(Some(meta_from(&stat))),
            Err(e) if matches!(e.code(), ErrorCode::SFTP(FX_NO_SUCH_FILE)) => Ok(None),
            Err(e) => Err(sftp_err(path, e)),
        }
    }
}
