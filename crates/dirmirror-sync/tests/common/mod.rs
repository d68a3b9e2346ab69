//! Shared fixtures for dirmirror-sync integration tests

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use dirmirror_backends::LocalBackend;
use dirmirror_core::config::ExecutionPolicy;
use dirmirror_core::domain::{DirEntry, EntryMeta, RelPath};
use dirmirror_core::ports::{Backend, BackendError, BackendKind, ByteStream, OpenFlags};
use tempfile::TempDir;

/// Source, destination and dustbin directories for one scenario
pub struct Trees {
    pub src: TempDir,
    pub dst: TempDir,
    pub bin: TempDir,
}

impl Trees {
    pub fn new() -> Self {
        Self {
            src: TempDir::new().expect("source tempdir"),
            dst: TempDir::new().expect("dest tempdir"),
            bin: TempDir::new().expect("dustbin tempdir"),
        }
    }

    pub fn put_source(&self, rel: &str, content: &[u8]) {
        put(self.src.path(), rel, content);
    }

    pub fn put_dest(&self, rel: &str, content: &[u8]) {
        put(self.dst.path(), rel, content);
    }

    pub fn source(&self) -> LocalBackend {
        LocalBackend::new(self.src.path())
    }

    pub fn dest(&self) -> LocalBackend {
        LocalBackend::new(self.dst.path())
    }

    pub fn in_src(&self, rel: &str) -> PathBuf {
        self.src.path().join(rel)
    }

    pub fn in_dst(&self, rel: &str) -> PathBuf {
        self.dst.path().join(rel)
    }

    pub fn in_bin(&self, rel: &str) -> PathBuf {
        self.bin.path().join(rel)
    }
}

fn put(root: &Path, rel: &str, content: &[u8]) {
    let p = root.join(rel);
    if let Some(parent) = p.parent() {
        fs::create_dir_all(parent).expect("create parents");
    }
    fs::write(p, content).expect("write fixture file");
}

pub fn policy(start_level: usize, overwrite: bool) -> ExecutionPolicy {
    ExecutionPolicy {
        start_level,
        overwrite,
        uid: 0,
        gid: 0,
    }
}

/// Which operation a [`Faulty`] backend should fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    ReadDir,
    MkdirAll,
    MkdirAllAbsolute,
    Open,
    Create,
    Chmod,
    Chown,
    Remove,
    MoveTo,
}

/// Local backend that fails chosen operations on chosen paths and logs
/// every call it receives
pub struct Faulty {
    inner: LocalBackend,
    faults: HashSet<(Op, String)>,
    pub calls: RefCell<Vec<(Op, String)>>,
}

impl Faulty {
    pub fn new(inner: LocalBackend) -> Self {
        Self {
            inner,
            faults: HashSet::new(),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn failing(mut self, op: Op, path: &str) -> Self {
        self.faults.insert((op, path.to_string()));
        self
    }

    pub fn calls_of(&self, op: Op) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|(o, _)| *o == op)
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn check(&self, op: Op, path: &RelPath) -> Result<(), BackendError> {
        self.calls.borrow_mut().push((op, path.as_str().to_string()));
        if self.faults.contains(&(op, path.as_str().to_string())) {
            return Err(BackendError::Protocol {
                backend: BackendKind::Local,
                path: path.to_string(),
                message: format!("injected {op:?} failure"),
            });
        }
        Ok(())
    }
}

impl Backend for Faulty {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn base_path(&self) -> &Path {
        self.inner.base_path()
    }

    fn read_dir(&self, dir: &RelPath) -> Result<Vec<DirEntry>, BackendError> {
        self.check(Op::ReadDir, dir)?;
        self.inner.read_dir(dir)
    }

    fn mkdir_all(&self, path: &RelPath) -> Result<(), BackendError> {
        self.check(Op::MkdirAll, path)?;
        self.inner.mkdir_all(path)
    }

    fn mkdir_all_absolute(&self, root: &Path, path: &RelPath) -> Result<(), BackendError> {
        self.check(Op::MkdirAllAbsolute, path)?;
        self.inner.mkdir_all_absolute(root, path)
    }

    fn open(&self, path: &RelPath) -> Result<Box<dyn ByteStream + '_>, BackendError> {
        self.check(Op::Open, path)?;
        self.inner.open(path)
    }

    fn create(&self, path: &RelPath) -> Result<Box<dyn ByteStream + '_>, BackendError> {
        self.check(Op::Create, path)?;
        self.inner.create(path)
    }

    fn open_with_flags(
        &self,
        path: &RelPath,
        flags: OpenFlags,
        perm: u32,
    ) -> Result<Box<dyn ByteStream + '_>, BackendError> {
        self.check(Op::Open, path)?;
        self.inner.open_with_flags(path, flags, perm)
    }

    fn chmod(&self, path: &RelPath, mode: u32) -> Result<(), BackendError> {
        self.check(Op::Chmod, path)?;
        self.inner.chmod(path, mode)
    }

    fn chown(&self, path: &RelPath, _uid: u32, _gid: u32) -> Result<(), BackendError> {
        // Recorded only: real ownership changes need privileges.
        self.check(Op::Chown, path)
    }

    fn remove(&self, path: &RelPath) -> Result<(), BackendError> {
        self.check(Op::Remove, path)?;
        self.inner.remove(path)
    }

    fn move_to(&self, path: &RelPath, dest_root: &Path) -> Result<(), BackendError> {
        self.check(Op::MoveTo, path)?;
        self.inner.move_to(path, dest_root)
    }

    fn stat_no_follow(&self, path: &RelPath) -> Result<Option<EntryMeta>, BackendError> {
        self.inner.stat_no_follow(path)
    }
}
