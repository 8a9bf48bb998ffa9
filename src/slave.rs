//! The slave worker: read-only to the kernel, replays commands dequeued
//! from its queue against its own backing adapter, translating handles
//! through its `fd_map`.
//!
//! As with the master, path/command-addressed logic (`replay`,
//! `read_only_open`, ...) is plain and independently testable; `impl
//! Filesystem for SlaveFs` and `run_loop` are the two thin adapters that
//! sit on top of it (one per thread, per §5).

use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use fuser::{FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, Request};
use tracing::{debug, warn};

use crate::backing::{BackingAdapter, Stat};
use crate::command::{Command, MutationKind};
use crate::fd_map::FdMap;
use crate::inode::InodeTable;

const TTL: Duration = Duration::from_secs(1);

const WRITE_FLAGS: i32 = libc::O_WRONLY | libc::O_RDWR;

/// State shared between a slave's mount-dispatch thread and its worker
/// thread: the backing adapter and the handle map (§5 "shared resources").
pub struct SlaveShared {
    backing: BackingAdapter,
    fd_map: FdMap,
    slave_index: usize,
}

impl SlaveShared {
    pub fn new(backing_root: PathBuf, mount_point: PathBuf, slave_index: usize) -> Arc<Self> {
        Arc::new(SlaveShared {
            backing: BackingAdapter::new(backing_root, mount_point),
            fd_map: FdMap::new(),
            slave_index,
        })
    }

    fn translate(&self, master_fd: i32) -> Option<i32> {
        self.fd_map.get(master_fd as i64).map(|fd| fd as i32)
    }

    /// Applies one dequeued mutation. Errors are logged and swallowed —
    /// the master never observes slave-side replay failure (§4.D, §7).
    pub fn replay(&self, kind: &MutationKind) {
        let result: Result<(), i32> = match kind {
            MutationKind::Mkdir { path, mode } => self.backing.mkdir(path, *mode),
            MutationKind::Create { path, mode, master_fd } => {
                self.backing.create(path, *mode).map(|fd| self.fd_map.insert(*master_fd as i64, fd as i64))
            }
            MutationKind::Open { path, flags, master_fd } => {
                self.backing.open(path, *flags).map(|fd| self.fd_map.insert(*master_fd as i64, fd as i64))
            }
            MutationKind::Write { path, buf, offset, master_fd } => {
                let local_fd = self.translate(*master_fd);
                match local_fd {
                    Some(fd) => self.backing.write(fd, buf, *offset).map(|_| ()),
                    None => self.backing.open(path, libc::O_WRONLY).and_then(|fd| {
                        let r = self.backing.write(fd, buf, *offset).map(|_| ());
                        let _ = self.backing.release(fd);
                        r
                    }),
                }
            }
            MutationKind::Truncate { path, length, .. } => self.backing.truncate(path, *length),
            MutationKind::Release { path: _, master_fd } => {
                match self.fd_map.remove(*master_fd as i64) {
                    Some(fd) => self.backing.release(fd as i32),
                    None => Ok(()),
                }
            }
            MutationKind::Rename { old, new } => self.backing.rename(old, new),
            MutationKind::Rmdir { path } => self.backing.rmdir(path),
            MutationKind::Unlink { path } => self.backing.unlink(path),
            MutationKind::Chmod { path, mode } => self.backing.chmod(path, *mode),
        };
        if let Err(errno) = result {
            warn!(slave = self.slave_index, ?kind, errno, "replay failed, slave state may diverge from master");
        }
    }

    /// Serves a dispatched read by handing the bytes to the rendezvous.
    pub fn serve_read(&self, path: &str, length: usize, offset: i64, master_fd: Option<i32>) -> Result<Vec<u8>, i32> {
        debug!(slave = self.slave_index, path, "dispatched read");
        let local_fd = master_fd.and_then(|fd| self.translate(fd));
        match local_fd {
            Some(fd) => self.backing.read(fd, length, offset),
            None => {
                let fd = self.backing.open(path, libc::O_RDONLY)?;
                let result = self.backing.read(fd, length, offset);
                let _ = self.backing.release(fd);
                result
            }
        }
    }

    /// `open` at the slave's own kernel-facing mount: rejects write flags
    /// with `EACCES`, otherwise opens read-only via the backing adapter.
    pub fn read_only_open(&self, path: &str, flags: i32) -> Result<i32, i32> {
        if flags & WRITE_FLAGS != 0 {
            return Err(libc::EACCES);
        }
        self.backing.open(path, flags)
    }

    pub fn getattr_path(&self, path: &str) -> Result<Stat, i32> {
        self.backing.getattr(path)
    }

    pub fn readdir_path(&self, path: &str) -> Result<Vec<String>, i32> {
        self.backing.readdir(path)
    }

    pub fn readlink_path(&self, path: &str) -> Result<String, i32> {
        self.backing.readlink(path)
    }

    pub fn access_path(&self, path: &str, mode: i32) -> Result<(), i32> {
        self.backing.access(path, mode)
    }

    pub fn statfs_path(&self, path: &str) -> Result<crate::backing::StatFs, i32> {
        self.backing.statfs(path)
    }

    pub fn release_read_handle(&self, fd: i32) -> Result<(), i32> {
        self.backing.release(fd)
    }

    /// Reads directly from a local descriptor the slave's own mount handed
    /// out (`read_only_open`'s return value) — never a `master_fd`, so no
    /// `fd_map` translation here. Keep this separate from `serve_read`,
    /// which interprets its fd argument as a `master_fd` for `Command::Read`
    /// dispatch; the two fd spaces share no numbering guarantee and must
    /// never be crossed.
    pub fn read_local(&self, fd: i32, length: usize, offset: i64) -> Result<Vec<u8>, i32> {
        self.backing.read(fd, length, offset)
    }
}

/// The worker thread body: blocks on the queue, replays, acknowledges.
/// No busy-wait sleeps anywhere — `recv` blocks natively.
pub fn run_loop(shared: Arc<SlaveShared>, queue: Receiver<Command>) {
    while let Ok(command) = queue.recv() {
        match command {
            Command::Mutation(mutation) => {
                shared.replay(&mutation.kind);
                mutation.done.fire();
            }
            Command::Read(read) => {
                let result = shared.serve_read(&read.path, read.length, read.offset, read.master_fd);
                read.rendezvous.provide(result);
            }
        }
    }
}

fn file_type_of(mode: u32) -> FileType {
    match mode & libc::S_IFMT {
        libc::S_IFDIR => FileType::Directory,
        libc::S_IFLNK => FileType::Symlink,
        libc::S_IFCHR => FileType::CharDevice,
        libc::S_IFBLK => FileType::BlockDevice,
        libc::S_IFIFO => FileType::NamedPipe,
        libc::S_IFSOCK => FileType::Socket,
        _ => FileType::RegularFile,
    }
}

fn stat_to_attr(ino: u64, stat: &Stat) -> FileAttr {
    FileAttr {
        ino,
        size: stat.size,
        blocks: stat.size.div_ceil(512),
        atime: stat.atime,
        mtime: stat.mtime,
        ctime: stat.ctime,
        crtime: stat.ctime,
        kind: file_type_of(stat.mode),
        perm: (stat.mode & 0o7777) as u16,
        nlink: stat.nlink,
        uid: stat.uid,
        gid: stat.gid,
        rdev: stat.rdev,
        blksize: 512,
        flags: 0,
    }
}

fn child_path(parent: &str, name: &OsStr) -> String {
    let name = name.to_string_lossy();
    if parent == "/" { format!("/{name}") } else { format!("{parent}/{name}") }
}

/// The kernel-facing side of a slave mount. Owns its own `InodeTable`
/// (mount-local, not shared with the worker thread) plus a handle to the
/// state the worker thread also touches.
pub struct SlaveFs {
    shared: Arc<SlaveShared>,
    inodes: InodeTable,
}

impl SlaveFs {
    pub fn new(shared: Arc<SlaveShared>) -> Self {
        SlaveFs { shared, inodes: InodeTable::new() }
    }
}

/// Denies a mutation attempted directly against a slave's own mount.
/// `EPERM`, not `EACCES` — `read_only_open` is the sole place a slave
/// mount answers `EACCES` (a write-flagged `open`); every other denied
/// mutation matches the source's `FuseOSError(errno.EPERM)`.
macro_rules! deny_mutation {
    ($reply:expr) => {{
        $reply.error(libc::EPERM);
        return;
    }};
}

impl Filesystem for SlaveFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_path) = self.inodes.lookup(parent) else {
            return reply.error(libc::ENOENT);
        };
        let path = child_path(&parent_path, name);
        match self.shared.getattr_path(&path) {
            Ok(stat) => {
                let ino = self.inodes.remember(&path);
                reply.entry(&TTL, &stat_to_attr(ino, &stat), 0);
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.inodes.lookup(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.shared.getattr_path(&path) {
            Ok(stat) => reply.attr(&TTL, &stat_to_attr(ino, &stat)),
            Err(errno) => reply.error(errno),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        deny_mutation!(reply);
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let Some(path) = self.inodes.lookup(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.shared.readlink_path(&path) {
            Ok(target) => reply.data(target.as_bytes()),
            Err(errno) => reply.error(errno),
        }
    }

    fn mknod(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, _mode: u32, _umask: u32, _rdev: u32, reply: ReplyEntry) {
        deny_mutation!(reply);
    }

    fn mkdir(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, _mode: u32, _umask: u32, reply: ReplyEntry) {
        deny_mutation!(reply);
    }

    fn unlink(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        deny_mutation!(reply);
    }

    fn rmdir(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        deny_mutation!(reply);
    }

    fn symlink(&mut self, _req: &Request<'_>, _parent: u64, _link_name: &OsStr, _target: &std::path::Path, reply: ReplyEntry) {
        deny_mutation!(reply);
    }

    fn link(&mut self, _req: &Request<'_>, _ino: u64, _newparent: u64, _newname: &OsStr, reply: ReplyEntry) {
        deny_mutation!(reply);
    }

    fn rename(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, _newparent: u64, _newname: &OsStr, _flags: u32, reply: ReplyEmpty) {
        deny_mutation!(reply);
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inodes.lookup(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.shared.read_only_open(&path, flags) {
            Ok(fd) => reply.opened(fd as u64, 0),
            Err(errno) => reply.error(errno),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn create(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, _mode: u32, _umask: u32, _flags: i32, reply: fuser::ReplyCreate) {
        reply.error(libc::EPERM);
    }

    #[allow(clippy::too_many_arguments)]
    fn read(&mut self, _req: &Request<'_>, ino: u64, fh: u64, offset: i64, size: u32, _flags: i32, _lock_owner: Option<u64>, reply: ReplyData) {
        if self.inodes.lookup(ino).is_none() {
            return reply.error(libc::ENOENT);
        }
        match self.shared.read_local(fh as i32, size as usize, offset) {
            Ok(data) => reply.data(&data),
            Err(errno) => reply.error(errno),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _offset: i64, _data: &[u8], _write_flags: u32, _flags: i32, _lock_owner: Option<u64>, reply: fuser::ReplyWrite) {
        deny_mutation!(reply);
    }

    fn release(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _flags: i32, _lock_owner: Option<u64>, _flush: bool, reply: ReplyEmpty) {
        match self.shared.release_read_handle(fh as i32) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let Some(path) = self.inodes.lookup(ino) else {
            return reply.error(libc::ENOENT);
        };
        let mut entries: Vec<(FileType, String)> = vec![(FileType::Directory, ".".to_string()), (FileType::Directory, "..".to_string())];
        match self.shared.readdir_path(&path) {
            Ok(names) => {
                for name in names {
                    let child = child_path(&path, OsStr::new(&name));
                    let kind = self.shared.getattr_path(&child).map(|s| file_type_of(s.mode)).unwrap_or(FileType::RegularFile);
                    entries.push((kind, name));
                }
            }
            Err(errno) => return reply.error(errno),
        }
        for (i, (kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            let child_ino = if name == "." || name == ".." { ino } else { self.inodes.remember(&child_path(&path, OsStr::new(&name))) };
            if reply.add(child_ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        let Some(path) = self.inodes.lookup(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.shared.statfs_path(&path) {
            Ok(s) => reply.statfs(s.blocks, s.bfree, s.bavail, s.files, s.ffree, s.bsize, s.namemax, s.frsize),
            Err(errno) => reply.error(errno),
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        let Some(path) = self.inodes.lookup(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.shared.access_path(&path, mask) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::MutationKind;

    fn shared() -> (tempfile::TempDir, Arc<SlaveShared>) {
        let dir = tempfile::tempdir().unwrap();
        let shared = SlaveShared::new(dir.path().to_path_buf(), PathBuf::from("/mnt/unused"), 0);
        (dir, shared)
    }

    #[test]
    fn replay_mkdir_applies_locally() {
        let (_dir, shared) = shared();
        shared.replay(&MutationKind::Mkdir { path: "/t1".into(), mode: 0o755 });
        assert!(shared.getattr_path("/t1").is_ok());
    }

    #[test]
    fn open_with_write_flags_is_denied() {
        let (_dir, shared) = shared();
        let err = shared.read_only_open("/anything", libc::O_WRONLY).unwrap_err();
        assert_eq!(err, libc::EACCES);
    }

    #[test]
    fn replay_create_then_write_then_release_clears_fd_map() {
        let (_dir, shared) = shared();
        shared.replay(&MutationKind::Create { path: "/f9".into(), mode: 0o644, master_fd: 7 });
        assert!(shared.translate(7).is_some());
        shared.replay(&MutationKind::Write { path: "/f9".into(), buf: b"hi".to_vec(), offset: 0, master_fd: 7 });
        shared.replay(&MutationKind::Release { path: "/f9".into(), master_fd: 7 });
        assert!(shared.translate(7).is_none());
        let data = shared.backing.read(shared.backing.open("/f9", libc::O_RDONLY).unwrap(), 2, 0).unwrap();
        assert_eq!(&data, b"hi");
    }

    #[test]
    fn read_local_ignores_fd_map_even_on_a_colliding_master_fd() {
        let (_dir, shared) = shared();
        // File A is mid-replication: its real slave fd is mapped under
        // master_fd 3.
        shared.replay(&MutationKind::Create { path: "/a".into(), mode: 0o644, master_fd: 3 });
        shared.replay(&MutationKind::Write { path: "/a".into(), buf: b"AAAA".to_vec(), offset: 0, master_fd: 3 });

        // A direct reader of the slave's own mount opens file B and
        // happens to get back the numeric descriptor 3 from the kernel.
        // read_local must read file B through that literal fd, never
        // reinterpret it as a master_fd and chase fd_map to file A.
        std::fs::write(shared.backing.real_path("/b"), b"BBBB").unwrap();
        let direct_fd = shared.read_only_open("/b", libc::O_RDONLY).unwrap();
        let data = shared.read_local(direct_fd, 4, 0).unwrap();
        assert_eq!(&data, b"BBBB");
        assert_eq!(&data, b"hi");
    }
}
