//! The master dispatcher: applies every operation locally first, then
//! replicates mutations to every slave with a barrier, and round-robins
//! reads to one slave at a time.
//!
//! The path-addressed logic below (`mkdir_path`, `write_path`, ...) is
//! plain and Request/Reply-independent on purpose: `fuser::Request` and
//! the `Reply*` types have no public constructor, so anything worth
//! testing directly has to live below that boundary. `impl Filesystem for
//! MasterFs` is a thin adapter that resolves inodes to paths, calls these
//! methods, and translates the result into a kernel reply.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::Mutex;
use std::time::Duration;

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use crate::backing::{BackingAdapter, Stat};
use crate::command::{broadcast, Command, MutationKind, ReadCommand};
use crate::inode::InodeTable;

const TTL: Duration = Duration::from_secs(1);

pub struct MasterFs {
    backing: BackingAdapter,
    inodes: InodeTable,
    queues: Vec<Sender<Command>>,
    nbr_slaves: usize,
    next_read_slave: Mutex<usize>,
}

impl MasterFs {
    pub fn new(backing_root: PathBuf, mount_point: PathBuf, queues: Vec<Sender<Command>>) -> Self {
        let nbr_slaves = queues.len();
        MasterFs {
            backing: BackingAdapter::new(backing_root, mount_point),
            inodes: InodeTable::new(),
            queues,
            nbr_slaves,
            next_read_slave: Mutex::new(0),
        }
    }

    /// Broadcasts `kind` to every slave and blocks until all have
    /// acknowledged (the mutation barrier, §4.E step 4-5).
    fn notify_slaves(&self, kind: MutationKind) {
        let copies = broadcast(kind, self.nbr_slaves);
        let mut signals = Vec::with_capacity(copies.len());
        for (mutation, done) in copies {
            let idx = mutation.slave_index;
            signals.push(done);
            if self.queues[idx].send(Command::Mutation(mutation)).is_err() {
                tracing::error!(slave = idx, "slave queue closed, dropping broadcast copy");
            }
        }
        for signal in signals {
            signal.wait();
        }
    }

    fn next_slave(&self) -> usize {
        let mut n = self.next_read_slave.lock().unwrap_or_else(|e| e.into_inner());
        let chosen = *n;
        *n = (*n + 1) % self.nbr_slaves;
        chosen
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

    pub fn mkdir_path(&self, path: &str, mode: u32) -> Result<(), i32> {
        self.backing.mkdir(path, mode)?;
        self.notify_slaves(MutationKind::Mkdir { path: path.to_string(), mode });
        Ok(())
    }

    pub fn create_path(&self, path: &str, mode: u32) -> Result<i32, i32> {
        let master_fd = self.backing.create(path, mode)?;
        self.notify_slaves(MutationKind::Create { path: path.to_string(), mode, master_fd });
        Ok(master_fd)
    }

    pub fn open_path(&self, path: &str, flags: i32) -> Result<i32, i32> {
        let master_fd = self.backing.open(path, flags)?;
        self.notify_slaves(MutationKind::Open { path: path.to_string(), flags, master_fd });
        Ok(master_fd)
    }

    pub fn write_path(&self, path: &str, master_fd: i32, buf: &[u8], offset: i64) -> Result<usize, i32> {
        let written = self.backing.write(master_fd, buf, offset)?;
        self.notify_slaves(MutationKind::Write {
            path: path.to_string(),
            buf: buf.to_vec(),
            offset,
            master_fd,
        });
        Ok(written)
    }

    pub fn truncate_path(&self, path: &str, length: i64, master_fd: Option<i32>) -> Result<(), i32> {
        self.backing.truncate(path, length)?;
        self.notify_slaves(MutationKind::Truncate { path: path.to_string(), length, master_fd });
        Ok(())
    }

    pub fn release_path(&self, path: &str, master_fd: i32) -> Result<(), i32> {
        self.backing.release(master_fd)?;
        self.notify_slaves(MutationKind::Release { path: path.to_string(), master_fd });
        Ok(())
    }

    pub fn rename_path(&self, old: &str, new: &str) -> Result<(), i32> {
        self.backing.rename(old, new)?;
        self.notify_slaves(MutationKind::Rename { old: old.to_string(), new: new.to_string() });
        Ok(())
    }

    pub fn rmdir_path(&self, path: &str) -> Result<(), i32> {
        self.backing.rmdir(path)?;
        self.notify_slaves(MutationKind::Rmdir { path: path.to_string() });
        Ok(())
    }

    pub fn unlink_path(&self, path: &str) -> Result<(), i32> {
        self.backing.unlink(path)?;
        self.notify_slaves(MutationKind::Unlink { path: path.to_string() });
        Ok(())
    }

    pub fn chmod_path(&self, path: &str, mode: u32) -> Result<(), i32> {
        self.backing.chmod(path, mode)?;
        self.notify_slaves(MutationKind::Chmod { path: path.to_string(), mode });
        Ok(())
    }

    /// Not broadcast to slaves — see the Open Question resolution in
    /// DESIGN.md: these stay local-only rather than extending the closed
    /// `Command` set the replication protocol matches exhaustively.
    pub fn chown_path(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> Result<(), i32> {
        self.backing.chown(path, uid, gid)
    }

    pub fn utimens_path(&self, path: &str, atime: Option<std::time::SystemTime>, mtime: Option<std::time::SystemTime>) -> Result<(), i32> {
        self.backing.utimens(path, atime, mtime)
    }

    pub fn mknod_path(&self, path: &str, mode: u32, rdev: u32) -> Result<(), i32> {
        self.backing.mknod(path, mode, rdev)
    }

    pub fn symlink_path(&self, target: &str, linkpath: &str) -> Result<(), i32> {
        self.backing.symlink(target, linkpath)
    }

    pub fn link_path(&self, target: &str, linkpath: &str) -> Result<(), i32> {
        self.backing.link(target, linkpath)
    }

    pub fn flush_path(&self, fd: i32) -> Result<(), i32> {
        self.backing.fsync(fd)
    }

    /// Routes to one slave in round-robin order and blocks on its
    /// rendezvous; never served from the master's own backing (§4.E).
    pub fn read_path(&self, path: &str, master_fd: Option<i32>, length: usize, offset: i64) -> Result<Vec<u8>, i32> {
        let slave_index = self.next_slave();
        let rendezvous = std::sync::Arc::new(crate::rendezvous::Rendezvous::new());
        let command = ReadCommand {
            path: path.to_string(),
            length,
            offset,
            master_fd,
            slave_index,
            rendezvous: rendezvous.clone(),
        };
        if self.queues[slave_index].send(Command::Read(command)).is_err() {
            return Err(libc::EIO);
        }
        rendezvous.get()
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

impl Filesystem for MasterFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_path) = self.inodes.lookup(parent) else {
            return reply.error(libc::ENOENT);
        };
        let path = child_path(&parent_path, name);
        match self.getattr_path(&path) {
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
        match self.getattr_path(&path) {
            Ok(stat) => reply.attr(&TTL, &stat_to_attr(ino, &stat)),
            Err(errno) => reply.error(errno),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        fh: Option<u64>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.inodes.lookup(ino) else {
            return reply.error(libc::ENOENT);
        };

        if let Some(mode) = mode {
            if let Err(errno) = self.chmod_path(&path, mode) {
                return reply.error(errno);
            }
        }
        if uid.is_some() || gid.is_some() {
            if let Err(errno) = self.chown_path(&path, uid, gid) {
                return reply.error(errno);
            }
        }
        if let Some(size) = size {
            if let Err(errno) = self.truncate_path(&path, size as i64, fh.map(|fh| fh as i32)) {
                return reply.error(errno);
            }
        }
        if atime.is_some() || mtime.is_some() {
            let resolve = |t: Option<TimeOrNow>| match t {
                Some(TimeOrNow::SpecificTime(t)) => Some(t),
                Some(TimeOrNow::Now) => Some(std::time::SystemTime::now()),
                None => None,
            };
            if let Err(errno) = self.utimens_path(&path, resolve(atime), resolve(mtime)) {
                return reply.error(errno);
            }
        }

        match self.getattr_path(&path) {
            Ok(stat) => reply.attr(&TTL, &stat_to_attr(ino, &stat)),
            Err(errno) => reply.error(errno),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let Some(path) = self.inodes.lookup(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.readlink_path(&path) {
            Ok(target) => reply.data(target.as_bytes()),
            Err(errno) => reply.error(errno),
        }
    }

    fn mknod(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, mode: u32, _umask: u32, rdev: u32, reply: ReplyEntry) {
        let Some(parent_path) = self.inodes.lookup(parent) else {
            return reply.error(libc::ENOENT);
        };
        let path = child_path(&parent_path, name);
        if let Err(errno) = self.mknod_path(&path, mode, rdev) {
            return reply.error(errno);
        }
        match self.getattr_path(&path) {
            Ok(stat) => {
                let ino = self.inodes.remember(&path);
                reply.entry(&TTL, &stat_to_attr(ino, &stat), 0);
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn mkdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, mode: u32, _umask: u32, reply: ReplyEntry) {
        let Some(parent_path) = self.inodes.lookup(parent) else {
            return reply.error(libc::ENOENT);
        };
        let path = child_path(&parent_path, name);
        if let Err(errno) = self.mkdir_path(&path, mode) {
            return reply.error(errno);
        }
        match self.getattr_path(&path) {
            Ok(stat) => {
                let ino = self.inodes.remember(&path);
                reply.entry(&TTL, &stat_to_attr(ino, &stat), 0);
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent_path) = self.inodes.lookup(parent) else {
            return reply.error(libc::ENOENT);
        };
        let path = child_path(&parent_path, name);
        match self.unlink_path(&path) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent_path) = self.inodes.lookup(parent) else {
            return reply.error(libc::ENOENT);
        };
        let path = child_path(&parent_path, name);
        match self.rmdir_path(&path) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn symlink(&mut self, _req: &Request<'_>, parent: u64, link_name: &OsStr, target: &std::path::Path, reply: ReplyEntry) {
        let Some(parent_path) = self.inodes.lookup(parent) else {
            return reply.error(libc::ENOENT);
        };
        let linkpath = child_path(&parent_path, link_name);
        if let Err(errno) = self.symlink_path(&target.to_string_lossy(), &linkpath) {
            return reply.error(errno);
        }
        match self.getattr_path(&linkpath) {
            Ok(stat) => {
                let ino = self.inodes.remember(&linkpath);
                reply.entry(&TTL, &stat_to_attr(ino, &stat), 0);
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn link(&mut self, _req: &Request<'_>, ino: u64, newparent: u64, newname: &OsStr, reply: ReplyEntry) {
        let (Some(target_path), Some(parent_path)) = (self.inodes.lookup(ino), self.inodes.lookup(newparent)) else {
            return reply.error(libc::ENOENT);
        };
        let linkpath = child_path(&parent_path, newname);
        if let Err(errno) = self.link_path(&target_path, &linkpath) {
            return reply.error(errno);
        }
        match self.getattr_path(&linkpath) {
            Ok(stat) => reply.entry(&TTL, &stat_to_attr(ino, &stat), 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn rename(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, newparent: u64, newname: &OsStr, _flags: u32, reply: ReplyEmpty) {
        let (Some(parent_path), Some(newparent_path)) = (self.inodes.lookup(parent), self.inodes.lookup(newparent)) else {
            return reply.error(libc::ENOENT);
        };
        let old = child_path(&parent_path, name);
        let new = child_path(&newparent_path, newname);
        match self.rename_path(&old, &new) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inodes.lookup(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.open_path(&path, flags) {
            Ok(fd) => reply.opened(fd as u64, 0),
            Err(errno) => reply.error(errno),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn create(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, mode: u32, _umask: u32, _flags: i32, reply: ReplyCreate) {
        let Some(parent_path) = self.inodes.lookup(parent) else {
            return reply.error(libc::ENOENT);
        };
        let path = child_path(&parent_path, name);
        match self.create_path(&path, mode) {
            Ok(fd) => match self.getattr_path(&path) {
                Ok(stat) => {
                    let ino = self.inodes.remember(&path);
                    reply.created(&TTL, &stat_to_attr(ino, &stat), 0, fd as u64, 0);
                }
                Err(errno) => reply.error(errno),
            },
            Err(errno) => reply.error(errno),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn read(&mut self, _req: &Request<'_>, ino: u64, fh: u64, offset: i64, size: u32, _flags: i32, _lock_owner: Option<u64>, reply: ReplyData) {
        let Some(path) = self.inodes.lookup(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.read_path(&path, Some(fh as i32), size as usize, offset) {
            Ok(data) => reply.data(&data),
            Err(errno) => reply.error(errno),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(&mut self, _req: &Request<'_>, ino: u64, fh: u64, offset: i64, data: &[u8], _write_flags: u32, _flags: i32, _lock_owner: Option<u64>, reply: ReplyWrite) {
        let Some(path) = self.inodes.lookup(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.write_path(&path, fh as i32, data, offset) {
            Ok(n) => reply.written(n as u32),
            Err(errno) => reply.error(errno),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        match self.flush_path(fh as i32) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        match self.flush_path(fh as i32) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn release(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _flags: i32, _lock_owner: Option<u64>, _flush: bool, reply: ReplyEmpty) {
        let Some(path) = self.inodes.lookup(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.release_path(&path, fh as i32) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let Some(path) = self.inodes.lookup(ino) else {
            return reply.error(libc::ENOENT);
        };
        let mut entries: Vec<(FileType, String)> = vec![(FileType::Directory, ".".to_string()), (FileType::Directory, "..".to_string())];
        match self.readdir_path(&path) {
            Ok(names) => {
                for name in names {
                    let child = child_path(&path, OsStr::new(&name));
                    let kind = self.getattr_path(&child).map(|s| file_type_of(s.mode)).unwrap_or(FileType::RegularFile);
                    entries.push((kind, name));
                }
            }
            Err(errno) => return reply.error(errno),
        }
        for (i, (kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            let ino = if name == "." { ino } else if name == ".." { ino } else { self.inodes.remember(&child_path(&path, OsStr::new(&name))) };
            if reply.add(ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        let Some(path) = self.inodes.lookup(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.statfs_path(&path) {
            Ok(s) => reply.statfs(s.blocks, s.bfree, s.bavail, s.files, s.ffree, s.bsize, s.namemax, s.frsize),
            Err(errno) => reply.error(errno),
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        let Some(path) = self.inodes.lookup(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.access_path(&path, mask) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }
}
