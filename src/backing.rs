//! Uniform POSIX operations against one backing root, with
//! `VirtualPath -> BackingPath` translation. This is the only module that
//! touches `libc` directly; everything above it deals in plain `Result<T,
//! i32>` where the `i32` is a raw errno.

use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub mode: u32,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub nlink: u32,
    pub rdev: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct StatFs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub favail: u64,
    pub bsize: u32,
    pub frsize: u32,
    pub namemax: u32,
}

fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
}

fn cstr(path: &Path) -> Result<CString, i32> {
    CString::new(path.as_os_str().as_encoded_bytes()).map_err(|_| libc::EINVAL)
}

fn system_time_from_stat(secs: i64, nsecs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + std::time::Duration::new(secs as u64, nsecs as u32)
    } else {
        UNIX_EPOCH - std::time::Duration::new((-secs) as u64, 0)
    }
}

/// POSIX operations rooted at one backing directory. One instance per
/// node (master, or each slave); never shared across distinct backing
/// roots.
pub struct BackingAdapter {
    root: PathBuf,
    mount_point: PathBuf,
}

impl BackingAdapter {
    pub fn new(root: impl Into<PathBuf>, mount_point: impl Into<PathBuf>) -> Self {
        BackingAdapter { root: root.into(), mount_point: mount_point.into() }
    }

    /// Maps a virtual (kernel-visible) path onto the backing root.
    pub fn real_path(&self, virtual_path: &str) -> PathBuf {
        let trimmed = virtual_path.strip_prefix('/').unwrap_or(virtual_path);
        if trimmed.is_empty() { self.root.clone() } else { self.root.join(trimmed) }
    }

    pub fn getattr(&self, path: &str) -> Result<Stat, i32> {
        let real = cstr(&self.real_path(path))?;
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::lstat(real.as_ptr(), &mut st) };
        if rc != 0 {
            return Err(errno());
        }
        Ok(Stat {
            mode: st.st_mode,
            size: st.st_size as u64,
            uid: st.st_uid,
            gid: st.st_gid,
            atime: system_time_from_stat(st.st_atime, st.st_atime_nsec),
            mtime: system_time_from_stat(st.st_mtime, st.st_mtime_nsec),
            ctime: system_time_from_stat(st.st_ctime, st.st_ctime_nsec),
            nlink: st.st_nlink as u32,
            rdev: st.st_rdev as u32,
        })
    }

    /// Host directory entries for `path`, excluding `.` and `..` (callers
    /// add those, since the kernel-facing readdir reply owns offsets).
    pub fn readdir(&self, path: &str) -> Result<Vec<String>, i32> {
        let real = self.real_path(path);
        let entries = std::fs::read_dir(&real).map_err(|e| e.raw_os_error().unwrap_or(libc::EIO))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| e.raw_os_error().unwrap_or(libc::EIO))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    pub fn readlink(&self, path: &str) -> Result<String, i32> {
        let real = self.real_path(path);
        let target = std::fs::read_link(&real).map_err(|e| e.raw_os_error().unwrap_or(libc::EIO))?;
        if target.is_absolute() {
            let relativized = target
                .strip_prefix(&self.mount_point)
                .unwrap_or(&target)
                .to_string_lossy()
                .into_owned();
            Ok(relativized)
        } else {
            Ok(target.to_string_lossy().into_owned())
        }
    }

    pub fn access(&self, path: &str, mode: i32) -> Result<(), i32> {
        let real = cstr(&self.real_path(path))?;
        let rc = unsafe { libc::access(real.as_ptr(), mode) };
        if rc != 0 { Err(errno()) } else { Ok(()) }
    }

    pub fn chmod(&self, path: &str, mode: u32) -> Result<(), i32> {
        let real = cstr(&self.real_path(path))?;
        let rc = unsafe { libc::chmod(real.as_ptr(), mode as libc::mode_t) };
        if rc != 0 { Err(errno()) } else { Ok(()) }
    }

    pub fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> Result<(), i32> {
        let real = cstr(&self.real_path(path))?;
        let uid = uid.unwrap_or(u32::MAX);
        let gid = gid.unwrap_or(u32::MAX);
        let rc = unsafe { libc::lchown(real.as_ptr(), uid, gid) };
        if rc != 0 { Err(errno()) } else { Ok(()) }
    }

    pub fn statfs(&self, path: &str) -> Result<StatFs, i32> {
        let real = cstr(&self.real_path(path))?;
        let mut sv: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(real.as_ptr(), &mut sv) };
        if rc != 0 {
            return Err(errno());
        }
        Ok(StatFs {
            blocks: sv.f_blocks as u64,
            bfree: sv.f_bfree as u64,
            bavail: sv.f_bavail as u64,
            files: sv.f_files as u64,
            ffree: sv.f_ffree as u64,
            favail: sv.f_favail as u64,
            bsize: sv.f_bsize as u32,
            frsize: sv.f_frsize as u32,
            namemax: sv.f_namemax as u32,
        })
    }

    pub fn utimens(&self, path: &str, atime: Option<SystemTime>, mtime: Option<SystemTime>) -> Result<(), i32> {
        let real = cstr(&self.real_path(path))?;
        let to_timespec = |t: Option<SystemTime>| -> libc::timespec {
            match t {
                None => libc::timespec { tv_sec: 0, tv_nsec: libc::UTIME_OMIT },
                Some(t) => match t.duration_since(UNIX_EPOCH) {
                    Ok(d) => libc::timespec { tv_sec: d.as_secs() as libc::time_t, tv_nsec: d.subsec_nanos() as i64 },
                    Err(e) => {
                        let d = e.duration();
                        libc::timespec { tv_sec: -(d.as_secs() as libc::time_t), tv_nsec: 0 }
                    }
                },
            }
        };
        let times = [to_timespec(atime), to_timespec(mtime)];
        let rc = unsafe { libc::utimensat(libc::AT_FDCWD, real.as_ptr(), times.as_ptr(), libc::AT_SYMLINK_NOFOLLOW) };
        if rc != 0 { Err(errno()) } else { Ok(()) }
    }

    pub fn mknod(&self, path: &str, mode: u32, rdev: u32) -> Result<(), i32> {
        let real = cstr(&self.real_path(path))?;
        let rc = unsafe { libc::mknod(real.as_ptr(), mode as libc::mode_t, rdev as libc::dev_t) };
        if rc != 0 { Err(errno()) } else { Ok(()) }
    }

    /// `symlink(target, linkpath)`, POSIX argument order.
    pub fn symlink(&self, target: &str, linkpath: &str) -> Result<(), i32> {
        let target_c = CString::new(target).map_err(|_| libc::EINVAL)?;
        let real_link = cstr(&self.real_path(linkpath))?;
        let rc = unsafe { libc::symlink(target_c.as_ptr(), real_link.as_ptr()) };
        if rc != 0 { Err(errno()) } else { Ok(()) }
    }

    pub fn link(&self, target: &str, linkpath: &str) -> Result<(), i32> {
        let real_target = cstr(&self.real_path(target))?;
        let real_link = cstr(&self.real_path(linkpath))?;
        let rc = unsafe { libc::link(real_target.as_ptr(), real_link.as_ptr()) };
        if rc != 0 { Err(errno()) } else { Ok(()) }
    }

    pub fn rename(&self, old: &str, new: &str) -> Result<(), i32> {
        let real_old = cstr(&self.real_path(old))?;
        let real_new = cstr(&self.real_path(new))?;
        let rc = unsafe { libc::rename(real_old.as_ptr(), real_new.as_ptr()) };
        if rc != 0 { Err(errno()) } else { Ok(()) }
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> Result<(), i32> {
        let real = cstr(&self.real_path(path))?;
        let rc = unsafe { libc::mkdir(real.as_ptr(), mode as libc::mode_t) };
        if rc != 0 { Err(errno()) } else { Ok(()) }
    }

    pub fn rmdir(&self, path: &str) -> Result<(), i32> {
        let real = cstr(&self.real_path(path))?;
        let rc = unsafe { libc::rmdir(real.as_ptr()) };
        if rc != 0 { Err(errno()) } else { Ok(()) }
    }

    pub fn unlink(&self, path: &str) -> Result<(), i32> {
        let real = cstr(&self.real_path(path))?;
        let rc = unsafe { libc::unlink(real.as_ptr()) };
        if rc != 0 { Err(errno()) } else { Ok(()) }
    }

    /// Host `open`; returns the raw descriptor, the node's `MasterHandle`
    /// or `SlaveHandle`.
    pub fn open(&self, path: &str, flags: i32) -> Result<i32, i32> {
        let real = cstr(&self.real_path(path))?;
        let fd = unsafe { libc::open(real.as_ptr(), flags) };
        if fd < 0 { Err(errno()) } else { Ok(fd) }
    }

    pub fn create(&self, path: &str, mode: u32) -> Result<i32, i32> {
        let real = cstr(&self.real_path(path))?;
        let fd = unsafe { libc::open(real.as_ptr(), libc::O_WRONLY | libc::O_CREAT, mode as libc::c_uint) };
        if fd < 0 { Err(errno()) } else { Ok(fd) }
    }

    pub fn read(&self, fd: i32, len: usize, offset: i64) -> Result<Vec<u8>, i32> {
        let mut buf = vec![0u8; len];
        let n = unsafe { libc::pread(fd, buf.as_mut_ptr() as *mut libc::c_void, len, offset as libc::off_t) };
        if n < 0 {
            return Err(errno());
        }
        buf.truncate(n as usize);
        Ok(buf)
    }

    pub fn write(&self, fd: i32, buf: &[u8], offset: i64) -> Result<usize, i32> {
        let n = unsafe { libc::pwrite(fd, buf.as_ptr() as *const libc::c_void, buf.len(), offset as libc::off_t) };
        if n < 0 { Err(errno()) } else { Ok(n as usize) }
    }

    pub fn truncate(&self, path: &str, length: i64) -> Result<(), i32> {
        let real = cstr(&self.real_path(path))?;
        let rc = unsafe { libc::truncate(real.as_ptr(), length as libc::off_t) };
        if rc != 0 { Err(errno()) } else { Ok(()) }
    }

    pub fn fsync(&self, fd: i32) -> Result<(), i32> {
        let rc = unsafe { libc::fsync(fd) };
        if rc != 0 { Err(errno()) } else { Ok(()) }
    }

    pub fn release(&self, fd: i32) -> Result<(), i32> {
        let rc = unsafe { libc::close(fd) };
        if rc != 0 { Err(errno()) } else { Ok(()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> (tempfile::TempDir, BackingAdapter) {
        let dir = tempfile::tempdir().unwrap();
        let adapter = BackingAdapter::new(dir.path(), "/mnt/unused");
        (dir, adapter)
    }

    #[test]
    fn mkdir_then_getattr_reports_directory() {
        let (_dir, adapter) = adapter();
        adapter.mkdir("/sub", 0o755).unwrap();
        let st = adapter.getattr("/sub").unwrap();
        assert_eq!(st.mode & libc::S_IFMT, libc::S_IFDIR);
    }

    #[test]
    fn create_write_read_round_trips() {
        let (_dir, adapter) = adapter();
        let fd = adapter.create("/f", 0o644).unwrap();
        let written = adapter.write(fd, b"hello", 0).unwrap();
        assert_eq!(written, 5);
        let data = adapter.read(fd, 5, 0).unwrap();
        assert_eq!(&data, b"hello");
        adapter.release(fd).unwrap();
    }

    #[test]
    fn rename_moves_directory() {
        let (_dir, adapter) = adapter();
        adapter.mkdir("/old", 0o755).unwrap();
        adapter.rename("/old", "/new").unwrap();
        assert!(adapter.getattr("/old").is_err());
        assert!(adapter.getattr("/new").is_ok());
    }

    #[test]
    fn chmod_sets_owner_rwx() {
        let (_dir, adapter) = adapter();
        adapter.mkdir("/d", 0o755).unwrap();
        adapter.chmod("/d", 0o777).unwrap();
        let st = adapter.getattr("/d").unwrap();
        assert_eq!(st.mode & 0o700, 0o700);
    }

    #[test]
    fn rmdir_removes_empty_directory() {
        let (_dir, adapter) = adapter();
        adapter.mkdir("/gone", 0o755).unwrap();
        adapter.rmdir("/gone").unwrap();
        assert!(adapter.getattr("/gone").is_err());
    }

    #[test]
    fn symlink_uses_posix_argument_order() {
        let (_dir, adapter) = adapter();
        adapter.create("/real", 0o644).map(|fd| adapter.release(fd).unwrap()).unwrap();
        adapter.symlink("real", "/link").unwrap();
        assert_eq!(adapter.readlink("/link").unwrap(), "real");
    }
}
