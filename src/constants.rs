//! Fixed path-naming conventions, mirroring the source's `constants` module.

pub const MASTER_MOUNT_PATH: &str = "/tmp/replicafs/master";
pub const MASTER_BACKING_STORAGE_NAME: &str = "master";
pub const SLAVE_MOUNT_PATH_PREFIX: &str = "/tmp/replicafs/slave";
pub const SLAVE_BACKING_STORAGE_NAME_PREFIX: &str = "slave";

pub const LOG_FILE_NAME: &str = "replicafs.log";
