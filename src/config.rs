use std::path::{Path, PathBuf};

use crate::cli::Cli;
use crate::constants;
use crate::error::{AppError, AppResult};

/// Resolved configuration for one run: every mount point and backing
/// directory the bootstrap step needs, plus the replica count.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    pub master_mount: PathBuf,
    pub master_backing: PathBuf,
    pub slave_mounts: Vec<PathBuf>,
    pub slave_backings: Vec<PathBuf>,
    pub nbr_slaves: usize,
    pub foreground: bool,
}

fn slave_mount_points(prefix: &str, n: usize) -> Vec<PathBuf> {
    (0..n).map(|i| PathBuf::from(format!("{prefix}{i}"))).collect()
}

fn slave_backing_stores(backing_store: &Path, prefix: &str, n: usize) -> Vec<PathBuf> {
    (0..n)
        .map(|i| backing_store.join(format!("{prefix}{i}")))
        .collect()
}

impl ReplicaConfig {
    pub fn from_cli(cli: &Cli) -> AppResult<Self> {
        if cli.nbr_slaves < 1 {
            return Err(AppError::InvalidSlaveCount(cli.nbr_slaves));
        }
        let nbr_slaves = cli.nbr_slaves as usize;

        Ok(ReplicaConfig {
            master_mount: PathBuf::from(constants::MASTER_MOUNT_PATH),
            master_backing: cli.backing_store.join(constants::MASTER_BACKING_STORAGE_NAME),
            slave_mounts: slave_mount_points(constants::SLAVE_MOUNT_PATH_PREFIX, nbr_slaves),
            slave_backings: slave_backing_stores(
                &cli.backing_store,
                constants::SLAVE_BACKING_STORAGE_NAME_PREFIX,
                nbr_slaves,
            ),
            nbr_slaves,
            foreground: cli.foreground,
        })
    }

    /// Creates every mount point and backing directory (with parents),
    /// mirroring the source's `create_dirs`.
    pub fn create_dirs(&self) -> AppResult<()> {
        let mk = |p: &Path| -> AppResult<()> {
            std::fs::create_dir_all(p).map_err(|source| AppError::CreateDir {
                path: p.to_path_buf(),
                source,
            })
        };

        mk(&self.master_mount)?;
        mk(&self.master_backing)?;
        for mp in &self.slave_mounts {
            mk(mp)?;
        }
        for bp in &self.slave_backings {
            mk(bp)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(backing: &str, n: i64) -> Cli {
        Cli { backing_store: PathBuf::from(backing), foreground: false, nbr_slaves: n }
    }

    #[test]
    fn rejects_zero_slaves() {
        let err = ReplicaConfig::from_cli(&cli("/tmp/x", 0)).unwrap_err();
        assert!(matches!(err, AppError::InvalidSlaveCount(0)));
    }

    #[test]
    fn derives_per_slave_paths() {
        let cfg = ReplicaConfig::from_cli(&cli("/tmp/x", 3)).unwrap();
        assert_eq!(cfg.nbr_slaves, 3);
        assert_eq!(cfg.slave_mounts.len(), 3);
        assert_eq!(cfg.slave_backings.len(), 3);
        assert_eq!(cfg.slave_backings[1], PathBuf::from("/tmp/x/slave1"));
        assert_eq!(cfg.master_backing, PathBuf::from("/tmp/x/master"));
    }
}
