//! Constructs the queues, spawns one master and N slaves, and mounts
//! each on its own thread. Mirrors the source's `init_replica_fs`.

use std::sync::mpsc;
use std::thread;

use daemonize::Daemonize;
use fuser::MountOption;
use tracing::info;

use crate::config::ReplicaConfig;
use crate::error::{AppError, AppResult};
use crate::master::MasterFs;
use crate::slave::{run_loop, SlaveFs, SlaveShared};

pub fn run(config: ReplicaConfig) -> AppResult<()> {
    config.create_dirs()?;

    if !config.foreground {
        Daemonize::new().start().map_err(|e| AppError::Mount {
            mount_point: config.master_mount.clone(),
            source: std::io::Error::other(e.to_string()),
        })?;
    }

    let mut senders = Vec::with_capacity(config.nbr_slaves);
    let mut receivers = Vec::with_capacity(config.nbr_slaves);
    for _ in 0..config.nbr_slaves {
        let (tx, rx) = mpsc::channel();
        senders.push(tx);
        receivers.push(rx);
    }

    let mut handles = Vec::new();

    let master_mount = config.master_mount.clone();
    let master_backing = config.master_backing.clone();
    handles.push(thread::spawn(move || {
        let fs = MasterFs::new(master_backing, master_mount.clone(), senders);
        info!(mount_point = %master_mount.display(), "master mount starting");
        let options = vec![MountOption::AutoUnmount, MountOption::FSName("replicafs-master".to_string())];
        if let Err(e) = fuser::mount2(fs, &master_mount, &options) {
            tracing::error!(mount_point = %master_mount.display(), error = %e, "master mount failed");
        }
    }));

    for (i, rx) in receivers.into_iter().enumerate() {
        let slave_mount = config.slave_mounts[i].clone();
        let slave_backing = config.slave_backings[i].clone();
        let shared = SlaveShared::new(slave_backing, slave_mount.clone(), i);

        let worker_shared = shared.clone();
        handles.push(thread::spawn(move || run_loop(worker_shared, rx)));

        handles.push(thread::spawn(move || {
            let fs = SlaveFs::new(shared);
            info!(mount_point = %slave_mount.display(), slave = i, "slave mount starting");
            let options = vec![MountOption::AutoUnmount, MountOption::FSName(format!("replicafs-slave{i}"))];
            if let Err(e) = fuser::mount2(fs, &slave_mount, &options) {
                tracing::error!(mount_point = %slave_mount.display(), slave = i, error = %e, "slave mount failed");
            }
        }));
    }

    for handle in handles {
        let _ = handle.join();
    }

    Ok(())
}
