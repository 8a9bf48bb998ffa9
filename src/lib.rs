pub mod backing;
pub mod bootstrap;
pub mod cli;
pub mod command;
pub mod config;
pub mod constants;
pub mod error;
pub mod fd_map;
pub mod inode;
pub mod logging;
pub mod master;
pub mod rendezvous;
pub mod slave;
