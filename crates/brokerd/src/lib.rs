//! brokerd: the cluster resource broker daemon and its operator commands.

pub mod commands;
pub mod config;
pub mod daemon;
