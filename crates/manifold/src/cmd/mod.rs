//! Daemon commands

pub mod serve;
