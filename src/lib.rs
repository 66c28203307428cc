//! A library for collecting hardware facts on Linux.
//!
//! This crate takes one-shot snapshots of CPU topology (physical packages,
//! cores, logical threads, model, clock, cache) from `/proc/cpuinfo` and of
//! per-interface network link capabilities (driver, MAC, IP addresses, port
//! type, max link speed) from sysfs and the ethtool ioctl interface.
//!
//! Both probes are best-effort: an unreadable source or a failed device
//! query degrades the affected fields to zero/empty values instead of
//! failing the snapshot.
//!
//! # Platform Support
//! - **Linux**: `/proc/cpuinfo`, `/sys/class/net` and the `SIOCETHTOOL`
//!   ioctl are Linux interfaces; other platforms are not supported.

pub mod inventory;

pub use inventory::{enumerate_devices, hypervisor_present, CpuInfo, NetworkDevice};
