//! One-shot hardware inventory probes.
//!
//! # Usage
//!
//! ```no_run
//! use hwfacts::{enumerate_devices, hypervisor_present, CpuInfo};
//!
//! let cpu = CpuInfo::probe(hypervisor_present());
//! println!("{} x {} ({} threads)", cpu.cpus, cpu.model, cpu.threads);
//!
//! for device in enumerate_devices() {
//!     println!("{}: {} Mbps", device.name, device.speed);
//! }
//! ```

pub mod cpu;
pub mod network;
pub mod virt;

pub use cpu::CpuInfo;
pub use network::{enumerate_devices, NetworkDevice};
pub use virt::hypervisor_present;
