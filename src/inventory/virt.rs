use std::fs;

/// Best-effort check for a hypervisor underneath the host, suitable as the
/// `virtualized` hint to [`CpuInfo::probe`](crate::CpuInfo::probe). A probe
/// that cannot be read counts as "not present".
pub fn hypervisor_present() -> bool {
    cpuid_hypervisor_bit() || sys_hypervisor() || cpuinfo_hypervisor_flag()
}

#[cfg(target_arch = "x86_64")]
fn cpuid_hypervisor_bit() -> bool {
    use std::arch::x86_64::__cpuid;

    let basic_cpuid = unsafe { __cpuid(1) };
    (basic_cpuid.ecx & (1 << 31)) != 0
}

#[cfg(not(target_arch = "x86_64"))]
fn cpuid_hypervisor_bit() -> bool {
    false
}

fn sys_hypervisor() -> bool {
    fs::read_to_string("/sys/hypervisor/type")
        .map(|content| content.contains("xen") || content.contains("kvm"))
        .unwrap_or(false)
}

fn cpuinfo_hypervisor_flag() -> bool {
    fs::read_to_string("/proc/cpuinfo")
        .map(|content| content.contains("hypervisor"))
        .unwrap_or(false)
}
