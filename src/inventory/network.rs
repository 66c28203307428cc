use anyhow::{anyhow, bail, Result};
use pnet::datalink;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::path::Path;

const SYS_CLASS_NET: &str = "/sys/class/net";

// SIOCETHTOOL from /usr/include/linux/sockios.h
const SIOCETHTOOL: libc::c_ulong = 0x8946;
// ETHTOOL_GSET / ETHTOOL_GLINKSETTINGS from include/uapi/linux/ethtool.h
const ETHTOOL_GSET: u32 = 0x1;
const ETHTOOL_GLINKSETTINGS: u32 = 0x4c;

const IFNAMSIZ: usize = 16;

// link_mode_masks_nwords is an i8, so the kernel can never ask for more.
const LINK_MODE_MASK_MAX_NWORDS: usize = 127;

/// Facts about one network interface, taken once per snapshot from sysfs and
/// the ethtool ioctl interface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkDevice {
    pub name: String,
    pub driver: String,
    pub ip_addresses: Vec<String>,
    pub mac_address: String,
    pub port: String,
    /// Max supported link speed in Mbps, 0 if undetected.
    pub speed: u32,
}

/// Enumerates the host's network interfaces. Never fails: an unreadable
/// sysfs tree yields an empty list, and a device whose capability query
/// errors is still reported with its port/speed fields zeroed.
pub fn enumerate_devices() -> Vec<NetworkDevice> {
    enumerate_devices_in(Path::new(SYS_CLASS_NET))
}

fn enumerate_devices_in(sys_class_net: &Path) -> Vec<NetworkDevice> {
    let entries = match fs::read_dir(sys_class_net) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();

    let mut devices = Vec::new();
    for name in names {
        let fullpath = sys_class_net.join(&name);

        // sysfs exposes each interface as a symlink into the device tree;
        // anything else, or a target that no longer resolves, is skipped.
        let is_link = fs::symlink_metadata(&fullpath)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if !is_link || fs::metadata(&fullpath).is_err() {
            continue;
        }

        let (port, speed) = match query_link_settings(&name) {
            Ok(settings) => (port_label(settings.port).to_string(), settings.speed),
            Err(_) => {
                let supported = query_supported_modes(&name);
                (port_type(supported), max_speed(supported))
            }
        };

        let mut device = NetworkDevice {
            name: name.clone(),
            mac_address: slurp_trimmed(&fullpath.join("address")),
            ip_addresses: interface_addresses(&name),
            port,
            speed,
            ..Default::default()
        };

        if let Ok(driver) = fs::read_link(fullpath.join("device").join("driver")) {
            if let Some(base) = driver.file_name() {
                device.driver = base.to_string_lossy().into_owned();
            }
        }

        devices.push(device);
    }

    devices
}

/// Decodes the port-type bits of an ETHTOOL_GSET `supported` mask. Several
/// bits may be set at once; all matching labels are reported.
fn port_type(supported: u32) -> String {
    const PORT_BITS: [(u32, &str); 5] = [
        (7, "tp"),
        (8, "aui"),
        (9, "mii"),
        (10, "fibre"),
        (11, "bnc"),
    ];

    PORT_BITS
        .iter()
        .filter(|(bit, _)| supported & (1 << bit) != 0)
        .map(|&(_, label)| label)
        .collect::<Vec<_>>()
        .join("/")
}

/// Decodes the highest supported link speed from an ETHTOOL_GSET `supported`
/// mask. Tiers are ordered highest first; the first match wins.
fn max_speed(supported: u32) -> u32 {
    const SPEED_TIERS: [(u32, u32); 8] = [
        (0x7800_0000, 56000),
        (0x0780_0000, 40000),
        (0x0060_0000, 20000),
        (0x001c_1000, 10000),
        (0x0000_8000, 2500),
        (0x0002_0030, 1000),
        (0x0000_000c, 100),
        (0x0000_0003, 10),
    ];

    SPEED_TIERS
        .iter()
        .find(|(mask, _)| supported & mask != 0)
        .map(|&(_, speed)| speed)
        .unwrap_or(0)
}

/// PORT_* values carried in struct ethtool_link_settings.
fn port_label(port: u8) -> &'static str {
    match port {
        0x00 => "twisted pair",
        0x01 => "AUI",
        0x02 => "media-independent",
        0x03 => "fibre",
        0x04 => "BNC",
        0x05 => "direct attach",
        0xef => "none",
        0xff => "other",
        _ => "",
    }
}

// struct ethtool_cmd from include/uapi/linux/ethtool.h
#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
struct EthtoolCmd {
    cmd: u32,
    supported: u32,
    advertising: u32,
    speed: u16,
    duplex: u8,
    port: u8,
    phy_address: u8,
    transceiver: u8,
    autoneg: u8,
    mdio_support: u8,
    maxtxpkt: u32,
    maxrxpkt: u32,
    speed_hi: u16,
    eth_tp_mdix: u8,
    eth_tp_mdix_ctrl: u8,
    lp_advertising: u32,
    reserved: [u32; 2],
}

// struct ethtool_link_settings from include/uapi/linux/ethtool.h, with the
// trailing flexible array sized for the largest possible mode mask.
#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
struct EthtoolLinkSettings {
    cmd: u32,
    speed: u32,
    duplex: u8,
    port: u8,
    phy_address: u8,
    autoneg: u8,
    mdio_support: u8,
    eth_tp_mdix: u8,
    eth_tp_mdix_ctrl: u8,
    link_mode_masks_nwords: i8,
    transceiver: u8,
    reserved1: [u8; 3],
    reserved: [u32; 7],
    link_mode_masks: [u32; 3 * LINK_MODE_MASK_MAX_NWORDS],
}

// struct ifreq from include/uapi/linux/if.h. The ioctl copies the whole
// 24-byte request union back out, so the unused tail must be present.
#[repr(C)]
#[allow(dead_code)]
struct Ifreq {
    name: [u8; IFNAMSIZ],
    data: *mut libc::c_void,
    pad: [u8; 24 - mem::size_of::<*mut libc::c_void>()],
}

impl Ifreq {
    fn new(name: &str, data: *mut libc::c_void) -> Result<Self> {
        let bytes = name.as_bytes();
        if bytes.len() >= IFNAMSIZ {
            bail!("interface name too long: {name}");
        }
        let mut buf = [0u8; IFNAMSIZ];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Ifreq {
            name: buf,
            data,
            pad: [0; 24 - mem::size_of::<*mut libc::c_void>()],
        })
    }
}

/// Throwaway datagram socket for ethtool ioctls, closed on drop.
struct DgramSocket(RawFd);

impl DgramSocket {
    fn open() -> Result<Self> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, libc::IPPROTO_IP) };
        if fd < 0 {
            return Err(anyhow!("socket: {}", io::Error::last_os_error()));
        }
        Ok(DgramSocket(fd))
    }

    fn ethtool(&self, ifr: &mut Ifreq) -> Result<()> {
        let rc = unsafe { libc::ioctl(self.0, SIOCETHTOOL, ifr as *mut Ifreq) };
        if rc != 0 {
            return Err(anyhow!("SIOCETHTOOL: {}", io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl Drop for DgramSocket {
    fn drop(&mut self) {
        unsafe { libc::close(self.0) };
    }
}

/// Validates the ETHTOOL_GLINKSETTINGS handshake reply. The kernel signals
/// agreement by echoing the command code and flipping the mode-mask word
/// count negative; the usable word count is the negation. A non-negative
/// count, a mutated command code, or a count that cannot be negated (it must
/// stay within the i8 buffer bound) all reject the reply.
fn negotiated_nwords(settings: &EthtoolLinkSettings) -> Option<i8> {
    if settings.cmd != ETHTOOL_GLINKSETTINGS {
        return None;
    }
    settings.link_mode_masks_nwords.checked_neg().filter(|n| *n > 0)
}

/// Queries link settings through ETHTOOL_GLINKSETTINGS.
///
/// A reply that fails the handshake check means the driver does not speak
/// this interface, and the caller falls back to ETHTOOL_GSET.
fn query_link_settings(name: &str) -> Result<EthtoolLinkSettings> {
    let sock = DgramSocket::open()?;

    let mut settings: EthtoolLinkSettings = unsafe { mem::zeroed() };
    settings.cmd = ETHTOOL_GLINKSETTINGS;

    let mut ifr = Ifreq::new(name, &mut settings as *mut EthtoolLinkSettings as *mut _)?;
    sock.ethtool(&mut ifr)?;

    let nwords = match negotiated_nwords(&settings) {
        Some(nwords) => nwords,
        None => bail!(
            "link settings handshake rejected: nwords {}, cmd {:#x}",
            settings.link_mode_masks_nwords,
            settings.cmd
        ),
    };

    settings.link_mode_masks_nwords = nwords;
    sock.ethtool(&mut ifr)?;

    Ok(settings)
}

/// Queries the legacy ETHTOOL_GSET `supported` bitmask, 0 on any failure.
fn query_supported_modes(name: &str) -> u32 {
    let sock = match DgramSocket::open() {
        Ok(sock) => sock,
        Err(_) => return 0,
    };

    let mut cmd: EthtoolCmd = unsafe { mem::zeroed() };
    cmd.cmd = ETHTOOL_GSET;

    let mut ifr = match Ifreq::new(name, &mut cmd as *mut EthtoolCmd as *mut _) {
        Ok(ifr) => ifr,
        Err(_) => return 0,
    };

    match sock.ethtool(&mut ifr) {
        Ok(()) => cmd.supported,
        Err(_) => 0,
    }
}

fn interface_addresses(name: &str) -> Vec<String> {
    datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == name)
        .map(|iface| iface.ips.iter().map(|ip| ip.to_string()).collect())
        .unwrap_or_default()
}

fn slurp_trimmed(path: &Path) -> String {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::os::unix::fs::symlink;

    #[test]
    fn port_bits_report_all_matches() {
        assert_eq!(port_type(1 << 7 | 1 << 9), "tp/mii");
        assert_eq!(port_type(1 << 7), "tp");
        assert_eq!(
            port_type(1 << 7 | 1 << 8 | 1 << 9 | 1 << 10 | 1 << 11),
            "tp/aui/mii/fibre/bnc"
        );
        assert_eq!(port_type(0), "");
        // bits outside 7..=11 are not port bits
        assert_eq!(port_type(1 << 3 | 1 << 12), "");
    }

    #[test]
    fn highest_speed_tier_wins() {
        assert_eq!(max_speed(0x001c_1000 | 0x0002_0030), 10000);
        assert_eq!(max_speed(0x7800_0000), 56000);
        assert_eq!(max_speed(0x0000_8000), 2500);
        assert_eq!(max_speed(0x0000_0003), 10);
        assert_eq!(max_speed(0), 0);
    }

    #[test]
    fn modern_port_labels() {
        assert_eq!(port_label(0x00), "twisted pair");
        assert_eq!(port_label(0x03), "fibre");
        assert_eq!(port_label(0x05), "direct attach");
        assert_eq!(port_label(0xef), "none");
        assert_eq!(port_label(0xff), "other");
        assert_eq!(port_label(0x42), "");
    }

    #[test]
    fn handshake_requires_negated_word_count() {
        let mut settings: EthtoolLinkSettings = unsafe { mem::zeroed() };
        settings.cmd = ETHTOOL_GLINKSETTINGS;
        settings.link_mode_masks_nwords = -3;
        assert_eq!(negotiated_nwords(&settings), Some(3));

        // positive or zero word count means the driver did not negotiate
        settings.link_mode_masks_nwords = 3;
        assert_eq!(negotiated_nwords(&settings), None);
        settings.link_mode_masks_nwords = 0;
        assert_eq!(negotiated_nwords(&settings), None);

        // a count whose negation overflows the field is rejected too
        settings.link_mode_masks_nwords = i8::MIN;
        assert_eq!(negotiated_nwords(&settings), None);
    }

    #[test]
    fn handshake_requires_echoed_command_code() {
        let mut settings: EthtoolLinkSettings = unsafe { mem::zeroed() };
        settings.cmd = ETHTOOL_GSET;
        settings.link_mode_masks_nwords = -3;
        assert_eq!(negotiated_nwords(&settings), None);

        settings.cmd = 0;
        assert_eq!(negotiated_nwords(&settings), None);
    }

    #[test]
    fn dangling_entries_are_skipped() -> Result<()> {
        let root = tempfile::tempdir()?;
        let net = root.path().join("net");
        fs::create_dir(&net)?;

        let target = root.path().join("devices").join("fakenic0");
        fs::create_dir_all(target.join("device"))?;
        fs::write(target.join("address"), "aa:bb:cc:dd:ee:ff\n")?;
        symlink("/no/such/module/drivers/fakedrv", target.join("device").join("driver"))?;

        symlink(&target, net.join("fakenic0"))?;
        symlink(root.path().join("gone"), net.join("ghost0"))?;

        let devices = enumerate_devices_in(&net);
        assert_eq!(devices.len(), 1);

        let device = &devices[0];
        assert_eq!(device.name, "fakenic0");
        assert_eq!(device.mac_address, "aa:bb:cc:dd:ee:ff");
        assert_eq!(device.driver, "fakedrv");
        // no such interface is registered with the kernel
        assert!(device.ip_addresses.is_empty());
        assert_eq!(device.port, "");
        assert_eq!(device.speed, 0);
        Ok(())
    }

    #[test]
    fn plain_directory_entries_are_skipped() -> Result<()> {
        let root = tempfile::tempdir()?;
        let net = root.path().join("net");
        fs::create_dir_all(net.join("bonding_masters"))?;

        assert!(enumerate_devices_in(&net).is_empty());
        Ok(())
    }

    #[test]
    fn missing_attributes_degrade_to_empty() -> Result<()> {
        let root = tempfile::tempdir()?;
        let net = root.path().join("net");
        fs::create_dir(&net)?;

        let target = root.path().join("devices").join("bare0");
        fs::create_dir_all(&target)?;
        symlink(&target, net.join("bare0"))?;

        let devices = enumerate_devices_in(&net);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].mac_address, "");
        assert_eq!(devices[0].driver, "");
        Ok(())
    }

    #[test]
    fn unreadable_tree_yields_empty_list() {
        assert!(enumerate_devices_in(Path::new("/nonexistent/sys/class/net")).is_empty());
    }

    #[test]
    fn oversized_interface_name_is_rejected() {
        let mut data = 0u32;
        assert!(Ifreq::new(
            "an-interface-name-way-over-limit",
            &mut data as *mut u32 as *mut _
        )
        .is_err());
        assert!(Ifreq::new("eth0", &mut data as *mut u32 as *mut _).is_ok());
    }

    #[test]
    fn enumerate_host() {
        // smoke test against the real sysfs tree
        for device in enumerate_devices() {
            assert!(!device.name.is_empty());
        }
    }
}
