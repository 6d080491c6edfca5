//! DVB frontend discovery through sysfs.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::debug;

const SYSFS_DVB_CLASS: &str = "/sys/class/dvb";

const USB_IDS_PATHS: &[&str] = &["/usr/share/misc/usb.ids", "/usr/share/hwdata/usb.ids"];
const PCI_IDS_PATHS: &[&str] = &["/usr/share/misc/pci.ids", "/usr/share/hwdata/pci.ids"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceBus {
    Usb,
    Pci,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DvbDevice {
    pub adapter: u32,
    pub frontend: u32,
    pub bus: DeviceBus,
    pub vendor_id: String,
    pub device_id: String,
    pub vendor_name: Option<String>,
    pub product_name: Option<String>,
}

impl DvbDevice {
    pub fn frontend_path(&self) -> PathBuf {
        PathBuf::from(format!("/dev/dvb/adapter{}/frontend{}", self.adapter, self.frontend))
    }

    pub fn description(&self) -> String {
        format!(
            "{} - {}",
            self.vendor_name.as_deref().unwrap_or("Unknown vendor"),
            self.product_name.as_deref().unwrap_or("Unknown device")
        )
    }
}

/// `dvb0.frontend1` → adapter 0, frontend 1.
pub fn parse_frontend_name(name: &str) -> Option<(u32, u32)> {
    let rest = name.strip_prefix("dvb")?;
    let (adapter, frontend) = rest.split_once(".frontend")?;
    Some((adapter.parse().ok()?, frontend.parse().ok()?))
}

/// Walk up from a sysfs device node to the USB or PCI device it hangs off.
fn find_bus_parent(path: &Path) -> Option<(DeviceBus, String, String)> {
    let mut current = path.to_path_buf();
    loop {
        if let (Some(vendor), Some(product)) = (
            read_id(&current.join("idVendor")),
            read_id(&current.join("idProduct")),
        ) {
            return Some((DeviceBus::Usb, vendor, product));
        }
        // PCI attributes read "0x14f1"
        let pci_ids = (read_id(&current.join("vendor")), read_id(&current.join("device")));
        if let (Some(vendor), Some(device)) = pci_ids {
            if current.join("class").exists() {
                return Some((DeviceBus::Pci, vendor, device));
            }
        }
        if !current.pop() {
            return None;
        }
    }
}

fn read_id(path: &Path) -> Option<String> {
    let raw = fs::read_to_string(path).ok()?;
    let id = raw.trim().trim_start_matches("0x").to_ascii_lowercase();
    (!id.is_empty()).then_some(id)
}

/// Vendor and product names from a usb.ids / pci.ids style list.
fn lookup_names(
    reader: impl BufRead,
    vendor_id: &str,
    product_id: &str,
) -> (Option<String>, Option<String>) {
    let mut vendor_name = None;
    let mut in_target_vendor = false;

    for line in reader.lines() {
        let Ok(line) = line else {
            continue;
        };

        if line.starts_with('#') || line.is_empty() {
            continue;
        }

        if !line.starts_with('\t') {
            // Vendor line: "VVVV  Vendor Name"
            if in_target_vendor {
                break;
            }
            if line.get(..4).is_some_and(|id| id.eq_ignore_ascii_case(vendor_id)) {
                vendor_name = Some(line[4..].trim().to_string());
                in_target_vendor = true;
            }
        } else if in_target_vendor && !line.starts_with("\t\t") {
            // Product line: "\tPPPP  Product Name"
            let trimmed = line.trim_start_matches('\t');
            if trimmed.get(..4).is_some_and(|id| id.eq_ignore_ascii_case(product_id)) {
                return (vendor_name, Some(trimmed[4..].trim().to_string()));
            }
        }
    }

    (vendor_name, None)
}

fn lookup_names_in(
    paths: &[&str],
    vendor_id: &str,
    product_id: &str,
) -> (Option<String>, Option<String>) {
    match paths.iter().find_map(|p| fs::File::open(p).ok()) {
        Some(file) => lookup_names(BufReader::new(file), vendor_id, product_id),
        None => (None, None),
    }
}

/// Every frontend registered with the kernel, sorted by adapter.
pub fn detect_devices() -> Vec<DvbDevice> {
    detect_devices_in(Path::new(SYSFS_DVB_CLASS))
}

pub fn detect_devices_in(class_dir: &Path) -> Vec<DvbDevice> {
    let entries = match fs::read_dir(class_dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("cannot list {}: {e}", class_dir.display());
            return Vec::new();
        }
    };

    let mut devices = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some((adapter, frontend)) = parse_frontend_name(&name) else {
            continue;
        };

        let Ok(real_path) = fs::canonicalize(entry.path()) else {
            continue;
        };

        let Some((bus, vendor_id, device_id)) = find_bus_parent(&real_path) else {
            debug!("{name}: no USB or PCI parent under {}", real_path.display());
            continue;
        };
        let id_paths = match bus {
            DeviceBus::Usb => USB_IDS_PATHS,
            DeviceBus::Pci => PCI_IDS_PATHS,
        };
        let (vendor_name, product_name) = lookup_names_in(id_paths, &vendor_id, &device_id);
        devices.push(DvbDevice {
            adapter,
            frontend,
            bus,
            vendor_id,
            device_id,
            vendor_name,
            product_name,
        });
    }

    devices.sort_by_key(|d| (d.adapter, d.frontend));
    devices
}
