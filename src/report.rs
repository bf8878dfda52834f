//! Report sink: one record per discovered function, rendered as the
//! classic five-column table with optional name annotation appended.

use crate::pci::database::VendorDeviceEntry;
use crate::pci::PciDevice;

/// Reported fields for one present function.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub bus: u8,
    pub vendor_id: u16,
    pub device_id: u16,
    pub subsystem_vendor_id: u16,
    pub subsystem_id: u16,
    pub vendor_desc: Option<String>,
    pub device_desc: Option<String>,
}

impl DeviceRecord {
    pub fn new(device: &PciDevice) -> Self {
        Self {
            bus: device.bus,
            vendor_id: device.vendor_id,
            device_id: device.device_id,
            subsystem_vendor_id: device.subsystem_vendor_id,
            subsystem_id: device.subsystem_id,
            vendor_desc: None,
            device_desc: None,
        }
    }

    /// Attach a database lookup result.
    pub fn annotate(mut self, entry: VendorDeviceEntry) -> Self {
        self.vendor_desc = entry.vendor;
        self.device_desc = entry.device;
        self
    }
}

/// Column header printed before each bus range's rows.
pub fn print_header() {
    println!();
    println!("Bus    Vendor   Device  Subvendor SVDevice");
    println!();
}

pub fn print_row(record: &DeviceRecord) {
    println!("{}", format_row(record));
}

/// One table row; descriptions follow the ID columns when present.
pub fn format_row(record: &DeviceRecord) -> String {
    let mut row = format!(
        " {:02}     {:04x}     {:04x}     {:04x}     {:04x}",
        record.bus,
        record.vendor_id,
        record.device_id,
        record.subsystem_vendor_id,
        record.subsystem_id
    );
    if let Some(vendor) = &record.vendor_desc {
        row.push_str(&format!("     {}", vendor));
        if let Some(device) = &record.device_desc {
            row.push_str(&format!(", {}", device));
        }
    }
    row
}
