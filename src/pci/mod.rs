//! PCI bus enumeration.
//!
//! Walks configuration space bus by bus without a pre-built device tree
//! and yields one identity record per present function. Bus ranges come
//! from [`root_bridge`], raw register access from [`config`], and name
//! annotation from [`database`].

pub mod config;
pub mod database;
pub mod root_bridge;

use core::fmt;

use crate::error::Error;
use config::{
    Command, ConfigAccess, Status, HEADER_TYPE_MULTIFUNCTION, PCI_BIST, PCI_CACHE_LINE_SIZE,
    PCI_COMMAND, PCI_DEVICE_ID, PCI_HEADER_TYPE, PCI_INVALID_VENDOR, PCI_LATENCY_TIMER,
    PCI_REVISION_ID, PCI_STATUS, PCI_SUBSYSTEM_ID, PCI_SUBSYSTEM_VENDOR_ID, PCI_VENDOR_ID,
};
use root_bridge::BusRange;

/// Maximum bus number
pub const MAX_BUS: u8 = 255;
/// Maximum number of devices per bus
pub const MAX_DEVICE: u8 = 32;
/// Maximum number of functions per device
pub const MAX_FUNCTION: u8 = 8;

/// Location of one configuration space register: bus, device slot,
/// function and byte offset within the function's legacy register block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciAddress {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
    pub offset: u8,
}

impl PciAddress {
    pub fn new(bus: u8, device: u8, function: u8) -> Self {
        Self {
            bus,
            device,
            function,
            offset: 0,
        }
    }

    /// Same function, different register offset.
    pub fn register(self, offset: u8) -> Self {
        Self { offset, ..self }
    }

    /// Dword-aligned address for the 32-bit read underlying narrower ones.
    pub fn aligned(self) -> Self {
        Self {
            offset: self.offset & 0xFC,
            ..self
        }
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}.{}+{:#04x}",
            self.bus, self.device, self.function, self.offset
        )
    }
}

/// PCI Device Class Codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PciClass {
    Unclassified = 0x00,
    MassStorage = 0x01,
    Network = 0x02,
    Display = 0x03,
    Multimedia = 0x04,
    Memory = 0x05,
    Bridge = 0x06,
    Communication = 0x07,
    SystemPeripheral = 0x08,
    InputDevice = 0x09,
    DockingStation = 0x0A,
    Processor = 0x0B,
    SerialBus = 0x0C,
    Wireless = 0x0D,
    IntelligentIO = 0x0E,
    Satellite = 0x0F,
    Encryption = 0x10,
    SignalProcessing = 0x11,
    ProcessingAccelerator = 0x12,
    NonEssentialInstrumentation = 0x13,
    Reserved = 0xFF,
}

impl PciClass {
    pub fn name(&self) -> &'static str {
        match self {
            PciClass::Unclassified => "Unclassified",
            PciClass::MassStorage => "Mass Storage",
            PciClass::Network => "Network",
            PciClass::Display => "Display",
            PciClass::Multimedia => "Multimedia",
            PciClass::Memory => "Memory",
            PciClass::Bridge => "Bridge",
            PciClass::Communication => "Communication",
            PciClass::SystemPeripheral => "System Peripheral",
            PciClass::InputDevice => "Input Device",
            PciClass::DockingStation => "Docking Station",
            PciClass::Processor => "Processor",
            PciClass::SerialBus => "Serial Bus",
            PciClass::Wireless => "Wireless",
            PciClass::IntelligentIO => "Intelligent I/O",
            PciClass::Satellite => "Satellite",
            PciClass::Encryption => "Encryption",
            PciClass::SignalProcessing => "Signal Processing",
            PciClass::ProcessingAccelerator => "Processing Accelerator",
            PciClass::NonEssentialInstrumentation => "Non-Essential Instrumentation",
            PciClass::Reserved => "Reserved",
        }
    }
}

impl From<u8> for PciClass {
    fn from(value: u8) -> Self {
        match value {
            0x00 => PciClass::Unclassified,
            0x01 => PciClass::MassStorage,
            0x02 => PciClass::Network,
            0x03 => PciClass::Display,
            0x04 => PciClass::Multimedia,
            0x05 => PciClass::Memory,
            0x06 => PciClass::Bridge,
            0x07 => PciClass::Communication,
            0x08 => PciClass::SystemPeripheral,
            0x09 => PciClass::InputDevice,
            0x0A => PciClass::DockingStation,
            0x0B => PciClass::Processor,
            0x0C => PciClass::SerialBus,
            0x0D => PciClass::Wireless,
            0x0E => PciClass::IntelligentIO,
            0x0F => PciClass::Satellite,
            0x10 => PciClass::Encryption,
            0x11 => PciClass::SignalProcessing,
            0x12 => PciClass::ProcessingAccelerator,
            0x13 => PciClass::NonEssentialInstrumentation,
            _ => PciClass::Reserved,
        }
    }
}

impl fmt::Display for PciClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Identity record for one discovered PCI function.
///
/// Every common header field is read fresh at probe time; nothing is
/// cached between scans. The subsystem IDs come from the type-0 header
/// region and are read unconditionally, so they are best-effort for
/// bridge and CardBus headers.
#[derive(Debug, Clone)]
pub struct PciDevice {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
    pub vendor_id: u16,
    pub device_id: u16,
    pub command: Command,
    pub status: Status,
    pub revision_id: u8,
    pub class_code: PciClass,
    pub subclass: u8,
    pub prog_if: u8,
    pub cache_line_size: u8,
    pub latency_timer: u8,
    pub header_type: u8,
    pub bist: u8,
    pub subsystem_vendor_id: u16,
    pub subsystem_id: u16,
}

impl PciDevice {
    /// Get the device location as a formatted string
    pub fn location(&self) -> String {
        format!("{:02x}:{:02x}.{}", self.bus, self.device, self.function)
    }

    /// Check if this is a multifunction device
    pub fn is_multifunction(&self) -> bool {
        (self.header_type & HEADER_TYPE_MULTIFUNCTION) != 0
    }

    /// Get the base header type (without multifunction bit)
    pub fn base_header_type(&self) -> u8 {
        self.header_type & 0x7F
    }
}

impl fmt::Display for PciDevice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "PCI Device {} {:04x}:{:04x} - {} (Class: {:02x}:{:02x})",
            self.location(),
            self.vendor_id,
            self.device_id,
            self.class_code,
            self.class_code as u8,
            self.subclass
        )
    }
}

/// Read the full common header plus the type-0 subsystem IDs.
fn read_function<C: ConfigAccess>(
    access: &C,
    bus: u8,
    device: u8,
    function: u8,
) -> Result<PciDevice, Error> {
    let at = |offset| PciAddress::new(bus, device, function).register(offset);

    let vendor_id = access.read16(at(PCI_VENDOR_ID))?;
    let device_id = access.read16(at(PCI_DEVICE_ID))?;
    let command = Command::from_bits_truncate(access.read16(at(PCI_COMMAND))?);
    let status = Status::from_bits_truncate(access.read16(at(PCI_STATUS))?);

    // Revision, prog-if, subclass and class share one dword.
    let class_info = access.read32(at(PCI_REVISION_ID))?;

    Ok(PciDevice {
        bus,
        device,
        function,
        vendor_id,
        device_id,
        command,
        status,
        revision_id: (class_info & 0xFF) as u8,
        class_code: PciClass::from(((class_info >> 24) & 0xFF) as u8),
        subclass: ((class_info >> 16) & 0xFF) as u8,
        prog_if: ((class_info >> 8) & 0xFF) as u8,
        cache_line_size: access.read8(at(PCI_CACHE_LINE_SIZE))?,
        latency_timer: access.read8(at(PCI_LATENCY_TIMER))?,
        header_type: access.read8(at(PCI_HEADER_TYPE))?,
        bist: access.read8(at(PCI_BIST))?,
        subsystem_vendor_id: access.read16(at(PCI_SUBSYSTEM_VENDOR_ID))?,
        subsystem_id: access.read16(at(PCI_SUBSYSTEM_ID))?,
    })
}

/// Lazy scan over every present function within one bus range.
///
/// A slot whose function 0 reads vendor 0xFFFF implements no functions at
/// all and is abandoned without probing functions 1..=7; an absent
/// function above 0 only skips itself. A read error is yielded once and
/// fuses the iterator: enumeration never resumes past a failed read.
pub struct FunctionScanner<'a, C> {
    access: &'a C,
    range: BusRange,
    bus: u16,
    device: u8,
    function: u8,
    done: bool,
}

impl<'a, C: ConfigAccess> FunctionScanner<'a, C> {
    pub fn new(access: &'a C, range: BusRange) -> Self {
        Self {
            access,
            range,
            bus: u16::from(range.min),
            device: 0,
            function: 0,
            done: false,
        }
    }

    /// Move to the next device slot, dropping whatever functions remain.
    fn advance_device(&mut self) {
        self.function = 0;
        self.device += 1;
        if self.device >= MAX_DEVICE {
            self.device = 0;
            self.bus += 1;
        }
    }

    fn advance_function(&mut self) {
        self.function += 1;
        if self.function >= MAX_FUNCTION {
            self.advance_device();
        }
    }
}

impl<C: ConfigAccess> Iterator for FunctionScanner<'_, C> {
    type Item = Result<PciDevice, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        while self.bus <= u16::from(self.range.max) {
            let (bus, device, function) = (self.bus as u8, self.device, self.function);
            let address = PciAddress::new(bus, device, function).register(PCI_VENDOR_ID);

            let vendor_id = match self.access.read16(address) {
                Ok(vendor_id) => vendor_id,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            };

            if vendor_id == PCI_INVALID_VENDOR {
                if function == 0 {
                    self.advance_device();
                } else {
                    self.advance_function();
                }
                continue;
            }

            let found = match read_function(self.access, bus, device, function) {
                Ok(found) => found,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            };

            if function == 0 && !found.is_multifunction() {
                self.advance_device();
            } else {
                self.advance_function();
            }

            return Some(Ok(found));
        }

        self.done = true;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::config::MockConfigSpace;
    use super::*;

    fn scan(space: &MockConfigSpace, min: u8, max: u8) -> Vec<PciDevice> {
        FunctionScanner::new(space, BusRange { min, max })
            .collect::<Result<Vec<_>, _>>()
            .expect("scan failed")
    }

    #[test]
    fn single_function_device_yields_one_record() {
        let mut space = MockConfigSpace::new();
        space.add_function(0, 3, 0, 0x8086, 0x100E);

        let found = scan(&space, 0, 0);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].vendor_id, 0x8086);
        assert_eq!(found[0].device_id, 0x100E);
        assert_eq!(found[0].location(), "00:03.0");
    }

    #[test]
    fn absent_function_zero_abandons_slot() {
        let mut space = MockConfigSpace::new();
        // Slot 3 is empty but a later slot is populated; only functions
        // beyond 0 of slot 3 must go unprobed.
        space.add_function(0, 5, 0, 0x10EC, 0x8139);

        let found = scan(&space, 0, 0);
        assert_eq!(found.len(), 1);

        let slot3_high = space
            .probes()
            .iter()
            .filter(|a| a.device == 3 && a.function > 0)
            .count();
        assert_eq!(slot3_high, 0);
    }

    #[test]
    fn absent_function_above_zero_keeps_scanning() {
        let mut space = MockConfigSpace::new();
        space.add_function(0, 2, 0, 0x8086, 0x7000);
        space.set_multifunction(0, 2);
        // Function 1 left absent; function 2 present.
        space.add_function(0, 2, 2, 0x8086, 0x7010);

        let found = scan(&space, 0, 0);
        let functions: Vec<u8> = found.iter().map(|d| d.function).collect();
        assert_eq!(functions, [0, 2]);
    }

    #[test]
    fn multifunction_bit_clear_stops_after_function_zero() {
        let mut space = MockConfigSpace::new();
        space.add_function(0, 4, 0, 0x1AF4, 0x1000);
        // Functions 1..=7 populated anyway; a clear bit must hide them.
        for function in 1..MAX_FUNCTION {
            space.add_function(0, 4, function, 0x1AF4, 0x1001);
        }

        let found = scan(&space, 0, 0);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].function, 0);
    }

    #[test]
    fn subsystem_ids_are_reported() {
        let mut space = MockConfigSpace::new();
        space.add_function(2, 0, 0, 0x10DE, 0x2204);
        space.set_subsystem(2, 0, 0, 0x1458, 0x403B);

        let found = scan(&space, 2, 2);
        assert_eq!(found[0].subsystem_vendor_id, 0x1458);
        assert_eq!(found[0].subsystem_id, 0x403B);
    }

    #[test]
    fn read_error_aborts_and_fuses() {
        let mut space = MockConfigSpace::new();
        space.add_function(0, 0, 0, 0x8086, 0x1237);
        space.fail_function(0, 1, 0);
        space.add_function(0, 2, 0, 0x8086, 0x7000);

        let mut scanner = FunctionScanner::new(&space, BusRange { min: 0, max: 0 });
        assert!(scanner.next().unwrap().is_ok());
        assert!(scanner.next().unwrap().is_err());
        // Device at slot 2 is never reported once the scan has failed.
        assert!(scanner.next().is_none());
    }

    #[test]
    fn scan_covers_all_buses_in_range() {
        let mut space = MockConfigSpace::new();
        space.add_function(1, 0, 0, 0x1022, 0x7901);
        space.add_function(2, 31, 0, 0x1022, 0x7904);
        // Outside the range, must not appear.
        space.add_function(4, 0, 0, 0x1022, 0x1457);

        let found = scan(&space, 1, 3);
        let buses: Vec<u8> = found.iter().map(|d| d.bus).collect();
        assert_eq!(buses, [1, 2]);
    }
}
