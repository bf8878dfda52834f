//! PCI configuration space access.
//!
//! Common-header register layout, the [`ConfigAccess`] read primitive and
//! its backends. Only reads exist here: enumeration never writes to a
//! device's configuration space.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::io;

use bitflags::bitflags;

use crate::error::Error;
use crate::pci::PciAddress;

/// PCI Configuration Registers (common header)
pub const PCI_VENDOR_ID: u8 = 0x00;
pub const PCI_DEVICE_ID: u8 = 0x02;
pub const PCI_COMMAND: u8 = 0x04;
pub const PCI_STATUS: u8 = 0x06;
pub const PCI_REVISION_ID: u8 = 0x08;
pub const PCI_PROG_IF: u8 = 0x09;
pub const PCI_SUBCLASS: u8 = 0x0A;
pub const PCI_CLASS: u8 = 0x0B;
pub const PCI_CACHE_LINE_SIZE: u8 = 0x0C;
pub const PCI_LATENCY_TIMER: u8 = 0x0D;
pub const PCI_HEADER_TYPE: u8 = 0x0E;
pub const PCI_BIST: u8 = 0x0F;

/// Type-0 header region, laid out immediately after the common header
pub const PCI_SUBSYSTEM_VENDOR_ID: u8 = 0x2C;
pub const PCI_SUBSYSTEM_ID: u8 = 0x2E;

/// Vendor ID read back from a slot with no function present
pub const PCI_INVALID_VENDOR: u16 = 0xFFFF;

/// Header type flag: the device implements more than one function
pub const HEADER_TYPE_MULTIFUNCTION: u8 = 0x80;

bitflags! {
    /// Command register bits
    pub struct Command: u16 {
        const IO_SPACE = 0x0001;
        const MEMORY_SPACE = 0x0002;
        const BUS_MASTER = 0x0004;
        const SPECIAL_CYCLES = 0x0008;
        const MEMORY_WRITE_INVALIDATE = 0x0010;
        const VGA_PALETTE_SNOOP = 0x0020;
        const PARITY_ERROR_RESPONSE = 0x0040;
        const STEPPING = 0x0080;
        const SERR_ENABLE = 0x0100;
        const FAST_BACK_TO_BACK = 0x0200;
        const INTX_DISABLE = 0x0400;
    }
}

bitflags! {
    /// Status register bits
    pub struct Status: u16 {
        const INTERRUPT = 0x0008;
        const CAPABILITIES_LIST = 0x0010;
        const CAPABLE_66MHZ = 0x0020;
        const UDF = 0x0040;
        const FAST_BACK_TO_BACK = 0x0080;
        const MASTER_DATA_PARITY_ERROR = 0x0100;
        const SIGNALED_TARGET_ABORT = 0x0800;
        const RECEIVED_TARGET_ABORT = 0x1000;
        const RECEIVED_MASTER_ABORT = 0x2000;
        const SIGNALED_SYSTEM_ERROR = 0x4000;
        const DETECTED_PARITY_ERROR = 0x8000;
    }
}

/// Raw configuration space read primitive.
///
/// Reads must be side-effect free on the device; no write counterpart is
/// defined anywhere in this crate. The 16- and 8-bit reads are derived
/// from the aligned 32-bit read, so backends only implement `read32`.
pub trait ConfigAccess {
    /// Read a 32-bit register; `addr.offset` is taken dword-aligned.
    fn read32(&self, addr: PciAddress) -> Result<u32, Error>;

    /// Read a 16-bit configuration space register
    fn read16(&self, addr: PciAddress) -> Result<u16, Error> {
        let dword = self.read32(addr.aligned())?;
        let shift = (addr.offset & 0x02) * 8;
        Ok(((dword >> shift) & 0xFFFF) as u16)
    }

    /// Read an 8-bit configuration space register
    fn read8(&self, addr: PciAddress) -> Result<u8, Error> {
        let dword = self.read32(addr.aligned())?;
        let shift = (addr.offset & 0x03) * 8;
        Ok(((dword >> shift) & 0xFF) as u8)
    }
}

#[cfg(target_arch = "x86_64")]
pub use port::PortConfigAccess;

#[cfg(target_arch = "x86_64")]
mod port {
    use x86_64::instructions::port::{PortReadOnly, PortWriteOnly};

    use super::ConfigAccess;
    use crate::error::Error;
    use crate::pci::PciAddress;

    /// PCI Configuration Address Port (0xCF8)
    const PCI_CONFIG_ADDRESS: u16 = 0xCF8;
    /// PCI Configuration Data Port (0xCFC)
    const PCI_CONFIG_DATA: u16 = 0xCFC;

    /// Legacy configuration mechanism #1: address dword out 0xCF8, data
    /// in 0xCFC. Requires I/O privilege for the two ports.
    pub struct PortConfigAccess;

    impl PortConfigAccess {
        /// Create a PCI configuration address
        fn make_config_address(addr: PciAddress) -> u32 {
            let enable_bit = 1u32 << 31;
            let bus_bits = u32::from(addr.bus) << 16;
            let device_bits = (u32::from(addr.device) & 0x1F) << 11;
            let function_bits = (u32::from(addr.function) & 0x07) << 8;
            let offset_bits = u32::from(addr.offset) & 0xFC;

            enable_bit | bus_bits | device_bits | function_bits | offset_bits
        }
    }

    impl ConfigAccess for PortConfigAccess {
        fn read32(&self, addr: PciAddress) -> Result<u32, Error> {
            let address = Self::make_config_address(addr);

            unsafe {
                let mut addr_port: PortWriteOnly<u32> = PortWriteOnly::new(PCI_CONFIG_ADDRESS);
                let mut data_port: PortReadOnly<u32> = PortReadOnly::new(PCI_CONFIG_DATA);

                addr_port.write(address);
                Ok(data_port.read())
            }
        }
    }

}

/// In-memory configuration space backing the test suites.
///
/// Absent functions read as all-ones like an open bus. Every 32-bit read
/// is logged so tests can assert on probe behavior.
#[derive(Default)]
pub struct MockConfigSpace {
    functions: BTreeMap<(u8, u8, u8), [u8; 256]>,
    failing: BTreeSet<(u8, u8, u8)>,
    reads: RefCell<Vec<PciAddress>>,
}

impl MockConfigSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate a function with the given vendor/device pair. All other
    /// registers start out zeroed.
    pub fn add_function(&mut self, bus: u8, device: u8, function: u8, vendor_id: u16, device_id: u16) {
        let space = self.functions.entry((bus, device, function)).or_insert([0; 256]);
        put16(space, PCI_VENDOR_ID, vendor_id);
        put16(space, PCI_DEVICE_ID, device_id);
    }

    /// Set the multi-function bit on the slot's function 0 header.
    pub fn set_multifunction(&mut self, bus: u8, device: u8) {
        if let Some(space) = self.functions.get_mut(&(bus, device, 0)) {
            space[usize::from(PCI_HEADER_TYPE)] |= HEADER_TYPE_MULTIFUNCTION;
        }
    }

    pub fn set_subsystem(&mut self, bus: u8, device: u8, function: u8, vendor_id: u16, id: u16) {
        if let Some(space) = self.functions.get_mut(&(bus, device, function)) {
            put16(space, PCI_SUBSYSTEM_VENDOR_ID, vendor_id);
            put16(space, PCI_SUBSYSTEM_ID, id);
        }
    }

    /// Make every read of the given function fail.
    pub fn fail_function(&mut self, bus: u8, device: u8, function: u8) {
        self.failing.insert((bus, device, function));
    }

    /// All 32-bit reads issued so far, in order.
    pub fn probes(&self) -> Vec<PciAddress> {
        self.reads.borrow().clone()
    }
}

fn put16(space: &mut [u8; 256], offset: u8, value: u16) {
    let offset = usize::from(offset);
    space[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

impl ConfigAccess for MockConfigSpace {
    fn read32(&self, addr: PciAddress) -> Result<u32, Error> {
        self.reads.borrow_mut().push(addr);

        let key = (addr.bus, addr.device, addr.function);
        if self.failing.contains(&key) {
            return Err(Error::ConfigRead {
                address: addr,
                source: io::Error::from(io::ErrorKind::Other),
            });
        }

        let Some(space) = self.functions.get(&key) else {
            return Ok(!0);
        };
        let offset = usize::from(addr.offset & 0xFC);
        Ok(u32::from_le_bytes([
            space[offset],
            space[offset + 1],
            space[offset + 2],
            space[offset + 3],
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_reads_derive_from_dword() {
        let mut space = MockConfigSpace::new();
        space.add_function(0, 1, 0, 0x8086, 0x100E);

        let base = PciAddress::new(0, 1, 0);
        assert_eq!(space.read32(base).unwrap(), 0x100E_8086);
        assert_eq!(space.read16(base.register(PCI_VENDOR_ID)).unwrap(), 0x8086);
        assert_eq!(space.read16(base.register(PCI_DEVICE_ID)).unwrap(), 0x100E);
        assert_eq!(space.read8(base.register(0x01)).unwrap(), 0x80);
        assert_eq!(space.read8(base.register(0x03)).unwrap(), 0x10);
    }

    #[test]
    fn absent_function_reads_all_ones() {
        let space = MockConfigSpace::new();
        let addr = PciAddress::new(0, 0, 0);
        assert_eq!(space.read32(addr).unwrap(), 0xFFFF_FFFF);
        assert_eq!(space.read16(addr).unwrap(), PCI_INVALID_VENDOR);
    }

    #[test]
    fn command_and_status_truncate_reserved_bits() {
        assert_eq!(Command::from_bits_truncate(0xFFFF).bits(), 0x07FF);
        assert!(Status::from_bits_truncate(0x0010).contains(Status::CAPABILITIES_LIST));
    }
}
