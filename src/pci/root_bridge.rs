//! Root bridge discovery and bus range resolution.
//!
//! A root bridge owns zero or more address space descriptors; the walker
//! turns the bus-number entries among them into the ordered sequence of
//! ranges to scan. A bridge without any descriptor list owns the full
//! legal bus range.

use crate::error::Error;
use crate::pci::config::{ConfigAccess, PCI_INVALID_VENDOR, PCI_VENDOR_ID};
use crate::pci::{PciAddress, MAX_BUS};

#[cfg(target_arch = "x86_64")]
use crate::pci::config::PortConfigAccess;

/// Resource type carried by one address space descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// A contiguous range of bus numbers owned by the bridge
    BusNumber,
    /// A memory-mapped range
    Memory,
    /// An I/O port range
    Io,
    /// Terminal entry closing the descriptor list
    End,
}

/// One entry of a root bridge's resource descriptor list. Supplied by the
/// platform, consumed read-only by single forward iteration.
#[derive(Debug, Clone, Copy)]
pub struct AddressSpaceDescriptor {
    pub kind: ResourceKind,
    pub min: u64,
    pub max: u64,
}

impl AddressSpaceDescriptor {
    pub fn new(kind: ResourceKind, min: u64, max: u64) -> Self {
        Self { kind, min, max }
    }

    /// The list terminator; its range fields carry no meaning.
    pub fn end() -> Self {
        Self::new(ResourceKind::End, 0, 0)
    }
}

/// Resolved range of bus numbers to scan, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusRange {
    pub min: u8,
    pub max: u8,
}

/// Walks a descriptor list, yielding one [`BusRange`] per bus-number
/// entry in list order.
///
/// Entries of other resource kinds are skipped; a [`ResourceKind::End`]
/// entry or a truncated list both end the walk cleanly. A malformed list
/// can only ever degrade to "no more ranges", never to an error. The
/// cursor belongs to this walker alone and is never reset mid-scan; a new
/// root bridge gets a new walker.
pub struct BusRangeWalker<'a> {
    descriptors: Option<&'a [AddressSpaceDescriptor]>,
    cursor: usize,
    exhausted: bool,
}

impl<'a> BusRangeWalker<'a> {
    pub fn new(descriptors: Option<&'a [AddressSpaceDescriptor]>) -> Self {
        Self {
            descriptors,
            cursor: 0,
            exhausted: false,
        }
    }
}

impl Iterator for BusRangeWalker<'_> {
    type Item = BusRange;

    fn next(&mut self) -> Option<BusRange> {
        if self.exhausted {
            return None;
        }

        let descriptors = match self.descriptors {
            // No resource list at all: the bridge owns every legal bus.
            None => {
                self.exhausted = true;
                return Some(BusRange {
                    min: 0,
                    max: MAX_BUS,
                });
            }
            Some(descriptors) => descriptors,
        };

        while let Some(entry) = descriptors.get(self.cursor) {
            if entry.kind == ResourceKind::End {
                break;
            }
            self.cursor += 1;
            if entry.kind == ResourceKind::BusNumber {
                return Some(BusRange {
                    min: entry.min as u8,
                    max: entry.max as u8,
                });
            }
        }

        self.exhausted = true;
        None
    }
}

/// One enumerable PCI root bridge: a configuration access backend paired
/// with its optional resource descriptor list.
pub struct RootBridge<C> {
    access: C,
    resources: Option<Vec<AddressSpaceDescriptor>>,
}

impl<C: ConfigAccess> RootBridge<C> {
    pub fn new(access: C, resources: Option<Vec<AddressSpaceDescriptor>>) -> Self {
        Self { access, resources }
    }

    pub fn access(&self) -> &C {
        &self.access
    }

    /// Fresh walker over this bridge's bus ranges.
    pub fn bus_ranges(&self) -> BusRangeWalker<'_> {
        BusRangeWalker::new(self.resources.as_deref())
    }
}

/// Enumerate the root bridges reachable through the legacy port
/// interface.
///
/// Mechanism #1 exposes a single bridge with no resource list, so its
/// walker falls back to the full legal range. A bus that answers nothing
/// at all is reported as [`Error::NoRootBridges`].
#[cfg(target_arch = "x86_64")]
pub fn platform_bridges() -> Result<Vec<RootBridge<PortConfigAccess>>, Error> {
    let access = PortConfigAccess;
    if !bus_responds(&access)? {
        return Err(Error::NoRootBridges);
    }
    log::debug!("legacy port access root bridge found");
    Ok(vec![RootBridge::new(access, None)])
}

/// Placeholder backend for targets without a configuration space
/// mechanism; it can never be constructed.
#[cfg(not(target_arch = "x86_64"))]
pub enum NoConfigAccess {}

#[cfg(not(target_arch = "x86_64"))]
impl ConfigAccess for NoConfigAccess {
    fn read32(&self, _addr: PciAddress) -> Result<u32, Error> {
        match *self {}
    }
}

#[cfg(not(target_arch = "x86_64"))]
pub fn platform_bridges() -> Result<Vec<RootBridge<NoConfigAccess>>, Error> {
    Err(Error::NoRootBridges)
}

/// Probe the first few slots of bus 0 for any live vendor ID.
fn bus_responds<C: ConfigAccess>(access: &C) -> Result<bool, Error> {
    for device in 0..4 {
        let vendor = access.read16(PciAddress::new(0, device, 0).register(PCI_VENDOR_ID))?;
        if vendor != PCI_INVALID_VENDOR && vendor != 0x0000 {
            return Ok(true);
        }
    }
    Ok(false)
}
