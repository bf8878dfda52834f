//! Crate-wide error handling.
//!
//! Every fatal condition funnels into [`Error`]; there is no retry
//! machinery anywhere, a failed run is simply rerun.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::pci::PciAddress;

/// Fatal conditions raised by enumeration and annotation.
#[derive(Debug, Error)]
pub enum Error {
    /// No enumerable PCI root bridge answered on this platform.
    #[error("no PCI root bridges found")]
    NoRootBridges,

    /// A configuration space read failed. The scan is abandoned outright,
    /// there is no partial-skip recovery for a failed read.
    #[error("configuration space read failed at {address}: {source}")]
    ConfigRead {
        address: PciAddress,
        source: io::Error,
    },

    /// The ID database could not be located or opened. Fatal to the whole
    /// run; a softer mode would skip annotation and keep enumerating.
    #[error("cannot open device database {}: {}", .path.display(), .source)]
    DatabaseOpen { path: PathBuf, source: io::Error },

    /// The ID database failed mid-read.
    #[error("device database read failed: {0}")]
    DatabaseRead(#[from] io::Error),
}
