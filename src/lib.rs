//! pciscan - PCI device enumeration with `pci.ids` name annotation.
//!
//! The library half holds the scan machinery: root bridge discovery and
//! bus range walking, the per-function prober over an injectable
//! configuration space backend, and the text database resolver. The
//! binary wires them together behind the command line flags.

// Error handling
pub mod error;
// Logging behind the log facade
pub mod logging;
// PCI bus support
pub mod pci;
// Report records and table rendering
pub mod report;

pub use error::Error;
