//! Device name resolution from a `pci.ids`-style text database.
//!
//! The database is line oriented: an unindented `VVVV <description>` line
//! opens a vendor group, `\tDDDD <description>` lines list that vendor's
//! devices, and `\t\t...` lines carry subsystem entries this resolver
//! skips. Lookups are one forward scan each; no index is built or kept
//! across lookups.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::Error;

/// Well-known locations searched for the database when no path is given.
const IDS_SEARCH_PATHS: &[&str] = &[
    "pci.ids",
    "/usr/share/hwdata/pci.ids",
    "/usr/share/misc/pci.ids",
];

/// Sequential, rewindable source of database lines.
///
/// The cursor is the only mutable state in a lookup; every lookup resets
/// it, so one source must never serve interleaved lookups.
pub trait LineSource {
    /// Reposition at the first line.
    fn rewind(&mut self) -> io::Result<()>;

    /// Next line with its terminator stripped; `None` at end of source.
    fn read_line(&mut self) -> io::Result<Option<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Ascii,
    Utf16Le,
}

/// Line reader over any seekable byte stream.
///
/// UTF-16LE sources are recognized by their byte-order mark on rewind;
/// anything else is read as ASCII/UTF-8. Only line terminators are
/// stripped, trailing spaces and tabs survive into the returned line.
pub struct LineReader<R> {
    inner: BufReader<R>,
    encoding: Encoding,
}

impl<R: Read + Seek> LineReader<R> {
    pub fn new(inner: R) -> io::Result<Self> {
        let mut reader = Self {
            inner: BufReader::new(inner),
            encoding: Encoding::Ascii,
        };
        reader.sniff_encoding()?;
        Ok(reader)
    }

    /// Seek to the start and re-detect the byte-order mark, leaving the
    /// cursor on the first content byte.
    fn sniff_encoding(&mut self) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(0))?;

        let mut bom = [0u8; 2];
        let mut filled = 0;
        while filled < bom.len() {
            let n = self.inner.read(&mut bom[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 2 && bom == [0xFF, 0xFE] {
            self.encoding = Encoding::Utf16Le;
        } else {
            self.encoding = Encoding::Ascii;
            self.inner.seek(SeekFrom::Start(0))?;
        }
        Ok(())
    }

    fn read_line_ascii(&mut self) -> io::Result<Option<String>> {
        let mut raw = Vec::new();
        if self.inner.read_until(b'\n', &mut raw)? == 0 {
            return Ok(None);
        }
        if raw.last() == Some(&b'\n') {
            raw.pop();
        }
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
    }

    fn read_line_utf16(&mut self) -> io::Result<Option<String>> {
        let mut units = Vec::new();
        let mut terminated = false;
        loop {
            let mut pair = [0u8; 2];
            // A trailing odd byte is dropped along with the stream end.
            if matches!(read_unit(&mut self.inner, &mut pair)?, UnitRead::End) {
                break;
            }
            let unit = u16::from_le_bytes(pair);
            if unit == u16::from(b'\n') {
                terminated = true;
                break;
            }
            units.push(unit);
        }
        if units.is_empty() && !terminated {
            return Ok(None);
        }
        if units.last() == Some(&u16::from(b'\r')) {
            units.pop();
        }
        Ok(Some(String::from_utf16_lossy(&units)))
    }
}

enum UnitRead {
    Unit,
    End,
}

/// Fill one 16-bit code unit, reporting a clean end on EOF.
fn read_unit<R: Read>(reader: &mut R, pair: &mut [u8; 2]) -> io::Result<UnitRead> {
    let mut filled = 0;
    while filled < 2 {
        let n = reader.read(&mut pair[filled..])?;
        if n == 0 {
            return Ok(UnitRead::End);
        }
        filled += n;
    }
    Ok(UnitRead::Unit)
}

impl<R: Read + Seek> LineSource for LineReader<R> {
    fn rewind(&mut self) -> io::Result<()> {
        self.sniff_encoding()
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        match self.encoding {
            Encoding::Ascii => self.read_line_ascii(),
            Encoding::Utf16Le => self.read_line_utf16(),
        }
    }
}

/// The database opened from a filesystem path.
pub type FileLineSource = LineReader<File>;

impl LineReader<File> {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let open = |path: &Path| -> io::Result<Self> { LineReader::new(File::open(path)?) };
        open(path).map_err(|source| Error::DatabaseOpen {
            path: path.to_owned(),
            source,
        })
    }
}

/// Search the well-known locations for a database file.
pub fn locate_ids_file() -> Option<PathBuf> {
    IDS_SEARCH_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
}

/// Result of one database lookup. `device` can only be present together
/// with `vendor`; both absent means the vendor is not listed at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VendorDeviceEntry {
    pub vendor: Option<String>,
    pub device: Option<String>,
}

/// Forward-only resolver over a line source.
pub struct IdDatabase<S> {
    source: S,
}

impl<S: LineSource> IdDatabase<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Resolve a vendor/device pair to its descriptive strings.
    ///
    /// One pass from the start of the source, never backtracking: find
    /// the vendor group, then the device line inside it. The scan stops
    /// at the first match or at the line that closes the group.
    pub fn lookup(&mut self, vendor_id: u16, device_id: u16) -> Result<VendorDeviceEntry, Error> {
        let vendor_hex = format!("{:04x}", vendor_id);
        let device_hex = format!("{:04x}", device_id);
        let mut entry = VendorDeviceEntry::default();

        self.source.rewind()?;
        while let Some(line) = self.source.read_line()? {
            // Comment and empty lines never affect group state.
            if matches!(line.chars().next(), None | Some('#' | ' ' | '\n' | '\r')) {
                continue;
            }

            if !line.starts_with('\t') {
                if matches_id(&line, &vendor_hex) {
                    entry.vendor = Some(trailing_description(&line).to_owned());
                } else if entry.vendor.is_some() {
                    // Another vendor's group begins: ours had no match.
                    break;
                }
            } else if entry.vendor.is_some() && !line.starts_with("\t\t") {
                if matches_id(&line[1..], &device_hex) {
                    entry.device = Some(trailing_description(&line[1..]).to_owned());
                    break;
                }
            }
            // Indented lines outside our group, other device lines and
            // subsystem sub-entries all just keep the scan moving.
        }

        debug!(
            "{}:{} -> vendor {}, device {}",
            vendor_hex,
            device_hex,
            entry.vendor.as_deref().unwrap_or("?"),
            entry.device.as_deref().unwrap_or("?")
        );
        Ok(entry)
    }
}

/// First four characters of `line`, lowercased, against a 4-digit
/// lowercase hex ID.
fn matches_id(line: &str, id: &str) -> bool {
    let Some(prefix) = line.get(..4) else {
        return false;
    };
    prefix.to_ascii_lowercase() == id
}

/// Everything after the leading ID token and the whitespace run following
/// it. Trailing whitespace is part of the description.
fn trailing_description(line: &str) -> &str {
    let rest = line.trim_start_matches(|c| c != ' ' && c != '\t');
    rest.trim_start_matches(|c| c == ' ' || c == '\t')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SAMPLE: &str = "\
# PCI ID sample
10de  NVIDIA Corporation
\t0030  NV30 [GeForce FX]
\t0040  NV40 [GeForce 6800 Ultra]
\t\t1043 817b  V9999 Gamer Edition
8086  Intel Corporation
\t100e  82540EM Gigabit Ethernet Controller
";

    fn database(text: &str) -> IdDatabase<LineReader<Cursor<Vec<u8>>>> {
        let reader = LineReader::new(Cursor::new(text.as_bytes().to_vec())).unwrap();
        IdDatabase::new(reader)
    }

    #[test]
    fn resolves_vendor_and_device() {
        let mut db = database(SAMPLE);
        let entry = db.lookup(0x10DE, 0x0030).unwrap();
        assert_eq!(entry.vendor.as_deref(), Some("NVIDIA Corporation"));
        assert_eq!(entry.device.as_deref(), Some("NV30 [GeForce FX]"));
    }

    #[test]
    fn vendor_found_device_missing() {
        let mut db = database(SAMPLE);
        let entry = db.lookup(0x10DE, 0x9999).unwrap();
        assert_eq!(entry.vendor.as_deref(), Some("NVIDIA Corporation"));
        assert_eq!(entry.device, None);
    }

    #[test]
    fn unknown_vendor_finds_nothing() {
        let mut db = database(SAMPLE);
        assert_eq!(db.lookup(0xFFFF, 0x0000).unwrap(), VendorDeviceEntry::default());
    }

    #[test]
    fn lookup_is_idempotent() {
        let mut db = database(SAMPLE);
        let first = db.lookup(0x8086, 0x100E).unwrap();
        let second = db.lookup(0x8086, 0x100E).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.device.as_deref(), Some("82540EM Gigabit Ethernet Controller"));
    }

    #[test]
    fn comparison_ignores_case_on_both_sides() {
        let mut db = database("10DE  NVIDIA Corporation\n\t0030  NV30 [GeForce FX]\n");
        let entry = db.lookup(0x10DE, 0x0030).unwrap();
        assert_eq!(entry.vendor.as_deref(), Some("NVIDIA Corporation"));
        assert_eq!(entry.device.as_deref(), Some("NV30 [GeForce FX]"));
    }

    #[test]
    fn device_search_stays_inside_the_vendor_group() {
        // 0x100e exists, but only under the second vendor.
        let mut db = database(SAMPLE);
        let entry = db.lookup(0x10DE, 0x100E).unwrap();
        assert_eq!(entry.vendor.as_deref(), Some("NVIDIA Corporation"));
        assert_eq!(entry.device, None);
    }

    #[test]
    fn subsystem_lines_are_skipped() {
        // 1043 is the subsystem vendor on a two-tab line, not a device.
        let mut db = database(SAMPLE);
        let entry = db.lookup(0x10DE, 0x1043).unwrap();
        assert_eq!(entry.device, None);
    }

    #[test]
    fn comment_and_blank_lines_are_ignored() {
        let text = "# header\n\n   \n10de  NVIDIA Corporation\n# inner\n\t0030  NV30\n";
        let entry = database(text).lookup(0x10DE, 0x0030).unwrap();
        assert_eq!(entry.device.as_deref(), Some("NV30"));
    }

    #[test]
    fn description_keeps_trailing_whitespace() {
        let entry = database("10de\tNVIDIA Corporation  \n").lookup(0x10DE, 0).unwrap();
        assert_eq!(entry.vendor.as_deref(), Some("NVIDIA Corporation  "));
    }

    #[test]
    fn tab_separates_id_and_description_too() {
        let entry = database("10de\tNVIDIA Corporation\n\t0030\tNV30 [GeForce FX]\n")
            .lookup(0x10DE, 0x0030)
            .unwrap();
        assert_eq!(entry.vendor.as_deref(), Some("NVIDIA Corporation"));
        assert_eq!(entry.device.as_deref(), Some("NV30 [GeForce FX]"));
    }

    #[test]
    fn short_lines_do_not_panic() {
        let entry = database("10\n1\n10de  NVIDIA Corporation\n\t00\n").lookup(0x10DE, 0x0030);
        assert_eq!(entry.unwrap().device, None);
    }

    #[test]
    fn utf16le_database_resolves_identically() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in SAMPLE.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let reader = LineReader::new(Cursor::new(bytes)).unwrap();
        let mut db = IdDatabase::new(reader);

        let entry = db.lookup(0x10DE, 0x0040).unwrap();
        assert_eq!(entry.vendor.as_deref(), Some("NVIDIA Corporation"));
        assert_eq!(entry.device.as_deref(), Some("NV40 [GeForce 6800 Ultra]"));
        // Rewind-per-lookup works for the decoded form as well.
        assert_eq!(db.lookup(0x10DE, 0x0040).unwrap(), entry);
    }

    #[test]
    fn crlf_terminators_are_stripped() {
        let entry = database("10de  NVIDIA Corporation\r\n\t0030  NV30\r\n")
            .lookup(0x10DE, 0x0030)
            .unwrap();
        assert_eq!(entry.device.as_deref(), Some("NV30"));
    }

    #[test]
    fn rewind_restarts_at_first_line() {
        let mut reader = LineReader::new(Cursor::new(b"one\ntwo\n".to_vec())).unwrap();
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("one"));
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("two"));
        reader.rewind().unwrap();
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("one"));
    }

    #[test]
    fn description_helper_preserves_contract() {
        assert_eq!(trailing_description("10de  NVIDIA"), "NVIDIA");
        assert_eq!(trailing_description("0030\tNV30 [GeForce FX]"), "NV30 [GeForce FX]");
        assert_eq!(trailing_description("0030"), "");
        assert_eq!(trailing_description("0030  a  b "), "a  b ");
    }
}
