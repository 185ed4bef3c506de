//! The persisted pairing record: the console's wireless MAC learned during
//! wired setup, plus our own radio address. Written through to disk the
//! moment pairing happens so a power cut cannot lose it.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::state::BdAddr;

const KEY_CONSOLE: &str = "PS3_MAC";
const KEY_LOCAL: &str = "LOCAL_MAC";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingRecord {
    pub console: BdAddr,
    pub local: BdAddr,
}

#[derive(Debug)]
pub struct PairingStore {
    path: PathBuf,
    record: Mutex<Option<PairingRecord>>,
}

impl PairingStore {
    /// Open the store, reading any record left by a previous run.
    pub fn open(path: PathBuf) -> Self {
        let record = match fs::read_to_string(&path) {
            Ok(content) => match parse_record(&content) {
                Some(record) => {
                    log::info!("Paired console on record: {}", record.console);
                    Some(record)
                }
                None => {
                    log::warn!("Ignoring malformed pairing file {}", path.display());
                    None
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                log::warn!("Could not read {}: {e}", path.display());
                None
            }
        };
        Self {
            path,
            record: Mutex::new(record),
        }
    }

    pub fn record(&self) -> Option<PairingRecord> {
        *self.record.lock().unwrap()
    }

    /// Replace the record and write it through to disk.
    pub fn store(&self, console: BdAddr, local: BdAddr) -> io::Result<()> {
        let record = PairingRecord { console, local };
        *self.record.lock().unwrap() = Some(record);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, format_record(&record))
    }
}

fn format_record(record: &PairingRecord) -> String {
    format!(
        "{KEY_CONSOLE}={}\n{KEY_LOCAL}={}\n",
        record.console, record.local
    )
}

fn parse_record(content: &str) -> Option<PairingRecord> {
    let mut console = None;
    let mut local = None;
    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            KEY_CONSOLE => console = value.parse().ok(),
            KEY_LOCAL => local = value.parse().ok(),
            _ => {}
        }
    }
    Some(PairingRecord {
        console: console?,
        local: local?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rosettapad-test-{}-{name}", std::process::id()))
    }

    #[test]
    fn round_trip_through_disk() {
        let path = scratch_path("roundtrip");
        let console = BdAddr([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        let local = BdAddr([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

        let store = PairingStore::open(path.clone());
        assert!(store.record().is_none());
        store.store(console, local).unwrap();

        let reloaded = PairingStore::open(path.clone());
        let record = reloaded.record().unwrap();
        assert_eq!(record.console, console);
        assert_eq!(record.local, local);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn file_format_is_key_value() {
        let record = PairingRecord {
            console: BdAddr([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]),
            local: BdAddr([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]),
        };
        let text = format_record(&record);
        assert_eq!(text, "PS3_MAC=11:22:33:44:55:66\nLOCAL_MAC=AA:BB:CC:DD:EE:FF\n");
        assert_eq!(parse_record(&text), Some(record));
    }

    #[test]
    fn malformed_files_are_rejected() {
        assert!(parse_record("").is_none());
        assert!(parse_record("PS3_MAC=11:22:33:44:55:66\n").is_none());
        assert!(parse_record("PS3_MAC=garbage\nLOCAL_MAC=AA:BB:CC:DD:EE:FF\n").is_none());
    }
}
