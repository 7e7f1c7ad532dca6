//! Configuration store: a validated key-value record backed by whatever
//! persistent storage the board provides (flash, EEPROM, an SD file — see
//! [`crate::hal::ConfigBackend`]).
//!
//! Grounded on `config_manager.cpp`'s `Preferences`-keyed read-modify-write:
//! the same key names (`"ecu_id"`, `"can_speed"`, ...), the same defaults,
//! the same XOR checksum over the record's bytes excluding the checksum
//! itself, and the same silent-revert-to-defaults behavior on a checksum
//! mismatch or a failed validation at load time.

use crate::hal::ConfigBackend;
use crate::util::FixedStr;

/// Maximum stored length of the Wi-Fi SSID, matching §3's 1-31 character
/// range.
pub const SSID_MAX_LEN: usize = 31;
/// Maximum stored length of the Wi-Fi password, matching §3's 8-63
/// character range.
pub const PASSWORD_MAX_LEN: usize = 63;

const KEY_ECU_ID: &str = "ecu_id";
const KEY_CAN_SPEED: &str = "can_speed";
const KEY_REQUEST_INTERVAL: &str = "req_int";
const KEY_MAX_PENDING: &str = "max_pend";
const KEY_SHIFT_RPM: &str = "shift_rpm";
const KEY_DEBUG: &str = "debug";
const KEY_FLUSH_INTERVAL: &str = "flush_int";
const KEY_SSID: &str = "wifi_ssid";
const KEY_PASSWORD: &str = "wifi_pwd";
const KEY_CHECKSUM: &str = "checksum";

const DEFAULT_ECU_ID: u8 = 1;
const DEFAULT_CAN_SPEED_KBPS: u16 = 500;
const DEFAULT_REQUEST_INTERVAL_MS: u16 = 50;
const DEFAULT_MAX_PENDING_REQUESTS: u8 = 16;
const DEFAULT_SHIFT_LIGHT_RPM: u8 = 40;
const DEFAULT_FLUSH_INTERVAL_MS: u16 = 1000;
const DEFAULT_SSID: &str = "EPIC_CAN_LOGGER";
const DEFAULT_PASSWORD: &str = "password123";

/// Number of bytes [`ConfigRecord::checksum_bytes`] serializes, i.e. the
/// record's size excluding the trailing checksum byte itself.
const CHECKSUM_LEN: usize = 1 + 2 + 2 + 1 + 1 + 1 + 2 + (1 + SSID_MAX_LEN) + (1 + PASSWORD_MAX_LEN);

/// The full set of runtime-configurable settings, §3's Configuration
/// record.
#[derive(Clone, Copy)]
pub struct ConfigRecord {
    /// ECU identifier, 0-15; offsets the UDS physical request/response ids.
    pub ecu_id: u8,
    /// CAN bus bit rate in kbps; expected to be one of 125/250/500/1000.
    pub can_speed_kbps: u16,
    /// Minimum spacing between variable-poll requests, 1-1000 ms.
    pub request_interval_ms: u16,
    /// Maximum concurrent in-flight DID reads, 1-255.
    pub max_pending_requests: u8,
    /// Shift-light RPM threshold, in hundreds of RPM (10-100 = 1000-10000).
    pub shift_light_rpm_threshold: u8,
    /// Verbose debug logging enabled.
    pub debug_enabled: bool,
    /// Forced logger flush interval, milliseconds.
    pub log_flush_interval_ms: u16,
    /// Wi-Fi network name, 1-31 characters.
    pub wifi_ssid: FixedStr<SSID_MAX_LEN>,
    /// Wi-Fi password, 8-63 characters.
    pub wifi_password: FixedStr<PASSWORD_MAX_LEN>,
}

impl ConfigRecord {
    /// The hard-coded defaults, matching `configResetToDefaults`.
    pub fn defaults() -> Self {
        Self {
            ecu_id: DEFAULT_ECU_ID,
            can_speed_kbps: DEFAULT_CAN_SPEED_KBPS,
            request_interval_ms: DEFAULT_REQUEST_INTERVAL_MS,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
            shift_light_rpm_threshold: DEFAULT_SHIFT_LIGHT_RPM,
            debug_enabled: false,
            log_flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            wifi_ssid: FixedStr::new(DEFAULT_SSID),
            wifi_password: FixedStr::new(DEFAULT_PASSWORD),
        }
    }

    /// Enforces §3's range constraints. Non-fatal at load time (the caller
    /// substitutes defaults on failure); fatal at save time (the caller
    /// refuses to write).
    pub fn validate(&self) -> bool {
        self.ecu_id <= 15
            && (1..=1000).contains(&self.request_interval_ms)
            && self.max_pending_requests >= 1
            && (10..=100).contains(&self.shift_light_rpm_threshold)
            && !self.wifi_ssid.is_empty()
            && self.wifi_ssid.len() <= SSID_MAX_LEN
            && self.wifi_password.len() >= 8
            && self.wifi_password.len() <= PASSWORD_MAX_LEN
    }

    /// Serializes every field but the checksum into a fixed-size byte
    /// array, in a stable field order, for checksum computation. This
    /// layout is internal to the checksum calculation; fields are still
    /// stored under individual keys in the backend.
    fn checksum_bytes(&self) -> [u8; CHECKSUM_LEN] {
        let mut out = [0u8; CHECKSUM_LEN];
        let mut i = 0;
        out[i] = self.ecu_id;
        i += 1;
        out[i..i + 2].copy_from_slice(&self.can_speed_kbps.to_le_bytes());
        i += 2;
        out[i..i + 2].copy_from_slice(&self.request_interval_ms.to_le_bytes());
        i += 2;
        out[i] = self.max_pending_requests;
        i += 1;
        out[i] = self.shift_light_rpm_threshold;
        i += 1;
        out[i] = self.debug_enabled as u8;
        i += 1;
        out[i..i + 2].copy_from_slice(&self.log_flush_interval_ms.to_le_bytes());
        i += 2;
        out[i] = self.wifi_ssid.len() as u8;
        i += 1;
        out[i..i + self.wifi_ssid.len()].copy_from_slice(self.wifi_ssid.as_str().as_bytes());
        i += SSID_MAX_LEN;
        out[i] = self.wifi_password.len() as u8;
        i += 1;
        out[i..i + self.wifi_password.len()].copy_from_slice(self.wifi_password.as_str().as_bytes());
        i += PASSWORD_MAX_LEN;
        debug_assert_eq!(i, CHECKSUM_LEN);
        out
    }

    /// XOR checksum over [`ConfigRecord::checksum_bytes`], matching
    /// `configCalculateChecksum`'s byte-at-a-time XOR over
    /// `sizeof(record) - 1` bytes.
    pub fn checksum(&self) -> u8 {
        self.checksum_bytes().iter().fold(0u8, |acc, &b| acc ^ b)
    }

    /// Loads a record from `backend`, applying defaults for any missing
    /// key. A non-zero stored checksum that disagrees with the freshly
    /// computed one, or a record that fails [`ConfigRecord::validate`],
    /// causes a silent revert to defaults (which are also written back to
    /// `backend`, matching `configResetToDefaults`'s save-after-reset).
    pub fn load<B: ConfigBackend>(backend: &mut B) -> Self {
        let mut record = Self::defaults();
        record.ecu_id = read_u8(backend, KEY_ECU_ID, DEFAULT_ECU_ID);
        record.can_speed_kbps = read_u16(backend, KEY_CAN_SPEED, DEFAULT_CAN_SPEED_KBPS);
        record.request_interval_ms =
            read_u16(backend, KEY_REQUEST_INTERVAL, DEFAULT_REQUEST_INTERVAL_MS);
        record.max_pending_requests =
            read_u8(backend, KEY_MAX_PENDING, DEFAULT_MAX_PENDING_REQUESTS);
        record.shift_light_rpm_threshold =
            read_u8(backend, KEY_SHIFT_RPM, DEFAULT_SHIFT_LIGHT_RPM);
        record.debug_enabled = read_u8(backend, KEY_DEBUG, 0) != 0;
        record.log_flush_interval_ms =
            read_u16(backend, KEY_FLUSH_INTERVAL, DEFAULT_FLUSH_INTERVAL_MS);
        record.wifi_ssid = read_str(backend, KEY_SSID, DEFAULT_SSID);
        record.wifi_password = read_str(backend, KEY_PASSWORD, DEFAULT_PASSWORD);

        let stored_checksum = read_u8(backend, KEY_CHECKSUM, 0);
        let calculated = record.checksum();
        if stored_checksum != 0 && stored_checksum != calculated {
            let defaults = Self::defaults();
            let _ = defaults.save(backend);
            return defaults;
        }
        if !record.validate() {
            let defaults = Self::defaults();
            let _ = defaults.save(backend);
            return defaults;
        }
        record
    }

    /// Validates and writes every field plus the checksum to `backend`.
    /// Fails without writing anything if the record does not validate.
    pub fn save<B: ConfigBackend>(&self, backend: &mut B) -> Result<(), SaveError<B::Error>> {
        if !self.validate() {
            return Err(SaveError::Invalid);
        }
        write_u8(backend, KEY_ECU_ID, self.ecu_id)?;
        write_u16(backend, KEY_CAN_SPEED, self.can_speed_kbps)?;
        write_u16(backend, KEY_REQUEST_INTERVAL, self.request_interval_ms)?;
        write_u8(backend, KEY_MAX_PENDING, self.max_pending_requests)?;
        write_u8(backend, KEY_SHIFT_RPM, self.shift_light_rpm_threshold)?;
        write_u8(backend, KEY_DEBUG, self.debug_enabled as u8)?;
        write_u16(backend, KEY_FLUSH_INTERVAL, self.log_flush_interval_ms)?;
        backend
            .write(KEY_SSID, self.wifi_ssid.as_str().as_bytes())
            .map_err(SaveError::Backend)?;
        backend
            .write(KEY_PASSWORD, self.wifi_password.as_str().as_bytes())
            .map_err(SaveError::Backend)?;
        write_u8(backend, KEY_CHECKSUM, self.checksum())?;
        Ok(())
    }
}

/// Errors from [`ConfigRecord::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveError<E> {
    /// The record failed [`ConfigRecord::validate`]; nothing was written.
    Invalid,
    /// The backend rejected a write partway through.
    Backend(E),
}

fn read_u8<B: ConfigBackend>(backend: &mut B, key: &str, default: u8) -> u8 {
    let mut buf = [0u8; 1];
    match backend.read(key, &mut buf) {
        Ok(1) => buf[0],
        _ => default,
    }
}

fn read_u16<B: ConfigBackend>(backend: &mut B, key: &str, default: u16) -> u16 {
    let mut buf = [0u8; 2];
    match backend.read(key, &mut buf) {
        Ok(2) => u16::from_le_bytes(buf),
        _ => default,
    }
}

fn read_str<B: ConfigBackend, const N: usize>(
    backend: &mut B,
    key: &str,
    default: &str,
) -> FixedStr<N> {
    let mut buf = [0u8; N];
    match backend.read(key, &mut buf) {
        Ok(0) | Err(_) => FixedStr::new(default),
        Ok(n) => FixedStr::new(core::str::from_utf8(&buf[..n]).unwrap_or(default)),
    }
}

fn write_u8<B: ConfigBackend>(backend: &mut B, key: &str, value: u8) -> Result<(), SaveError<B::Error>> {
    backend.write(key, &[value]).map_err(SaveError::Backend)
}

fn write_u16<B: ConfigBackend>(backend: &mut B, key: &str, value: u16) -> Result<(), SaveError<B::Error>> {
    backend
        .write(key, &value.to_le_bytes())
        .map_err(SaveError::Backend)
}

#[cfg(test)]
mod test {
    use super::*;

    /// A tiny fixed-capacity key-value store standing in for a real
    /// flash/EEPROM-backed [`ConfigBackend`] in tests.
    struct MapBackend {
        keys: [&'static str; 10],
        values: [[u8; 64]; 10],
        lens: [usize; 10],
        count: usize,
    }

    impl MapBackend {
        fn new() -> Self {
            Self {
                keys: [""; 10],
                values: [[0u8; 64]; 10],
                lens: [0; 10],
                count: 0,
            }
        }

        /// Maps a key to its known `'static` spelling. The config module
        /// only ever reads/writes its own fixed key constants, so a fixed
        /// lookup table avoids needing an allocator to own arbitrary keys.
        fn static_key(key: &str) -> &'static str {
            [
                KEY_ECU_ID,
                KEY_CAN_SPEED,
                KEY_REQUEST_INTERVAL,
                KEY_MAX_PENDING,
                KEY_SHIFT_RPM,
                KEY_DEBUG,
                KEY_FLUSH_INTERVAL,
                KEY_SSID,
                KEY_PASSWORD,
                KEY_CHECKSUM,
            ]
            .into_iter()
            .find(|k| *k == key)
            .expect("test backend only sees config module keys")
        }

        fn slot(&mut self, key: &str) -> usize {
            let key = Self::static_key(key);
            if let Some(i) = self.keys[..self.count].iter().position(|k| *k == key) {
                return i;
            }
            let i = self.count;
            self.keys[i] = key;
            self.count += 1;
            i
        }
    }

    impl ConfigBackend for MapBackend {
        type Error = ();

        fn read(&mut self, key: &str, buf: &mut [u8]) -> Result<usize, ()> {
            let key = Self::static_key(key);
            match self.keys[..self.count].iter().position(|k| *k == key) {
                Some(i) => {
                    let n = self.lens[i].min(buf.len());
                    buf[..n].copy_from_slice(&self.values[i][..n]);
                    Ok(n)
                }
                None => Ok(0),
            }
        }

        fn write(&mut self, key: &str, bytes: &[u8]) -> Result<(), ()> {
            let i = self.slot(key);
            self.values[i][..bytes.len()].copy_from_slice(bytes);
            self.lens[i] = bytes.len();
            Ok(())
        }
    }

    #[test]
    fn missing_keys_load_as_defaults() {
        let mut backend = MapBackend::new();
        let record = ConfigRecord::load(&mut backend);
        assert_eq!(record.ecu_id, DEFAULT_ECU_ID);
        assert_eq!(record.wifi_ssid.as_str(), DEFAULT_SSID);
        assert_eq!(record.wifi_password.as_str(), DEFAULT_PASSWORD);
    }

    #[test]
    fn save_then_load_round_trips() {
        let mut backend = MapBackend::new();
        let mut record = ConfigRecord::defaults();
        record.ecu_id = 7;
        record.can_speed_kbps = 250;
        record.wifi_ssid = FixedStr::new("MyCar");
        record.save(&mut backend).unwrap();

        let loaded = ConfigRecord::load(&mut backend);
        assert_eq!(loaded.ecu_id, 7);
        assert_eq!(loaded.can_speed_kbps, 250);
        assert_eq!(loaded.wifi_ssid.as_str(), "MyCar");
    }

    #[test]
    fn corrupted_checksum_reverts_to_defaults() {
        let mut backend = MapBackend::new();
        let mut record = ConfigRecord::defaults();
        record.ecu_id = 7;
        record.save(&mut backend).unwrap();

        // Corrupt the stored checksum.
        backend.write(KEY_CHECKSUM, &[0xAB]).unwrap();

        let loaded = ConfigRecord::load(&mut backend);
        assert_eq!(loaded.ecu_id, DEFAULT_ECU_ID);
        // The revert rewrites the backend too.
        let reloaded = ConfigRecord::load(&mut backend);
        assert_eq!(reloaded.ecu_id, DEFAULT_ECU_ID);
    }

    #[test]
    fn out_of_range_value_is_rejected_by_validate() {
        let mut record = ConfigRecord::defaults();
        record.ecu_id = 16;
        assert!(!record.validate());
    }

    #[test]
    fn save_refuses_invalid_record() {
        let mut backend = MapBackend::new();
        let mut record = ConfigRecord::defaults();
        record.request_interval_ms = 0;
        assert_eq!(record.save(&mut backend), Err(SaveError::Invalid));
    }

    #[test]
    fn checksum_changes_when_a_field_changes() {
        let a = ConfigRecord::defaults();
        let mut b = ConfigRecord::defaults();
        b.ecu_id = 2;
        assert_ne!(a.checksum(), b.checksum());
    }
}
