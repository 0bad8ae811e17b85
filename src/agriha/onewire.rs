//! DS18B20 temperature sensors over the Linux 1-wire sysfs interface.
//!
//! Devices appear under `/sys/bus/w1/devices/28-*/temperature` once the
//! ds2482 overlay and the `w1_therm` module are loaded; the file holds
//! millidegrees Celsius (`24500` -> 24.5 °C).

use std::fs;
use std::path::{Path, PathBuf};

use super::errors::{Error, Result};

pub const W1_BASE: &str = "/sys/bus/w1/devices";

pub struct Ds18b20 {
    pub device_id: String,
    temperature_path: PathBuf,
}

impl Ds18b20 {
    pub fn new(device_id: &str) -> Ds18b20 {
        Self::with_base(device_id, Path::new(W1_BASE))
    }

    pub fn with_base(device_id: &str, base: &Path) -> Ds18b20 {
        Ds18b20 {
            device_id: device_id.to_string(),
            temperature_path: base.join(device_id).join("temperature"),
        }
    }

    pub fn read_celsius(&self) -> Result<f64> {
        let raw = fs::read_to_string(&self.temperature_path)?;
        let trimmed = raw.trim();
        let millidegrees: i32 = trimmed
            .parse()
            .map_err(|_| Error::Decode(format!("bad temperature value {:?}", trimmed)))?;
        Ok(f64::from(millidegrees) / 1000.0)
    }

    /// All connected DS18B20 devices (family code 28) that expose a
    /// temperature file.
    pub fn discover() -> Vec<Ds18b20> {
        Self::discover_in(Path::new(W1_BASE))
    }

    pub fn discover_in(base: &Path) -> Vec<Ds18b20> {
        let mut found = Vec::new();
        let entries = match fs::read_dir(base) {
            Ok(entries) => entries,
            Err(_) => return found,
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let device_id = name.to_string_lossy();
            if device_id.starts_with("28-") && entry.path().join("temperature").exists() {
                found.push(Self::with_base(&device_id, base));
            }
        }
        found.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        tracing::debug!("DS18B20 discover: {} devices in {}", found.len(), base.display());
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct TempTree {
        base: PathBuf,
    }

    impl TempTree {
        fn new(tag: &str) -> TempTree {
            let base = std::env::temp_dir().join(format!("agriha-w1-{}-{}", tag, std::process::id()));
            let _ = fs::remove_dir_all(&base);
            fs::create_dir_all(&base).unwrap();
            TempTree { base }
        }

        fn add_device(&self, device_id: &str, contents: &str) {
            let dir = self.base.join(device_id);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("temperature"), contents).unwrap();
        }
    }

    impl Drop for TempTree {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.base);
        }
    }

    #[test]
    fn read_millidegrees() {
        let tree = TempTree::new("read");
        tree.add_device("28-00000de13271", "24500\n");
        let sensor = Ds18b20::with_base("28-00000de13271", &tree.base);
        assert_eq!(sensor.read_celsius().unwrap(), 24.5);
    }

    #[test]
    fn read_negative_value() {
        let tree = TempTree::new("negative");
        tree.add_device("28-0000aaaa0001", "-1250\n");
        let sensor = Ds18b20::with_base("28-0000aaaa0001", &tree.base);
        assert_eq!(sensor.read_celsius().unwrap(), -1.25);
    }

    #[test]
    fn missing_device_is_io_error() {
        let tree = TempTree::new("missing");
        let sensor = Ds18b20::with_base("28-doesnotexist", &tree.base);
        assert!(matches!(sensor.read_celsius(), Err(Error::Io(_))));
    }

    #[test]
    fn garbage_value_is_decode_error() {
        let tree = TempTree::new("garbage");
        tree.add_device("28-0000bbbb0002", "warm\n");
        let sensor = Ds18b20::with_base("28-0000bbbb0002", &tree.base);
        assert!(matches!(sensor.read_celsius(), Err(Error::Decode(_))));
    }

    #[test]
    fn discover_filters_family_and_file() {
        let tree = TempTree::new("discover");
        tree.add_device("28-0000cccc0003", "21000");
        tree.add_device("28-0000cccc0004", "22000");
        // wrong family code, must be skipped
        tree.add_device("10-0000cccc0005", "23000");
        // right family but no temperature file
        fs::create_dir_all(tree.base.join("28-0000cccc0006")).unwrap();

        let found = Ds18b20::discover_in(&tree.base);
        let ids: Vec<&str> = found.iter().map(|d| d.device_id.as_str()).collect();
        assert_eq!(ids, vec!["28-0000cccc0003", "28-0000cccc0004"]);
    }
}
