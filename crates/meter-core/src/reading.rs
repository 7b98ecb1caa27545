//! Normalized meter reading.

/// Upper bound on stored OBIS strings per telegram.
pub const MAX_OBIS_STRINGS: usize = 36;
/// Upper bound on the length of one OBIS string in bytes.
pub const MAX_OBIS_STRING_LEN: usize = 36;
/// Upper bound on the device identifier in bytes.
pub const MAX_DEVICE_ID_LEN: usize = 32;

/// One decoded telegram: device id, telegram timestamp, and the ordered
/// OBIS value strings. Append-only until it is handed to the uplink queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reading {
    device_id: String,
    timestamp: Option<i64>,
    obis: Vec<String>,
}

impl Reading {
    pub fn new() -> Self {
        Reading::default()
    }

    /// Set the device identifier, truncating to the 32-byte bound on a
    /// character boundary.
    pub fn set_device_id(&mut self, id: &str) {
        let mut end = id.len().min(MAX_DEVICE_ID_LEN - 1);
        while !id.is_char_boundary(end) {
            end -= 1;
        }
        self.device_id = id[..end].to_owned();
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Telegram timestamp in seconds since the Unix epoch, if decoded.
    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, secs: i64) {
        self.timestamp = Some(secs);
    }

    /// Append a raw OBIS string.
    ///
    /// Returns `false` when the collection is full or the entry exceeds the
    /// per-string bound; the entry is dropped in either case.
    pub fn push_obis(&mut self, line: &str) -> bool {
        if self.obis.len() >= MAX_OBIS_STRINGS || line.len() >= MAX_OBIS_STRING_LEN {
            return false;
        }
        self.obis.push(line.to_owned());
        true
    }

    /// Append a formatted `1-0:C.D.0(value*unit)` entry.
    pub fn push_obis_value(&mut self, obis_c: u8, obis_d: u8, value: f64, unit: &str) -> bool {
        self.push_obis(&format!("1-0:{obis_c}.{obis_d}.0({value:.3}*{unit})"))
    }

    /// The OBIS strings in decoder insertion order.
    pub fn obis(&self) -> &[String] {
        &self.obis
    }

    pub fn is_empty(&self) -> bool {
        self.device_id.is_empty() && self.timestamp.is_none() && self.obis.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_is_truncated_at_bound() {
        let mut r = Reading::new();
        r.set_device_id(&"X".repeat(64));
        assert_eq!(r.device_id().len(), MAX_DEVICE_ID_LEN - 1);
    }

    #[test]
    fn obis_collection_is_bounded() {
        let mut r = Reading::new();
        for i in 0..MAX_OBIS_STRINGS {
            assert!(r.push_obis(&format!("1-0:1.8.{i}(1*kWh)")));
        }
        assert!(!r.push_obis("1-0:2.8.0(1*kWh)"));
        assert_eq!(r.obis().len(), MAX_OBIS_STRINGS);
    }

    #[test]
    fn overlong_obis_entry_is_dropped() {
        let mut r = Reading::new();
        assert!(!r.push_obis(&"y".repeat(MAX_OBIS_STRING_LEN)));
        assert!(r.obis().is_empty());
    }

    #[test]
    fn insertion_order_is_preserved() {
        let mut r = Reading::new();
        r.push_obis("1-0:1.8.0(1*kWh)");
        r.push_obis("1-0:2.8.0(2*kWh)");
        assert_eq!(r.obis()[0], "1-0:1.8.0(1*kWh)");
        assert_eq!(r.obis()[1], "1-0:2.8.0(2*kWh)");
    }
}
