// Kbswitch Device Layer - Fingerprints
// Vendor/product matching against OS device instance paths

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::layout::LayoutId;

// Instance paths look like `USB\VID_1E54&PID_2030\5&2A7B1C4&0&3`
static INSTANCE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^USB\\VID_([0-9A-F]{4})&PID_([0-9A-F]{4})(?:\\(.*))?$")
        .expect("instance path pattern is valid")
});

/// Error parsing a device fingerprint
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FingerprintError {
    #[error("Invalid vendor id: {0}")]
    InvalidVendorId(String),

    #[error("Invalid product id: {0}")]
    InvalidProductId(String),
}

/// USB vendor/product pair identifying a class of device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceFingerprint {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceFingerprint {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }

    /// Parse a fingerprint from two 4-hex-digit strings (e.g. "1E54", "2030")
    pub fn parse(vendor_id: &str, product_id: &str) -> Result<Self, FingerprintError> {
        let vendor = parse_hex4(vendor_id)
            .ok_or_else(|| FingerprintError::InvalidVendorId(vendor_id.to_string()))?;
        let product = parse_hex4(product_id)
            .ok_or_else(|| FingerprintError::InvalidProductId(product_id.to_string()))?;
        Ok(Self::new(vendor, product))
    }

    /// Instance path prefix this fingerprint matches: `USB\VID_xxxx&PID_yyyy\`
    pub fn instance_prefix(&self) -> String {
        format!("USB\\VID_{:04X}&PID_{:04X}\\", self.vendor_id, self.product_id)
    }

    /// Full instance path for one attached device of this kind
    pub fn instance_path(&self, instance: &str) -> String {
        format!("{}{}", self.instance_prefix(), instance)
    }

    /// Check whether an OS device instance path belongs to this device
    pub fn matches_path(&self, instance_path: &str) -> bool {
        let prefix = self.instance_prefix();
        instance_path.len() >= prefix.len()
            && instance_path.is_char_boundary(prefix.len())
            && instance_path[..prefix.len()].eq_ignore_ascii_case(&prefix)
    }

    /// Extract the fingerprint from an instance path, if it is a USB path
    pub fn from_instance_path(instance_path: &str) -> Option<Self> {
        let captures = INSTANCE_PATH.captures(instance_path.trim())?;
        let vendor = u16::from_str_radix(captures.get(1)?.as_str(), 16).ok()?;
        let product = u16::from_str_radix(captures.get(2)?.as_str(), 16).ok()?;
        Some(Self::new(vendor, product))
    }
}

impl fmt::Display for DeviceFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}:{:04X}", self.vendor_id, self.product_id)
    }
}

fn parse_hex4(s: &str) -> Option<u16> {
    let trimmed = s.trim();
    if trimmed.len() != 4 {
        return None;
    }
    u16::from_str_radix(trimmed, 16).ok()
}

/// A configured device and the layout to use while it is attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMapping {
    /// Display name (e.g., "Kinesis Advantage2")
    pub name: String,
    pub fingerprint: DeviceFingerprint,
    /// Layout to activate while the device is present
    pub layout: LayoutId,
}

impl DeviceMapping {
    pub fn new(name: impl Into<String>, fingerprint: DeviceFingerprint, layout: LayoutId) -> Self {
        Self {
            name: name.into(),
            fingerprint,
            layout,
        }
    }
}

/// First mapping, in configured order, with a device among `instance_paths`.
///
/// When several configured devices are attached the earliest configured
/// one wins, so the result never depends on enumeration order.
pub fn first_connected<'a>(
    mappings: &'a [DeviceMapping],
    instance_paths: &[String],
) -> Option<&'a DeviceMapping> {
    mappings.iter().find(|mapping| {
        instance_paths
            .iter()
            .any(|path| mapping.fingerprint.matches_path(path))
    })
}

/// Device presence as observed by one query, poll or event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub connected: bool,
    pub mapping: Option<DeviceMapping>,
}

impl ConnectionState {
    pub fn connected(mapping: DeviceMapping) -> Self {
        Self {
            connected: true,
            mapping: Some(mapping),
        }
    }

    pub fn disconnected() -> Self {
        Self::default()
    }

    /// Name of the matched device, if any
    pub fn device_name(&self) -> Option<&str> {
        self.mapping.as_ref().map(|m| m.name.as_str())
    }
}

impl From<Option<DeviceMapping>> for ConnectionState {
    fn from(mapping: Option<DeviceMapping>) -> Self {
        match mapping {
            Some(m) => Self::connected(m),
            None => Self::disconnected(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinesis() -> DeviceMapping {
        DeviceMapping::new(
            "Kinesis",
            DeviceFingerprint::new(0x1E54, 0x2030),
            LayoutId(0xF002_0409),
        )
    }

    #[test]
    fn test_parse_fingerprint() {
        let fp = DeviceFingerprint::parse("1E54", "2030").unwrap();
        assert_eq!(fp, DeviceFingerprint::new(0x1E54, 0x2030));

        let lower = DeviceFingerprint::parse("1e54", "2030").unwrap();
        assert_eq!(lower, fp);
    }

    #[test]
    fn test_parse_fingerprint_errors() {
        assert_eq!(
            DeviceFingerprint::parse("1E5", "2030"),
            Err(FingerprintError::InvalidVendorId("1E5".to_string()))
        );
        assert_eq!(
            DeviceFingerprint::parse("1E54", "ZZZZ"),
            Err(FingerprintError::InvalidProductId("ZZZZ".to_string()))
        );
    }

    #[test]
    fn test_instance_prefix() {
        let fp = DeviceFingerprint::new(0x1E54, 0x2030);
        assert_eq!(fp.instance_prefix(), "USB\\VID_1E54&PID_2030\\");
    }

    #[test]
    fn test_instance_path_round_trip_through_matching() {
        let fp = DeviceFingerprint::new(0x29EA, 0x0102);
        let path = fp.instance_path("1-4.2");
        assert_eq!(path, "USB\\VID_29EA&PID_0102\\1-4.2");
        assert!(fp.matches_path(&path));
        assert_eq!(DeviceFingerprint::from_instance_path(&path), Some(fp));
    }

    #[test]
    fn test_matches_path() {
        let fp = DeviceFingerprint::new(0x1E54, 0x2030);
        assert!(fp.matches_path("USB\\VID_1E54&PID_2030\\5&2A7B1C4&0&3"));
        assert!(fp.matches_path("usb\\vid_1e54&pid_2030\\abc"));
        assert!(!fp.matches_path("USB\\VID_1E54&PID_2031\\abc"));
        assert!(!fp.matches_path("HID\\VID_1E54&PID_2030\\abc"));
        // Interface paths carry a suffix after the product id
        assert!(!fp.matches_path("USB\\VID_1E54&PID_2030&MI_00\\abc"));
        assert!(!fp.matches_path("USB\\VID_1E54"));
    }

    #[test]
    fn test_from_instance_path() {
        assert_eq!(
            DeviceFingerprint::from_instance_path("USB\\VID_046D&PID_C52B\\6&1"),
            Some(DeviceFingerprint::new(0x046D, 0xC52B))
        );
        assert_eq!(
            DeviceFingerprint::from_instance_path("USB\\VID_046D&PID_C52B"),
            Some(DeviceFingerprint::new(0x046D, 0xC52B))
        );
        assert_eq!(DeviceFingerprint::from_instance_path("PCI\\VEN_8086"), None);
    }

    #[test]
    fn test_first_connected_uses_configured_order() {
        let other = DeviceMapping::new(
            "Other",
            DeviceFingerprint::new(0x046D, 0xC52B),
            LayoutId(0x040C_040C),
        );
        let mappings = vec![kinesis(), other.clone()];
        // Enumeration lists the second device first
        let paths = vec![
            "USB\\VID_046D&PID_C52B\\1".to_string(),
            "USB\\VID_1E54&PID_2030\\2".to_string(),
        ];
        assert_eq!(first_connected(&mappings, &paths), Some(&mappings[0]));

        let paths = vec!["USB\\VID_046D&PID_C52B\\1".to_string()];
        assert_eq!(first_connected(&mappings, &paths), Some(&other));

        assert_eq!(first_connected(&mappings, &[]), None);
    }

    #[test]
    fn test_connection_state_from_mapping() {
        let state = ConnectionState::from(Some(kinesis()));
        assert!(state.connected);
        assert_eq!(state.device_name(), Some("Kinesis"));

        let state = ConnectionState::from(None);
        assert_eq!(state, ConnectionState::disconnected());
        assert_eq!(state.device_name(), None);
    }
}
