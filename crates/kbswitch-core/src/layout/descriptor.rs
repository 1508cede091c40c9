// Kbswitch Layout Layer - Descriptors
// Layout identifiers and the layouts reported by the OS

use std::fmt;
use std::str::FromStr;

/// Error parsing a layout identifier string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutIdParseError {
    #[error("Empty layout id")]
    Empty,

    #[error("Invalid layout id: {0}")]
    Invalid(String),
}

/// A 32-bit keyboard layout identifier.
///
/// The high 16 bits select the layout variant (e.g. Dvorak vs. QWERTY),
/// the low 16 bits select the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct LayoutId(pub u32);

impl LayoutId {
    /// Build an id from its variant and language halves
    pub const fn from_parts(variant: u16, language: u16) -> Self {
        Self(((variant as u32) << 16) | language as u32)
    }

    /// Get the raw 32-bit value
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Language id (low 16 bits)
    pub const fn language_id(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// Layout variant id (high 16 bits)
    pub const fn variant_id(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Check whether two ids share the same language
    pub fn same_language(self, other: LayoutId) -> bool {
        self.language_id() == other.language_id()
    }
}

impl From<u32> for LayoutId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for LayoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

impl FromStr for LayoutId {
    type Err = LayoutIdParseError;

    /// Parse "0x00010409", "00010409" or "409" (hex)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(LayoutIdParseError::Empty);
        }

        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if digits.is_empty() || digits.len() > 8 {
            return Err(LayoutIdParseError::Invalid(trimmed.to_string()));
        }

        u32::from_str_radix(digits, 16)
            .map(LayoutId)
            .map_err(|_| LayoutIdParseError::Invalid(trimmed.to_string()))
    }
}

/// One known keyboard layout, as configured.
///
/// Descriptors are created when the configuration is loaded and are
/// replaced wholesale on reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutDescriptor {
    /// Locale tag (e.g., "en-US")
    pub culture: String,
    /// Full 32-bit layout id
    pub layout_id: LayoutId,
    /// Human readable name shown in notifications
    pub display_name: String,
    /// Whether a layout with the same language but another variant
    /// may stand in when this exact layout is not installed
    pub allow_language_fallback: bool,
}

impl LayoutDescriptor {
    /// Create a descriptor that allows language fallback
    pub fn new(
        culture: impl Into<String>,
        layout_id: LayoutId,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            culture: culture.into(),
            layout_id,
            display_name: display_name.into(),
            allow_language_fallback: true,
        }
    }

    /// Set the language fallback policy
    pub fn with_language_fallback(mut self, allowed: bool) -> Self {
        self.allow_language_fallback = allowed;
        self
    }

    /// Language id of this layout
    pub fn language_id(&self) -> u16 {
        self.layout_id.language_id()
    }
}

/// A layout actually installed on the running system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledLayout {
    /// Layout id as reported by the OS
    pub id: LayoutId,
    /// Opaque backend handle used for activation
    pub handle: u64,
    /// OS name of the layout, if known
    pub name: Option<String>,
}

impl InstalledLayout {
    /// Create an installed layout whose handle is its raw id
    pub fn new(id: LayoutId) -> Self {
        Self {
            id,
            handle: id.raw() as u64,
            name: None,
        }
    }

    /// Set the backend handle
    pub fn with_handle(mut self, handle: u64) -> Self {
        self.handle = handle;
        self
    }

    /// Set the OS name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_id_parts() {
        let dvorak = LayoutId(0xF002_0409);
        assert_eq!(dvorak.language_id(), 0x0409);
        assert_eq!(dvorak.variant_id(), 0xF002);
        assert_eq!(LayoutId::from_parts(0xF002, 0x0409), dvorak);
    }

    #[test]
    fn test_layout_id_same_language() {
        assert!(LayoutId(0x0409_0409).same_language(LayoutId(0xF002_0409)));
        assert!(!LayoutId(0x0409_0409).same_language(LayoutId(0x040C_040C)));
    }

    #[test]
    fn test_layout_id_parse() {
        assert_eq!("0x00010409".parse::<LayoutId>(), Ok(LayoutId(0x0001_0409)));
        assert_eq!("F0020409".parse::<LayoutId>(), Ok(LayoutId(0xF002_0409)));
        assert_eq!(" 409 ".parse::<LayoutId>(), Ok(LayoutId(0x409)));
    }

    #[test]
    fn test_layout_id_parse_errors() {
        assert_eq!("".parse::<LayoutId>(), Err(LayoutIdParseError::Empty));
        assert_eq!(
            "0x".parse::<LayoutId>(),
            Err(LayoutIdParseError::Invalid("0x".to_string()))
        );
        assert!("0x1234567890".parse::<LayoutId>().is_err());
        assert!("hello".parse::<LayoutId>().is_err());
    }

    #[test]
    fn test_layout_id_display() {
        assert_eq!(LayoutId(0x409).to_string(), "00000409");
        assert_eq!(LayoutId(0xF002_0409).to_string(), "F0020409");
    }

    #[test]
    fn test_descriptor_defaults_allow_fallback() {
        let desc = LayoutDescriptor::new("en-US", LayoutId(0x0409_0409), "English (US)");
        assert!(desc.allow_language_fallback);
        assert_eq!(desc.language_id(), 0x0409);

        let strict = desc.with_language_fallback(false);
        assert!(!strict.allow_language_fallback);
    }

    #[test]
    fn test_installed_layout_builder() {
        let layout = InstalledLayout::new(LayoutId(0x0409_0409))
            .with_handle(7)
            .with_name("US");
        assert_eq!(layout.handle, 7);
        assert_eq!(layout.name.as_deref(), Some("US"));
    }
}
