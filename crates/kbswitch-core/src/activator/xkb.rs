// XKB Layout Backend
//
// Activates layouts through setxkbmap. Layout ids are mapped to XKB
// layout/variant names by configuration; a layout counts as installed
// when its names appear in the XKB rules list.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use parking_lot::RwLock;

use super::backend::{BackendError, LayoutBackend};
use crate::layout::{InstalledLayout, LayoutId};

/// Default XKB rules list shipped by xkeyboard-config
pub const DEFAULT_RULES_LIST: &str = "/usr/share/X11/xkb/rules/evdev.lst";

/// XKB names for one configured layout id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XkbLayout {
    pub id: LayoutId,
    /// XKB layout name (e.g., "us")
    pub layout: String,
    /// XKB variant name (e.g., "dvorak"), None for the base layout
    pub variant: Option<String>,
}

impl XkbLayout {
    pub fn new(id: LayoutId, layout: impl Into<String>, variant: Option<String>) -> Self {
        Self {
            id,
            layout: layout.into(),
            variant: variant.filter(|v| !v.is_empty()),
        }
    }

    /// XKB names for the builtin catalog layouts
    pub fn builtin() -> Vec<XkbLayout> {
        BUILTIN_XKB_NAMES
            .iter()
            .map(|(id, layout, variant)| {
                XkbLayout::new(LayoutId(*id), *layout, variant.map(str::to_string))
            })
            .collect()
    }

    fn matches(&self, layout: &str, variant: Option<&str>) -> bool {
        self.layout == layout && self.variant.as_deref() == variant
    }
}

// Builtin entries: (layout id, XKB layout, XKB variant)
const BUILTIN_XKB_NAMES: &[(u32, &str, Option<&str>)] = &[
    (0x0409_0409, "us", None),
    (0xF002_0409, "us", Some("dvorak")),
    (0x040C_040C, "fr", None),
    (0x0407_0407, "de", None),
    (0x040A_040A, "es", None),
    (0x0419_0419, "ru", None),
    (0x0422_0422, "ua", None),
];

/// Overlay `configured` names on `base`.
///
/// Configured entries come first, in their own order, and replace any
/// base entry with the same layout id.
pub fn merge_xkb_layouts(base: Vec<XkbLayout>, configured: Vec<XkbLayout>) -> Vec<XkbLayout> {
    let mut merged = configured;
    for layout in base {
        if !merged.iter().any(|m| m.id == layout.id) {
            merged.push(layout);
        }
    }
    merged
}

/// Layout and variant names known to the XKB rules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XkbRules {
    layouts: HashSet<String>,
    variants: HashSet<(String, String)>,
    descriptions: Vec<((String, Option<String>), String)>,
}

impl XkbRules {
    /// Parse an `evdev.lst` style rules list
    pub fn parse(content: &str) -> Self {
        let mut rules = Self::default();
        let mut section = "";

        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(name) = trimmed.strip_prefix('!') {
                section = match name.trim() {
                    "layout" => "layout",
                    "variant" => "variant",
                    _ => "",
                };
                continue;
            }

            let mut parts = trimmed.splitn(2, char::is_whitespace);
            let name = parts.next().unwrap_or_default().to_string();
            let rest = parts.next().unwrap_or_default().trim();

            match section {
                "layout" => {
                    rules
                        .descriptions
                        .push(((name.clone(), None), rest.to_string()));
                    rules.layouts.insert(name);
                }
                "variant" => {
                    // "dvorak          us: English (Dvorak)"
                    if let Some((layout, description)) = rest.split_once(':') {
                        let layout = layout.trim().to_string();
                        rules.descriptions.push((
                            (layout.clone(), Some(name.clone())),
                            description.trim().to_string(),
                        ));
                        rules.variants.insert((layout, name));
                    }
                }
                _ => {}
            }
        }
        rules
    }

    pub fn from_file(path: &Path) -> Result<Self, BackendError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BackendError::QueryFailed(format!("{}: {}", path.display(), e))
        })?;
        Ok(Self::parse(&content))
    }

    pub fn contains(&self, layout: &XkbLayout) -> bool {
        match &layout.variant {
            None => self.layouts.contains(&layout.layout),
            Some(variant) => self
                .variants
                .contains(&(layout.layout.clone(), variant.clone())),
        }
    }

    pub fn description(&self, layout: &XkbLayout) -> Option<&str> {
        self.descriptions
            .iter()
            .find(|((l, v), _)| layout.matches(l, v.as_deref()))
            .map(|(_, d)| d.as_str())
    }
}

/// Parse `setxkbmap -query` output into the first layout group
pub fn parse_query(output: &str) -> Option<(String, Option<String>)> {
    let mut layout = None;
    let mut variant = None;

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let first = value.trim().split(',').next().unwrap_or_default().trim();
        match key.trim() {
            "layout" if !first.is_empty() => layout = Some(first.to_string()),
            "variant" if !first.is_empty() => variant = Some(first.to_string()),
            _ => {}
        }
    }

    layout.map(|l| (l, variant))
}

/// Layout backend driving the X keyboard extension with `setxkbmap`.
///
/// The id-to-XKB name table can be swapped on configuration reload.
pub struct XkbBackend {
    layouts: RwLock<Vec<XkbLayout>>,
    rules_path: PathBuf,
    program: String,
}

impl XkbBackend {
    pub fn new(layouts: Vec<XkbLayout>) -> Self {
        Self {
            layouts: RwLock::new(layouts),
            rules_path: PathBuf::from(DEFAULT_RULES_LIST),
            program: "setxkbmap".to_string(),
        }
    }

    pub fn with_rules_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.rules_path = path.into();
        self
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn layouts(&self) -> Vec<XkbLayout> {
        self.layouts.read().clone()
    }

    /// Replace the configured XKB names; handles from earlier
    /// enumerations stop resolving until the caller re-enumerates
    pub fn set_layouts(&self, layouts: Vec<XkbLayout>) {
        *self.layouts.write() = layouts;
    }

    fn run(&self, args: &[&str]) -> Result<String, BackendError> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| BackendError::QueryFailed(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(BackendError::Rejected(format!(
                "{} exited with {:?}: {}",
                self.program,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl LayoutBackend for XkbBackend {
    fn installed_layouts(&self) -> Result<Vec<InstalledLayout>, BackendError> {
        let rules = XkbRules::from_file(&self.rules_path)?;

        Ok(self
            .layouts
            .read()
            .iter()
            .enumerate()
            .filter(|(_, layout)| rules.contains(layout))
            .map(|(index, layout)| {
                let installed = InstalledLayout::new(layout.id).with_handle(index as u64);
                match rules.description(layout) {
                    Some(description) => installed.with_name(description),
                    None => installed,
                }
            })
            .collect())
    }

    fn focused_layout(&self) -> Option<LayoutId> {
        let output = match self.run(&["-query"]) {
            Ok(output) => output,
            Err(e) => {
                log::debug!("Could not query XKB layout: {}", e);
                return None;
            }
        };
        let (layout, variant) = parse_query(&output)?;
        self.layouts
            .read()
            .iter()
            .find(|l| l.matches(&layout, variant.as_deref()))
            .map(|l| l.id)
    }

    fn activate(&self, layout: &InstalledLayout) -> Result<(), BackendError> {
        let xkb = usize::try_from(layout.handle)
            .ok()
            .and_then(|index| self.layouts.read().get(index).cloned())
            .filter(|xkb| xkb.id == layout.id)
            .ok_or_else(|| {
                BackendError::Rejected(format!("no XKB names for layout {}", layout.id))
            })?;

        let mut args = vec!["-layout", xkb.layout.as_str()];
        if let Some(variant) = &xkb.variant {
            args.push("-variant");
            args.push(variant.as_str());
        }
        self.run(&args).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{resolve, LanguageFallback};
    use std::io::Write;

    const RULES: &str = "\
! model
  pc105           Generic 105-key PC

! layout
  us              English (US)
  fr              French

! variant
  dvorak          us: English (Dvorak)
  bepo            fr: French (BEPO)

! option
  grp             Switching to another layout
";

    const US: LayoutId = LayoutId(0x0409_0409);
    const US_DVORAK: LayoutId = LayoutId(0xF002_0409);
    const GERMAN: LayoutId = LayoutId(0x0407_0407);

    fn layouts() -> Vec<XkbLayout> {
        vec![
            XkbLayout::new(US, "us", None),
            XkbLayout::new(US_DVORAK, "us", Some("dvorak".to_string())),
            XkbLayout::new(GERMAN, "de", None),
        ]
    }

    #[test]
    fn test_parse_rules() {
        let rules = XkbRules::parse(RULES);
        assert!(rules.contains(&XkbLayout::new(US, "us", None)));
        assert!(rules.contains(&XkbLayout::new(US, "fr", Some("bepo".to_string()))));
        assert!(!rules.contains(&XkbLayout::new(US, "de", None)));
        assert!(!rules.contains(&XkbLayout::new(US, "pc105", None)));
        assert!(!rules.contains(&XkbLayout::new(US, "us", Some("colemak".to_string()))));
    }

    #[test]
    fn test_rules_description() {
        let rules = XkbRules::parse(RULES);
        let dvorak = XkbLayout::new(US_DVORAK, "us", Some("dvorak".to_string()));
        assert_eq!(rules.description(&dvorak), Some("English (Dvorak)"));
    }

    #[test]
    fn test_empty_variant_is_base_layout() {
        let layout = XkbLayout::new(US, "us", Some(String::new()));
        assert_eq!(layout.variant, None);
    }

    #[test]
    fn test_parse_query() {
        let output = "rules:      evdev\nmodel:      pc105\nlayout:     us,fr\nvariant:    dvorak,\n";
        assert_eq!(
            parse_query(output),
            Some(("us".to_string(), Some("dvorak".to_string())))
        );

        let output = "rules:      evdev\nlayout:     de\n";
        assert_eq!(parse_query(output), Some(("de".to_string(), None)));

        assert_eq!(parse_query("rules: evdev\n"), None);
    }

    #[test]
    fn test_installed_layouts_from_rules_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(RULES.as_bytes()).unwrap();

        let backend = XkbBackend::new(layouts()).with_rules_path(file.path());
        let installed = backend.installed_layouts().unwrap();

        let ids: Vec<LayoutId> = installed.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![US, US_DVORAK]);
        assert_eq!(installed[1].handle, 1);
        assert_eq!(installed[1].name.as_deref(), Some("English (Dvorak)"));
    }

    #[test]
    fn test_missing_rules_file() {
        let backend = XkbBackend::new(layouts()).with_rules_path("/nonexistent/evdev.lst");
        assert!(matches!(
            backend.installed_layouts(),
            Err(BackendError::QueryFailed(_))
        ));
    }

    #[test]
    fn test_activate_unknown_handle_rejected() {
        let backend = XkbBackend::new(layouts()).with_program("/nonexistent/setxkbmap");
        let bogus = InstalledLayout::new(US).with_handle(42);
        assert!(matches!(
            backend.activate(&bogus),
            Err(BackendError::Rejected(_))
        ));
    }

    #[test]
    fn test_set_layouts_invalidates_stale_handles() {
        let backend = XkbBackend::new(layouts()).with_program("/nonexistent/setxkbmap");
        backend.set_layouts(vec![XkbLayout::new(GERMAN, "de", None)]);
        assert_eq!(backend.layouts().len(), 1);

        // Handle 1 was US Dvorak before the swap
        let stale = InstalledLayout::new(US_DVORAK).with_handle(1);
        assert!(matches!(
            backend.activate(&stale),
            Err(BackendError::Rejected(_))
        ));
    }

    #[test]
    fn test_builtin_names_cover_default_install() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(RULES.as_bytes()).unwrap();

        let backend = XkbBackend::new(XkbLayout::builtin()).with_rules_path(file.path());
        let installed = backend.installed_layouts().unwrap();

        let ids: Vec<LayoutId> = installed.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![US, US_DVORAK, LayoutId(0x040C_040C)]);
        assert_eq!(
            resolve(&installed, US, LanguageFallback::Disabled).map(|l| l.id),
            Some(US)
        );
    }

    #[test]
    fn test_merge_configured_names_override_builtin() {
        let configured = vec![
            XkbLayout::new(US_DVORAK, "us", Some("dvp".to_string())),
            XkbLayout::new(LayoutId(0xF00D_0409), "us", Some("colemak".to_string())),
        ];
        let merged = merge_xkb_layouts(XkbLayout::builtin(), configured.clone());

        assert_eq!(&merged[..2], &configured[..]);
        assert_eq!(merged.iter().filter(|l| l.id == US_DVORAK).count(), 1);
        assert!(merged.contains(&XkbLayout::new(GERMAN, "de", None)));
        assert_eq!(merged.len(), BUILTIN_XKB_NAMES.len() + 1);
    }

    #[test]
    fn test_missing_program_is_query_failure() {
        let backend = XkbBackend::new(layouts()).with_program("/nonexistent/setxkbmap");
        assert_eq!(backend.focused_layout(), None);

        let us = InstalledLayout::new(US).with_handle(0);
        assert!(matches!(
            backend.activate(&us),
            Err(BackendError::QueryFailed(_))
        ));
    }
}
