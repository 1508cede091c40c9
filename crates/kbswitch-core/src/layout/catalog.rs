// Kbswitch Layout Layer - Catalog
// Known layouts and the two-tier resolution against installed layouts

use super::descriptor::{InstalledLayout, LayoutDescriptor, LayoutId};

/// Whether resolution may fall back to a same-language layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageFallback {
    Allowed,
    Disabled,
}

impl From<bool> for LanguageFallback {
    fn from(allowed: bool) -> Self {
        if allowed {
            LanguageFallback::Allowed
        } else {
            LanguageFallback::Disabled
        }
    }
}

/// Resolve a target layout id against the installed layouts.
///
/// 1. Exact match on the full 32-bit id, so the right variant wins.
/// 2. If allowed, first installed layout with the same language id.
/// 3. Otherwise `None`. Callers must never activate an unrelated layout.
pub fn resolve(
    installed: &[InstalledLayout],
    target: LayoutId,
    fallback: LanguageFallback,
) -> Option<&InstalledLayout> {
    if let Some(exact) = installed.iter().find(|layout| layout.id == target) {
        return Some(exact);
    }

    match fallback {
        LanguageFallback::Allowed => installed
            .iter()
            .find(|layout| layout.id.same_language(target)),
        LanguageFallback::Disabled => None,
    }
}

// Builtin entries: (culture, layout id, display name)
const BUILTIN_LAYOUTS: &[(&str, u32, &str)] = &[
    ("en-US", 0x0409_0409, "English (US)"),
    ("en-US", 0xF002_0409, "English (US, Dvorak)"),
    ("fr-FR", 0x040C_040C, "French"),
    ("de-DE", 0x0407_0407, "German"),
    ("es-ES", 0x040A_040A, "Spanish"),
    ("ru-RU", 0x0419_0419, "Russian"),
    ("uk-UA", 0x0422_0422, "Ukrainian"),
];

/// Immutable table of known layouts.
///
/// Built once from configuration; lookups never mutate it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutCatalog {
    entries: Vec<LayoutDescriptor>,
}

impl LayoutCatalog {
    /// Create a catalog from descriptors.
    ///
    /// Later duplicates of the same id are ignored.
    pub fn new(descriptors: Vec<LayoutDescriptor>) -> Self {
        let mut entries: Vec<LayoutDescriptor> = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if entries.iter().any(|e| e.layout_id == descriptor.layout_id) {
                log::warn!(
                    "Duplicate layout {} ({}) ignored",
                    descriptor.layout_id,
                    descriptor.display_name
                );
                continue;
            }
            entries.push(descriptor);
        }
        Self { entries }
    }

    /// Catalog with the builtin layout table
    pub fn builtin() -> Self {
        Self::new(
            BUILTIN_LAYOUTS
                .iter()
                .map(|(culture, id, name)| LayoutDescriptor::new(*culture, LayoutId(*id), *name))
                .collect(),
        )
    }

    /// Return a catalog with `descriptors` taking precedence over existing entries
    pub fn merged_with(&self, descriptors: Vec<LayoutDescriptor>) -> Self {
        let mut merged = descriptors;
        merged.extend(self.entries.iter().cloned());
        Self::new(merged)
    }

    /// Look up a descriptor by exact id
    pub fn descriptor(&self, id: LayoutId) -> Option<&LayoutDescriptor> {
        self.entries.iter().find(|e| e.layout_id == id)
    }

    /// First descriptor with the given culture tag (case-insensitive)
    pub fn by_culture(&self, culture: &str) -> Option<&LayoutDescriptor> {
        self.entries
            .iter()
            .find(|e| e.culture.eq_ignore_ascii_case(culture))
    }

    /// Display name for an id, falling back to the hex id
    pub fn display_name(&self, id: LayoutId) -> String {
        self.descriptor(id)
            .map(|d| d.display_name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Fallback policy for an id. Unknown ids allow fallback.
    pub fn fallback_for(&self, id: LayoutId) -> LanguageFallback {
        self.descriptor(id)
            .map(|d| LanguageFallback::from(d.allow_language_fallback))
            .unwrap_or(LanguageFallback::Allowed)
    }

    /// All descriptors in configured order
    pub fn entries(&self) -> &[LayoutDescriptor] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const US: LayoutId = LayoutId(0x0409_0409);
    const US_DVORAK: LayoutId = LayoutId(0xF002_0409);
    const FRENCH: LayoutId = LayoutId(0x040C_040C);
    const GERMAN: LayoutId = LayoutId(0x0407_0407);

    fn installed(ids: &[LayoutId]) -> Vec<InstalledLayout> {
        ids.iter().map(|id| InstalledLayout::new(*id)).collect()
    }

    #[rstest]
    #[case::exact_present(&[FRENCH, US, US_DVORAK], US_DVORAK, Some(US_DVORAK))]
    #[case::exact_wins_over_earlier_language_match(&[US, US_DVORAK], US_DVORAK, Some(US_DVORAK))]
    #[case::language_fallback(&[FRENCH, US], US_DVORAK, Some(US))]
    #[case::first_language_match(&[US_DVORAK, US], LayoutId(0x0001_0409), Some(US_DVORAK))]
    #[case::no_match(&[FRENCH, GERMAN], US, None)]
    #[case::empty(&[], US, None)]
    fn test_resolve_allowed(
        #[case] ids: &[LayoutId],
        #[case] target: LayoutId,
        #[case] expected: Option<LayoutId>,
    ) {
        let list = installed(ids);
        let resolved = resolve(&list, target, LanguageFallback::Allowed).map(|l| l.id);
        assert_eq!(resolved, expected);
    }

    #[test]
    fn test_resolve_disabled_fallback_only_exact() {
        let list = installed(&[US_DVORAK, FRENCH]);
        assert_eq!(resolve(&list, US, LanguageFallback::Disabled), None);

        let list = installed(&[US_DVORAK, US]);
        assert_eq!(
            resolve(&list, US, LanguageFallback::Disabled).map(|l| l.id),
            Some(US)
        );
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let list = installed(&[US_DVORAK, FRENCH, US]);
        let first = resolve(&list, LayoutId(0x0002_0409), LanguageFallback::Allowed).cloned();
        for _ in 0..10 {
            assert_eq!(
                resolve(&list, LayoutId(0x0002_0409), LanguageFallback::Allowed).cloned(),
                first
            );
        }
    }

    #[test]
    fn test_builtin_catalog() {
        let catalog = LayoutCatalog::builtin();
        assert!(!catalog.is_empty());
        assert_eq!(catalog.display_name(US_DVORAK), "English (US, Dvorak)");
        assert_eq!(catalog.by_culture("fr-fr").map(|d| d.layout_id), Some(FRENCH));
    }

    #[test]
    fn test_display_name_unknown_id() {
        let catalog = LayoutCatalog::builtin();
        assert_eq!(catalog.display_name(LayoutId(0x0001_0411)), "00010411");
    }

    #[test]
    fn test_fallback_for() {
        let catalog = LayoutCatalog::new(vec![
            LayoutDescriptor::new("en-US", US, "US").with_language_fallback(false),
            LayoutDescriptor::new("fr-FR", FRENCH, "French"),
        ]);
        assert_eq!(catalog.fallback_for(US), LanguageFallback::Disabled);
        assert_eq!(catalog.fallback_for(FRENCH), LanguageFallback::Allowed);
        assert_eq!(catalog.fallback_for(GERMAN), LanguageFallback::Allowed);
    }

    #[test]
    fn test_duplicates_ignored() {
        let catalog = LayoutCatalog::new(vec![
            LayoutDescriptor::new("en-US", US, "First"),
            LayoutDescriptor::new("en-US", US, "Second"),
        ]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.display_name(US), "First");
    }

    #[test]
    fn test_merged_with_overrides_builtin() {
        let catalog = LayoutCatalog::builtin().merged_with(vec![LayoutDescriptor::new(
            "en-US",
            US,
            "My US",
        )
        .with_language_fallback(false)]);
        assert_eq!(catalog.display_name(US), "My US");
        assert_eq!(catalog.fallback_for(US), LanguageFallback::Disabled);
        assert_eq!(catalog.display_name(FRENCH), "French");
    }
}
