// Kbswitch Layout Activator
// Resolves a desired layout against the installed ones and activates it

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use super::backend::{ActivationError, LayoutBackend};
use crate::layout::{resolve, InstalledLayout, LanguageFallback, LayoutId};

/// Makes a resolved layout the active one and notifies other windows.
///
/// The installed-layout list is cached after the first enumeration.
/// The cache starts empty, so every process start re-enumerates, and it
/// is dropped whenever a lookup misses or the OS rejects an activation.
pub struct LayoutActivator {
    backend: Box<dyn LayoutBackend>,
    cache: RwLock<Option<Arc<Vec<InstalledLayout>>>>,
}

impl LayoutActivator {
    pub fn new(backend: Box<dyn LayoutBackend>) -> Self {
        Self {
            backend,
            cache: RwLock::new(None),
        }
    }

    /// Layout of the focused UI surface, None if unknown
    pub fn current_layout(&self) -> Option<LayoutId> {
        self.backend.focused_layout()
    }

    /// Installed layouts, enumerated on first use
    pub fn installed_layouts(&self) -> Result<Arc<Vec<InstalledLayout>>, ActivationError> {
        if let Some(cached) = self.cache.read().as_ref() {
            return Ok(Arc::clone(cached));
        }

        let layouts = Arc::new(
            self.backend
                .installed_layouts()
                .map_err(|e| ActivationError::Enumeration(e.to_string()))?,
        );
        log::debug!("Enumerated {} installed layouts", layouts.len());
        *self.cache.write() = Some(Arc::clone(&layouts));
        Ok(layouts)
    }

    /// Forget the cached installed-layout list
    pub fn invalidate_cache(&self) {
        *self.cache.write() = None;
    }

    /// Resolve `target` and make it the active layout.
    ///
    /// Returns the installed layout that was activated, which may be a
    /// same-language stand-in when `fallback` allows it. A missing layout
    /// is reported, never retried here.
    pub fn activate(
        &self,
        target: LayoutId,
        fallback: LanguageFallback,
    ) -> Result<InstalledLayout, ActivationError> {
        let started = Instant::now();
        let installed = self.installed_layouts()?;

        let resolved = match resolve(&installed, target, fallback) {
            Some(layout) => layout.clone(),
            None => {
                self.invalidate_cache();
                return Err(ActivationError::NotInstalled(target));
            }
        };
        if resolved.id != target {
            log::info!(
                "Layout {} not installed, using same-language layout {}",
                target,
                resolved.id
            );
        }

        // Querying the focused layout may spawn a process
        if log::log_enabled!(log::Level::Debug) {
            match self.current_layout() {
                Some(current) => log::debug!("Switching layout {} -> {}", current, resolved.id),
                None => log::debug!("Switching to layout {} (current unknown)", resolved.id),
            }
        }

        if let Err(e) = self.backend.activate(&resolved) {
            self.invalidate_cache();
            return Err(ActivationError::ActivationFailed {
                layout: resolved.id,
                reason: e.to_string(),
            });
        }

        self.broadcast(&resolved);
        log::debug!("Activated {} in {:?}", resolved.id, started.elapsed());
        Ok(resolved)
    }

    /// Best-effort change notification; failures are only logged
    fn broadcast(&self, layout: &InstalledLayout) {
        let targets = self.backend.broadcast_targets();
        let mut failed = 0usize;
        for target in &targets {
            if let Err(e) = self.backend.notify_target(*target, layout) {
                failed += 1;
                log::warn!("Could not notify target {:#x}: {}", target, e);
            }
        }
        if failed > 0 {
            log::debug!("Layout broadcast reached {}/{} targets", targets.len() - failed, targets.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activator::backend::{BackendError, BroadcastTarget};
    use parking_lot::Mutex;

    const US: LayoutId = LayoutId(0x0409_0409);
    const US_DVORAK: LayoutId = LayoutId(0xF002_0409);
    const FRENCH: LayoutId = LayoutId(0x040C_040C);

    #[derive(Default)]
    struct FakeOs {
        installed: Mutex<Vec<InstalledLayout>>,
        enumerations: Mutex<usize>,
        activated: Mutex<Vec<LayoutId>>,
        notified: Mutex<Vec<BroadcastTarget>>,
        focused: Mutex<Option<LayoutId>>,
        focus_queries: Mutex<usize>,
        reject: Mutex<bool>,
    }

    impl FakeOs {
        fn with(ids: &[LayoutId]) -> Arc<Self> {
            let os = Self::default();
            *os.installed.lock() = ids.iter().map(|id| InstalledLayout::new(*id)).collect();
            Arc::new(os)
        }
    }

    impl LayoutBackend for FakeOs {
        fn installed_layouts(&self) -> Result<Vec<InstalledLayout>, BackendError> {
            *self.enumerations.lock() += 1;
            Ok(self.installed.lock().clone())
        }

        fn focused_layout(&self) -> Option<LayoutId> {
            *self.focus_queries.lock() += 1;
            *self.focused.lock()
        }

        fn activate(&self, layout: &InstalledLayout) -> Result<(), BackendError> {
            if *self.reject.lock() {
                return Err(BackendError::Rejected("access denied".to_string()));
            }
            self.activated.lock().push(layout.id);
            *self.focused.lock() = Some(layout.id);
            Ok(())
        }

        fn broadcast_targets(&self) -> Vec<BroadcastTarget> {
            vec![1, 2, 3]
        }

        fn notify_target(
            &self,
            target: BroadcastTarget,
            _layout: &InstalledLayout,
        ) -> Result<(), BackendError> {
            if target == 2 {
                return Err(BackendError::NotifyFailed("window gone".to_string()));
            }
            self.notified.lock().push(target);
            Ok(())
        }
    }

    #[test]
    fn test_activate_exact() {
        let os = FakeOs::with(&[US, US_DVORAK]);
        let activator = LayoutActivator::new(Box::new(os.clone()));

        let layout = activator.activate(US_DVORAK, LanguageFallback::Allowed).unwrap();
        assert_eq!(layout.id, US_DVORAK);
        assert_eq!(*os.activated.lock(), vec![US_DVORAK]);
        assert_eq!(activator.current_layout(), Some(US_DVORAK));
    }

    #[test]
    fn test_activate_language_fallback() {
        let os = FakeOs::with(&[FRENCH, US]);
        let activator = LayoutActivator::new(Box::new(os.clone()));

        let layout = activator.activate(US_DVORAK, LanguageFallback::Allowed).unwrap();
        assert_eq!(layout.id, US);
    }

    #[test]
    fn test_not_installed_makes_no_activation_call() {
        let os = FakeOs::with(&[FRENCH, US_DVORAK]);
        let activator = LayoutActivator::new(Box::new(os.clone()));

        assert_eq!(
            activator.activate(US, LanguageFallback::Disabled),
            Err(ActivationError::NotInstalled(US))
        );
        assert!(os.activated.lock().is_empty());
    }

    #[test]
    fn test_cache_reused_until_miss() {
        let os = FakeOs::with(&[US, FRENCH]);
        let activator = LayoutActivator::new(Box::new(os.clone()));

        activator.activate(US, LanguageFallback::Allowed).unwrap();
        activator.activate(FRENCH, LanguageFallback::Allowed).unwrap();
        assert_eq!(*os.enumerations.lock(), 1);

        // Miss drops the cache, so a layout installed later is found
        assert!(activator.activate(US_DVORAK, LanguageFallback::Disabled).is_err());
        os.installed.lock().push(InstalledLayout::new(US_DVORAK));
        activator.activate(US_DVORAK, LanguageFallback::Disabled).unwrap();
        assert_eq!(*os.enumerations.lock(), 2);
    }

    #[test]
    fn test_rejected_activation() {
        let os = FakeOs::with(&[US]);
        *os.reject.lock() = true;
        let activator = LayoutActivator::new(Box::new(os.clone()));

        match activator.activate(US, LanguageFallback::Allowed) {
            Err(ActivationError::ActivationFailed { layout, reason }) => {
                assert_eq!(layout, US);
                assert!(reason.contains("access denied"));
            }
            other => panic!("expected ActivationFailed, got {:?}", other),
        }
        assert!(os.notified.lock().is_empty());
    }

    #[test]
    fn test_broadcast_failure_is_not_fatal() {
        let os = FakeOs::with(&[US]);
        let activator = LayoutActivator::new(Box::new(os.clone()));

        assert!(activator.activate(US, LanguageFallback::Allowed).is_ok());
        assert_eq!(*os.notified.lock(), vec![1, 3]);
    }

    #[test]
    fn test_activate_skips_focus_query_without_debug_logging() {
        let os = FakeOs::with(&[US]);
        let activator = LayoutActivator::new(Box::new(os.clone()));

        activator.activate(US, LanguageFallback::Disabled).unwrap();
        assert!(!log::log_enabled!(log::Level::Debug));
        assert_eq!(*os.focus_queries.lock(), 0);
    }

    #[test]
    fn test_current_layout_unknown() {
        let os = FakeOs::with(&[US]);
        let activator = LayoutActivator::new(Box::new(os));
        assert_eq!(activator.current_layout(), None);
    }
}
