// Layout Backend Trait
//
// This module defines the interface to the OS keyboard layout services
// used by the activator.

use std::sync::Arc;

use crate::layout::{InstalledLayout, LayoutId};

/// Error type for backend operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Installed or current layouts could not be read
    #[error("Layout query failed: {0}")]
    QueryFailed(String),

    /// The OS refused to activate the layout
    #[error("Layout activation rejected: {0}")]
    Rejected(String),

    /// A window or process could not be told about the change
    #[error("Layout change notification failed: {0}")]
    NotifyFailed(String),
}

/// Identifies one recipient of a layout change broadcast (e.g. a window)
pub type BroadcastTarget = u64;

/// Capability interface over the OS keyboard layout services.
///
/// Implementations exist per window system; tests use recording fakes.
pub trait LayoutBackend: Send + Sync {
    /// Enumerate the layouts installed on the system
    fn installed_layouts(&self) -> Result<Vec<InstalledLayout>, BackendError>;

    /// Layout of the currently focused UI surface.
    ///
    /// Returns None when it cannot be determined (e.g. nothing focused).
    fn focused_layout(&self) -> Option<LayoutId>;

    /// Make `layout` the active layout for this session
    fn activate(&self, layout: &InstalledLayout) -> Result<(), BackendError>;

    /// Recipients of the "layout changed" broadcast, focused one first
    fn broadcast_targets(&self) -> Vec<BroadcastTarget> {
        Vec::new()
    }

    /// Tell one recipient that the layout changed
    fn notify_target(
        &self,
        _target: BroadcastTarget,
        _layout: &InstalledLayout,
    ) -> Result<(), BackendError> {
        Ok(())
    }
}

impl<T: LayoutBackend + ?Sized> LayoutBackend for Arc<T> {
    fn installed_layouts(&self) -> Result<Vec<InstalledLayout>, BackendError> {
        (**self).installed_layouts()
    }

    fn focused_layout(&self) -> Option<LayoutId> {
        (**self).focused_layout()
    }

    fn activate(&self, layout: &InstalledLayout) -> Result<(), BackendError> {
        (**self).activate(layout)
    }

    fn broadcast_targets(&self) -> Vec<BroadcastTarget> {
        (**self).broadcast_targets()
    }

    fn notify_target(
        &self,
        target: BroadcastTarget,
        layout: &InstalledLayout,
    ) -> Result<(), BackendError> {
        (**self).notify_target(target, layout)
    }
}

/// Errors from one activation request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActivationError {
    /// Neither the exact layout nor an allowed same-language one is installed
    #[error("Layout {0} is not installed")]
    NotInstalled(LayoutId),

    #[error("Activation of layout {layout} failed: {reason}")]
    ActivationFailed { layout: LayoutId, reason: String },

    #[error("Installed layouts could not be enumerated: {0}")]
    Enumeration(String),
}
