//! Layout activation
//!
//! Resolves desired layouts against the installed ones and drives the
//! OS layout services through the `LayoutBackend` capability.

mod backend;
mod layout_activator;
mod xkb;

pub use backend::{ActivationError, BackendError, BroadcastTarget, LayoutBackend};
pub use layout_activator::LayoutActivator;
pub use xkb::{
    merge_xkb_layouts, parse_query, XkbBackend, XkbLayout, XkbRules, DEFAULT_RULES_LIST,
};
