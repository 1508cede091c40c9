// Kbswitch Layout Layer
// Layout identifiers, descriptors and catalog resolution

mod catalog;
mod descriptor;

pub use catalog::{resolve, LanguageFallback, LayoutCatalog};
pub use descriptor::{InstalledLayout, LayoutDescriptor, LayoutId, LayoutIdParseError};
