//! Per-entry content stages: resolve, filter, collect images, serialize.

mod assets;
mod filter;
mod resolver;
mod xhtml;

pub use assets::{
    discover_images, extension_for, fetch_asset, fetch_assets, fetch_title_image, local_name,
    AssetError, AssetRef, AssetStatus, IMAGE_DIR,
};
pub use filter::{filter_html, Filtered, SelectorChain, DEFAULT_SELECTORS};
pub use resolver::{
    plan, resolve_entry, ContentSource, ResolveError, ResolveStep, ResolvedContent,
};
pub use xhtml::to_xhtml;
