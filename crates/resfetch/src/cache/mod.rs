//! # Cache System
//!
//! Versioned on-disk storage for fetched resources. Every resource owns one
//! directory named after its [`ResourceKey`]; each version of its content
//! lives in a subdirectory named after the [`Version`]:
//!
//! ```text
//! <root>/<resource key>/<version>/<file name>
//! ```

mod error;
mod space;
mod store;
mod types;

pub use error::StoreError;
pub use space::{DiskSpaceProbe, FixedSpace, SpaceProbe, UnlimitedSpace};
pub use store::VersionedCacheStore;
pub use types::{ParseVersionError, Resource, ResourceKey, Version};
