//! # Cache Core
//!
//! Store-agnostic caching on top of [`crate::store`]:
//!
//! - [`codec`]: JSON payloads, gzip above a size threshold
//! - [`keys`]: physical key layout (prefix, version, tags)
//! - [`protected`]: circuit breaker + timeout + retry around every store call
//! - [`version`]: global version token for bulk invalidation
//! - [`core`]: fail-open get/set/delete/get_or_set/clear_pattern
//! - [`tags`]: tag → key-set index

pub mod codec;
pub mod core;
pub mod keys;
pub mod protected;
pub mod tags;
pub mod version;

pub use self::core::CacheCore;
pub use codec::{EncodedPayload, PayloadCodec};
pub use keys::KeySpace;
pub use protected::ProtectedStore;
pub use tags::TagIndex;
pub use version::VersionManager;
