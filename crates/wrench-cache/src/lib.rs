mod cache;
mod checksum;

pub use cache::{
    default_cache_root, AppCache, CacheEntry, CacheListing, CacheRemoval, KEY_PREFIX_LEN,
};
pub use checksum::{cache_key, sha256_hex};
