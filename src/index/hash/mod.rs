pub mod bucket;
pub mod codec;
pub mod directory;
pub mod error;
pub mod table;

pub use codec::{DefaultKeyHasher, FixedCodec, KeyHasher};
pub use directory::MAX_GLOBAL_DEPTH;
pub use error::HashTableError;
pub use table::ExtendibleHashTable;
