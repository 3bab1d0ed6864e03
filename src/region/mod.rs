mod builder;
mod file;
pub(crate) mod legacy;
mod loader;

pub use builder::LevelBuilder;
pub use file::RegionFile;
pub use loader::{ChunkSource, RegionDirectoryLoader};

pub use legacy::{block_state_from_legacy, max_compound_state};
