use thiserror::Error;

/// Everything that can go wrong while building, converting or encoding a
/// level. Absent data (a chunk missing from a region file, an optional NBT
/// field) is reported as `Option::None` by the relevant APIs, never as an
/// error.
#[derive(Debug, Error)]
pub enum OozeError {
    #[error("index {index} out of bounds for array of {len} cells")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("block coordinates out of bounds: ({x}, {y}, {z})")]
    BlockOutOfBounds { x: i32, y: i32, z: i32 },

    #[error("chunk at ({x}, {z}) does not fit inside the level bounds")]
    ChunkOutOfBounds { x: i32, z: i32 },

    #[error("section altitude {0} is already occupied")]
    DuplicateAltitude(i32),

    #[error("section altitude {0} does not fit in a signed byte")]
    AltitudeOutOfRange(i32),

    #[error("sections cannot be encoded for data version {0}")]
    UnsupportedSectionVersion(i32),

    #[error("cannot store value {value} in an array with maximum {max}")]
    ValueTooLarge { value: u32, max: u32 },

    #[error("array contains value {value} at index {index}; cannot lower the maximum below it")]
    LossyResize { index: usize, value: u32 },

    #[error("section storage must hold exactly {expected} cells, got {actual}")]
    WrongSectionSize { expected: usize, actual: usize },

    #[error("block storage is too small for its palette")]
    StorageTooSmall,

    #[error("cannot remove the default state from a palette")]
    RemoveDefaultState,

    #[error("not an ooze stream: bad magic {0:#010x}")]
    BadMagic(u32),

    #[error("unsupported format version: {0}")]
    UnsupportedVersion(i32),

    #[error("VarInt is too big")]
    VarIntTooBig,

    #[error("not a valid resource location: {0:?}")]
    InvalidResourceLocation(String),

    #[error("not a valid block state: {0}")]
    InvalidBlockState(String),

    #[error("state name must fit in 127 bytes: {0:?}")]
    NameTooLong(String),

    #[error("can only store lists of compounds")]
    NotACompoundList,

    #[error("unknown chunk compression type: {0}")]
    UnknownCompression(u8),

    #[error("compression level {0} is out of range")]
    CompressionLevelOutOfRange(i32),

    #[error("a compressed frame is already open")]
    FrameAlreadyOpen,

    #[error("no compressed frame is open")]
    FrameNotOpen,

    #[error("level is too large to encode: {width}x{depth} chunks")]
    LevelTooLarge { width: i32, depth: i32 },

    #[error("not a region directory: {0}")]
    NotADirectory(String),

    #[error("chunk data is missing {0:?}")]
    MissingChunkField(&'static str),

    #[error("corrupted data: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("NBT error: {0}")]
    Nbt(#[from] quartz_nbt::io::NbtIoError),
}
