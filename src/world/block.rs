use std::sync::OnceLock;

use quartz_nbt::NbtCompound;

use crate::err::OozeError;
use crate::resource::ResourceLocation;

static DEFAULT_STATE: OnceLock<BlockState> = OnceLock::new();

/// The most basic aspects of a block: its type, and any additional properties
/// such as orientation or power.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockState {
    name: ResourceLocation,
    properties: Option<NbtCompound>,
}

impl BlockState {
    pub fn new(name: ResourceLocation) -> Self {
        Self {
            name,
            properties: None,
        }
    }

    pub fn with_properties(name: ResourceLocation, properties: Option<NbtCompound>) -> Self {
        Self { name, properties }
    }

    /// The state used as a fallback whenever a lookup cannot resolve:
    /// `minecraft:air` with no properties.
    pub fn default_state() -> &'static BlockState {
        DEFAULT_STATE.get_or_init(|| {
            BlockState::new(ResourceLocation::minecraft("air").unwrap())
        })
    }

    /// Constructs a block state from its serialized NBT form, a compound with
    /// a `Name` string and an optional `Properties` compound.
    pub fn from_nbt(data: &NbtCompound) -> Result<Self, OozeError> {
        let name: &str = data
            .get::<_, &str>("Name")
            .map_err(|_| OozeError::InvalidBlockState(format!("{data:?}")))?;
        let properties = data.get::<_, &NbtCompound>("Properties").ok().cloned();
        Ok(Self {
            name: ResourceLocation::parse(name)?,
            properties,
        })
    }

    /// The inverse of [`BlockState::from_nbt`].
    pub fn to_nbt(&self) -> NbtCompound {
        let mut data = NbtCompound::new();
        data.insert("Name", self.name.to_string());
        if let Some(properties) = &self.properties {
            data.insert("Properties", properties.clone());
        }
        data
    }

    /// The block's main identifier (e.g. "minecraft:stone").
    pub fn name(&self) -> &ResourceLocation {
        &self.name
    }

    pub fn properties(&self) -> Option<&NbtCompound> {
        self.properties.as_ref()
    }

    pub fn has_properties(&self) -> bool {
        self.properties.is_some()
    }

    /// Whether the state is one of the vanilla air blocks.
    pub fn is_air(&self) -> bool {
        self.name.namespace() == "minecraft"
            && matches!(self.name.path(), "air" | "cave_air" | "void_air")
    }
}
