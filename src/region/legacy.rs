use std::collections::HashMap;
use std::sync::OnceLock;

use crate::world::BlockState;

// The table is packaged with the crate and parsed exactly once, on first use.
// Keys are the decimal form of `(id << 4) | data`; values are stringified
// block states.
const LEGACY_BLOCKS_JSON: &str = include_str!("../../assets/legacy_blocks.json");

static LEGACY_TO_MODERN: OnceLock<LegacyTable> = OnceLock::new();

struct LegacyTable {
    states: HashMap<u16, BlockState>,
    highest_compound_key: u16,
}

fn table() -> &'static LegacyTable {
    LEGACY_TO_MODERN.get_or_init(|| {
        let raw: HashMap<String, String> = serde_json::from_str(LEGACY_BLOCKS_JSON)
            .expect("legacy block table is valid JSON");

        let mut states = HashMap::with_capacity(raw.len());
        let mut highest_compound_key = 0;
        for (key, snbt) in raw {
            let key: u16 = key.parse().expect("legacy block key fits in 16 bits");
            let compound =
                quartz_nbt::snbt::parse(&snbt).expect("legacy block state is valid SNBT");
            let state =
                BlockState::from_nbt(&compound).expect("legacy block state has a valid name");

            highest_compound_key = highest_compound_key.max(key);
            states.insert(key, state);
        }
        LegacyTable {
            states,
            highest_compound_key,
        }
    })
}

/// The modern block state that replaces blocks with the given numeric `id`
/// and `data` value from versions before the flattening. Unknown combinations
/// resolve to the default state.
pub fn block_state_from_legacy(id: u16, data: u8) -> &'static BlockState {
    table()
        .states
        .get(&((id << 4) | (data as u16 & 0xF)))
        .unwrap_or_else(|| BlockState::default_state())
}

/// A 16-bit integer whose upper 12 bits hold the highest mapped legacy block
/// ID and whose low 4 bits hold that state's highest data value.
pub fn max_compound_state() -> u16 {
    table().highest_compound_key
}
