use std::collections::{BTreeSet, HashMap};

use crate::err::OozeError;
use crate::storage::{BitCompactIntArray, IntArray};
use crate::world::BlockState;

/// A set of block states that exist within a volume of blocks. Each state is
/// identified by a dense non-negative integer, and no state or identifier is
/// used more than once at any given time in the same palette.
///
/// Used together with an [`IntArray`], it provides a compact means of storing
/// states for large volumes of blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockPalette {
    registered_states: Vec<BlockState>,
}

impl BlockPalette {
    /// The ID of a palette's default state, always zero.
    pub const DEFAULT_STATE_ID: u32 = 0;

    pub fn new() -> Self {
        Self::with_default(BlockState::default_state().clone())
    }

    /// Creates a palette whose entry 0 is `default_state`. Volumes using the
    /// palette fall back to that state when a block's state is not specified,
    /// and it can never be removed.
    pub fn with_default(default_state: BlockState) -> Self {
        Self {
            registered_states: vec![default_state],
        }
    }

    pub fn default_state(&self) -> &BlockState {
        &self.registered_states[0]
    }

    /// The block state associated with `state_id`, if the palette contains
    /// that ID. Callers typically substitute [`BlockState::default_state`]
    /// when the lookup cannot resolve.
    pub fn get_state(&self, state_id: u32) -> Option<&BlockState> {
        self.registered_states.get(state_id as usize)
    }

    /// The integer identifying `state` in the palette, or `None` if the
    /// palette does not contain that state.
    pub fn state_id(&self, state: &BlockState) -> Option<u32> {
        self.registered_states
            .iter()
            .position(|s| s == state)
            .map(|index| index as u32)
    }

    /// Adds a state if it was not already in the palette, returning the
    /// integer that identifies it either way.
    pub fn add_state(&mut self, state: BlockState) -> u32 {
        match self.state_id(&state) {
            Some(state_id) => state_id,
            None => {
                self.registered_states.push(state);
                (self.registered_states.len() - 1) as u32
            }
        }
    }

    /// Removes a state from the palette if it was present. This may alter the
    /// IDs of other states, so the returned upgrader should be used to update
    /// dependent data accordingly. The palette's default state cannot be
    /// removed.
    pub fn remove_state(&mut self, state_id: u32) -> Result<PaletteUpgrader, OozeError> {
        if state_id == Self::DEFAULT_STATE_ID {
            return Err(OozeError::RemoveDefaultState);
        }
        if state_id as usize >= self.registered_states.len() {
            // State does not exist.
            return Ok(PaletteUpgrader::noop());
        }

        self.registered_states.remove(state_id as usize);
        if state_id as usize == self.registered_states.len() {
            // The last element was removed; there is nothing to shift.
            return Ok(PaletteUpgrader::noop());
        }

        // Shift any IDs after the removed ID down by 1.
        let mut recorder = UpgradeRecorder::new();
        for id in state_id..self.registered_states.len() as u32 {
            recorder.register_change(id + 1, id);
        }
        Ok(recorder.lock())
    }

    /// Adds all block states from another palette into this one if they are
    /// not already present. The returned upgrader translates IDs of data
    /// dependent on `other` into this palette's IDs.
    pub fn add_all(&mut self, other: &BlockPalette) -> PaletteUpgrader {
        let mut recorder = UpgradeRecorder::new();
        for (old_id, state) in other.registered_states.iter().enumerate() {
            let new_id = self.add_state(state.clone());
            recorder.register_change(old_id as u32, new_id);
        }
        recorder.lock()
    }

    /// Creates a new palette that only contains the states whose IDs are used
    /// by the `data` array, remapping `data` in place to the new IDs. The
    /// default state is always carried over first, even if it is never used.
    pub fn extract(&self, data: &mut BitCompactIntArray) -> Result<BlockPalette, OozeError> {
        // Determine which states the data array references.
        let mut used_states = BTreeSet::new();
        for index in 0..data.len() {
            let state_id = data.get(index)?;
            if (state_id as usize) < self.registered_states.len() {
                used_states.insert(state_id);
            }
        }

        // Seed the new palette with the old default, then copy the used
        // states in ascending ID order.
        let mut extracted = BlockPalette::with_default(self.default_state().clone());
        let mut recorder = UpgradeRecorder::new();
        for state_id in used_states {
            if let Some(state) = self.get_state(state_id) {
                let new_id = extracted.add_state(state.clone());
                recorder.register_change(state_id, new_id);
            }
        }

        recorder.lock().upgrade_array(data)?;
        Ok(extracted)
    }

    /// The number of unique block states stored in the palette.
    pub fn len(&self) -> usize {
        self.registered_states.len()
    }

    /// Iterates the palette's states in ID order.
    pub fn iter(&self) -> impl Iterator<Item = &BlockState> {
        self.registered_states.iter()
    }
}

impl Default for BlockPalette {
    fn default() -> Self {
        Self::new()
    }
}

/// Collects palette ID changes before they are frozen into a
/// [`PaletteUpgrader`]. Once locked, no further changes can be registered;
/// the two states are separate types, so modifying a locked upgrader is
/// unrepresentable.
#[derive(Debug, Default)]
pub struct UpgradeRecorder {
    changes: Vec<(u32, u32)>,
}

impl UpgradeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a change in a block state's palette ID, so that any instance
    /// of `old_id` put through the locked upgrader is replaced with `new_id`.
    pub fn register_change(&mut self, old_id: u32, new_id: u32) -> &mut Self {
        self.changes.push((old_id, new_id));
        self
    }

    /// Freezes the registered changes into an immutable, queryable upgrader.
    pub fn lock(self) -> PaletteUpgrader {
        let no_changes = self.changes.iter().all(|(old, new)| old == new);
        let highest_new_id = self.changes.iter().map(|&(_, new)| new).max();
        PaletteUpgrader {
            changes: self.changes.into_iter().collect(),
            no_changes,
            highest_new_id,
        }
    }
}

/// A locked table of `old ID -> new ID` mappings, used to upgrade data that
/// depends on a [`BlockPalette`] after the palette was mutated.
#[derive(Debug)]
pub struct PaletteUpgrader {
    changes: HashMap<u32, u32>,

    // True only if every registered pair maps an ID to itself. Used as a
    // shortcut when upgrading.
    no_changes: bool,

    highest_new_id: Option<u32>,
}

impl PaletteUpgrader {
    /// An upgrader that doesn't do anything to the data sent through it.
    pub fn noop() -> Self {
        Self {
            changes: HashMap::new(),
            no_changes: true,
            highest_new_id: None,
        }
    }

    /// The new ID for the state `old_id` refers to. IDs with no registered
    /// change are returned as-is.
    pub fn upgrade(&self, old_id: u32) -> u32 {
        if self.no_changes {
            return old_id;
        }
        self.changes.get(&old_id).copied().unwrap_or(old_id)
    }

    /// Rewrites every cell of `array` through [`PaletteUpgrader::upgrade`].
    /// The array grows beforehand if the highest mapped ID would not fit, and
    /// shrinks afterwards when the remapped IDs permit a smaller cell width.
    pub fn upgrade_array(&self, array: &mut BitCompactIntArray) -> Result<(), OozeError> {
        if self.no_changes {
            return Ok(());
        }

        let highest_new_id = self.highest_new_id.unwrap_or(0);
        let current_max = array.max_value();
        if highest_new_id > current_max {
            // Grow the array up front so it can hold the new highest ID.
            array.set_max_value(highest_new_id)?;
        }

        for index in 0..array.len() {
            let value = array.get(index)?;
            array.set(index, self.upgrade(value))?;
        }

        if self.upgrade(current_max) < current_max {
            // Drop the unnecessary extra range. Won't happen if the array was
            // already scaled up before the conversion.
            array.set_max_value(highest_new_id)?;
        }
        Ok(())
    }
}
