//! Input and output specimen buffers
//!
//! Slot positions come from the station settings. Occupancy is tracked
//! here for the lifetime of the workflow: a pickup empties its input slot
//! and a store fills the first free output slot, so an output slot is never
//! handed out twice.

use autopolish_core::{BufferType, Result, WorkflowError};
use autopolish_settings::{BufferSettings, SlotEntry};

/// Slot positions and occupancy of both buffers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecimenBuffers {
    input: Vec<SlotEntry>,
    output: Vec<SlotEntry>,
}

impl SpecimenBuffers {
    /// Buffers with the given slot layouts
    pub fn new(input: Vec<SlotEntry>, output: Vec<SlotEntry>) -> Self {
        Self { input, output }
    }

    /// Buffers as described by the settings file
    pub fn from_settings(settings: &BufferSettings) -> Self {
        Self::new(settings.input_slots.clone(), settings.output_slots.clone())
    }

    /// All slots of one buffer, in scan order
    pub fn slots(&self, buffer: BufferType) -> &[SlotEntry] {
        match buffer {
            BufferType::Input => &self.input,
            BufferType::Output => &self.output,
        }
    }

    fn entry(&self, buffer: BufferType, slot: u32) -> Result<&SlotEntry> {
        self.slots(buffer)
            .iter()
            .find(|entry| entry.slot == slot)
            .ok_or_else(|| WorkflowError::SlotNotDefined { buffer, slot }.into())
    }

    fn entry_mut(&mut self, buffer: BufferType, slot: u32) -> Result<&mut SlotEntry> {
        let slots = match buffer {
            BufferType::Input => &mut self.input,
            BufferType::Output => &mut self.output,
        };
        slots
            .iter_mut()
            .find(|entry| entry.slot == slot)
            .ok_or_else(|| WorkflowError::SlotNotDefined { buffer, slot }.into())
    }

    /// Machine coordinates of a slot
    pub fn position(&self, buffer: BufferType, slot: u32) -> Result<[f64; 3]> {
        self.entry(buffer, slot).map(|entry| entry.position)
    }

    /// Specimen recorded in a slot
    pub fn specimen(&self, buffer: BufferType, slot: u32) -> Option<&str> {
        self.entry(buffer, slot)
            .ok()
            .and_then(|entry| entry.specimen.as_deref())
    }

    /// First output slot holding no specimen
    pub fn next_free_output(&self) -> Option<u32> {
        self.output
            .iter()
            .find(|entry| entry.specimen.is_none())
            .map(|entry| entry.slot)
    }

    /// Mark an input slot empty, returning what it held
    pub fn take_input(&mut self, slot: u32) -> Result<Option<String>> {
        Ok(self.entry_mut(BufferType::Input, slot)?.specimen.take())
    }

    /// Record a specimen in an output slot
    pub fn store_output(&mut self, slot: u32, specimen: impl Into<String>) -> Result<()> {
        self.entry_mut(BufferType::Output, slot)?.specimen = Some(specimen.into());
        Ok(())
    }
}
