//! Data-driven passes and fix-ups built from the pipeline profile.

use log::debug;
use std::collections::BTreeSet;

use crate::patch::Patch;
use crate::pipeline::{Fixup, FixupContext, Randomizer};
use crate::seed::RandomStream;
use crate::shuffle::{pick_weighted, shuffle};
use crate::soundtrack::{SoundTrackSet, SoundTrackUsage};
use crate::{RandomiserError, Region, Result};

/// Permutes a table of byte values in place.
pub struct TableShuffle {
    name: String,
    address: usize,
    values: Vec<u8>,
    order: Vec<usize>,
}

impl TableShuffle {
    pub fn new(name: impl Into<String>, address: usize, values: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            address,
            values,
            order: Vec::new(),
        }
    }
}

impl Randomizer for TableShuffle {
    fn name(&self) -> &str {
        &self.name
    }

    fn randomize(&mut self, patch: &mut Patch, rng: &mut RandomStream) -> Result<()> {
        let mut order: Vec<usize> = (0..self.values.len()).collect();
        shuffle(&mut order, rng);
        let bytes: Vec<u8> = order.iter().map(|&i| self.values[i]).collect();
        patch.add(self.address, bytes, format!("{}: table", self.name))?;
        self.order = order;
        Ok(())
    }

    fn outcome(&self) -> Option<Vec<usize>> {
        Some(self.order.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightedChoice {
    pub value: u8,
    pub weight: u32,
}

/// Independently draws one weighted value for each address.
pub struct WeightedPick {
    name: String,
    addresses: Vec<usize>,
    choices: Vec<WeightedChoice>,
    picked: Vec<usize>,
}

impl WeightedPick {
    pub fn new(name: impl Into<String>, addresses: Vec<usize>, choices: Vec<WeightedChoice>) -> Self {
        Self {
            name: name.into(),
            addresses,
            choices,
            picked: Vec::new(),
        }
    }
}

impl Randomizer for WeightedPick {
    fn name(&self) -> &str {
        &self.name
    }

    fn randomize(&mut self, patch: &mut Patch, rng: &mut RandomStream) -> Result<()> {
        let weights: Vec<u32> = self.choices.iter().map(|c| c.weight).collect();
        let mut picked = Vec::with_capacity(self.addresses.len());
        for &address in &self.addresses {
            let idx = pick_weighted(rng, &weights).ok_or_else(|| RandomiserError::PassFailure {
                pass: self.name.clone(),
                reason: "no choice has a non-zero weight".to_string(),
            })?;
            patch.add_byte(address, self.choices[idx].value, format!("{}: pick", self.name))?;
            picked.push(idx);
        }
        self.picked = picked;
        Ok(())
    }

    fn outcome(&self) -> Option<Vec<usize>> {
        Some(self.picked.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MusicSlot {
    pub usage: SoundTrackUsage,
    pub address: usize,
}

/// Assigns distinct tracks to music slots, by usage class.
pub struct MusicRandomizer {
    name: String,
    tracks: SoundTrackSet,
    slots: Vec<MusicSlot>,
    streaming_safe_only: bool,
    chosen: Vec<usize>,
}

impl MusicRandomizer {
    pub fn new(
        name: impl Into<String>,
        tracks: SoundTrackSet,
        slots: Vec<MusicSlot>,
        streaming_safe_only: bool,
    ) -> Self {
        Self {
            name: name.into(),
            tracks,
            slots,
            streaming_safe_only,
            chosen: Vec::new(),
        }
    }
}

impl Randomizer for MusicRandomizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn randomize(&mut self, patch: &mut Patch, rng: &mut RandomStream) -> Result<()> {
        let mut usages: Vec<SoundTrackUsage> = Vec::new();
        for slot in &self.slots {
            if !usages.contains(&slot.usage) {
                usages.push(slot.usage);
            }
        }

        let mut chosen = vec![0usize; self.slots.len()];
        let mut data_written = BTreeSet::new();

        for usage in usages {
            let slot_ids: Vec<usize> = (0..self.slots.len())
                .filter(|&i| self.slots[i].usage == usage)
                .collect();
            let mut pool = self.tracks.candidates(usage, self.streaming_safe_only)?;
            if pool.len() < slot_ids.len() {
                return Err(RandomiserError::PassFailure {
                    pass: self.name.clone(),
                    reason: format!(
                        "{} tracks for {} slots with usage 0x{:02X}",
                        pool.len(),
                        slot_ids.len(),
                        usage.bits()
                    ),
                });
            }
            shuffle(&mut pool, rng);

            for (slot_id, track_id) in slot_ids.into_iter().zip(pool) {
                let track = &self.tracks.sound_tracks[track_id];
                let start = track.start_address()?;
                let pointer = u16::try_from(start).map_err(|_| {
                    RandomiserError::Config(format!(
                        "track {:?} starts at 0x{start:X}, beyond a 16-bit pointer",
                        track.title
                    ))
                })?;
                patch.add(
                    self.slots[slot_id].address,
                    pointer.to_le_bytes(),
                    format!("{}: {}", self.name, track.title),
                )?;

                if data_written.insert(track_id) {
                    let data = track.track_bytes()?;
                    if !data.is_empty() {
                        patch.add(start, data, format!("{}: {} data", self.name, track.title))?;
                    }
                }
                chosen[slot_id] = track_id;
            }
        }

        self.chosen = chosen;
        Ok(())
    }

    fn outcome(&self) -> Option<Vec<usize>> {
        Some(self.chosen.clone())
    }
}

/// Fixed bytes written unconditionally.
pub struct FixedBytes {
    name: String,
    address: usize,
    data: Vec<u8>,
}

impl FixedBytes {
    pub fn new(name: impl Into<String>, address: usize, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            address,
            data,
        }
    }
}

impl Fixup for FixedBytes {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, patch: &mut Patch, _ctx: &FixupContext<'_>) -> Result<()> {
        patch.add(self.address, self.data.clone(), self.name.clone())
    }
}

/// Draws the encoded seed as tile indices, e.g. on a title screen.
pub struct SeedBanner {
    name: String,
    address: usize,
    tile_base: u8,
    regions: Vec<Region>,
}

impl SeedBanner {
    pub fn new(name: impl Into<String>, address: usize, tile_base: u8, regions: Vec<Region>) -> Self {
        Self {
            name: name.into(),
            address,
            tile_base,
            regions,
        }
    }
}

impl Fixup for SeedBanner {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, patch: &mut Patch, ctx: &FixupContext<'_>) -> Result<()> {
        if !self.regions.is_empty() && !self.regions.contains(&ctx.region) {
            debug!("{}: not drawn for {:?}", self.name, ctx.region);
            return Ok(());
        }
        let tiles: Vec<u8> = ctx
            .seed_code
            .bytes()
            .map(|c| self.tile_base.wrapping_add(c - b'A'))
            .collect();
        patch.add(self.address, tiles, format!("{}: {}", self.name, ctx.seed_code))
    }
}

/// Rewrites a table so it follows the permutations other passes chose.
///
/// Each source that ran reorders the table in turn: `table[i]` becomes
/// `table[order[i]]`. Sources that did not run leave it as it is, and when
/// none ran nothing is written.
pub struct OutcomeTable {
    name: String,
    sources: Vec<String>,
    address: usize,
    values: Vec<u8>,
}

impl OutcomeTable {
    pub fn new(name: impl Into<String>, sources: Vec<String>, address: usize, values: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            sources,
            address,
            values,
        }
    }
}

impl Fixup for OutcomeTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, patch: &mut Patch, ctx: &FixupContext<'_>) -> Result<()> {
        let mut table = self.values.clone();
        let mut followed = Vec::new();
        for source in &self.sources {
            let Some(order) = ctx.outcomes.get(source) else {
                debug!("{}: pass {} did not run", self.name, source);
                continue;
            };
            table = order
                .iter()
                .map(|&i| table.get(i).copied())
                .collect::<Option<Vec<u8>>>()
                .filter(|t| t.len() == self.values.len())
                .ok_or_else(|| {
                    RandomiserError::Config(format!(
                        "{}: outcome of {} does not fit a {}-entry table",
                        self.name,
                        source,
                        self.values.len()
                    ))
                })?;
            followed.push(source.as_str());
        }
        if followed.is_empty() {
            return Ok(());
        }
        patch.add(
            self.address,
            table,
            format!("{}: follows {}", self.name, followed.join("+")),
        )
    }
}
