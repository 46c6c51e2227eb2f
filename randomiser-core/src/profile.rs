//! Pipeline profile: which passes and fix-ups exist, and in what order.
//!
//! The order in the document is the order of the run. Toggles can switch
//! entries on or off but never reorder them.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use crate::passes::{
    FixedBytes, MusicRandomizer, MusicSlot, OutcomeTable, SeedBanner, TableShuffle, WeightedChoice,
    WeightedPick,
};
use crate::pipeline::{Fixup, Pipeline, Randomizer};
use crate::soundtrack::{SoundTrackSet, SoundTrackUsage};
use crate::{RandomiserError, Region, Result};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassEntry {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub kind: PassKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PassKind {
    Shuffle {
        address: usize,
        values: Vec<u8>,
    },
    Weighted {
        addresses: Vec<usize>,
        choices: Vec<ChoiceEntry>,
    },
    Music {
        slots: Vec<MusicSlotEntry>,
        #[serde(default)]
        streaming_safe_only: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceEntry {
    pub value: u8,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MusicSlotEntry {
    pub usage: String,
    pub address: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixupEntry {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub kind: FixupKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FixupKind {
    Bytes {
        address: usize,
        data: Vec<u8>,
    },
    SeedBanner {
        address: usize,
        tile_base: u8,
        #[serde(default)]
        regions: Vec<Region>,
    },
    OutcomeTable {
        sources: Vec<String>,
        address: usize,
        values: Vec<u8>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineProfile {
    #[serde(default)]
    pub passes: Vec<PassEntry>,
    #[serde(default)]
    pub fixups: Vec<FixupEntry>,
}

impl PipelineProfile {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            RandomiserError::Config(format!("could not read profile {}: {e}", path.display()))
        })?;
        Self::from_json(&text)
    }

    fn check_names(&self, toggles: &BTreeMap<String, bool>) -> Result<()> {
        let mut seen = BTreeSet::new();
        let names = self
            .passes
            .iter()
            .map(|p| &p.name)
            .chain(self.fixups.iter().map(|f| &f.name));
        for name in names {
            if !seen.insert(name.as_str()) {
                return Err(RandomiserError::Config(format!(
                    "profile names {name:?} more than once"
                )));
            }
        }
        if let Some(unknown) = toggles.keys().find(|k| !seen.contains(k.as_str())) {
            return Err(RandomiserError::Config(format!(
                "toggle {unknown:?} does not name a pass or fix-up"
            )));
        }
        Ok(())
    }

    /// Instantiate the enabled entries, in profile order.
    pub fn build(
        &self,
        image_size: usize,
        region: Region,
        toggles: &BTreeMap<String, bool>,
        tracks: Option<&SoundTrackSet>,
    ) -> Result<Pipeline> {
        self.check_names(toggles)?;
        let is_on = |name: &str, default: bool| toggles.get(name).copied().unwrap_or(default);

        let mut pipeline = Pipeline::new(image_size, region);
        for entry in &self.passes {
            if !is_on(&entry.name, entry.enabled) {
                debug!("pass {} disabled", entry.name);
                continue;
            }
            pipeline.push_pass(entry.build(tracks)?);
        }
        for entry in &self.fixups {
            if !is_on(&entry.name, entry.enabled) {
                debug!("fixup {} disabled", entry.name);
                continue;
            }
            pipeline.push_fixup(entry.build());
        }
        Ok(pipeline)
    }
}

impl PassEntry {
    fn build(&self, tracks: Option<&SoundTrackSet>) -> Result<Box<dyn Randomizer>> {
        let name = self.name.clone();
        let pass: Box<dyn Randomizer> = match &self.kind {
            PassKind::Shuffle { address, values } => {
                Box::new(TableShuffle::new(name, *address, values.clone()))
            }
            PassKind::Weighted { addresses, choices } => Box::new(WeightedPick::new(
                name,
                addresses.clone(),
                choices
                    .iter()
                    .map(|c| WeightedChoice {
                        value: c.value,
                        weight: c.weight,
                    })
                    .collect(),
            )),
            PassKind::Music {
                slots,
                streaming_safe_only,
            } => {
                let tracks = tracks.ok_or_else(|| {
                    RandomiserError::Config(format!("pass {name:?} needs a sound-track table"))
                })?;
                let slots = slots
                    .iter()
                    .map(|s| -> Result<MusicSlot> {
                        Ok(MusicSlot {
                            usage: SoundTrackUsage::from_name(&s.usage)?,
                            address: s.address,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Box::new(MusicRandomizer::new(
                    name,
                    tracks.clone(),
                    slots,
                    *streaming_safe_only,
                ))
            }
        };
        Ok(pass)
    }
}

impl FixupEntry {
    fn build(&self) -> Box<dyn Fixup> {
        let name = self.name.clone();
        let fixup: Box<dyn Fixup> = match &self.kind {
            FixupKind::Bytes { address, data } => Box::new(FixedBytes::new(name, *address, data.clone())),
            FixupKind::SeedBanner {
                address,
                tile_base,
                regions,
            } => Box::new(SeedBanner::new(name, *address, *tile_base, regions.clone())),
            FixupKind::OutcomeTable {
                sources,
                address,
                values,
            } => Box::new(OutcomeTable::new(name, sources.clone(), *address, values.clone())),
        };
        fixup
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = r#"{
        "passes": [
            { "name": "stages", "kind": "shuffle", "address": 0, "values": [1, 2, 3, 4] },
            { "name": "weakness", "kind": "weighted", "enabled": false,
              "addresses": [8, 9], "choices": [{ "value": 1, "weight": 2 }] },
            { "name": "music", "kind": "music",
              "slots": [{ "usage": "Boss", "address": 12 }] }
        ],
        "fixups": [
            { "name": "fast_text", "kind": "bytes", "address": 14, "data": [0] },
            { "name": "banner", "kind": "seed_banner", "address": 16, "tile_base": 0,
              "regions": ["usa"] },
            { "name": "portraits", "kind": "outcome_table", "sources": ["stages", "weakness"],
              "address": 4, "values": [9, 8, 7, 6] }
        ]
    }"#;

    fn toggles(pairs: &[(&str, bool)]) -> BTreeMap<String, bool> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn parses_entries_in_order() {
        let profile = PipelineProfile::from_json(PROFILE).unwrap();
        let names: Vec<&str> = profile.passes.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["stages", "weakness", "music"]);
        assert!(!profile.passes[1].enabled);
        assert!(profile.fixups[0].enabled);
        assert!(matches!(
            profile.fixups[1].kind,
            FixupKind::SeedBanner { tile_base: 0, .. }
        ));
        let FixupKind::OutcomeTable { sources, .. } = &profile.fixups[2].kind else {
            panic!("portraits is not an outcome table");
        };
        assert_eq!(sources, &["stages", "weakness"]);
    }

    #[test]
    fn toggles_override_defaults_but_keep_order() {
        let profile = PipelineProfile::from_json(PROFILE).unwrap();
        let pipeline = profile
            .build(
                32,
                Region::Usa,
                &toggles(&[("weakness", true), ("music", false)]),
                None,
            )
            .unwrap();
        assert_eq!(pipeline.pass_names(), ["stages", "weakness"]);
    }

    #[test]
    fn music_without_tracks_is_a_config_error() {
        let profile = PipelineProfile::from_json(PROFILE).unwrap();
        let err = profile
            .build(32, Region::Usa, &BTreeMap::new(), None)
            .err()
            .unwrap();
        assert!(matches!(err, RandomiserError::Config(_)));
    }

    #[test]
    fn unknown_toggle_is_rejected() {
        let profile = PipelineProfile::from_json(PROFILE).unwrap();
        let err = profile
            .build(32, Region::Usa, &toggles(&[("stagse", true)]), None)
            .err()
            .unwrap();
        assert!(matches!(err, RandomiserError::Config(_)));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let profile = PipelineProfile::from_json(
            r#"{ "passes": [
                { "name": "a", "kind": "shuffle", "address": 0, "values": [] },
                { "name": "a", "kind": "shuffle", "address": 1, "values": [] }
            ] }"#,
        )
        .unwrap();
        assert!(profile.build(4, Region::Usa, &BTreeMap::new(), None).is_err());
    }

    #[test]
    fn unknown_music_usage_is_rejected() {
        let profile = PipelineProfile::from_json(
            r#"{ "passes": [{ "name": "music", "kind": "music",
                 "slots": [{ "usage": "lullaby", "address": 0 }] }] }"#,
        )
        .unwrap();
        let tracks = SoundTrackSet::default();
        let err = profile
            .build(4, Region::Usa, &BTreeMap::new(), Some(&tracks))
            .err()
            .unwrap();
        assert!(matches!(err, RandomiserError::UnknownUsage(_)));
    }
}
