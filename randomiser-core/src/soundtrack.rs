use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::ops::{BitOr, BitOrAssign};
use std::path::Path;

use crate::{RandomiserError, Result};

/// Bitmask of the contexts a track may be used in.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SoundTrackUsage(u8);

impl SoundTrackUsage {
    pub const NONE: Self = Self(0);
    pub const STAGE: Self = Self(1 << 0);
    pub const BOSS: Self = Self(1 << 1);
    pub const FORTRESS: Self = Self(1 << 2);
    pub const TITLE: Self = Self(1 << 3);
    pub const CREDITS: Self = Self(1 << 4);

    const NAMES: &'static [(&'static str, SoundTrackUsage)] = &[
        ("stage", Self::STAGE),
        ("boss", Self::BOSS),
        ("fortress", Self::FORTRESS),
        ("title", Self::TITLE),
        ("credits", Self::CREDITS),
    ];

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// Look up a single usage name, ignoring case.
    pub fn from_name(name: &str) -> Result<Self> {
        let key = normalize(name);
        Self::NAMES
            .iter()
            .find(|(n, _)| *n == key)
            .map(|(_, usage)| *usage)
            .ok_or_else(|| RandomiserError::UnknownUsage(name.to_string()))
    }

    /// Combine the bits of every tag. Any unrecognised tag is an error.
    pub fn from_tags<'a>(tags: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut usage = Self::NONE;
        for tag in tags {
            usage |= Self::from_name(tag)?;
        }
        Ok(usage)
    }
}

impl BitOr for SoundTrackUsage {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SoundTrackUsage {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

fn normalize(tag: &str) -> String {
    tag.to_lowercase()
}

/// Set of tags compared without regard to case. Stored lowercased.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct TagSet(BTreeSet<String>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if an equal tag was already present.
    pub fn insert(&mut self, tag: &str) -> bool {
        self.0.insert(normalize(tag))
    }

    pub fn remove(&mut self, tag: &str) -> bool {
        self.0.remove(&normalize(tag))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(&normalize(tag))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for TagSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for tag in iter {
            set.insert(tag.as_ref());
        }
        set
    }
}

impl From<Vec<String>> for TagSet {
    fn from(tags: Vec<String>) -> Self {
        tags.into_iter().collect()
    }
}

impl From<TagSet> for Vec<String> {
    fn from(tags: TagSet) -> Self {
        tags.0.into_iter().collect()
    }
}

fn default_title() -> String {
    "UNKNOWN".to_string()
}

fn default_true() -> bool {
    true
}

fn default_start_address() -> String {
    "0".to_string()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundTrack {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_true")]
    pub streaming_safe: bool,
    #[serde(default)]
    pub uses: TagSet,
    #[serde(default = "default_start_address")]
    pub start_address: String,
    #[serde(default)]
    pub track_data: String,
}

impl Default for SoundTrack {
    fn default() -> Self {
        Self {
            enabled: false,
            title: default_title(),
            streaming_safe: true,
            uses: TagSet::new(),
            start_address: default_start_address(),
            track_data: String::new(),
        }
    }
}

impl SoundTrack {
    /// Recomputed from `uses` on every call.
    pub fn usage(&self) -> Result<SoundTrackUsage> {
        SoundTrackUsage::from_tags(self.uses.iter())
    }

    /// `start_address` as a number: `0x`-prefixed hex, otherwise decimal.
    pub fn start_address(&self) -> Result<usize> {
        let raw = self.start_address.trim();
        let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            Some(hex) => usize::from_str_radix(hex, 16),
            None => raw.parse(),
        };
        parsed.map_err(|_| {
            RandomiserError::Config(format!(
                "track {:?} has invalid start address {:?}",
                self.title, self.start_address
            ))
        })
    }

    /// Decode `track_data` as hex, ignoring whitespace.
    pub fn track_bytes(&self) -> Result<Vec<u8>> {
        let digits: Vec<u8> = self
            .track_data
            .bytes()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        if digits.len() % 2 != 0 {
            return Err(self.bad_track_data());
        }
        digits
            .chunks(2)
            .map(|pair| {
                std::str::from_utf8(pair)
                    .ok()
                    .and_then(|s| u8::from_str_radix(s, 16).ok())
                    .ok_or_else(|| self.bad_track_data())
            })
            .collect()
    }

    fn bad_track_data(&self) -> RandomiserError {
        RandomiserError::Config(format!("track {:?} has invalid track data", self.title))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundTrackSet {
    #[serde(default)]
    pub sound_tracks: Vec<SoundTrack>,
}

impl SoundTrackSet {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            RandomiserError::Config(format!(
                "could not read sound tracks {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&text)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SoundTrack> {
        self.sound_tracks.iter()
    }

    pub fn len(&self) -> usize {
        self.sound_tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sound_tracks.is_empty()
    }

    /// Indices of enabled tracks usable for `usage`, in table order.
    pub fn candidates(&self, usage: SoundTrackUsage, streaming_safe_only: bool) -> Result<Vec<usize>> {
        let mut out = Vec::new();
        for (idx, track) in self.sound_tracks.iter().enumerate() {
            if !track.enabled || (streaming_safe_only && !track.streaming_safe) {
                continue;
            }
            if track.usage()?.contains(usage) {
                out.push(idx);
            }
        }
        Ok(out)
    }
}
