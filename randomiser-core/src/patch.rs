use log::debug;
use std::fmt::Write as _;

use crate::{RandomiserError, Result};

/// A single byte-range write into the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub address: usize,
    pub bytes: Vec<u8>,
    pub note: String,
}

impl Edit {
    pub fn end(&self) -> usize {
        self.address + self.bytes.len()
    }
}

/// Append-only set of edits against an image of a fixed, declared size.
///
/// Edits are applied in the order they were added, so a later edit wins
/// wherever it overlaps an earlier one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    image_size: usize,
    edits: Vec<Edit>,
}

impl Patch {
    pub fn new(image_size: usize) -> Self {
        Self {
            image_size,
            edits: Vec::new(),
        }
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    pub fn edits(&self) -> &[Edit] {
        &self.edits
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Record a write of `bytes` at `address`.
    pub fn add(
        &mut self,
        address: usize,
        bytes: impl Into<Vec<u8>>,
        note: impl Into<String>,
    ) -> Result<()> {
        self.push(Edit {
            address,
            bytes: bytes.into(),
            note: note.into(),
        })
    }

    pub fn add_byte(&mut self, address: usize, value: u8, note: impl Into<String>) -> Result<()> {
        self.add(address, vec![value], note)
    }

    /// Append every edit of `other`, keeping its order. Each edit is checked
    /// against this patch's image size.
    pub fn absorb(&mut self, other: Patch) -> Result<()> {
        for edit in other.edits {
            self.push(edit)?;
        }
        Ok(())
    }

    fn push(&mut self, edit: Edit) -> Result<()> {
        check_bounds(edit.address, edit.bytes.len(), self.image_size)?;
        if let Some(prev) = self
            .edits
            .iter()
            .rev()
            .find(|e| e.address < edit.end() && edit.address < e.end())
        {
            debug!(
                "edit at 0x{:06X} ({}) overlaps earlier edit at 0x{:06X} ({})",
                edit.address, edit.note, prev.address, prev.note
            );
        }
        self.edits.push(edit);
        Ok(())
    }

    /// Write every edit into `image` in append order.
    pub fn apply_to(&self, image: &mut [u8]) -> Result<()> {
        if image.len() != self.image_size {
            return Err(RandomiserError::Config(format!(
                "patch declared for a 0x{:X}-byte image, got 0x{:X} bytes",
                self.image_size,
                image.len()
            )));
        }
        for edit in &self.edits {
            check_bounds(edit.address, edit.bytes.len(), image.len())?;
            image[edit.address..edit.end()].copy_from_slice(&edit.bytes);
        }
        Ok(())
    }

    /// Human-readable listing of every edit, one per line.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for edit in &self.edits {
            let _ = writeln!(
                out,
                "0x{:06X} +{:<4} {}",
                edit.address,
                edit.bytes.len(),
                edit.note
            );
        }
        out
    }
}

pub(crate) fn check_bounds(address: usize, len: usize, image_size: usize) -> Result<()> {
    match address.checked_add(len) {
        Some(end) if end <= image_size => Ok(()),
        _ => Err(RandomiserError::OutOfBounds {
            address,
            len,
            image_size,
        }),
    }
}
