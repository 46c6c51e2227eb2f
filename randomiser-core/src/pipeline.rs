use log::{debug, info};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::ips::apply_ips;
use crate::patch::Patch;
use crate::seed::{self, RandomStream};
use crate::{ErrorKind, RandomiserError, Region, Result};

/// One self-contained randomization step.
///
/// A pass only sees the shared edit set and the shared stream, and may not
/// hold on to either after `randomize` returns.
pub trait Randomizer {
    fn name(&self) -> &str;

    fn randomize(&mut self, patch: &mut Patch, rng: &mut RandomStream) -> Result<()>;

    /// What the pass decided, for fix-ups that must follow it. Read once,
    /// right after `randomize`.
    fn outcome(&self) -> Option<Vec<usize>> {
        None
    }
}

/// Edit-producing step run after every pass.
pub trait Fixup {
    fn name(&self) -> &str;

    fn apply(&self, patch: &mut Patch, ctx: &FixupContext<'_>) -> Result<()>;
}

pub struct FixupContext<'a> {
    pub seed: u32,
    pub seed_code: &'a str,
    pub region: Region,
    pub outcomes: &'a Outcomes,
}

/// Passes that ran, with whatever outcome each one reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcomes {
    entries: BTreeMap<String, Option<Vec<usize>>>,
}

impl Outcomes {
    pub fn record(&mut self, pass: &str, outcome: Option<Vec<usize>>) {
        self.entries.insert(pass.to_string(), outcome);
    }

    pub fn ran(&self, pass: &str) -> bool {
        self.entries.contains_key(pass)
    }

    pub fn get(&self, pass: &str) -> Option<&[usize]> {
        self.entries.get(pass)?.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Seeding,
    Running(usize),
    PostProcessing,
    Assembling,
    Done,
    Aborted(ErrorKind),
}

/// Everything the generation stages produced.
#[derive(Debug, Clone)]
pub struct Generated {
    pub seed: u32,
    pub seed_code: String,
    pub patch: Patch,
    pub outcomes: Outcomes,
    pub passes: Vec<String>,
}

pub struct Pipeline {
    image_size: usize,
    region: Region,
    names: Vec<String>,
    passes: Vec<Box<dyn Randomizer>>,
    fixups: Vec<Box<dyn Fixup>>,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(image_size: usize, region: Region) -> Self {
        Self {
            image_size,
            region,
            names: Vec::new(),
            passes: Vec::new(),
            fixups: Vec::new(),
            state: PipelineState::Idle,
        }
    }

    pub fn push_pass(&mut self, pass: Box<dyn Randomizer>) {
        self.names.push(pass.name().to_string());
        self.passes.push(pass);
    }

    pub fn push_fixup(&mut self, fixup: Box<dyn Fixup>) {
        self.fixups.push(fixup);
    }

    pub fn with_pass(mut self, pass: impl Randomizer + 'static) -> Self {
        self.push_pass(Box::new(pass));
        self
    }

    pub fn with_fixup(mut self, fixup: impl Fixup + 'static) -> Self {
        self.push_fixup(Box::new(fixup));
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Configured passes in run order. Unaffected by `generate`, which
    /// consumes the passes themselves; `Generated::passes` lists what ran.
    pub fn pass_names(&self) -> Vec<&str> {
        self.names.iter().map(String::as_str).collect()
    }

    fn transition(&mut self, next: PipelineState) {
        debug!("pipeline: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            info!("pipeline aborted: {err}");
            self.transition(PipelineState::Aborted(err.kind()));
        }
        result
    }

    /// Seed the stream, run every pass once in order, then every fix-up.
    ///
    /// Passes are consumed; a pipeline generates at most once.
    pub fn generate(&mut self, requested_seed: Option<i64>) -> Result<Generated> {
        if self.state != PipelineState::Idle {
            return Err(RandomiserError::Config(format!(
                "pipeline cannot generate from state {:?}",
                self.state
            )));
        }
        let result = self.generate_inner(requested_seed);
        self.settle(result)
    }

    fn generate_inner(&mut self, requested_seed: Option<i64>) -> Result<Generated> {
        self.transition(PipelineState::Seeding);
        let (seed, mut rng) = seed::initialize(requested_seed);
        let seed_code = seed::encode(seed);
        info!("seed {seed} ({seed_code})");

        let mut patch = Patch::new(self.image_size);
        let mut outcomes = Outcomes::default();
        let mut ran = Vec::new();

        for (index, mut pass) in std::mem::take(&mut self.passes).into_iter().enumerate() {
            self.transition(PipelineState::Running(index));
            let before = patch.len();
            pass.randomize(&mut patch, &mut rng)?;
            debug!("pass {}: {} edits", pass.name(), patch.len() - before);
            outcomes.record(pass.name(), pass.outcome());
            ran.push(pass.name().to_string());
        }

        self.transition(PipelineState::PostProcessing);
        let ctx = FixupContext {
            seed,
            seed_code: &seed_code,
            region: self.region,
            outcomes: &outcomes,
        };
        for fixup in &self.fixups {
            let before = patch.len();
            fixup.apply(&mut patch, &ctx)?;
            debug!("fixup {}: {} edits", fixup.name(), patch.len() - before);
        }

        Ok(Generated {
            seed,
            seed_code,
            patch,
            outcomes,
            passes: ran,
        })
    }

    /// Build the output image at `output` from the pristine `source`.
    pub fn assemble(
        &mut self,
        generated: &Generated,
        source: &Path,
        prepatch: Option<&[u8]>,
        output: &Path,
    ) -> Result<()> {
        if self.state != PipelineState::PostProcessing {
            return Err(RandomiserError::Config(format!(
                "pipeline cannot assemble from state {:?}",
                self.state
            )));
        }
        self.transition(PipelineState::Assembling);
        let result = assemble(&generated.patch, source, prepatch, output);
        let result = self.settle(result);
        if result.is_ok() {
            info!("wrote {}", output.display());
            self.transition(PipelineState::Done);
        }
        result
    }
}

/// `<region tag>-RNG-<encoded seed>.<ext>`
pub fn output_file_name(region: Region, seed: u32, extension: &str) -> String {
    format!("{}-RNG-{}.{}", region.tag(), seed::encode(seed), extension)
}

/// Copy of the source with the prepatch and then `patch` applied, written to
/// a temporary file beside `output` and renamed into place only once
/// complete. The source is never modified.
pub fn assemble(patch: &Patch, source: &Path, prepatch: Option<&[u8]>, output: &Path) -> Result<()> {
    let source_unavailable = |source_err: io::Error| RandomiserError::SourceUnavailable {
        path: source.to_path_buf(),
        source: source_err,
    };
    let mut image = fs::read(source).map_err(source_unavailable)?;
    if image.len() != patch.image_size() {
        return Err(source_unavailable(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "image is 0x{:X} bytes, expected 0x{:X}",
                image.len(),
                patch.image_size()
            ),
        )));
    }

    if let Some(ips) = prepatch {
        apply_ips(&mut image, ips)?;
    }
    patch.apply_to(&mut image)?;

    let dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let conflict = |source: io::Error| RandomiserError::OutputConflict {
        path: output.to_path_buf(),
        source,
    };
    fs::create_dir_all(&dir).map_err(conflict)?;
    let mut tmp = NamedTempFile::new_in(&dir).map_err(conflict)?;
    tmp.write_all(&image).map_err(conflict)?;
    tmp.flush().map_err(conflict)?;
    tmp.persist(output).map_err(|e| conflict(e.error))?;
    Ok(())
}
