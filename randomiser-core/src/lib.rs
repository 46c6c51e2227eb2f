use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod ips;
pub mod passes;
pub mod patch;
pub mod pipeline;
pub mod profile;
pub mod seed;
pub mod shuffle;
pub mod soundtrack;

use ips::IpsPatch;
use pipeline::output_file_name;
use profile::PipelineProfile;
use soundtrack::SoundTrackSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    #[default]
    Usa,
    Japan,
}

impl Region {
    /// Prefix of the output file name.
    pub fn tag(self) -> &'static str {
        match self {
            Region::Usa => "MM2",
            Region::Japan => "RM2",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomiserSettings {
    /// Missing or negative means "draw one".
    pub seed: Option<i64>,
    pub region: Region,
    pub source_path: PathBuf,
    pub prepatch_path: Option<PathBuf>,
    pub profile_path: PathBuf,
    pub soundtrack_path: Option<PathBuf>,
    pub output_dir: PathBuf,
    /// Per-name overrides of the profile's `enabled` flags.
    #[serde(default)]
    pub pass_toggles: BTreeMap<String, bool>,
    #[serde(default)]
    pub emit_ips: bool,
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Error)]
pub enum RandomiserError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("write of {len} bytes at 0x{address:06X} exceeds image size 0x{image_size:X}")]
    OutOfBounds {
        address: usize,
        len: usize,
        image_size: usize,
    },
    #[error("malformed IPS patch: {0}")]
    MalformedPatch(String),
    #[error("source image {} unavailable: {source}", .path.display())]
    SourceUnavailable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot write output {}: {source}", .path.display())]
    OutputConflict {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("pass {pass} failed: {reason}")]
    PassFailure { pass: String, reason: String },
    #[error("invalid seed string {0:?}")]
    InvalidSeed(String),
    #[error("unknown sound-track usage {0:?}")]
    UnknownUsage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Io,
    Config,
    OutOfBounds,
    MalformedPatch,
    SourceUnavailable,
    OutputConflict,
    PassFailure,
    InvalidSeed,
    UnknownUsage,
}

impl RandomiserError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RandomiserError::Io(_) => ErrorKind::Io,
            RandomiserError::Json(_) | RandomiserError::Config(_) => ErrorKind::Config,
            RandomiserError::OutOfBounds { .. } => ErrorKind::OutOfBounds,
            RandomiserError::MalformedPatch(_) => ErrorKind::MalformedPatch,
            RandomiserError::SourceUnavailable { .. } => ErrorKind::SourceUnavailable,
            RandomiserError::OutputConflict { .. } => ErrorKind::OutputConflict,
            RandomiserError::PassFailure { .. } => ErrorKind::PassFailure,
            RandomiserError::InvalidSeed(_) => ErrorKind::InvalidSeed,
            RandomiserError::UnknownUsage(_) => ErrorKind::UnknownUsage,
        }
    }
}

pub type Result<T> = std::result::Result<T, RandomiserError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub seed: u32,
    pub seed_code: String,
    pub output_path: PathBuf,
    pub passes: Vec<String>,
    pub edit_count: usize,
}

fn read_asset(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| {
        RandomiserError::Config(format!("could not read {}: {e}", path.display()))
    })
}

/// Write the side files next to a committed image. On failure the image and
/// any side file already written are removed again.
fn write_artefacts(output_path: &Path, artefacts: &[(PathBuf, Vec<u8>)]) -> Result<()> {
    for (i, (path, bytes)) in artefacts.iter().enumerate() {
        if let Err(e) = fs::write(path, bytes) {
            warn!("could not write {}: {e}; discarding output", path.display());
            for (written, _) in &artefacts[..i] {
                let _ = fs::remove_file(written);
            }
            let _ = fs::remove_file(output_path);
            return Err(RandomiserError::OutputConflict {
                path: path.clone(),
                source: e,
            });
        }
        info!("wrote {}", path.display());
    }
    Ok(())
}

/// Run the whole pipeline: seed, passes, fix-ups, then assemble the output
/// image in `settings.output_dir`.
pub fn run(settings: RandomiserSettings) -> Result<RunReport> {
    let source = &settings.source_path;
    let meta = fs::metadata(source).map_err(|e| RandomiserError::SourceUnavailable {
        path: source.clone(),
        source: e,
    })?;
    if !meta.is_file() {
        return Err(RandomiserError::SourceUnavailable {
            path: source.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
        });
    }
    let image_size = usize::try_from(meta.len()).map_err(|_| {
        RandomiserError::Config(format!("{} is too large", source.display()))
    })?;

    let profile = PipelineProfile::load(&settings.profile_path)?;
    let tracks = settings
        .soundtrack_path
        .as_deref()
        .map(SoundTrackSet::load)
        .transpose()?;
    let prepatch = settings
        .prepatch_path
        .as_deref()
        .map(read_asset)
        .transpose()?;

    let mut pipeline = profile.build(
        image_size,
        settings.region,
        &settings.pass_toggles,
        tracks.as_ref(),
    )?;
    let generated = pipeline.generate(settings.seed)?;

    let extension = source
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("nes");
    let output_path = settings
        .output_dir
        .join(output_file_name(settings.region, generated.seed, extension));

    // Everything that can fail is built before the image is committed.
    let mut artefacts = Vec::new();
    if settings.emit_ips {
        let ips = IpsPatch::from_patch(&generated.patch)?.to_bytes();
        artefacts.push((output_path.with_extension("ips"), ips));
    }
    if settings.debug {
        let mut log = format!(
            "MM2 Randomizer seed: {} ({})\n",
            generated.seed, generated.seed_code
        );
        log.push_str(&format!("source: {}\n", source.display()));
        log.push_str(&format!("passes: {}\n", generated.passes.join(", ")));
        log.push_str(&format!("edits: {}\n", generated.patch.len()));
        log.push_str(&generated.patch.describe());
        artefacts.push((output_path.with_extension("log"), log.into_bytes()));
    }

    pipeline.assemble(&generated, source, prepatch.as_deref(), &output_path)?;
    write_artefacts(&output_path, &artefacts)?;

    Ok(RunReport {
        seed: generated.seed,
        seed_code: generated.seed_code,
        output_path,
        passes: generated.passes,
        edit_count: generated.patch.len(),
    })
}
