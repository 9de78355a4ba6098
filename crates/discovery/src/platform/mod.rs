//! Platform-specific same-user proof discovery.
//!
//! Some daemon builds (the sandboxed macOS app) do not expose a Unix socket.
//! Instead they listen on a random loopback port and drop a file named
//! `sameuserproof-<port>-<token>` somewhere only the same OS user can read.
//! Finding that file proves the port belongs to a daemon owned by this user
//! and yields the token to authenticate with.
//!
//! The OS-specific parts sit behind [`PlatformProbe`]. [`default_probe`]
//! picks an implementation for the running platform; everything else in this
//! module is platform-independent.

use std::fs;
use std::path::{Path, PathBuf};

use crate::env::{self, Environment};

mod macos;

pub use macos::{MacosProbe, parse_lsof_output};

const PROOF_PREFIX: &str = "sameuserproof-";

/// A located same-user proof file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SameUserProof {
    pub path: PathBuf,
    pub port: u16,
    pub token: String,
}

impl SameUserProof {
    /// Build a proof from a file path, if its name has the proof shape.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let (port, token) = parse_proof_file_name(name)?;
        Some(Self {
            path: path.to_path_buf(),
            port,
            token,
        })
    }
}

/// Split `sameuserproof-<port>-<token>` into its port and token.
pub fn parse_proof_file_name(name: &str) -> Option<(u16, String)> {
    let rest = name.strip_prefix(PROOF_PREFIX)?;
    let (port, token) = rest.split_once('-')?;
    let port = port.parse().ok()?;
    if token.is_empty() {
        return None;
    }
    Some((port, token.to_string()))
}

/// OS-specific inputs to proof discovery.
pub trait PlatformProbe: Send + Sync {
    /// Fast path: paths of files the daemon process currently has open.
    fn probe_processes(&self) -> Vec<PathBuf>;

    /// Slow path: directories that may contain a proof file.
    fn scan_roots(&self) -> Vec<PathBuf>;
}

/// Probe for platforms without proof-based discovery.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProbe;

impl PlatformProbe for NoProbe {
    fn probe_processes(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn scan_roots(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// The probe for the platform this binary runs on.
pub fn default_probe() -> Box<dyn PlatformProbe> {
    if cfg!(target_os = "macos") {
        Box::new(MacosProbe::default())
    } else {
        Box::new(NoProbe)
    }
}

/// Knobs for proof discovery, normally taken from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProofSearch {
    /// Use this file instead of probing.
    pub proof_file: Option<PathBuf>,
    /// Only scan this directory.
    pub scan_dir: Option<PathBuf>,
    pub disable_fast_probe: bool,
    pub verbose: bool,
}

impl ProofSearch {
    pub fn from_env(environment: &Environment) -> Self {
        Self {
            proof_file: environment.path(env::PROOF_FILE_VAR),
            scan_dir: environment.path(env::PROOF_DIR_VAR),
            disable_fast_probe: environment.flag(env::DISABLE_LSOF_VAR),
            verbose: environment.flag(env::DEBUG_VAR),
        }
    }
}

/// Locate a same-user proof: explicit file first, then the process probe,
/// then a scan of the candidate directories.
pub fn find_proof(probe: &dyn PlatformProbe, search: &ProofSearch) -> Option<SameUserProof> {
    let verbose = search.verbose;

    if let Some(path) = &search.proof_file {
        match SameUserProof::from_path(path) {
            Some(_) if !path.exists() => {
                tracing::warn!(path = %path.display(), "explicit proof file does not exist");
            }
            Some(proof) => {
                step!(verbose, path = %path.display(), "using explicit proof file");
                return Some(proof);
            }
            None => {
                tracing::warn!(path = %path.display(), "explicit proof file name is not a proof");
            }
        }
    }

    if search.disable_fast_probe {
        step!(verbose, "process probe disabled");
    } else {
        let open_files = probe.probe_processes();
        step!(verbose, count = open_files.len(), "process probe finished");
        if let Some(proof) = open_files
            .iter()
            .find_map(|path| SameUserProof::from_path(path))
        {
            step!(verbose, path = %proof.path.display(), "found proof via process probe");
            return Some(proof);
        }
    }

    let roots = match &search.scan_dir {
        Some(dir) => vec![dir.clone()],
        None => probe.scan_roots(),
    };
    for root in roots {
        step!(verbose, dir = %root.display(), "scanning for proof file");
        if let Some(proof) = scan_directory(&root) {
            step!(verbose, path = %proof.path.display(), "found proof via directory scan");
            return Some(proof);
        }
    }

    None
}

/// Look for a proof file directly inside `dir`.
///
/// Unreadable or missing directories are treated as empty.
pub fn scan_directory(dir: &Path) -> Option<SameUserProof> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "cannot read directory");
            return None;
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .collect();
    paths.sort();
    paths.iter().find_map(|path| SameUserProof::from_path(path))
}
