use std::path::PathBuf;
use std::process::Command;

use super::PlatformProbe;

/// Process name of the sandboxed network extension that owns the proof file.
const IPN_PROCESS: &str = "IPNExtension";
const GROUP_CONTAINER_SUFFIX: &str = ".io.tailscale.ipn.macos";
const FALLBACK_LSOF: &str = "/usr/sbin/lsof";

/// Proof discovery for the macOS app.
///
/// The fast path asks `lsof` which files the network extension holds open.
/// Running `lsof` against another process can trigger a privacy prompt,
/// which is why proof discovery is opt-in. The slow path walks the app's
/// group containers in the user's home directory.
#[derive(Debug, Clone)]
pub struct MacosProbe {
    lsof: PathBuf,
    home: Option<PathBuf>,
}

impl Default for MacosProbe {
    fn default() -> Self {
        Self {
            lsof: which::which("lsof").unwrap_or_else(|_| PathBuf::from(FALLBACK_LSOF)),
            home: dirs::home_dir(),
        }
    }
}

impl MacosProbe {
    pub fn new(lsof: impl Into<PathBuf>, home: Option<PathBuf>) -> Self {
        Self {
            lsof: lsof.into(),
            home,
        }
    }
}

impl PlatformProbe for MacosProbe {
    fn probe_processes(&self) -> Vec<PathBuf> {
        let output = Command::new(&self.lsof)
            .args(["-n", "-a", "-c", IPN_PROCESS, "-F", "n"])
            .output();

        match output {
            // lsof exits non-zero when nothing matched
            Ok(output) if output.status.success() => {
                parse_lsof_output(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                tracing::debug!(status = %output.status, "lsof found no matching process");
                Vec::new()
            }
            Err(e) => {
                tracing::debug!(lsof = %self.lsof.display(), error = %e, "could not run lsof");
                Vec::new()
            }
        }
    }

    fn scan_roots(&self) -> Vec<PathBuf> {
        let Some(home) = &self.home else {
            tracing::debug!("cannot determine home directory");
            return Vec::new();
        };

        let containers = home.join("Library").join("Group Containers");
        let entries = match std::fs::read_dir(&containers) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(dir = %containers.display(), error = %e, "cannot read group containers");
                return Vec::new();
            }
        };

        let mut roots: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.ends_with(GROUP_CONTAINER_SUFFIX))
            })
            .map(|entry| entry.path())
            .collect();
        roots.sort();
        roots
    }
}

/// Extract file names from `lsof -F n` field output.
///
/// Each open file is reported as a line starting with `n`; process (`p`)
/// and other field lines are skipped.
pub fn parse_lsof_output(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .filter_map(|line| line.strip_prefix('n'))
        .filter(|name| !name.is_empty())
        .map(PathBuf::from)
        .collect()
}
