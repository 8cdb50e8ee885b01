//! Ghostscript version detection and the device choices that depend on it.

use crate::process::{ProcessOutcome, ProcessRequest, ProcessRunner};
use regex::Regex;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GsVersion {
    pub major: u32,
    pub minor: u32,
}

/// Oldest ghostscript with a usable `svg` output device.
pub const GS_SVG_MIN_VERSION: GsVersion = GsVersion::new(8, 64);

/// `eps2write` replaced `epswrite` in this release.
pub const GS_EPS2WRITE_MIN_VERSION: GsVersion = GsVersion::new(9, 14);

const VERSION_QUERY_TIMEOUT: Duration = Duration::from_secs(20);

impl GsVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parses `gs --version` output such as `9.55.0`, `9.05` or `10.02.1`.
    pub fn parse(text: &str) -> Option<Self> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"^\s*(\d+)\.(\d+)").expect("static regex must compile")
        });
        let caps = re.captures(text)?;
        let major = caps.get(1)?.as_str().parse().ok()?;
        let minor = caps.get(2)?.as_str().parse().ok()?;
        Some(Self { major, minor })
    }

    pub fn supports_svg(self) -> bool {
        self >= GS_SVG_MIN_VERSION
    }

    /// Device used to rewrite an EPS with outlined fonts.
    pub fn eps_device(self) -> &'static str {
        if self >= GS_EPS2WRITE_MIN_VERSION {
            "eps2write"
        } else {
            "epswrite"
        }
    }
}

impl fmt::Display for GsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.major, self.minor)
    }
}

/// Runs `gs --version` without any caching.
pub(crate) fn query_gs_version(runner: &dyn ProcessRunner, gs_exec: &Path) -> Option<GsVersion> {
    let request = ProcessRequest::new(gs_exec)
        .arg("--version")
        .timeout(Some(VERSION_QUERY_TIMEOUT));
    match runner.run(&request) {
        ProcessOutcome::Exited {
            code: 0, stdout, ..
        } => {
            let text = String::from_utf8_lossy(&stdout);
            let version = GsVersion::parse(&text);
            if version.is_none() {
                tracing::warn!(
                    program = %gs_exec.display(),
                    output = %text.trim(),
                    "unrecognized ghostscript version string"
                );
            }
            version
        }
        other => {
            tracing::warn!(
                program = %gs_exec.display(),
                outcome = ?other,
                "ghostscript version query failed"
            );
            None
        }
    }
}
