//! Locating `latex`, `dvips` and `gs` on this machine.

use crate::lock::gs_version_with;
use crate::process::{ProcessRunner, SystemProcessRunner};
use crate::types::Settings;
use std::path::{Path, PathBuf};

#[cfg(not(windows))]
const STANDARD_DIRS: &[&str] = &[
    "/usr/bin",
    "/usr/local/bin",
    "/opt/local/bin",
    "/Library/TeX/texbin",
    "/usr/texbin",
    "/sw/bin",
    "/opt/homebrew/bin",
];

#[cfg(windows)]
const STANDARD_DIRS: &[&str] = &[
    r"C:\Program Files\MiKTeX*\miktex\bin\x64",
    r"C:\Program Files\MiKTeX*\miktex\bin",
    r"C:\Program Files (x86)\MiKTeX*\miktex\bin",
    r"C:\texlive\*\bin\windows",
    r"C:\texlive\*\bin\win64",
    r"C:\texlive\*\bin\win32",
    r"C:\Program Files\gs\gs*\bin",
    r"C:\Program Files (x86)\gs\gs*\bin",
];

#[cfg(not(windows))]
const LATEX_NAMES: &[&str] = &["latex"];
#[cfg(not(windows))]
const DVIPS_NAMES: &[&str] = &["dvips"];
#[cfg(not(windows))]
const GS_NAMES: &[&str] = &["gs"];

#[cfg(windows)]
const LATEX_NAMES: &[&str] = &["latex.exe"];
#[cfg(windows)]
const DVIPS_NAMES: &[&str] = &["dvips.exe"];
#[cfg(windows)]
const GS_NAMES: &[&str] = &["gswin64c.exe", "gswin32c.exe"];

/// Fills in executable paths, the temp directory and SVG support.
///
/// Returns `false` if `latex`, `dvips` or `gs` could not be found; the paths that were found
/// are still stored.
pub fn detect_settings(settings: &mut Settings, extra_path: &[PathBuf]) -> bool {
    detect_settings_with(settings, extra_path, &SystemProcessRunner)
}

/// Like [`detect_settings`], querying the ghostscript version through `runner`.
pub fn detect_settings_with(
    settings: &mut Settings,
    extra_path: &[PathBuf],
    runner: &dyn ProcessRunner,
) -> bool {
    let dirs = search_dirs(extra_path);
    settings.temp_dir = std::env::temp_dir();

    let mut all_found = true;
    for (names, slot) in [
        (LATEX_NAMES, &mut settings.latex_exec),
        (DVIPS_NAMES, &mut settings.dvips_exec),
        (GS_NAMES, &mut settings.gs_exec),
    ] {
        match find_in_dirs(&dirs, names) {
            Some(path) => {
                tracing::debug!(program = names[0], path = %path.display(), "found executable");
                *slot = path;
            }
            None => {
                tracing::warn!(program = names[0], "executable not found");
                all_found = false;
            }
        }
    }

    settings.want_svg = gs_version_with(runner, &settings.gs_exec)
        .is_some_and(|version| version.supports_svg());
    all_found
}

/// `extra_path`, then `PATH`, then the standard install locations (globs expanded).
pub fn search_dirs(extra_path: &[PathBuf]) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = extra_path.to_vec();
    if let Some(path) = std::env::var_os("PATH") {
        dirs.extend(std::env::split_paths(&path));
    }
    for pattern in STANDARD_DIRS {
        dirs.extend(expand_single_glob(pattern));
    }

    let mut seen = rustc_hash::FxHashSet::default();
    dirs.retain(|dir| !dir.as_os_str().is_empty() && seen.insert(dir.clone()));
    dirs
}

/// First `dir/name` that is an executable file, trying every name in a directory before
/// moving on to the next directory.
pub fn find_in_dirs(dirs: &[PathBuf], names: &[&str]) -> Option<PathBuf> {
    dirs.iter()
        .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Expands a path whose components contain at most one `*`, e.g. `C:\texlive\*\bin\win64`.
///
/// Matches are returned sorted in reverse so newer versioned directories come first. Patterns
/// without a `*` are returned as-is.
pub fn expand_single_glob(pattern: &str) -> Vec<PathBuf> {
    let path = Path::new(pattern);
    let components: Vec<_> = path.components().collect();
    let Some(star_at) = components
        .iter()
        .position(|c| c.as_os_str().to_string_lossy().contains('*'))
    else {
        return vec![path.to_path_buf()];
    };

    let parent: PathBuf = components[..star_at].iter().collect();
    let rest: PathBuf = components[star_at + 1..].iter().collect();
    let glob = components[star_at].as_os_str().to_string_lossy().into_owned();
    let Some((prefix, suffix)) = glob.split_once('*') else {
        return Vec::new();
    };

    let Ok(entries) = std::fs::read_dir(&parent) else {
        return Vec::new();
    };
    let mut matches: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let matched = name.len() >= prefix.len() + suffix.len()
                && name.starts_with(prefix)
                && name.ends_with(suffix);
            matched.then(|| entry.path().join(&rest))
        })
        .filter(|dir| dir.is_dir())
        .collect();
    matches.sort();
    matches.reverse();
    matches
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn make_executable(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn find_in_dirs_respects_directory_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let expected = make_executable(first.path(), "gs");
        make_executable(second.path(), "gs");

        let dirs = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        assert_eq!(find_in_dirs(&dirs, &["gs"]), Some(expected));
        assert_eq!(find_in_dirs(&dirs, &["no-such-tool"]), None);
    }

    #[test]
    fn non_executable_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("latex"), "").unwrap();
        assert_eq!(
            find_in_dirs(&[dir.path().to_path_buf()], &["latex"]),
            None
        );
    }

    #[test]
    fn single_glob_expands_to_existing_directories() {
        let root = tempfile::tempdir().unwrap();
        for version in ["gs9.50", "gs10.02", "other"] {
            std::fs::create_dir_all(root.path().join(version).join("bin")).unwrap();
        }
        std::fs::create_dir_all(root.path().join("gs8.00")).unwrap();

        let pattern = format!("{}/gs*/bin", root.path().display());
        assert_eq!(
            expand_single_glob(&pattern),
            vec![
                root.path().join("gs9.50").join("bin"),
                root.path().join("gs10.02").join("bin"),
            ]
        );
        assert_eq!(
            expand_single_glob("/usr/bin"),
            vec![PathBuf::from("/usr/bin")]
        );
    }

    #[test]
    fn extra_path_is_searched_first() {
        let extra = tempfile::tempdir().unwrap();
        let dirs = search_dirs(&[extra.path().to_path_buf()]);
        assert_eq!(dirs.first(), Some(&extra.path().to_path_buf()));
        assert!(dirs.iter().any(|dir| dir == Path::new("/usr/bin")));
    }
}
