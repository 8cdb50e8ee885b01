#![forbid(unsafe_code)]

//! `klfbackend` renders LaTeX formulas to PNG, EPS, PDF and SVG by driving `latex`, `dvips` and
//! ghostscript (`gs`) as external programs.
//!
//! The entry point is [`get_latex_formula`]: it takes an [`Input`] and [`Settings`] and returns
//! an [`Output`] whose [`Output::status`] tells exactly which stage failed and how. External
//! programs are started through the [`ProcessRunner`] trait, so the whole pipeline can be driven
//! by a test double via [`get_latex_formula_with`].
//!
//! ```no_run
//! use klfbackend::{Input, Settings, get_latex_formula, save_output_to_file};
//!
//! let mut settings = Settings::default();
//! klfbackend::detect_settings(&mut settings, &[]);
//! let input = Input {
//!     latex: r"e^{i\pi} + 1 = 0".to_string(),
//!     ..Default::default()
//! };
//! let output = get_latex_formula(&input, &settings);
//! if output.is_success() {
//!     save_output_to_file(&output, "euler.png", "").unwrap();
//! }
//! ```

pub mod detect;
pub mod eps;
pub mod error;
pub mod gs;
mod lock;
pub mod metadata;
mod pipeline;
pub mod process;
pub mod save;
pub mod template;
pub mod types;

pub use detect::{detect_settings, detect_settings_with};
pub use eps::BoundingBox;
pub use error::{BackendError, ErrorKind, Result, Stage};
pub use gs::GsVersion;
pub use lock::{RenderSession, gs_version_with, with_exclusive_render};
pub use pipeline::{get_latex_formula, get_latex_formula_with};
pub use process::{ProcessOutcome, ProcessRequest, ProcessRunner, SystemProcessRunner};
pub use save::{
    SaveError, SaveFormat, available_save_formats, save_output_to_device, save_output_to_file,
};
pub use template::{DefaultTemplateGenerator, TemplateGenerator, assemble_document};
pub use types::{Color, Input, Output, Settings, SettingsError, Status};

/// Library version, as embedded in PNG metadata.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version of the ghostscript at `gs_exec`, queried once per path and process.
pub fn gs_version(gs_exec: &std::path::Path) -> Option<GsVersion> {
    gs_version_with(&SystemProcessRunner, gs_exec)
}

#[cfg(test)]
mod tests;
