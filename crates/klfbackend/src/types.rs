use crate::error::{BackendError, ErrorKind};
use crate::template::TemplateGenerator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// An RGBA color. Only the alpha values `0` and "anything else" are distinguished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const TRANSPARENT: Color = Color::rgba(255, 255, 255, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn is_transparent(self) -> bool {
        self.a == 0
    }

    pub fn is_opaque_white(self) -> bool {
        !self.is_transparent() && self.r == 255 && self.g == 255 && self.b == 255
    }

    pub fn css_rgb(self) -> String {
        format!("rgb({}, {}, {})", self.r, self.g, self.b)
    }

    pub fn css_rgba(self) -> String {
        format!("rgba({}, {}, {}, {})", self.r, self.g, self.b, self.a)
    }

    /// `#rrggbb`, ignoring alpha.
    pub fn web_rgb(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// `#rrggbbaa`.
    pub fn web_rgba(self) -> String {
        format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
    }

    /// Parses `transparent`, `white`, `black`, `#rgb`, `#rrggbb` or `#rrggbbaa`.
    pub fn from_hex(text: &str) -> Option<Self> {
        let s = text.trim().to_ascii_lowercase();
        match s.as_str() {
            "transparent" => return Some(Self::TRANSPARENT),
            "white" => return Some(Self::WHITE),
            "black" => return Some(Self::BLACK),
            _ => {}
        }

        let hex = s.strip_prefix('#')?;
        fn hex2(b: &[u8]) -> Option<u8> {
            let hi = (*b.first()? as char).to_digit(16)? as u8;
            let lo = (*b.get(1)? as char).to_digit(16)? as u8;
            Some((hi << 4) | lo)
        }
        fn hex1(c: u8) -> Option<u8> {
            let v = (c as char).to_digit(16)? as u8;
            Some((v << 4) | v)
        }

        let bytes = hex.as_bytes();
        match bytes.len() {
            3 => Some(Self::rgb(
                hex1(bytes[0])?,
                hex1(bytes[1])?,
                hex1(bytes[2])?,
            )),
            6 => Some(Self::rgb(
                hex2(&bytes[0..2])?,
                hex2(&bytes[2..4])?,
                hex2(&bytes[4..6])?,
            )),
            8 => Some(Self::rgba(
                hex2(&bytes[0..2])?,
                hex2(&bytes[2..4])?,
                hex2(&bytes[4..6])?,
                hex2(&bytes[6..8])?,
            )),
            _ => None,
        }
    }
}

/// One render request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Input {
    /// The LaTeX code, or the complete document when `bypass_template` is set.
    pub latex: String,
    /// Math mode wrapper; `...` is replaced by `latex`, e.g. `\[ ... \]`.
    pub mathmode: String,
    /// Inserted after `\documentclass{...}`, before `\begin{document}`.
    pub preamble: String,
    /// Alpha is ignored.
    pub fg_color: Color,
    /// Alpha `0` is transparent, any other value is opaque.
    pub bg_color: Color,
    /// Passed to ghostscript's `-r` option.
    pub dpi: u32,
    pub bypass_template: bool,
    /// Script that replaces the latex (and optionally dvips) stages.
    pub user_script: Option<PathBuf>,
    pub user_script_params: BTreeMap<String, String>,
}

impl Default for Input {
    fn default() -> Self {
        Self {
            latex: String::new(),
            mathmode: "\\[ ... \\]".to_string(),
            preamble: String::new(),
            fg_color: Color::BLACK,
            bg_color: Color::TRANSPARENT,
            dpi: 600,
            bypass_template: false,
            user_script: None,
            user_script_params: BTreeMap::new(),
        }
    }
}

/// Largest accepted border offset, in points.
pub const MAX_BORDER_OFFSET: f64 = 1.0e6;

/// Process-wide backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory in which per-render work directories are created.
    pub temp_dir: PathBuf,
    pub latex_exec: PathBuf,
    pub dvips_exec: PathBuf,
    pub gs_exec: PathBuf,
    /// Border offsets in PostScript points, rounded to the nearest integer when applied.
    pub tborderoffset: f64,
    pub rborderoffset: f64,
    pub bborderoffset: f64,
    pub lborderoffset: f64,
    /// Re-measure the ink bounding box with ghostscript (transparent/white backgrounds only).
    pub calc_eps_bounding_box: bool,
    pub outline_fonts: bool,
    /// Keep intermediate `pngdata_raw`, `epsdata_raw` and `epsdata_bbox`.
    pub want_raw: bool,
    pub want_pdf: bool,
    pub want_svg: bool,
    /// Extra `NAME=value` environment entries for every child process.
    pub exec_env: Vec<String>,
    /// Kill a child that runs longer than this. `None` waits for it to exit.
    pub process_timeout_secs: Option<u64>,
    #[serde(skip)]
    pub template_generator: Option<Arc<dyn TemplateGenerator>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
            latex_exec: PathBuf::from("latex"),
            dvips_exec: PathBuf::from("dvips"),
            gs_exec: PathBuf::from("gs"),
            tborderoffset: 1.0,
            rborderoffset: 1.0,
            bborderoffset: 1.0,
            lborderoffset: 1.0,
            calc_eps_bounding_box: true,
            outline_fonts: true,
            want_raw: false,
            want_pdf: true,
            want_svg: false,
            exec_env: Vec::new(),
            process_timeout_secs: None,
            template_generator: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{side} border offset {value} is outside -{max}..={max} points", max = MAX_BORDER_OFFSET)]
    BorderOffset { side: &'static str, value: f64 },
}

impl Settings {
    pub fn from_json_str(text: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects border offsets that are not finite or exceed [`MAX_BORDER_OFFSET`].
    pub fn validate(&self) -> Result<(), SettingsError> {
        for (side, value) in [
            ("top", self.tborderoffset),
            ("right", self.rborderoffset),
            ("bottom", self.bborderoffset),
            ("left", self.lborderoffset),
        ] {
            if !value.is_finite() || value.abs() > MAX_BORDER_OFFSET {
                return Err(SettingsError::BorderOffset { side, value });
            }
        }
        Ok(())
    }

    pub fn from_json_file(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self, pretty: bool) -> Result<String, SettingsError> {
        Ok(if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        })
    }

    pub fn process_timeout(&self) -> Option<Duration> {
        self.process_timeout_secs.map(Duration::from_secs)
    }

    /// `exec_env` entries split at the first `=`; malformed entries are skipped.
    pub fn exec_env_pairs(&self) -> Vec<(String, String)> {
        self.exec_env
            .iter()
            .filter_map(|entry| {
                let (name, value) = entry.split_once('=')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                Some((name.to_string(), value.to_string()))
            })
            .collect()
    }

    /// The four border offsets as integer points, in `(top, right, bottom, left)` order.
    ///
    /// Values are clamped to [`MAX_BORDER_OFFSET`]; NaN counts as zero.
    pub fn border_offsets(&self) -> (i32, i32, i32, i32) {
        let points = |v: f64| v.clamp(-MAX_BORDER_OFFSET, MAX_BORDER_OFFSET).round() as i32;
        (
            points(self.tborderoffset),
            points(self.rborderoffset),
            points(self.bborderoffset),
            points(self.lborderoffset),
        )
    }
}

/// Outcome of a render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Success,
    Error(ErrorKind),
}

impl Status {
    pub fn is_success(self) -> bool {
        matches!(self, Status::Success)
    }

    pub fn kind(self) -> Option<ErrorKind> {
        match self {
            Status::Success => None,
            Status::Error(kind) => Some(kind),
        }
    }

    /// `0` for success, otherwise [`ErrorKind::code`].
    pub fn code(self) -> i32 {
        self.kind().map_or(0, ErrorKind::code)
    }
}

/// Everything a render produced, owned by the caller.
///
/// When `status` is an error, only `errorstr`, `input` and `settings` are filled.
#[derive(Debug, Clone, Default)]
pub struct Output {
    pub status: Status,
    pub errorstr: String,
    pub result: Option<image::DynamicImage>,
    pub dvidata: Vec<u8>,
    /// PNG exactly as ghostscript wrote it (only with `want_raw`).
    pub pngdata_raw: Vec<u8>,
    /// PNG with embedded metadata.
    pub pngdata: Vec<u8>,
    /// EPS exactly as dvips wrote it (only with `want_raw`).
    pub epsdata_raw: Vec<u8>,
    /// EPS after bounding-box correction, before font outlining (only with `want_raw`).
    pub epsdata_bbox: Vec<u8>,
    pub epsdata: Vec<u8>,
    pub pdfdata: Vec<u8>,
    pub svgdata: Vec<u8>,
    pub input: Input,
    pub settings: Settings,
    pub width_pt: f64,
    pub height_pt: f64,
}

impl Output {
    pub(crate) fn failed(input: &Input, settings: &Settings, err: BackendError) -> Self {
        Self {
            status: Status::Error(err.kind),
            errorstr: err.message,
            input: input.clone(),
            settings: settings.clone(),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}
