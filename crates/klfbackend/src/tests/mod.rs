use crate::*;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;


/// One request seen by [`StubRunner`].
#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl Call {
    pub fn device(&self) -> Option<&str> {
        self.args.iter().find_map(|a| a.strip_prefix("-sDEVICE="))
    }
}

/// Stands in for `latex`, `dvips`, `gs` and user scripts, dispatching on the program's file name.
///
/// Every request is recorded; outputs are fabricated in the request's working directory.
#[derive(Debug)]
pub(crate) struct StubRunner {
    calls: Mutex<Vec<Call>>,
    tex_sources: Mutex<Vec<String>>,
    /// Program file names that cannot be started.
    pub missing: Vec<&'static str>,
    /// Program file names that get killed.
    pub crashing: Vec<&'static str>,
    pub latex_exit: i32,
    pub latex_writes_dvi: bool,
    pub latex_delay: Duration,
    /// `None` writes an EPS without a bounding box line.
    pub dvips_bbox: Option<&'static str>,
    pub gs_bbox: &'static str,
    /// Replaces the whole `bbox` device report.
    pub gs_bbox_report: Option<&'static str>,
    /// Report on stdout instead of stderr.
    pub gs_bbox_on_stdout: bool,
    pub gs_version: &'static str,
    /// A gs device that exits with status 1.
    pub failing_device: Option<&'static str>,
    /// A gs device that is killed, by the watchdog if `crash_timed_out`.
    pub crashing_device: Option<&'static str>,
    pub crash_timed_out: bool,
    /// A gs device that exits cleanly without writing its output file.
    pub silent_device: Option<&'static str>,
    /// Suffix of the file a user script writes (`.eps`, `.dvi`), if any.
    pub script_writes: Option<&'static str>,
}

impl Default for StubRunner {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            tex_sources: Mutex::new(Vec::new()),
            missing: Vec::new(),
            crashing: Vec::new(),
            latex_exit: 0,
            latex_writes_dvi: true,
            latex_delay: Duration::ZERO,
            dvips_bbox: Some("0 0 100 50"),
            gs_bbox: "0 0 100 50",
            gs_bbox_report: None,
            gs_bbox_on_stdout: false,
            gs_version: "9.55.0",
            failing_device: None,
            crashing_device: None,
            crash_timed_out: false,
            silent_device: None,
            script_writes: Some(".eps"),
        }
    }
}

pub(crate) const STUB_DVI: &[u8] = b"\xf7\x02stub dvi";
pub(crate) const STUB_PDF: &[u8] = b"%PDF-1.4\n% stub\n";
pub(crate) const STUB_SVG: &[u8] = b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>\n";
pub(crate) const STUB_PNG_SIZE: (u32, u32) = (4, 2);

pub(crate) fn stub_png() -> Vec<u8> {
    let (w, h) = STUB_PNG_SIZE;
    let img = image::RgbaImage::from_fn(w, h, |x, y| {
        if (x + y) % 2 == 0 {
            image::Rgba([0, 0, 0, 255])
        } else {
            image::Rgba([0, 0, 0, 0])
        }
    });
    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

fn eps_with_bbox(bbox: Option<&str>, creator: &str) -> Vec<u8> {
    let mut eps = String::from("%!PS-Adobe-3.0 EPSF-3.0\n");
    eps.push_str(&format!("%%Creator: {creator}\n"));
    if let Some(bbox) = bbox {
        eps.push_str(&format!("%%BoundingBox: {bbox}\n"));
    }
    eps.push_str("%%EndComments\nnewpath 0 0 moveto showpage\n");
    eps.into_bytes()
}

impl StubRunner {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn programs(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.program).collect()
    }

    pub fn devices(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.device().map(str::to_string))
            .collect()
    }

    /// The `.tex` documents latex was asked to compile.
    pub fn tex_sources(&self) -> Vec<String> {
        self.tex_sources.lock().unwrap().clone()
    }

    fn exited(code: i32, stdout: &[u8], stderr: &[u8]) -> ProcessOutcome {
        ProcessOutcome::Exited {
            code,
            stdout: stdout.to_vec(),
            stderr: stderr.to_vec(),
        }
    }

    fn latex(&self, cwd: &Path) -> ProcessOutcome {
        std::thread::sleep(self.latex_delay);
        if let Ok(tex) = std::fs::read_to_string(cwd.join("klfformula.tex")) {
            self.tex_sources.lock().unwrap().push(tex);
        }
        if self.latex_exit != 0 {
            return Self::exited(
                self.latex_exit,
                b"! Undefined control sequence.\nl.7 \\[ \\frac<1> \\]\n",
                b"",
            );
        }
        if self.latex_writes_dvi {
            std::fs::write(cwd.join("klfformula.dvi"), STUB_DVI).unwrap();
        }
        Self::exited(0, b"Output written on klfformula.dvi (1 page).\n", b"")
    }

    fn dvips(&self, request: &ProcessRequest, cwd: &Path) -> ProcessOutcome {
        let out = request
            .args
            .iter()
            .skip_while(|a| *a != "-o")
            .nth(1)
            .cloned()
            .unwrap_or_else(|| "klfformula.eps".to_string());
        std::fs::write(cwd.join(out), eps_with_bbox(self.dvips_bbox, "dvips(k)")).unwrap();
        Self::exited(0, b"", b"This is dvips(k)\n")
    }

    fn gs(&self, request: &ProcessRequest, cwd: &Path) -> ProcessOutcome {
        if request.args == ["--version"] {
            return Self::exited(0, format!("{}\n", self.gs_version).as_bytes(), b"");
        }
        let device = request
            .args
            .iter()
            .find_map(|a| a.strip_prefix("-sDEVICE="))
            .unwrap_or_default();
        if self.failing_device == Some(device) {
            return Self::exited(1, b"", b"Error: /undefined in foo\n");
        }
        if self.crashing_device == Some(device) {
            return ProcessOutcome::Crashed {
                stdout: Vec::new(),
                stderr: Vec::new(),
                timed_out: self.crash_timed_out,
            };
        }
        if self.silent_device == Some(device) {
            return Self::exited(0, b"", b"");
        }
        let output = request
            .args
            .iter()
            .find_map(|a| a.strip_prefix("-sOutputFile="))
            .map(|name| cwd.join(name));
        let data = match device {
            "bbox" => {
                let report = match self.gs_bbox_report {
                    Some(report) => report.to_string(),
                    None => format!(
                        "%%BoundingBox: {}\n%%HiResBoundingBox: {}\n",
                        self.gs_bbox, self.gs_bbox
                    ),
                };
                return if self.gs_bbox_on_stdout {
                    Self::exited(0, report.as_bytes(), b"")
                } else {
                    Self::exited(0, b"", report.as_bytes())
                };
            }
            "eps2write" | "epswrite" => eps_with_bbox(Some("0 0 7 7"), "GPL Ghostscript"),
            "pngalpha" | "png16m" => stub_png(),
            "pdfwrite" => STUB_PDF.to_vec(),
            "svg" => STUB_SVG.to_vec(),
            _ => return Self::exited(1, b"", b"Unknown device\n"),
        };
        if let Some(output) = output {
            std::fs::write(output, data).unwrap();
        }
        Self::exited(0, b"", b"")
    }

    fn script(&self, cwd: &Path) -> ProcessOutcome {
        match self.script_writes {
            Some(".eps") => {
                std::fs::write(
                    cwd.join("klfformula.eps"),
                    eps_with_bbox(self.dvips_bbox, "user script"),
                )
                .unwrap();
            }
            Some(".dvi") => std::fs::write(cwd.join("klfformula.dvi"), STUB_DVI).unwrap(),
            _ => {}
        }
        Self::exited(0, b"", b"")
    }
}

impl ProcessRunner for StubRunner {
    fn run(&self, request: &ProcessRequest) -> ProcessOutcome {
        let program = request
            .program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.calls.lock().unwrap().push(Call {
            program: program.clone(),
            args: request.args.clone(),
            cwd: request.cwd.clone(),
            env: request.env.clone(),
        });

        if self.missing.contains(&program.as_str()) {
            return ProcessOutcome::NotStarted {
                error: std::io::Error::new(std::io::ErrorKind::NotFound, "stub: not installed"),
            };
        }
        if self.crashing.contains(&program.as_str()) {
            return ProcessOutcome::Crashed {
                stdout: Vec::new(),
                stderr: b"Segmentation fault\n".to_vec(),
                timed_out: false,
            };
        }

        let cwd = request.cwd.clone().unwrap_or_default();
        match program.as_str() {
            "latex" => self.latex(&cwd),
            "dvips" => self.dvips(request, &cwd),
            "gs" => self.gs(request, &cwd),
            "klf-script" => self.script(&cwd),
            _ => Self::exited(127, b"", b"stub: unknown program\n"),
        }
    }
}

/// Settings pointing at stub programs under a per-test directory.
///
/// The ghostscript version cache is keyed by path, so each `tag` gets its own `gs`.
pub(crate) fn stub_settings(temp_dir: &Path, tag: &str) -> Settings {
    let bin = PathBuf::from("/stub").join(tag);
    Settings {
        temp_dir: temp_dir.to_path_buf(),
        latex_exec: bin.join("latex"),
        dvips_exec: bin.join("dvips"),
        gs_exec: bin.join("gs"),
        ..Default::default()
    }
}

pub(crate) fn formula(latex: &str) -> Input {
    Input {
        latex: latex.to_string(),
        ..Default::default()
    }
}

pub(crate) fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
