//! The render pipeline: LaTeX source in, PNG/EPS/PDF/SVG out.
//!
//! Stages hand data to each other through files in a per-render work directory named
//! `klfformula.*`. The directory is removed when the render returns, whatever the outcome.

mod stages;
mod userscript;

use crate::eps::{BBoxParseError, BoundingBox, parse_bounding_box, set_bounding_box};
use crate::error::{BackendError, ErrorKind, Result, Stage};
use crate::lock::{RenderSession, with_exclusive_render};
use crate::metadata::{decode_limit_bytes, embed_text_chunks, formula_metadata};
use crate::process::{ProcessRunner, SystemProcessRunner};
use crate::template::assemble_document;
use crate::types::{Input, Output, Settings, Status};
use stages::{StageRunner, file_name};
use std::path::Path;
use userscript::{ScriptProduct, run_user_script};

const WORK_DIR_PREFIX: &str = "klatexformulatmp";

/// Renders `input` with the system's `latex`, `dvips` and `gs`.
///
/// Never panics on tool failures: the outcome is reported through [`Output::status`] and
/// [`Output::errorstr`].
pub fn get_latex_formula(input: &Input, settings: &Settings) -> Output {
    get_latex_formula_with(input, settings, &SystemProcessRunner)
}

/// Like [`get_latex_formula`], with every external program started through `runner`.
///
/// Calls are serialized process-wide; a second caller blocks until the first render is done.
pub fn get_latex_formula_with(
    input: &Input,
    settings: &Settings,
    runner: &dyn ProcessRunner,
) -> Output {
    with_exclusive_render(|session| match render(session, runner, input, settings) {
        Ok(output) => output,
        Err(err) => {
            tracing::warn!(
                kind = %err.kind,
                code = err.kind.code(),
                "render failed"
            );
            Output::failed(input, settings, err)
        }
    })
}

fn create_work_dir(temp_dir: &Path) -> Result<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix(WORK_DIR_PREFIX)
        .tempdir_in(temp_dir)
        .map_err(|err| {
            BackendError::new(
                ErrorKind::TempDirCreateFail,
                format!(
                    "Unable to create a work directory in `{}`: {err}",
                    temp_dir.display()
                ),
            )
        })
}

fn render(
    session: &mut RenderSession<'_>,
    runner: &dyn ProcessRunner,
    input: &Input,
    settings: &Settings,
) -> Result<Output> {
    let document = assemble_document(input, settings)?;

    let work_dir = create_work_dir(&settings.temp_dir)?;
    tracing::debug!(work_dir = %work_dir.path().display(), "created work directory");
    let stages = StageRunner::new(
        runner,
        work_dir.path(),
        settings.exec_env_pairs(),
        settings.process_timeout(),
    );
    stages.write_file(".tex", document.as_bytes(), ErrorKind::TexWriteFail)?;

    // latex (or the user script), then dvips unless the script already wrote the EPS.
    let (dvidata, eps_raw) = match &input.user_script {
        Some(script) => match run_user_script(&stages, script, input, settings)? {
            ScriptProduct::Eps => {
                let dvidata = if stages.path(".dvi").is_file() {
                    stages.read_output(Stage::UserScript, ".dvi")?
                } else {
                    Vec::new()
                };
                (dvidata, stages.read_output(Stage::UserScript, ".eps")?)
            }
            ScriptProduct::Dvi => {
                let dvidata = stages.read_output(Stage::UserScript, ".dvi")?;
                (dvidata, run_dvips(&stages, settings)?)
            }
        },
        None => {
            run_latex(&stages, settings)?;
            let dvidata = stages.read_output(Stage::Latex, ".dvi")?;
            (dvidata, run_dvips(&stages, settings)?)
        }
    };

    let reported = parse_bounding_box(&eps_raw).map_err(|err| match err {
        BBoxParseError::Missing => BackendError::new(
            ErrorKind::DvipsOutputNoBBox,
            "The EPS produced by dvips has no %%BoundingBox line.",
        ),
        BBoxParseError::Malformed { line } => BackendError::new(
            ErrorKind::DvipsMalformedBBox,
            format!("Unable to parse the bounding box reported by dvips: {line}"),
        ),
    })?;

    let measure = settings.calc_eps_bounding_box
        && (input.bg_color.is_transparent() || input.bg_color.is_opaque_white());
    let ink = if measure {
        measure_ink_bbox(&stages, settings)?
    } else {
        reported
    };
    let (top, right, bottom, left) = settings.border_offsets();
    let bbox = ink.expanded(top, right, bottom, left).ok_or_else(|| {
        let kind = if measure {
            ErrorKind::GsBBoxNoBBox
        } else {
            ErrorKind::DvipsMalformedBBox
        };
        BackendError::new(
            kind,
            format!(
                "The bounding box {} {} {} {} cannot be grown by the border offsets \
                 (top {top}, right {right}, bottom {bottom}, left {left}).",
                ink.llx, ink.lly, ink.urx, ink.ury
            ),
        )
    })?;
    tracing::debug!(?reported, ?ink, ?bbox, "bounding box");

    let eps_bbox = set_bounding_box(&eps_raw, bbox);
    stages.write_file("-bbox.eps", &eps_bbox, ErrorKind::EpsWriteFail)?;

    let (final_eps_suffix, epsdata) = if settings.outline_fonts {
        let outlined = outline_fonts(session, runner, &stages, settings, bbox)?;
        ("-outl.eps", outlined)
    } else {
        ("-bbox.eps", eps_bbox.clone())
    };
    let final_eps = file_name(final_eps_suffix);

    let png_raw = rasterize_png(&stages, input, settings, &final_eps)?;
    let result = decode_png(&png_raw).map_err(|err| {
        BackendError::new(
            ErrorKind::PngReadFail,
            format!("Unable to decode the PNG written by ghostscript: {err}"),
        )
    })?;

    let pdfdata = if settings.want_pdf {
        convert_with_device(&stages, settings, Stage::GsPdf, "pdfwrite", ".pdf", &final_eps)?
    } else {
        Vec::new()
    };

    let svgdata = if settings.want_svg {
        match session.gs_version(runner, &settings.gs_exec) {
            None => {
                return Err(BackendError::new(
                    ErrorKind::NoGsVersion,
                    format!(
                        "Unable to determine the version of ghostscript `{}`.",
                        settings.gs_exec.display()
                    ),
                ));
            }
            Some(version) if !version.supports_svg() => {
                return Err(BackendError::new(
                    ErrorKind::GsSvgTooOld,
                    format!(
                        "Ghostscript {version} cannot write SVG; version {} or newer is required.",
                        crate::gs::GS_SVG_MIN_VERSION
                    ),
                ));
            }
            Some(_) => {
                convert_with_device(&stages, settings, Stage::GsSvg, "svg", ".svg", &final_eps)?
            }
        }
    } else {
        Vec::new()
    };

    let pngdata =
        embed_text_chunks(&png_raw, &formula_metadata(input, settings)).map_err(|err| {
            BackendError::new(
                ErrorKind::PngMetadataFail,
                format!("Unable to embed metadata into the PNG: {err}"),
            )
        })?;

    let mut output = Output {
        status: Status::Success,
        errorstr: String::new(),
        result: Some(result),
        dvidata,
        pngdata,
        epsdata,
        pdfdata,
        svgdata,
        input: input.clone(),
        settings: settings.clone(),
        width_pt: bbox.width() as f64,
        height_pt: bbox.height() as f64,
        ..Default::default()
    };
    if settings.want_raw {
        output.pngdata_raw = png_raw;
        output.epsdata_raw = eps_raw;
        output.epsdata_bbox = eps_bbox;
    }

    if let Err(err) = work_dir.close() {
        tracing::warn!(error = %err, "failed to remove work directory");
    }

    tracing::info!(
        width_pt = output.width_pt,
        height_pt = output.height_pt,
        png_bytes = output.pngdata.len(),
        pdf_bytes = output.pdfdata.len(),
        svg_bytes = output.svgdata.len(),
        "render finished"
    );
    Ok(output)
}

fn run_latex(stages: &StageRunner<'_>, settings: &Settings) -> Result<()> {
    let request = stages
        .request(&settings.latex_exec)
        .arg("-no-shell-escape")
        .arg("-interaction=nonstopmode")
        .arg(file_name(".tex"));
    stages.run(Stage::Latex, &request)?;
    Ok(())
}

fn run_dvips(stages: &StageRunner<'_>, settings: &Settings) -> Result<Vec<u8>> {
    let request = stages
        .request(&settings.dvips_exec)
        .arg("-E")
        .arg(file_name(".dvi"))
        .arg("-o")
        .arg(file_name(".eps"));
    stages.run_for_output(Stage::Dvips, &request, ".eps")
}

/// Asks ghostscript's `bbox` device for the inked area of the dvips EPS.
fn measure_ink_bbox(stages: &StageRunner<'_>, settings: &Settings) -> Result<BoundingBox> {
    let request = stages
        .request(&settings.gs_exec)
        .args(["-dNOPAUSE", "-dSAFER", "-dBATCH", "-q", "-sDEVICE=bbox"])
        .arg(file_name(".eps"));
    let streams = stages.run(Stage::GsBBox, &request)?;

    if streams.stderr.trim_ascii().is_empty() && streams.stdout.trim_ascii().is_empty() {
        return Err(BackendError::new(
            ErrorKind::GsBBoxNoOutput,
            "Ghostscript did not report a bounding box.",
        ));
    }
    // The bbox device reports on stderr; some builds print to stdout instead.
    let parsed = match parse_bounding_box(&streams.stderr) {
        Err(BBoxParseError::Missing) => parse_bounding_box(&streams.stdout),
        other => other,
    };
    parsed.map_err(|err| {
        BackendError::new(
            ErrorKind::GsBBoxNoBBox,
            format!("Unable to read the bounding box measured by ghostscript: {err}"),
        )
    })
}

/// Rewrites the EPS with glyphs converted to paths, then restores the corrected bounding box.
fn outline_fonts(
    session: &mut RenderSession<'_>,
    runner: &dyn ProcessRunner,
    stages: &StageRunner<'_>,
    settings: &Settings,
    bbox: BoundingBox,
) -> Result<Vec<u8>> {
    let device = match session.gs_version(runner, &settings.gs_exec) {
        Some(version) => version.eps_device(),
        None => {
            tracing::warn!(
                program = %settings.gs_exec.display(),
                "unknown ghostscript version, assuming eps2write"
            );
            "eps2write"
        }
    };
    let request = stages
        .request(&settings.gs_exec)
        .args(["-dNOCACHE", "-dNOPAUSE", "-dSAFER", "-dEPSCrop"])
        .arg(format!("-sDEVICE={device}"))
        .arg(format!("-sOutputFile={}", file_name("-outl.eps")))
        .args(["-q", "-dBATCH"])
        .arg(file_name("-bbox.eps"));
    let outlined = stages.run_for_output(Stage::GsPostProc, &request, "-outl.eps")?;
    let outlined = set_bounding_box(&outlined, bbox);
    stages.write_file("-outl.eps", &outlined, ErrorKind::EpsWriteFail)?;
    Ok(outlined)
}

/// Decodes ghostscript's PNG with a memory ceiling sized from its header.
fn decode_png(png_data: &[u8]) -> image::ImageResult<image::DynamicImage> {
    let mut reader =
        image::ImageReader::with_format(std::io::Cursor::new(png_data), image::ImageFormat::Png);
    let mut limits = image::Limits::default();
    limits.max_alloc = Some(decode_limit_bytes(png_data) as u64);
    reader.limits(limits);
    reader.decode()
}

fn rasterize_png(
    stages: &StageRunner<'_>,
    input: &Input,
    settings: &Settings,
    eps_file: &str,
) -> Result<Vec<u8>> {
    let device = if input.bg_color.is_transparent() {
        "pngalpha"
    } else {
        "png16m"
    };
    let request = stages
        .request(&settings.gs_exec)
        .args(["-dNOPAUSE", "-dSAFER", "-dEPSCrop"])
        .arg(format!("-r{}", input.dpi))
        .args(["-dTextAlphaBits=4", "-dGraphicsAlphaBits=4"])
        .arg(format!("-sDEVICE={device}"))
        .arg(format!("-sOutputFile={}", file_name(".png")))
        .args(["-q", "-dBATCH"])
        .arg(eps_file);
    stages.run_for_output(Stage::GsPng, &request, ".png")
}

fn convert_with_device(
    stages: &StageRunner<'_>,
    settings: &Settings,
    stage: Stage,
    device: &str,
    output_suffix: &str,
    eps_file: &str,
) -> Result<Vec<u8>> {
    let request = stages
        .request(&settings.gs_exec)
        .args(["-dNOPAUSE", "-dSAFER", "-dEPSCrop"])
        .arg(format!("-sDEVICE={device}"))
        .arg(format!("-sOutputFile={}", file_name(output_suffix)))
        .args(["-q", "-dBATCH"])
        .arg(eps_file);
    stages.run_for_output(stage, &request, output_suffix)
}
