//! LaTeX document assembly.

use crate::error::{BackendError, ErrorKind, Result};
use crate::types::{Color, Input, Settings};
use std::fmt;

/// Turns a render request into a complete LaTeX document.
///
/// Register an implementation in [`Settings::template_generator`] to replace
/// [`DefaultTemplateGenerator`]. Input validation has already happened when this is called.
pub trait TemplateGenerator: fmt::Debug + Send + Sync {
    fn generate_template(&self, input: &Input, settings: &Settings) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTemplateGenerator;

impl TemplateGenerator for DefaultTemplateGenerator {
    fn generate_template(&self, input: &Input, _settings: &Settings) -> String {
        let body = input.mathmode.replace("...", &input.latex);

        let mut doc = String::with_capacity(body.len() + input.preamble.len() + 256);
        doc.push_str("\\documentclass{article}\n");
        doc.push_str("\\usepackage[dvips]{color}\n");
        doc.push_str(&input.preamble);
        doc.push('\n');
        doc.push_str("\\begin{document}\n");
        doc.push_str("\\thispagestyle{empty}\n");
        if !input.bg_color.is_transparent() {
            doc.push_str(&format!(
                "\\pagecolor[rgb]{{{}}}\n",
                latex_rgb(input.bg_color)
            ));
        }
        doc.push_str(&format!(
            "{{\\color[rgb]{{{}}} {} }}\n",
            latex_rgb(input.fg_color),
            body
        ));
        doc.push_str("\\end{document}\n");
        doc
    }
}

fn latex_rgb(color: Color) -> String {
    format!(
        "{:.3},{:.3},{:.3}",
        f64::from(color.r) / 255.0,
        f64::from(color.g) / 255.0,
        f64::from(color.b) / 255.0
    )
}

/// Validates `input` and returns the document that will be handed to `latex`.
///
/// Pure: no I/O, same document for the same input and generator.
pub fn assemble_document(input: &Input, settings: &Settings) -> Result<String> {
    if input.bypass_template {
        if input.latex.trim().is_empty() {
            return Err(BackendError::new(
                ErrorKind::MissingLatexFormula,
                "You must specify a LaTeX formula!",
            ));
        }
        return Ok(input.latex.clone());
    }

    if !input.mathmode.contains("...") {
        return Err(BackendError::new(
            ErrorKind::MissingMathModeThreeDots,
            "The math mode string doesn't contain '...'!",
        ));
    }
    if input.latex.trim().is_empty() {
        return Err(BackendError::new(
            ErrorKind::MissingLatexFormula,
            "You must specify a LaTeX formula!",
        ));
    }

    let document = match settings.template_generator.as_deref() {
        Some(generator) => generator.generate_template(input, settings),
        None => DefaultTemplateGenerator.generate_template(input, settings),
    };
    Ok(document)
}
