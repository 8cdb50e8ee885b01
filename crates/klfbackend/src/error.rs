use serde::{Deserialize, Serialize};
use std::fmt;

pub type Result<T> = std::result::Result<T, BackendError>;

/// One external-program invocation of the pipeline.
///
/// The order matches the positive program-error codes `1..=8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Latex,
    Dvips,
    GsBBox,
    GsPostProc,
    GsPng,
    GsPdf,
    GsSvg,
    UserScript,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Latex,
        Stage::Dvips,
        Stage::GsBBox,
        Stage::GsPostProc,
        Stage::GsPng,
        Stage::GsPdf,
        Stage::GsSvg,
        Stage::UserScript,
    ];

    pub fn program_error_code(self) -> i32 {
        match self {
            Stage::Latex => 1,
            Stage::Dvips => 2,
            Stage::GsBBox => 3,
            Stage::GsPostProc => 4,
            Stage::GsPng => 5,
            Stage::GsPdf => 6,
            Stage::GsSvg => 7,
            Stage::UserScript => 8,
        }
    }

    pub fn program_name(self) -> &'static str {
        match self {
            Stage::Latex => "latex",
            Stage::Dvips => "dvips",
            Stage::GsBBox | Stage::GsPostProc | Stage::GsPng | Stage::GsPdf | Stage::GsSvg => "gs",
            Stage::UserScript => "user script",
        }
    }

    /// Short label used in log fields and error headlines.
    pub fn label(self) -> &'static str {
        match self {
            Stage::Latex => "latex",
            Stage::Dvips => "dvips",
            Stage::GsBBox => "gs (bounding box)",
            Stage::GsPostProc => "gs (font outlining)",
            Stage::GsPng => "gs (png)",
            Stage::GsPdf => "gs (pdf)",
            Stage::GsSvg => "gs (svg)",
            Stage::UserScript => "user script",
        }
    }

    pub(crate) fn no_run(self) -> ErrorKind {
        match self {
            Stage::Latex => ErrorKind::LatexNoRun,
            Stage::Dvips => ErrorKind::DvipsNoRun,
            Stage::GsBBox => ErrorKind::GsBBoxNoRun,
            Stage::GsPostProc => ErrorKind::GsPostProcNoRun,
            Stage::GsPng => ErrorKind::GsPngNoRun,
            Stage::GsPdf => ErrorKind::GsPdfNoRun,
            Stage::GsSvg => ErrorKind::GsSvgNoRun,
            Stage::UserScript => ErrorKind::UserScriptNoRun,
        }
    }

    pub(crate) fn no_normal_exit(self) -> ErrorKind {
        match self {
            Stage::Latex => ErrorKind::LatexNoNormalExit,
            Stage::Dvips => ErrorKind::DvipsNoNormalExit,
            Stage::GsBBox => ErrorKind::GsBBoxNoNormalExit,
            Stage::GsPostProc => ErrorKind::GsPostProcNoNormalExit,
            Stage::GsPng => ErrorKind::GsPngNoNormalExit,
            Stage::GsPdf => ErrorKind::GsPdfNoNormalExit,
            Stage::GsSvg => ErrorKind::GsSvgNoNormalExit,
            Stage::UserScript => ErrorKind::UserScriptNoNormalExit,
        }
    }

    pub(crate) fn no_output(self) -> ErrorKind {
        match self {
            Stage::Latex => ErrorKind::LatexNoOutput,
            Stage::Dvips => ErrorKind::DvipsNoOutput,
            Stage::GsBBox => ErrorKind::GsBBoxNoOutput,
            Stage::GsPostProc => ErrorKind::GsPostProcNoOutput,
            Stage::GsPng => ErrorKind::GsPngNoOutput,
            Stage::GsPdf => ErrorKind::GsPdfNoOutput,
            Stage::GsSvg => ErrorKind::GsSvgNoOutput,
            Stage::UserScript => ErrorKind::UserScriptNoOutput,
        }
    }

    /// `None` for the bbox measurement stage, which reads its report from the process
    /// streams and has no output file.
    pub(crate) fn output_read_fail(self) -> Option<ErrorKind> {
        match self {
            Stage::Latex => Some(ErrorKind::LatexOutputReadFail),
            Stage::Dvips => Some(ErrorKind::DvipsOutputReadFail),
            Stage::GsBBox => None,
            Stage::GsPostProc => Some(ErrorKind::GsPostProcOutputReadFail),
            Stage::GsPng => Some(ErrorKind::GsPngOutputReadFail),
            Stage::GsPdf => Some(ErrorKind::GsPdfOutputReadFail),
            Stage::GsSvg => Some(ErrorKind::GsSvgOutputReadFail),
            Stage::UserScript => Some(ErrorKind::UserScriptOutputReadFail),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The closed set of ways a render can fail.
///
/// Callers branch on the exact kind (e.g. "install latex" for [`ErrorKind::LatexNoRun`] vs.
/// "fix your formula" for `ProgramError(Stage::Latex)`). [`ErrorKind::code`] gives the
/// historical integer status for callers that persist or compare numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    MissingLatexFormula,
    MissingMathModeThreeDots,
    TempDirCreateFail,
    TexWriteFail,

    LatexNoRun,
    LatexNoNormalExit,
    LatexNoOutput,
    LatexOutputReadFail,

    DvipsNoRun,
    DvipsNoNormalExit,
    DvipsNoOutput,
    DvipsOutputReadFail,
    DvipsOutputNoBBox,
    DvipsMalformedBBox,

    GsBBoxNoRun,
    GsBBoxNoNormalExit,
    GsBBoxNoOutput,
    GsBBoxNoBBox,

    EpsWriteFail,

    GsPostProcNoRun,
    GsPostProcNoNormalExit,
    GsPostProcNoOutput,
    GsPostProcOutputReadFail,

    GsPngNoRun,
    GsPngNoNormalExit,
    GsPngNoOutput,
    GsPngOutputReadFail,
    PngReadFail,
    PngMetadataFail,

    GsPdfNoRun,
    GsPdfNoNormalExit,
    GsPdfNoOutput,
    GsPdfOutputReadFail,

    GsSvgNoRun,
    GsSvgNoNormalExit,
    GsSvgNoOutput,
    GsSvgOutputReadFail,
    GsSvgTooOld,
    NoGsVersion,

    UserScriptNoRun,
    UserScriptNoNormalExit,
    UserScriptNoOutput,
    UserScriptOutputReadFail,

    /// The stage's program ran and exited cleanly with a non-zero status.
    ProgramError(Stage),
}

const NEGATIVE_CODES: [(ErrorKind, i32); 43] = [
    (ErrorKind::MissingLatexFormula, -1),
    (ErrorKind::MissingMathModeThreeDots, -2),
    (ErrorKind::TexWriteFail, -3),
    (ErrorKind::LatexNoRun, -4),
    (ErrorKind::LatexNoNormalExit, -5),
    (ErrorKind::LatexNoOutput, -6),
    (ErrorKind::LatexOutputReadFail, -7),
    (ErrorKind::DvipsNoRun, -8),
    (ErrorKind::DvipsNoNormalExit, -9),
    (ErrorKind::DvipsNoOutput, -10),
    (ErrorKind::DvipsOutputReadFail, -11),
    (ErrorKind::DvipsOutputNoBBox, -12),
    (ErrorKind::GsBBoxNoRun, -13),
    (ErrorKind::GsBBoxNoNormalExit, -14),
    (ErrorKind::GsBBoxNoOutput, -15),
    (ErrorKind::GsBBoxNoBBox, -16),
    (ErrorKind::GsPostProcNoRun, -17),
    (ErrorKind::GsPostProcNoNormalExit, -18),
    (ErrorKind::GsPostProcNoOutput, -19),
    (ErrorKind::GsPostProcOutputReadFail, -20),
    (ErrorKind::GsPngNoRun, -21),
    (ErrorKind::GsPngNoNormalExit, -22),
    (ErrorKind::GsPngNoOutput, -23),
    (ErrorKind::GsPngOutputReadFail, -24),
    (ErrorKind::GsPdfNoRun, -25),
    (ErrorKind::GsPdfNoNormalExit, -26),
    (ErrorKind::GsPdfNoOutput, -27),
    (ErrorKind::GsPdfOutputReadFail, -28),
    (ErrorKind::PngReadFail, -29),
    (ErrorKind::NoGsVersion, -30),
    (ErrorKind::UserScriptNoRun, -31),
    (ErrorKind::UserScriptNoNormalExit, -32),
    (ErrorKind::UserScriptNoOutput, -33),
    (ErrorKind::UserScriptOutputReadFail, -34),
    (ErrorKind::GsSvgNoRun, -35),
    (ErrorKind::GsSvgNoNormalExit, -36),
    (ErrorKind::GsSvgNoOutput, -37),
    (ErrorKind::GsSvgOutputReadFail, -38),
    (ErrorKind::GsSvgTooOld, -39),
    (ErrorKind::DvipsMalformedBBox, -40),
    (ErrorKind::EpsWriteFail, -41),
    (ErrorKind::TempDirCreateFail, -42),
    (ErrorKind::PngMetadataFail, -43),
];

impl ErrorKind {
    /// Integer status: negative for internal failures, `1..=8` for program errors.
    pub fn code(self) -> i32 {
        if let ErrorKind::ProgramError(stage) = self {
            return stage.program_error_code();
        }
        NEGATIVE_CODES
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, code)| *code)
            .unwrap_or(i32::MIN)
    }

    /// Inverse of [`ErrorKind::code`]. `0` (success) and unknown codes return `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        if code > 0 {
            return Stage::ALL
                .iter()
                .find(|stage| stage.program_error_code() == code)
                .map(|stage| ErrorKind::ProgramError(*stage));
        }
        NEGATIVE_CODES
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(kind, _)| *kind)
    }

    pub fn is_program_error(self) -> bool {
        matches!(self, ErrorKind::ProgramError(_))
    }

    /// `true` when the kind means an executable could not be started at all.
    pub fn is_missing_program(self) -> bool {
        matches!(
            self,
            ErrorKind::LatexNoRun
                | ErrorKind::DvipsNoRun
                | ErrorKind::GsBBoxNoRun
                | ErrorKind::GsPostProcNoRun
                | ErrorKind::GsPngNoRun
                | ErrorKind::GsPdfNoRun
                | ErrorKind::GsSvgNoRun
                | ErrorKind::UserScriptNoRun
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::ProgramError(stage) => write!(f, "ProgramError({stage:?})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// A classified pipeline failure.
///
/// `message` is what ends up in `Output::errorstr`; for program errors it is HTML.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct BackendError {
    pub kind: ErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
