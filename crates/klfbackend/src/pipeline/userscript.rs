use super::stages::{StageRunner, file_name};
use crate::error::{BackendError, Result, Stage};
use crate::types::{Input, Settings};
use std::path::Path;

/// What a user script left behind in the work directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScriptProduct {
    /// An EPS; the dvips stage is skipped.
    Eps,
    /// A DVI; dvips still runs.
    Dvi,
}

/// Environment handed to a user script, in a stable order.
pub(crate) fn script_environment(
    input: &Input,
    settings: &Settings,
    work_dir: &Path,
) -> Vec<(String, String)> {
    let path_str = |suffix: &str| work_dir.join(file_name(suffix)).display().to_string();
    let mut env = vec![
        ("KLF_TEMPDIR".to_string(), work_dir.display().to_string()),
        ("KLF_TEMPFNAME".to_string(), path_str("")),
        ("KLF_FN_TEX".to_string(), path_str(".tex")),
        ("KLF_FN_DVI".to_string(), path_str(".dvi")),
        ("KLF_FN_EPS".to_string(), path_str(".eps")),
        (
            "KLF_LATEX".to_string(),
            settings.latex_exec.display().to_string(),
        ),
        (
            "KLF_DVIPS".to_string(),
            settings.dvips_exec.display().to_string(),
        ),
        ("KLF_GS".to_string(), settings.gs_exec.display().to_string()),
        ("KLF_INPUT_LATEX".to_string(), input.latex.clone()),
        ("KLF_INPUT_MATHMODE".to_string(), input.mathmode.clone()),
        ("KLF_INPUT_PREAMBLE".to_string(), input.preamble.clone()),
        (
            "KLF_INPUT_FG_COLOR_WEB".to_string(),
            input.fg_color.web_rgb(),
        ),
        (
            "KLF_INPUT_BG_COLOR_WEB".to_string(),
            input.bg_color.web_rgba(),
        ),
        ("KLF_INPUT_DPI".to_string(), input.dpi.to_string()),
        (
            "KLF_INPUT_BYPASS_TEMPLATE".to_string(),
            if input.bypass_template { "1" } else { "0" }.to_string(),
        ),
    ];
    for (key, value) in &input.user_script_params {
        env.push((format!("KLF_ARG_{key}"), value.clone()));
    }
    env
}

/// Runs `script` on the `.tex` file in place of latex.
pub(crate) fn run_user_script(
    stages: &StageRunner<'_>,
    script: &Path,
    input: &Input,
    settings: &Settings,
) -> Result<ScriptProduct> {
    let request = stages
        .request(script)
        .arg(stages.path(".tex").display().to_string())
        .envs(script_environment(input, settings, stages.work_dir()));
    stages.run(Stage::UserScript, &request)?;

    if stages.path(".eps").is_file() {
        Ok(ScriptProduct::Eps)
    } else if stages.path(".dvi").is_file() {
        Ok(ScriptProduct::Dvi)
    } else {
        Err(BackendError::new(
            Stage::UserScript.no_output(),
            format!(
                "User script `{}` produced neither `{}` nor `{}`.",
                script.display(),
                file_name(".eps"),
                file_name(".dvi")
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Color;

    #[cfg(unix)]
    #[test]
    fn environment_exposes_paths_input_and_params() {
        let mut input = Input {
            latex: "a+b".to_string(),
            fg_color: Color::rgb(255, 0, 0),
            dpi: 300,
            ..Default::default()
        };
        input
            .user_script_params
            .insert("ENGINE".to_string(), "lualatex".to_string());
        let settings = Settings {
            latex_exec: "/usr/bin/latex".into(),
            ..Default::default()
        };
        let env = script_environment(&input, &settings, Path::new("/tmp/work"));
        let get = |name: &str| {
            env.iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("KLF_TEMPDIR"), Some("/tmp/work"));
        assert_eq!(get("KLF_TEMPFNAME"), Some("/tmp/work/klfformula"));
        assert_eq!(get("KLF_FN_TEX"), Some("/tmp/work/klfformula.tex"));
        assert_eq!(get("KLF_LATEX"), Some("/usr/bin/latex"));
        assert_eq!(get("KLF_INPUT_LATEX"), Some("a+b"));
        assert_eq!(get("KLF_INPUT_FG_COLOR_WEB"), Some("#ff0000"));
        assert_eq!(get("KLF_INPUT_BG_COLOR_WEB"), Some("#ffffff00"));
        assert_eq!(get("KLF_INPUT_DPI"), Some("300"));
        assert_eq!(get("KLF_INPUT_BYPASS_TEMPLATE"), Some("0"));
        assert_eq!(get("KLF_ARG_ENGINE"), Some("lualatex"));
    }
}
