use klfbackend::{
    Color, ErrorKind, Input, SaveFormat, Settings, SettingsError, available_save_formats,
    detect_settings, get_latex_formula, save_output_to_file,
};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

#[derive(Debug)]
enum CliError {
    Usage(&'static str),
    Io(std::io::Error),
    Settings(SettingsError),
    Render {
        kind: ErrorKind,
        code: i32,
        message: String,
    },
    Save(klfbackend::SaveError),
    Json(serde_json::Error),
    MissingPrograms,
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Usage(msg) => write!(f, "{msg}"),
            CliError::Io(err) => write!(f, "I/O error: {err}"),
            CliError::Settings(err) => write!(f, "{err}"),
            CliError::Render {
                kind,
                code,
                message,
            } => {
                write!(f, "render failed: {kind} (status {code})\n{message}")?;
                if let Some(hint) = render_hint(*kind) {
                    write!(f, "\nhint: {hint}")?;
                }
                Ok(())
            }
            CliError::Save(err) => write!(f, "save failed: {err}"),
            CliError::Json(err) => write!(f, "JSON error: {err}"),
            CliError::MissingPrograms => {
                write!(f, "latex, dvips or gs could not be found")
            }
        }
    }
}

fn render_hint(kind: ErrorKind) -> Option<&'static str> {
    if kind.is_missing_program() {
        Some("install TeX and Ghostscript, or point --latex-exec/--dvips-exec/--gs-exec at them")
    } else if kind.is_program_error() {
        Some("the program rejected the input; its log is shown above")
    } else {
        None
    }
}

impl From<std::io::Error> for CliError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<SettingsError> for CliError {
    fn from(value: SettingsError) -> Self {
        Self::Settings(value)
    }
}

impl From<klfbackend::SaveError> for CliError {
    fn from(value: klfbackend::SaveError) -> Self {
        Self::Save(value)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

#[derive(Debug, Clone, Copy, Default)]
enum Command {
    #[default]
    Render,
    Detect,
}

#[derive(Debug, Default)]
struct Args {
    command: Command,
    input: Option<String>,
    latex: Option<String>,
    mathmode: Option<String>,
    preamble: Option<String>,
    fg: Option<Color>,
    bg: Option<Color>,
    dpi: Option<u32>,
    bypass_template: bool,
    border: Option<[f64; 4]>,
    outline_fonts: bool,
    no_calc_bbox: bool,
    pdf: bool,
    svg: bool,
    raw: bool,
    user_script: Option<PathBuf>,
    params: BTreeMap<String, String>,
    settings_file: Option<PathBuf>,
    latex_exec: Option<PathBuf>,
    dvips_exec: Option<PathBuf>,
    gs_exec: Option<PathBuf>,
    tempdir: Option<PathBuf>,
    timeout: Option<u64>,
    format: Option<SaveFormat>,
    out: Option<String>,
    list_formats: bool,
    verbose: bool,
    pretty: bool,
    extra_path: Vec<PathBuf>,
}

fn usage() -> &'static str {
    "klatexformula-cli\n\
\n\
USAGE:\n\
  klatexformula-cli [render] [--latex <code>] [--mathmode <tpl>] [--preamble <text>] [--fg <color>] [--bg <color>] [--dpi <n>] [--bypass-template] [--border <t,r,b,l>] [--outline-fonts] [--no-calc-bbox] [--pdf] [--svg] [--raw] [--user-script <path>] [--param <key=value>]... [--settings <file.json>] [--latex-exec <path>] [--dvips-exec <path>] [--gs-exec <path>] [--tempdir <dir>] [--timeout <secs>] [--format png|eps|ps|pdf|svg|dvi|jpg|bmp] [--out <path>|-] [--list-formats] [--verbose] [<path>|-]\n\
  klatexformula-cli detect [--pretty] [--extra-path <dir>]... [--verbose]\n\
\n\
NOTES:\n\
  - LaTeX code comes from --latex, else from <path>, else from stdin.\n\
  - Colors are #rgb, #rrggbb, #rrggbbaa, black, white or transparent.\n\
  - Output defaults to writing next to the input file (or ./out.<ext> for stdin); '-' writes to stdout.\n\
  - Without --settings, programs are located automatically unless all three --*-exec are given.\n\
  - Log level: KLF_LOG (e.g. KLF_LOG=klfbackend=debug), or --verbose.\n\
"
}

fn next_value<'a>(it: &mut impl Iterator<Item = &'a String>) -> Result<&'a String, CliError> {
    it.next().ok_or(CliError::Usage(usage()))
}

fn parse_border(text: &str) -> Option<[f64; 4]> {
    let values = text
        .split(',')
        .map(|v| v.trim().parse::<f64>().ok().filter(|v| v.is_finite()))
        .collect::<Option<Vec<_>>>()?;
    match values.as_slice() {
        &[all] => Some([all; 4]),
        &[t, r, b, l] => Some([t, r, b, l]),
        _ => None,
    }
}

fn parse_args(argv: &[String]) -> Result<Args, CliError> {
    let mut args = Args::default();

    let mut it = argv.iter().skip(1);
    while let Some(a) = it.next() {
        match a.as_str() {
            "--help" | "-h" => return Err(CliError::Usage(usage())),
            "render" => args.command = Command::Render,
            "detect" => args.command = Command::Detect,
            "--latex" => args.latex = Some(next_value(&mut it)?.clone()),
            "--mathmode" => args.mathmode = Some(next_value(&mut it)?.clone()),
            "--preamble" => args.preamble = Some(next_value(&mut it)?.clone()),
            "--fg" => {
                let color = Color::from_hex(next_value(&mut it)?)
                    .ok_or(CliError::Usage(usage()))?;
                args.fg = Some(color);
            }
            "--bg" => {
                let color = Color::from_hex(next_value(&mut it)?)
                    .ok_or(CliError::Usage(usage()))?;
                args.bg = Some(color);
            }
            "--dpi" => {
                let dpi = next_value(&mut it)?
                    .parse::<u32>()
                    .map_err(|_| CliError::Usage(usage()))?;
                if dpi == 0 {
                    return Err(CliError::Usage(usage()));
                }
                args.dpi = Some(dpi);
            }
            "--bypass-template" => args.bypass_template = true,
            "--border" => {
                args.border =
                    Some(parse_border(next_value(&mut it)?).ok_or(CliError::Usage(usage()))?);
            }
            "--outline-fonts" => args.outline_fonts = true,
            "--no-calc-bbox" => args.no_calc_bbox = true,
            "--pdf" => args.pdf = true,
            "--svg" => args.svg = true,
            "--raw" => args.raw = true,
            "--user-script" => args.user_script = Some(PathBuf::from(next_value(&mut it)?)),
            "--param" => {
                let Some((key, value)) = next_value(&mut it)?.split_once('=') else {
                    return Err(CliError::Usage(usage()));
                };
                if key.trim().is_empty() {
                    return Err(CliError::Usage(usage()));
                }
                args.params.insert(key.trim().to_string(), value.to_string());
            }
            "--settings" => args.settings_file = Some(PathBuf::from(next_value(&mut it)?)),
            "--latex-exec" => args.latex_exec = Some(PathBuf::from(next_value(&mut it)?)),
            "--dvips-exec" => args.dvips_exec = Some(PathBuf::from(next_value(&mut it)?)),
            "--gs-exec" => args.gs_exec = Some(PathBuf::from(next_value(&mut it)?)),
            "--tempdir" => args.tempdir = Some(PathBuf::from(next_value(&mut it)?)),
            "--timeout" => {
                let secs = next_value(&mut it)?
                    .parse::<u64>()
                    .map_err(|_| CliError::Usage(usage()))?;
                args.timeout = Some(secs);
            }
            "--format" => {
                let format = next_value(&mut it)?
                    .parse::<SaveFormat>()
                    .map_err(|_| CliError::Usage(usage()))?;
                args.format = Some(format);
            }
            "--out" => args.out = Some(next_value(&mut it)?.clone()),
            "--list-formats" => args.list_formats = true,
            "--verbose" | "-v" => args.verbose = true,
            "--pretty" => args.pretty = true,
            "--extra-path" => args.extra_path.push(PathBuf::from(next_value(&mut it)?)),
            "--" => {
                if let Some(rest) = it.next() {
                    if args.input.is_some() {
                        return Err(CliError::Usage(usage()));
                    }
                    args.input = Some(rest.clone());
                }
                if it.next().is_some() {
                    return Err(CliError::Usage(usage()));
                }
            }
            "-" => {
                if args.input.is_some() {
                    return Err(CliError::Usage(usage()));
                }
                args.input = Some("-".to_string());
            }
            other if other.starts_with('-') => return Err(CliError::Usage(usage())),
            path => {
                if args.input.is_some() {
                    return Err(CliError::Usage(usage()));
                }
                args.input = Some(path.to_string());
            }
        }
    }

    Ok(args)
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::WARN.into())
            .with_env_var("KLF_LOG")
            .from_env_lossy()
    };
    // A second initialization (e.g. from an embedding test harness) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

fn read_latex(args: &Args) -> Result<String, CliError> {
    if let Some(latex) = &args.latex {
        return Ok(latex.clone());
    }
    match args.input.as_deref() {
        None | Some("-") => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
        Some(path) => Ok(std::fs::read_to_string(path)?),
    }
}

fn build_settings(args: &Args, format: SaveFormat) -> Result<Settings, CliError> {
    let mut settings = match &args.settings_file {
        Some(path) => Settings::from_json_file(path)?,
        None => {
            let mut settings = Settings {
                outline_fonts: false,
                want_pdf: false,
                want_svg: false,
                ..Default::default()
            };
            let all_given =
                args.latex_exec.is_some() && args.dvips_exec.is_some() && args.gs_exec.is_some();
            if !all_given && !detect_settings(&mut settings, &args.extra_path) {
                tracing::warn!("not every program was found; the render may fail");
            }
            // SVG is only rendered on request, whatever gs supports.
            settings.want_svg = false;
            settings
        }
    };

    if let Some(path) = &args.latex_exec {
        settings.latex_exec = path.clone();
    }
    if let Some(path) = &args.dvips_exec {
        settings.dvips_exec = path.clone();
    }
    if let Some(path) = &args.gs_exec {
        settings.gs_exec = path.clone();
    }
    if let Some(dir) = &args.tempdir {
        settings.temp_dir = dir.clone();
    }
    if let Some(secs) = args.timeout {
        settings.process_timeout_secs = Some(secs);
    }
    if let Some([t, r, b, l]) = args.border {
        settings.tborderoffset = t;
        settings.rborderoffset = r;
        settings.bborderoffset = b;
        settings.lborderoffset = l;
    }
    if args.outline_fonts {
        settings.outline_fonts = true;
    }
    if args.no_calc_bbox {
        settings.calc_eps_bounding_box = false;
    }
    if args.pdf || format == SaveFormat::Pdf {
        settings.want_pdf = true;
    }
    if args.svg || format == SaveFormat::Svg {
        settings.want_svg = true;
    }
    if args.raw {
        settings.want_raw = true;
    }
    settings.validate()?;
    Ok(settings)
}

fn build_input(args: &Args, latex: String) -> Input {
    let mut input = Input {
        latex,
        bypass_template: args.bypass_template,
        user_script: args.user_script.clone(),
        user_script_params: args.params.clone(),
        ..Default::default()
    };
    if let Some(mathmode) = &args.mathmode {
        input.mathmode = mathmode.clone();
    }
    if let Some(preamble) = &args.preamble {
        input.preamble = preamble.clone();
    }
    if let Some(fg) = args.fg {
        input.fg_color = fg;
    }
    if let Some(bg) = args.bg {
        input.bg_color = bg;
    }
    if let Some(dpi) = args.dpi {
        input.dpi = dpi;
    }
    input
}

fn default_out_path(input: Option<&str>, ext: &str) -> PathBuf {
    match input {
        Some(path) if path != "-" => PathBuf::from(path).with_extension(ext),
        _ => PathBuf::from(format!("out.{ext}")),
    }
}

fn resolve_format(args: &Args) -> SaveFormat {
    args.format
        .or_else(|| args.out.as_deref().and_then(SaveFormat::from_file_name))
        .unwrap_or(SaveFormat::Png)
}

fn run_render(args: &Args) -> Result<(), CliError> {
    let format = resolve_format(args);
    let settings = build_settings(args, format)?;
    let latex = read_latex(args)?;
    let input = build_input(args, latex);

    let output = get_latex_formula(&input, &settings);
    if let Some(kind) = output.status.kind() {
        return Err(CliError::Render {
            kind,
            code: output.status.code(),
            message: output.errorstr,
        });
    }

    if args.list_formats {
        for name in available_save_formats(&output) {
            println!("{name}");
        }
        return Ok(());
    }

    let out = args.out.clone().unwrap_or_else(|| {
        // Without --latex, a file argument names the source; with it, there is no source file.
        let source = if args.latex.is_some() {
            None
        } else {
            args.input.as_deref()
        };
        default_out_path(source, format.extension())
            .to_string_lossy()
            .to_string()
    });
    save_output_to_file(&output, &out, format.name())?;
    tracing::info!(out = %out, format = format.name(), "wrote output");
    Ok(())
}

fn run_detect(args: &Args) -> Result<(), CliError> {
    let mut settings = Settings::default();
    let found = detect_settings(&mut settings, &args.extra_path);
    let json = settings.to_json_string(args.pretty)?;
    println!("{json}");
    if found {
        Ok(())
    } else {
        Err(CliError::MissingPrograms)
    }
}

fn run(args: Args) -> Result<(), CliError> {
    match args.command {
        Command::Render => run_render(&args),
        Command::Detect => run_detect(&args),
    }
}

fn main() {
    let args = match parse_args(&std::env::args().collect::<Vec<_>>()) {
        Ok(v) => v,
        Err(CliError::Usage(msg)) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };
    init_tracing(args.verbose);

    if let Err(err) = run(args) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
