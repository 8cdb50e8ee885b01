use assert_cmd::prelude::*;
use std::process::Command;

fn cli() -> Command {
    Command::new(assert_cmd::cargo_bin!("klatexformula-cli"))
}

#[test]
fn help_prints_usage_and_exits_2() {
    let output = cli().arg("--help").output().expect("run cli");
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("USAGE:"));
}

#[test]
fn unknown_flag_is_a_usage_error() {
    cli().arg("--no-such-flag").assert().code(2);
}

#[test]
fn missing_latex_reports_no_run() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let missing = tmp.path().join("missing");
    let output = cli()
        .args(["--latex", "x"])
        .arg("--latex-exec")
        .arg(missing.join("latex"))
        .arg("--dvips-exec")
        .arg(missing.join("dvips"))
        .arg("--gs-exec")
        .arg(missing.join("gs"))
        .arg("--tempdir")
        .arg(tmp.path())
        .arg("--out")
        .arg(tmp.path().join("out.png"))
        .output()
        .expect("run cli");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("LatexNoRun"), "{stderr}");
    assert!(stderr.contains("status -4"), "{stderr}");
    assert!(stderr.contains("hint: install TeX"), "{stderr}");
    assert!(!tmp.path().join("out.png").exists());
}

#[cfg(unix)]
mod fake_tools {
    use super::cli;
    use assert_cmd::prelude::*;
    use std::fs;
    use std::io::Cursor;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::process::Command;

    const LATEX_OK: &str = "#!/bin/sh\nprintf 'DVI' > klfformula.dvi\n";
    const LATEX_FAIL: &str =
        "#!/bin/sh\necho '! Missing $ inserted.'\necho 'l.6 <recently read> x^2' >&2\nexit 1\n";
    const DVIPS: &str = "#!/bin/sh\n\
cat > \"$4\" <<'EOF'\n\
%!PS-Adobe-3.0 EPSF-3.0\n\
%%BoundingBox: 0 0 20 10\n\
%%EndComments\n\
showpage\n\
EOF\n";

    struct Tools {
        dir: tempfile::TempDir,
    }

    impl Tools {
        fn new(latex: &str) -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let png = dir.path().join("fixture.png");
            let img = image::RgbaImage::from_pixel(3, 2, image::Rgba([0, 0, 0, 255]));
            let mut bytes = Vec::new();
            image::DynamicImage::ImageRgba8(img)
                .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
                .expect("encode fixture");
            fs::write(&png, bytes).expect("write fixture");

            let gs = format!(
                "#!/bin/sh\n\
out=''\n\
device=''\n\
for a in \"$@\"; do\n\
  case \"$a\" in\n\
    --version) echo '9.55.0'; exit 0 ;;\n\
    -sDEVICE=*) device=\"${{a#-sDEVICE=}}\" ;;\n\
    -sOutputFile=*) out=\"${{a#-sOutputFile=}}\" ;;\n\
  esac\n\
done\n\
case \"$device\" in\n\
  bbox) echo '%%BoundingBox: 0 0 20 10' >&2 ;;\n\
  png*) cp '{}' \"$out\" ;;\n\
  pdfwrite) printf '%%PDF-1.4\\n' > \"$out\" ;;\n\
  svg) printf '<svg/>' > \"$out\" ;;\n\
  *) cp klfformula-bbox.eps \"$out\" ;;\n\
esac\n",
                png.display()
            );

            let tools = Self { dir };
            tools.script("latex", latex);
            tools.script("dvips", DVIPS);
            tools.script("gs", &gs);
            tools
        }

        fn bin(&self) -> PathBuf {
            self.dir.path().join("bin")
        }

        fn script(&self, name: &str, body: &str) {
            fs::create_dir_all(self.bin()).expect("bin dir");
            let path = self.bin().join(name);
            fs::write(&path, body).expect("write script");
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        }

        fn render(&self, work: &Path) -> Command {
            let mut cmd = cli();
            cmd.arg("render")
                .arg("--latex-exec")
                .arg(self.bin().join("latex"))
                .arg("--dvips-exec")
                .arg(self.bin().join("dvips"))
                .arg("--gs-exec")
                .arg(self.bin().join("gs"))
                .arg("--tempdir")
                .arg(work);
            cmd
        }
    }

    #[test]
    fn renders_png_with_metadata() {
        let tools = Tools::new(LATEX_OK);
        let work = tempfile::tempdir().expect("tempdir");
        let out = work.path().join("formula.png");
        let output = tools
            .render(work.path())
            .args(["--latex", r"\sqrt{2}", "--dpi", "300", "--out"])
            .arg(&out)
            .output()
            .expect("run cli");
        assert!(
            output.status.success(),
            "{}",
            String::from_utf8_lossy(&output.stderr)
        );

        let bytes = fs::read(&out).expect("read png");
        assert!(bytes.starts_with(b"\x89PNG\r\n\x1a\n"));
        let chunks = klfbackend::metadata::read_text_chunks(&bytes).expect("png text");
        assert!(chunks.contains(&("InputLatex".to_string(), r"\sqrt{2}".to_string())));
        assert!(chunks.contains(&("InputDPI".to_string(), "300".to_string())));

        // Only the output file is left behind; the work directory is gone.
        let leftovers: Vec<_> = fs::read_dir(work.path())
            .expect("list work dir")
            .map(|e| e.expect("entry").file_name())
            .collect();
        assert_eq!(leftovers, [std::ffi::OsString::from("formula.png")]);
    }

    #[test]
    fn default_output_sits_next_to_the_input_file() {
        let tools = Tools::new(LATEX_OK);
        let work = tempfile::tempdir().expect("tempdir");
        let source = work.path().join("euler.tex");
        fs::write(&source, r"e^{i\pi}+1=0").expect("write source");
        tools
            .render(work.path())
            .args(["--format", "eps"])
            .arg(&source)
            .assert()
            .success();

        let eps = fs::read_to_string(work.path().join("euler.eps")).expect("read eps");
        assert!(eps.contains("%%BoundingBox: -1 -1 21 11"), "{eps}");
    }

    #[test]
    fn pdf_goes_to_stdout() {
        let tools = Tools::new(LATEX_OK);
        let work = tempfile::tempdir().expect("tempdir");
        let output = tools
            .render(work.path())
            .args(["--latex", "x", "--format", "pdf", "--out", "-"])
            .output()
            .expect("run cli");
        assert!(output.status.success());
        assert!(output.stdout.starts_with(b"%PDF-1.4"));
    }

    #[test]
    fn list_formats_reflects_requested_outputs() {
        let tools = Tools::new(LATEX_OK);
        let work = tempfile::tempdir().expect("tempdir");
        let output = tools
            .render(work.path())
            .args(["--latex", "x", "--svg", "--list-formats"])
            .output()
            .expect("run cli");
        assert!(output.status.success());
        let listed = String::from_utf8_lossy(&output.stdout);
        let listed: Vec<&str> = listed.lines().collect();
        assert_eq!(listed, ["PNG", "EPS", "PS", "SVG", "DVI", "JPEG", "BMP"]);
    }

    #[test]
    fn latex_errors_are_reported_with_the_log() {
        let tools = Tools::new(LATEX_FAIL);
        let work = tempfile::tempdir().expect("tempdir");
        let output = tools
            .render(work.path())
            .args(["--latex", "x^2", "--mathmode", "..."])
            .arg("--out")
            .arg(work.path().join("out.png"))
            .output()
            .expect("run cli");
        assert_eq!(output.status.code(), Some(1));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("ProgramError(Latex) (status 1)"), "{stderr}");
        assert!(stderr.contains("! Missing $ inserted."), "{stderr}");
        assert!(stderr.contains("&lt;recently read&gt;"), "{stderr}");
        assert!(stderr.contains("hint: the program rejected the input"), "{stderr}");
        assert!(!work.path().join("out.png").exists());
    }

    #[test]
    fn detect_finds_tools_on_extra_path() {
        let tools = Tools::new(LATEX_OK);
        let output = cli()
            .args(["detect", "--extra-path"])
            .arg(tools.bin())
            .output()
            .expect("run cli");
        assert!(
            output.status.success(),
            "{}",
            String::from_utf8_lossy(&output.stderr)
        );
        let settings: serde_json::Value =
            serde_json::from_slice(&output.stdout).expect("settings json");
        let path_of = |key: &str| PathBuf::from(settings[key].as_str().expect("path string"));
        assert_eq!(path_of("latex_exec"), tools.bin().join("latex"));
        assert_eq!(path_of("dvips_exec"), tools.bin().join("dvips"));
        assert_eq!(path_of("gs_exec"), tools.bin().join("gs"));
        assert_eq!(settings["want_svg"], serde_json::Value::Bool(true));
    }
}
