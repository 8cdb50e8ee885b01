//! Writing one of a render's outputs to a file or stream.

use crate::types::Output;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("unknown save format `{0}`")]
    UnknownFormat(String),
    #[error("{0} data is not available in this output")]
    FormatUnavailable(SaveFormat),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode {format}: {source}")]
    Encode {
        format: SaveFormat,
        source: image::ImageError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveFormat {
    Png,
    /// Also accepted as `PS`.
    Eps,
    Pdf,
    Svg,
    Dvi,
    /// Re-encoded from the decoded image, composited on white.
    Jpeg,
    /// Re-encoded from the decoded image.
    Bmp,
}

impl SaveFormat {
    pub const ALL: [SaveFormat; 7] = [
        SaveFormat::Png,
        SaveFormat::Eps,
        SaveFormat::Pdf,
        SaveFormat::Svg,
        SaveFormat::Dvi,
        SaveFormat::Jpeg,
        SaveFormat::Bmp,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SaveFormat::Png => "PNG",
            SaveFormat::Eps => "EPS",
            SaveFormat::Pdf => "PDF",
            SaveFormat::Svg => "SVG",
            SaveFormat::Dvi => "DVI",
            SaveFormat::Jpeg => "JPEG",
            SaveFormat::Bmp => "BMP",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            SaveFormat::Png => "png",
            SaveFormat::Eps => "eps",
            SaveFormat::Pdf => "pdf",
            SaveFormat::Svg => "svg",
            SaveFormat::Dvi => "dvi",
            SaveFormat::Jpeg => "jpg",
            SaveFormat::Bmp => "bmp",
        }
    }

    /// Format for `file_name`'s extension, if it names one.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let ext = Path::new(file_name).extension()?.to_str()?;
        ext.parse().ok()
    }

    fn is_available(self, output: &Output) -> bool {
        match self {
            SaveFormat::Png => !output.pngdata.is_empty(),
            SaveFormat::Eps => !output.epsdata.is_empty(),
            SaveFormat::Pdf => !output.pdfdata.is_empty(),
            SaveFormat::Svg => !output.svgdata.is_empty(),
            SaveFormat::Dvi => !output.dvidata.is_empty(),
            SaveFormat::Jpeg | SaveFormat::Bmp => output.result.is_some(),
        }
    }
}

impl FromStr for SaveFormat {
    type Err = SaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "eps" | "ps" => Ok(Self::Eps),
            "pdf" => Ok(Self::Pdf),
            "svg" => Ok(Self::Svg),
            "dvi" => Ok(Self::Dvi),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "bmp" => Ok(Self::Bmp),
            _ => Err(SaveError::UnknownFormat(s.to_string())),
        }
    }
}

impl std::fmt::Display for SaveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Format names that [`save_output_to_file`] can write for `output`.
pub fn available_save_formats(output: &Output) -> Vec<String> {
    let mut formats = Vec::new();
    for format in SaveFormat::ALL {
        if !format.is_available(output) {
            continue;
        }
        formats.push(format.name().to_string());
        if format == SaveFormat::Eps {
            formats.push("PS".to_string());
        }
    }
    formats
}

/// Picks the format from `format`, or from the extension of `file_name` when `format` is blank.
///
/// Falls back to PNG when neither names a format.
pub fn resolve_save_format(file_name: &str, format: &str) -> Result<SaveFormat, SaveError> {
    if !format.trim().is_empty() {
        return format.parse();
    }
    Ok(SaveFormat::from_file_name(file_name).unwrap_or(SaveFormat::Png))
}

/// The bytes `output` would be saved as in `format`.
pub fn encode_output(output: &Output, format: SaveFormat) -> Result<Vec<u8>, SaveError> {
    if !format.is_available(output) {
        return Err(SaveError::FormatUnavailable(format));
    }
    let data = match format {
        SaveFormat::Png => output.pngdata.clone(),
        SaveFormat::Eps => output.epsdata.clone(),
        SaveFormat::Pdf => output.pdfdata.clone(),
        SaveFormat::Svg => output.svgdata.clone(),
        SaveFormat::Dvi => output.dvidata.clone(),
        SaveFormat::Jpeg | SaveFormat::Bmp => {
            let Some(image) = &output.result else {
                return Err(SaveError::FormatUnavailable(format));
            };
            encode_raster(image, format)?
        }
    };
    Ok(data)
}

fn encode_raster(image: &image::DynamicImage, format: SaveFormat) -> Result<Vec<u8>, SaveError> {
    let rgba = image.to_rgba8();
    let (w, h) = rgba.dimensions();
    let mut out = Vec::new();
    let encoded = if format == SaveFormat::Jpeg {
        // JPEG has no alpha channel.
        let mut rgb = vec![0u8; (w as usize) * (h as usize) * 3];
        for (src, dst) in rgba.as_raw().chunks_exact(4).zip(rgb.chunks_exact_mut(3)) {
            let alpha = u32::from(src[3]);
            for c in 0..3 {
                dst[c] = ((u32::from(src[c]) * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
            }
        }
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 90).encode(
            &rgb,
            w,
            h,
            image::ExtendedColorType::Rgb8,
        )
    } else {
        image::codecs::bmp::BmpEncoder::new(&mut out).encode(
            rgba.as_raw(),
            w,
            h,
            image::ExtendedColorType::Rgba8,
        )
    };
    encoded.map_err(|source| SaveError::Encode { format, source })?;
    Ok(out)
}

/// Writes `output` in `format` (blank means PNG) to `device`.
pub fn save_output_to_device(
    output: &Output,
    device: &mut dyn Write,
    format: &str,
) -> Result<(), SaveError> {
    let format = resolve_save_format("", format)?;
    let data = encode_output(output, format)?;
    device.write_all(&data)?;
    device.flush()?;
    Ok(())
}

/// Writes `output` to `file_name`; `-` or an empty name writes to standard output.
///
/// Nothing is written when the requested format is unknown or not available.
pub fn save_output_to_file(output: &Output, file_name: &str, format: &str) -> Result<(), SaveError> {
    let format = resolve_save_format(file_name, format)?;
    let data = encode_output(output, format)?;
    if file_name.is_empty() || file_name == "-" {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(&data)?;
        stdout.flush()?;
    } else {
        std::fs::write(file_name, &data)?;
    }
    tracing::debug!(
        format = format.name(),
        bytes = data.len(),
        file = %file_name,
        "saved output"
    );
    Ok(())
}
