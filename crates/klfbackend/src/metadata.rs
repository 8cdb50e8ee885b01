//! Descriptive text chunks embedded into the final PNG.

use crate::types::{Input, Settings};
use std::io::Cursor;

pub const APPLICATION_NAME: &str = "KLatexFormula";

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("failed to decode PNG: {0}")]
    Decode(#[from] png::DecodingError),
    #[error("failed to encode PNG: {0}")]
    Encode(#[from] png::EncodingError),
}

/// The key/value pairs describing how an image was produced, in embedding order.
pub fn formula_metadata(input: &Input, settings: &Settings) -> Vec<(&'static str, String)> {
    vec![
        ("Application", APPLICATION_NAME.to_string()),
        (
            "AppVersion",
            format!("{APPLICATION_NAME} {}", crate::VERSION),
        ),
        ("InputLatex", input.latex.clone()),
        ("InputMathMode", input.mathmode.clone()),
        ("InputPreamble", input.preamble.clone()),
        ("InputFgColor", input.fg_color.css_rgb()),
        ("InputBgColor", input.bg_color.css_rgba()),
        ("InputDPI", input.dpi.to_string()),
        ("SettingsTBorderOffset", settings.tborderoffset.to_string()),
        ("SettingsRBorderOffset", settings.rborderoffset.to_string()),
        ("SettingsBBorderOffset", settings.bborderoffset.to_string()),
        ("SettingsLBorderOffset", settings.lborderoffset.to_string()),
        ("SettingsOutlineFonts", settings.outline_fonts.to_string()),
    ]
}

const DEFAULT_DECODE_LIMIT: usize = 64 * 1024 * 1024;

/// Memory ceiling for decoding `png_data`: its declared size at 16-bit RGBA plus slack, and
/// never below the decoders' usual 64 MiB.
pub(crate) fn decode_limit_bytes(png_data: &[u8]) -> usize {
    let Some((width, height)) = declared_size(png_data) else {
        return DEFAULT_DECODE_LIMIT;
    };
    let pixels = u64::from(width) * u64::from(height);
    // 8 bytes per pixel, one filter byte per row, 1 MiB for chunks and bookkeeping.
    let needed = pixels
        .saturating_mul(8)
        .saturating_add(u64::from(height))
        .saturating_add(1024 * 1024);
    usize::try_from(needed)
        .unwrap_or(usize::MAX)
        .max(DEFAULT_DECODE_LIMIT)
}

/// Width and height from the IHDR chunk, which always directly follows the signature.
fn declared_size(png_data: &[u8]) -> Option<(u32, u32)> {
    if png_data.get(12..16)? != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(png_data.get(16..20)?.try_into().ok()?);
    let height = u32::from_be_bytes(png_data.get(20..24)?.try_into().ok()?);
    Some((width, height))
}

fn decoder(png_data: &[u8]) -> png::Decoder<Cursor<&[u8]>> {
    let limits = png::Limits {
        bytes: decode_limit_bytes(png_data),
    };
    png::Decoder::new_with_limits(Cursor::new(png_data), limits)
}

/// Re-encodes `png_data` with one iTXt chunk per entry.
///
/// Pixels, palette, transparency and physical pixel dimensions are carried over unchanged.
pub fn embed_text_chunks(
    png_data: &[u8],
    entries: &[(&str, String)],
) -> Result<Vec<u8>, MetadataError> {
    let mut decoder = decoder(png_data);
    decoder.set_transformations(png::Transformations::IDENTITY);
    let mut reader = decoder.read_info()?;
    let mut pixels = vec![0; reader.output_buffer_size()];
    let frame = reader.next_frame(&mut pixels)?;
    pixels.truncate(frame.buffer_size());
    let info = reader.info();

    let mut out = Vec::with_capacity(png_data.len() + 512);
    {
        let mut encoder = png::Encoder::new(&mut out, info.width, info.height);
        encoder.set_color(info.color_type);
        encoder.set_depth(info.bit_depth);
        if let Some(palette) = &info.palette {
            encoder.set_palette(palette.to_vec());
        }
        if let Some(trns) = &info.trns {
            encoder.set_trns(trns.to_vec());
        }
        encoder.set_pixel_dims(info.pixel_dims);
        for (key, value) in entries {
            encoder.add_itxt_chunk((*key).to_string(), value.clone())?;
        }
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&pixels)?;
        writer.finish()?;
    }
    Ok(out)
}

/// Reads back the iTXt/tEXt/zTXt chunks that precede the image data as `(keyword, text)` pairs.
pub fn read_text_chunks(png_data: &[u8]) -> Result<Vec<(String, String)>, MetadataError> {
    let mut decoder = decoder(png_data);
    decoder.set_ignore_text_chunk(false);
    let mut reader = decoder.read_info()?;
    let mut pixels = vec![0; reader.output_buffer_size()];
    reader.next_frame(&mut pixels)?;
    let info = reader.info();

    let mut out = Vec::new();
    for chunk in &info.uncompressed_latin1_text {
        out.push((chunk.keyword.clone(), chunk.text.clone()));
    }
    for chunk in &info.compressed_latin1_text {
        if let Ok(text) = chunk.get_text() {
            out.push((chunk.keyword.clone(), text));
        }
    }
    for chunk in &info.utf8_text {
        if let Ok(text) = chunk.get_text() {
            out.push((chunk.keyword.clone(), text));
        }
    }
    Ok(out)
}
