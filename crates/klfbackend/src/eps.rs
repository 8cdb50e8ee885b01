//! `%%BoundingBox` parsing and rewriting on raw PostScript bytes.
//!
//! EPS files may carry binary sections, so everything here works on `&[u8]`.

use regex::bytes::Regex;
use std::sync::OnceLock;

/// A bounding box in PostScript points: lower-left and upper-right corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub llx: i32,
    pub lly: i32,
    pub urx: i32,
    pub ury: i32,
}

impl BoundingBox {
    pub const fn new(llx: i32, lly: i32, urx: i32, ury: i32) -> Self {
        Self { llx, lly, urx, ury }
    }

    pub fn width(&self) -> i64 {
        i64::from(self.urx) - i64::from(self.llx)
    }

    pub fn height(&self) -> i64 {
        i64::from(self.ury) - i64::from(self.lly)
    }

    /// Grows each side by the given offset (negative offsets shrink).
    ///
    /// `None` when a corner would leave the `i32` range.
    pub fn expanded(&self, top: i32, right: i32, bottom: i32, left: i32) -> Option<Self> {
        Some(Self {
            llx: self.llx.checked_sub(left)?,
            lly: self.lly.checked_sub(bottom)?,
            urx: self.urx.checked_add(right)?,
            ury: self.ury.checked_add(top)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BBoxParseError {
    #[error("no %%BoundingBox line found")]
    Missing,
    #[error("malformed %%BoundingBox line: {line}")]
    Malformed { line: String },
}

fn bbox_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^%%BoundingBox:([^\r\n]*)\r?$").expect("static regex must compile")
    })
}

fn hires_bbox_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^%%HiResBoundingBox:([^\r\n]*)\r?$").expect("static regex must compile")
    })
}

/// Reads the first `%%BoundingBox: llx lly urx ury` line.
///
/// A line with anything other than four integers (e.g. `(atend)`) is malformed.
pub fn parse_bounding_box(data: &[u8]) -> Result<BoundingBox, BBoxParseError> {
    let caps = bbox_line_re()
        .captures(data)
        .ok_or(BBoxParseError::Missing)?;
    let whole = caps.get(0).map(|m| m.as_bytes()).unwrap_or_default();
    let rest = caps.get(1).map(|m| m.as_bytes()).unwrap_or_default();
    let malformed = || BBoxParseError::Malformed {
        line: String::from_utf8_lossy(whole).trim_end().to_string(),
    };

    let rest = std::str::from_utf8(rest).map_err(|_| malformed())?;
    let values = rest
        .split_whitespace()
        .map(|v| v.parse::<i32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| malformed())?;
    let &[llx, lly, urx, ury] = values.as_slice() else {
        return Err(malformed());
    };
    Ok(BoundingBox::new(llx, lly, urx, ury))
}

/// Writes `bbox` into the EPS header.
///
/// The existing `%%BoundingBox` line is replaced in place, as is a `%%HiResBoundingBox` line
/// when present. Without a bounding box line, one is inserted after the first header line.
pub fn set_bounding_box(data: &[u8], bbox: BoundingBox) -> Vec<u8> {
    let values = format!("{} {} {} {}", bbox.llx, bbox.lly, bbox.urx, bbox.ury);

    let mut out = match bbox_line_re().find(data) {
        Some(m) => {
            let line_ending: &[u8] = if m.as_bytes().ends_with(b"\r") {
                b"\r"
            } else {
                b""
            };
            splice(
                data,
                m.start(),
                m.end(),
                &[&b"%%BoundingBox: "[..], values.as_bytes(), line_ending].concat(),
            )
        }
        None => {
            let insert_at = data
                .iter()
                .position(|b| *b == b'\n')
                .map(|i| i + 1)
                .unwrap_or(data.len());
            let mut line = format!("%%BoundingBox: {values}\n").into_bytes();
            if insert_at == data.len() && !data.is_empty() && !data.ends_with(b"\n") {
                line.insert(0, b'\n');
            }
            splice(data, insert_at, insert_at, &line)
        }
    };

    if let Some(m) = hires_bbox_line_re().find(&out) {
        let line_ending: &[u8] = if m.as_bytes().ends_with(b"\r") {
            b"\r"
        } else {
            b""
        };
        let hires = format!(
            "%%HiResBoundingBox: {}.000000 {}.000000 {}.000000 {}.000000",
            bbox.llx, bbox.lly, bbox.urx, bbox.ury
        );
        out = splice(
            &out,
            m.start(),
            m.end(),
            &[hires.as_bytes(), line_ending].concat(),
        );
    }
    out
}

fn splice(data: &[u8], start: usize, end: usize, replacement: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() - (end - start) + replacement.len());
    out.extend_from_slice(&data[..start]);
    out.extend_from_slice(replacement);
    out.extend_from_slice(&data[end..]);
    out
}
