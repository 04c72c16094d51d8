//! Image stage: SVG cleanup passes and raster re-encoding.

use std::sync::LazyLock;

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ImageEncoder, ImageFormat};
use regex::{Captures, Regex};
use serde::Deserialize;

use crate::source::FileEntry;
use crate::stage::{entry_text, StageOutput, TransformError, TransformStage};

static OPEN_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[a-zA-Z][^>]*>").unwrap());
static ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\s)([\w:.-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());
static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?").unwrap());
static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\s*<title\b[^>]*>.*?</title>").unwrap());
static PATH_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[MmZzLlHhVvCcSsQqTt]|-?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?").unwrap()
});
static TRANSFORM_FN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-zA-Z]+)\s*\(([^)]*)\)").unwrap());
static SINGLE_PATH_GROUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<g\s+transform="([^"]*)"\s*>\s*<path\b([^>]*?)\s*/>\s*</g>"#).unwrap()
});
static PATH_TRANSFORM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\s+transform="([^"]*)""#).unwrap());

/// Attributes holding a single length or number.
const NUMERIC_ATTRIBUTES: &[&str] = &[
    "x", "y", "x1", "y1", "x2", "y2", "cx", "cy", "r", "rx", "ry", "fx", "fy", "width",
    "height", "offset", "opacity", "fill-opacity", "stroke-opacity", "stroke-width",
    "stroke-miterlimit", "font-size",
];

/// Attributes holding a list of numbers.
const LIST_ATTRIBUTES: &[&str] = &["points", "stroke-dasharray", "dx", "dy"];

/// Image options as read from configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageOptions {
    pub jpeg_quality: u8,
    pub progressive: bool,

    /// Decimal places kept by the SVG passes
    pub svg_precision: usize,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            jpeg_quality: 75,
            progressive: true,
            svg_precision: 2,
        }
    }
}

/// One SVG cleanup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SvgPass {
    RemoveTitle,
    CleanupNumericValues,
    ConvertPathData,
    TransformsWithOnePath,
    ConvertTransform,
    CleanupListOfValues,
}

impl SvgPass {
    pub const DEFAULT_ORDER: [SvgPass; 7] = [
        Self::RemoveTitle,
        Self::CleanupNumericValues,
        Self::CleanupNumericValues,
        Self::ConvertPathData,
        Self::TransformsWithOnePath,
        Self::ConvertTransform,
        Self::CleanupListOfValues,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::RemoveTitle => "removeTitle",
            Self::CleanupNumericValues => "cleanupNumericValues",
            Self::ConvertPathData => "convertPathData",
            Self::TransformsWithOnePath => "transformsWithOnePath",
            Self::ConvertTransform => "convertTransform",
            Self::CleanupListOfValues => "cleanupListOfValues",
        }
    }

    pub fn apply(&self, svg: &str, precision: usize) -> String {
        match self {
            Self::RemoveTitle => TITLE.replace_all(svg, "").into_owned(),
            Self::CleanupNumericValues => rewrite_attributes(svg, |name, value| {
                if !NUMERIC_ATTRIBUTES.contains(&name) {
                    return AttributeEdit::Keep;
                }
                match value.trim().strip_suffix("px").unwrap_or(value.trim()) {
                    v if is_number(v) => AttributeEdit::Replace(round(v, precision)),
                    _ => AttributeEdit::Keep,
                }
            }),
            Self::ConvertPathData => rewrite_attributes(svg, |name, value| {
                if name != "d" {
                    return AttributeEdit::Keep;
                }
                match convert_path(value, precision) {
                    Some(d) => AttributeEdit::Replace(d),
                    None => AttributeEdit::Keep,
                }
            }),
            Self::TransformsWithOnePath => SINGLE_PATH_GROUP
                .replace_all(svg, |caps: &Captures| {
                    let outer = &caps[1];
                    let attributes = &caps[2];
                    let (transform, rest) = match PATH_TRANSFORM.captures(attributes) {
                        Some(inner) => (
                            format!("{} {}", outer, &inner[1]),
                            PATH_TRANSFORM.replace(attributes, "").into_owned(),
                        ),
                        None => (outer.to_string(), attributes.to_string()),
                    };
                    format!("<path transform=\"{}\"{}/>", transform, rest)
                })
                .into_owned(),
            Self::ConvertTransform => rewrite_attributes(svg, |name, value| {
                if name != "transform"
                    && name != "gradientTransform"
                    && name != "patternTransform"
                {
                    return AttributeEdit::Keep;
                }
                let converted = convert_transform(value, precision);
                if converted.is_empty() {
                    AttributeEdit::Remove
                } else {
                    AttributeEdit::Replace(converted)
                }
            }),
            Self::CleanupListOfValues => rewrite_attributes(svg, |name, value| {
                if !LIST_ATTRIBUTES.contains(&name) {
                    return AttributeEdit::Keep;
                }
                let values: Vec<String> = NUMBER
                    .find_iter(value)
                    .map(|m| round(m.as_str(), precision))
                    .collect();
                AttributeEdit::Replace(values.join(" "))
            }),
        }
    }
}

enum AttributeEdit {
    Keep,
    Replace(String),
    Remove,
}

/// Apply `edit` to every attribute of every start tag.
fn rewrite_attributes(svg: &str, edit: impl Fn(&str, &str) -> AttributeEdit) -> String {
    OPEN_TAG
        .replace_all(svg, |tag: &Captures| {
            ATTRIBUTE
                .replace_all(&tag[0], |attr: &Captures| {
                    let name = &attr[2];
                    let value = attr.get(3).or_else(|| attr.get(4)).map_or("", |m| m.as_str());
                    match edit(name, value) {
                        AttributeEdit::Keep => attr[0].to_string(),
                        AttributeEdit::Replace(v) => format!("{}{}=\"{}\"", &attr[1], name, v),
                        AttributeEdit::Remove => String::new(),
                    }
                })
                .into_owned()
        })
        .into_owned()
}

fn is_number(value: &str) -> bool {
    NUMBER.find(value).is_some_and(|m| m.as_str() == value)
}

/// Round to `precision` decimals and drop trailing zeros.
fn round(number: &str, precision: usize) -> String {
    let Ok(value) = number.parse::<f64>() else {
        return number.to_string();
    };
    let mut text = format!("{:.*}", precision, value);
    if text.contains('.') {
        text = text.trim_end_matches('0').trim_end_matches('.').to_string();
    }
    if text == "-0" {
        text = "0".to_string();
    }
    text
}

/// Rounded, compactly separated path data.
///
/// Paths with arc commands are skipped since their flag arguments may be
/// written without separators.
fn convert_path(d: &str, precision: usize) -> Option<String> {
    if d.contains(['a', 'A']) {
        return None;
    }
    let mut out = String::with_capacity(d.len());
    let mut after_command = true;
    for token in PATH_TOKEN.find_iter(d) {
        let token = token.as_str();
        if token.starts_with(|c: char| c.is_ascii_alphabetic()) {
            out.push_str(token);
            after_command = true;
            continue;
        }
        let number = round(token, precision);
        if !after_command && !number.starts_with('-') {
            out.push(' ');
        }
        out.push_str(&number);
        after_command = false;
    }
    Some(out)
}

/// Rounded transform list with identity functions removed.
fn convert_transform(transform: &str, precision: usize) -> String {
    let mut functions = Vec::new();
    for caps in TRANSFORM_FN.captures_iter(transform) {
        let name = &caps[1];
        let args: Vec<String> = NUMBER
            .find_iter(&caps[2])
            .map(|m| round(m.as_str(), precision))
            .collect();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        let identity = match (name, args.as_slice()) {
            ("translate", ["0"]) | ("translate", ["0", "0"]) => true,
            ("scale", ["1"]) | ("scale", ["1", "1"]) => true,
            ("rotate", ["0", ..]) | ("skewX", ["0"]) | ("skewY", ["0"]) => true,
            ("matrix", ["1", "0", "0", "1", "0", "0"]) => true,
            _ => false,
        };
        if !identity {
            functions.push(format!("{}({})", name, args.join(" ")));
        }
    }
    functions.join(" ")
}

/// Optimizes SVG, JPEG and PNG files. Never produces diagnostics.
#[derive(Debug, Clone)]
pub struct ImageStage {
    options: ImageOptions,
    passes: Vec<SvgPass>,
}

impl ImageStage {
    pub fn new(options: ImageOptions) -> Self {
        Self {
            options,
            passes: SvgPass::DEFAULT_ORDER.to_vec(),
        }
    }

    fn svg(&self, entry: &FileEntry) -> Result<Vec<u8>, TransformError> {
        let text = entry_text(entry)?;
        let optimized = self
            .passes
            .iter()
            .fold(text.to_string(), |svg, pass| pass.apply(&svg, self.options.svg_precision));
        Ok(optimized.into_bytes())
    }

    fn jpeg(&self, entry: &FileEntry) -> Result<Vec<u8>, TransformError> {
        let failed = |message: String| TransformError::Image {
            path: entry.path.clone(),
            message,
        };
        let decoded = image::load_from_memory_with_format(&entry.contents, ImageFormat::Jpeg)
            .map_err(|e| failed(e.to_string()))?;
        let rgb = decoded.to_rgb8();
        let (width, height) = (
            u16::try_from(rgb.width()).map_err(|_| failed("image too wide".to_string()))?,
            u16::try_from(rgb.height()).map_err(|_| failed("image too tall".to_string()))?,
        );

        let mut out = Vec::new();
        let mut encoder = jpeg_encoder::Encoder::new(&mut out, self.options.jpeg_quality);
        encoder.set_progressive(self.options.progressive);
        encoder
            .encode(rgb.as_raw(), width, height, jpeg_encoder::ColorType::Rgb)
            .map_err(|e| failed(e.to_string()))?;
        Ok(out)
    }

    fn png(&self, entry: &FileEntry) -> Result<Vec<u8>, TransformError> {
        let failed = |message: String| TransformError::Image {
            path: entry.path.clone(),
            message,
        };
        let decoded = image::load_from_memory_with_format(&entry.contents, ImageFormat::Png)
            .map_err(|e| failed(e.to_string()))?;

        let mut out = Vec::new();
        let encoder =
            PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive);
        encoder
            .write_image(
                decoded.as_bytes(),
                decoded.width(),
                decoded.height(),
                decoded.color(),
            )
            .map_err(|e| failed(e.to_string()))?;

        if out.len() < entry.contents.len() {
            Ok(out)
        } else {
            Ok(entry.contents.clone())
        }
    }
}

impl Default for ImageStage {
    fn default() -> Self {
        Self::new(ImageOptions::default())
    }
}

impl TransformStage for ImageStage {
    fn name(&self) -> &'static str {
        "images"
    }

    fn steps(&self) -> Vec<&'static str> {
        let mut steps: Vec<&'static str> = self.passes.iter().map(|p| p.name()).collect();
        steps.extend(["jpeg", "png"]);
        steps
    }

    fn run(&self, entry: &FileEntry) -> Result<StageOutput, TransformError> {
        let extension = entry
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        let contents = match extension.as_deref() {
            Some("svg") => self.svg(entry)?,
            Some("jpg" | "jpeg") => self.jpeg(entry)?,
            Some("png") => self.png(entry)?,
            _ => {
                return Err(TransformError::Unsupported {
                    path: entry.path.clone(),
                    stage: "images",
                })
            }
        };
        Ok(StageOutput::bytes(contents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Category;
    use image::{ImageBuffer, Rgb, Rgba};
    use pretty_assertions::assert_eq;

    fn svg(source: &str) -> String {
        let entry = FileEntry::new("icon.svg", Category::Image, source);
        let output = ImageStage::default().run(&entry).unwrap();
        assert!(output.diagnostics.is_empty());
        String::from_utf8(output.contents).unwrap()
    }

    #[test]
    fn rounds_numbers() {
        assert_eq!(round("1.23456", 2), "1.23");
        assert_eq!(round("2.000", 2), "2");
        assert_eq!(round("-0.001", 2), "0");
        assert_eq!(round("10", 2), "10");
    }

    #[test]
    fn optimizes_svg() {
        let out = svg(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" viewBox=\"0 0 24.123 24\">\n\
             <title>Icon</title>\n\
             <rect x=\"1.23456px\" width=\"10.000\" height=\"4\"/>\n\
             <g transform=\"translate(1.005 2)\"><path d=\"M 1.111 , 2.226 L -3.3333 4 z\"/></g>\n\
             <polyline points=\"1.111,2.222 3.333,4\" transform=\"scale(1)\"/>\n\
             </svg>",
        );

        assert_eq!(
            out,
            "<svg xmlns=\"http://www.w3.org/2000/svg\" viewBox=\"0 0 24.123 24\">\n\
             <rect x=\"1.23\" width=\"10\" height=\"4\"/>\n\
             <path transform=\"translate(1 2)\" d=\"M1.11 2.23L-3.33 4z\"/>\n\
             <polyline points=\"1.11 2.22 3.33 4\"/>\n\
             </svg>"
        );
    }

    #[test]
    fn svg_passes_are_stable() {
        let source = "<svg viewBox=\"0 0 10 10\"><path d=\"M1 2L3.456 4\"/></svg>";
        let once = svg(source);

        assert_eq!(svg(&once), once);
    }

    #[test]
    fn leaves_arc_paths_alone() {
        let source = "<svg><path d=\"M0 0a1 1 0 011 1\"/></svg>";
        assert_eq!(svg(source), source);
    }

    #[test]
    fn merges_group_and_path_transforms() {
        let out = SvgPass::TransformsWithOnePath.apply(
            "<g transform=\"rotate(45)\"><path transform=\"scale(2)\" d=\"M0 0\"/></g>",
            2,
        );
        assert_eq!(out, "<path transform=\"rotate(45) scale(2)\" d=\"M0 0\"/>");
    }

    #[test]
    fn reencodes_jpeg_progressively() {
        let pixels = ImageBuffer::from_fn(32, 32, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, 128]));
        let mut source = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut source, 95)
            .encode_image(&pixels)
            .unwrap();
        let entry = FileEntry::new("photo.jpg", Category::Image, source);

        let output = ImageStage::default().run(&entry).unwrap();

        assert_eq!(&output.contents[..2], &[0xFF, 0xD8]);
        assert!(output.contents.windows(2).any(|w| w == [0xFF, 0xC2]));
        let decoded = image::load_from_memory(&output.contents).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 32));
    }

    #[test]
    fn png_never_grows() {
        let pixels = ImageBuffer::from_fn(16, 16, |x, _| Rgba([x as u8 * 16, 0, 0, 255]));
        let mut source = Vec::new();
        PngEncoder::new_with_quality(&mut source, CompressionType::Fast, FilterType::NoFilter)
            .write_image(pixels.as_raw(), 16, 16, image::ColorType::Rgba8)
            .unwrap();
        let entry = FileEntry::new("dot.png", Category::Image, source.clone());

        let output = ImageStage::default().run(&entry).unwrap();

        assert!(output.contents.len() <= source.len());
        let decoded = image::load_from_memory(&output.contents).unwrap().to_rgba8();
        assert_eq!(decoded.as_raw(), pixels.as_raw());
    }

    #[test]
    fn corrupt_images_fail_the_file() {
        let entry = FileEntry::new("broken.png", Category::Image, vec![1, 2, 3]);

        assert!(matches!(
            ImageStage::default().run(&entry),
            Err(TransformError::Image { .. })
        ));
    }

    #[test]
    fn unsupported_extensions_fail_the_file() {
        let entry = FileEntry::new("anim.gif", Category::Image, vec![0]);

        assert!(matches!(
            ImageStage::default().run(&entry),
            Err(TransformError::Unsupported { .. })
        ));
    }
}
