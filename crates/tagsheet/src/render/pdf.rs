//! PDF output through `printpdf`.

use std::io::{BufWriter, Write};

use chrono::{DateTime, Local};
use printpdf::{
    BuiltinFont, Color, ColorBits, ColorSpace, Image, ImageTransform, ImageXObject,
    IndirectFontRef, Line, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference, Point, Pt,
    Px, Rgb,
};
use tracing::debug;

use super::text::{clamp_lines, text_width, with_ellipsis, wrap_text};
use super::{RenderSink, PLACEHOLDER_TEXT};
use crate::assets::QrImage;
use crate::error::{Error, Result};
use crate::label::LabelItem;
use crate::layout::PageGeometry;

const TITLE_FONT_SIZE: f64 = 16.0;
const DATE_FONT_SIZE: f64 = 9.0;
const ID_FONT_SIZE: f64 = 9.0;
const URL_FONT_SIZE: f64 = 6.5;
const PLACEHOLDER_FONT_SIZE: f64 = 8.0;
const LINE_HEIGHT_FACTOR: f64 = 1.2;
/// Helvetica descender depth relative to the font size.
const DESCENT_FACTOR: f64 = 0.21;
/// Gap between the QR image and the first text line.
const TEXT_PADDING: f64 = 2.0;
const POINTS_PER_INCH: f64 = 72.0;
const LAYER_NAME: &str = "Labels";

struct Fonts {
    regular: IndirectFontRef,
    bold: IndirectFontRef,
}

struct Document {
    doc: PdfDocumentReference,
    layers: Vec<PdfLayerReference>,
    fonts: Fonts,
}

/// Renders labels into an in-memory PDF.
pub struct PdfSink {
    geometry: PageGeometry,
    title: String,
    generated_at: DateTime<Local>,
    document: Option<Document>,
}

impl std::fmt::Debug for PdfSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfSink")
            .field("title", &self.title)
            .field("generated_at", &self.generated_at)
            .field(
                "pages",
                &self.document.as_ref().map_or(0, |d| d.layers.len()),
            )
            .finish_non_exhaustive()
    }
}

impl PdfSink {
    /// Create a sink for pages of the given geometry.
    #[must_use]
    pub fn new(geometry: PageGeometry, title: impl Into<String>) -> Self {
        Self {
            geometry,
            title: title.into(),
            generated_at: Local::now(),
            document: None,
        }
    }

    /// Override the timestamp printed in the header.
    #[must_use]
    pub fn with_generated_at(mut self, generated_at: DateTime<Local>) -> Self {
        self.generated_at = generated_at;
        self
    }

    fn page_size(&self) -> (Mm, Mm) {
        (pt(self.geometry.page_width), pt(self.geometry.page_height))
    }

    /// Convert a top-left y coordinate to the PDF bottom-left system.
    fn flip(&self, y: f64) -> f64 {
        self.geometry.page_height - y
    }

    fn draw_header(&self, document: &Document) {
        let Some(layer) = document.layers.first() else {
            return;
        };
        for line in header_lines(&self.geometry, &self.title, self.generated_at) {
            self.write_line(layer, &document.fonts, &line);
        }
    }

    fn write_line(&self, layer: &PdfLayerReference, fonts: &Fonts, line: &TextLine) {
        let font = if line.bold { &fonts.bold } else { &fonts.regular };
        layer.use_text(
            line.text.as_str(),
            to_f32(line.size),
            pt(line.x),
            pt(self.flip(line.baseline)),
            font,
        );
    }

    fn draw_image(&self, layer: &PdfLayerReference, x: f64, y: f64, size: f64, image: &QrImage) {
        let dpi = f64::from(image.width) / (size / POINTS_PER_INCH);
        let xobject = Image::from(ImageXObject {
            width: Px(image.width as usize),
            height: Px(image.height as usize),
            color_space: ColorSpace::Rgb,
            bits_per_component: ColorBits::Bit8,
            interpolate: false,
            image_data: image.rgb.clone(),
            image_filter: None,
            clipping_bbox: None,
            smask: None,
        });
        xobject.add_to_layer(
            layer.clone(),
            ImageTransform {
                translate_x: Some(pt(x)),
                translate_y: Some(pt(self.flip(y + size))),
                dpi: Some(to_f32(dpi)),
                ..Default::default()
            },
        );
    }

    fn draw_placeholder(
        &self,
        layer: &PdfLayerReference,
        fonts: &Fonts,
        x: f64,
        y: f64,
        size: f64,
    ) {
        let corners = [(x, y), (x + size, y), (x + size, y + size), (x, y + size)];
        let frame = Line {
            points: corners
                .iter()
                .map(|&(cx, cy)| (Point::new(pt(cx), pt(self.flip(cy))), false))
                .collect(),
            is_closed: true,
        };
        layer.set_outline_color(grey());
        layer.set_outline_thickness(0.75);
        layer.add_line(frame);

        layer.set_fill_color(grey());
        self.write_line(layer, fonts, &placeholder_line(x, y, size));
        layer.set_fill_color(black());
    }

    fn draw_caption(
        &self,
        layer: &PdfLayerReference,
        fonts: &Fonts,
        x: f64,
        y: f64,
        size: f64,
        item: &LabelItem,
    ) {
        for line in caption_lines(&self.geometry, x, y, size, item) {
            self.write_line(layer, fonts, &line);
        }
    }
}

/// One line of text, positioned in top-left page coordinates.
#[derive(Debug, Clone, PartialEq)]
struct TextLine {
    text: String,
    size: f64,
    bold: bool,
    x: f64,
    baseline: f64,
}

impl TextLine {
    fn centered(
        text: String,
        size: f64,
        bold: bool,
        x: f64,
        box_width: f64,
        baseline: f64,
    ) -> Self {
        let offset = (box_width - text_width(&text, size)).max(0.0) / 2.0;
        Self {
            text,
            size,
            bold,
            x: x + offset,
            baseline,
        }
    }

    /// Lowest point of the line's glyphs.
    fn bottom(&self) -> f64 {
        self.baseline + self.size * DESCENT_FACTOR
    }
}

/// Header lines for page 1, limited to the band reserved by `header_height`.
///
/// Lines that would reach into the label grid are left out, the date first.
fn header_lines(
    geometry: &PageGeometry,
    title: &str,
    generated_at: DateTime<Local>,
) -> Vec<TextLine> {
    let margin = geometry.margin;
    let band_bottom = margin + geometry.header_height;
    let max_width = geometry.page_width - 2.0 * margin;

    let title = TextLine {
        text: fit_line(title, TITLE_FONT_SIZE, max_width),
        size: TITLE_FONT_SIZE,
        bold: true,
        x: margin,
        baseline: margin + TITLE_FONT_SIZE,
    };
    let date = TextLine {
        text: format!("Generated {}", generated_at.format("%Y-%m-%d %H:%M")),
        size: DATE_FONT_SIZE,
        bold: false,
        x: margin,
        baseline: title.baseline + DATE_FONT_SIZE * LINE_HEIGHT_FACTOR + 2.0,
    };

    [title, date]
        .into_iter()
        .take_while(|line| line.bottom() <= band_bottom)
        .collect()
}

/// The id line and wrapped URL lines under a label, kept within
/// `label_text_height`.
fn caption_lines(
    geometry: &PageGeometry,
    x: f64,
    y: f64,
    size: f64,
    item: &LabelItem,
) -> Vec<TextLine> {
    let mut lines = Vec::new();
    let mut top = y + size + TEXT_PADDING;
    let bottom = y + size + geometry.label_text_height;

    let id_height = ID_FONT_SIZE * LINE_HEIGHT_FACTOR;
    if top + id_height > bottom {
        return lines;
    }
    lines.push(TextLine::centered(
        fit_line(&item.id, ID_FONT_SIZE, size),
        ID_FONT_SIZE,
        true,
        x,
        size,
        top + ID_FONT_SIZE,
    ));
    top += id_height;

    let line_height = URL_FONT_SIZE * LINE_HEIGHT_FACTOR;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let max_lines = ((bottom - top) / line_height).floor().max(0.0) as usize;
    let wrapped = clamp_lines(
        wrap_text(&item.target_url, URL_FONT_SIZE, size),
        max_lines,
        URL_FONT_SIZE,
        size,
    );
    for text in wrapped {
        lines.push(TextLine::centered(
            text,
            URL_FONT_SIZE,
            false,
            x,
            size,
            top + URL_FONT_SIZE,
        ));
        top += line_height;
    }
    lines
}

fn placeholder_line(x: f64, y: f64, size: f64) -> TextLine {
    TextLine::centered(
        PLACEHOLDER_TEXT.to_string(),
        PLACEHOLDER_FONT_SIZE,
        false,
        x,
        size,
        y + size / 2.0 + PLACEHOLDER_FONT_SIZE / 3.0,
    )
}

fn fit_line(text: &str, font_size: f64, max_width: f64) -> String {
    if text_width(text, font_size) > max_width {
        with_ellipsis(text, font_size, max_width)
    } else {
        text.to_string()
    }
}

impl RenderSink for PdfSink {
    type Artifact = Vec<u8>;

    fn begin_document(&mut self, page_count: usize) -> Result<()> {
        if page_count == 0 {
            return Err(Error::render("a document needs at least one page"));
        }
        let (width, height) = self.page_size();
        let (doc, first_page, first_layer) =
            PdfDocument::new(self.title.as_str(), width, height, LAYER_NAME);

        let regular = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| Error::render(e.to_string()))?;
        let bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|e| Error::render(e.to_string()))?;

        let mut layers = Vec::with_capacity(page_count);
        layers.push(doc.get_page(first_page).get_layer(first_layer));
        for _ in 1..page_count {
            let (page, layer) = doc.add_page(width, height, LAYER_NAME);
            layers.push(doc.get_page(page).get_layer(layer));
        }

        let document = Document {
            doc,
            layers,
            fonts: Fonts { regular, bold },
        };
        self.draw_header(&document);
        self.document = Some(document);

        debug!("Started PDF with {} page(s)", page_count);
        Ok(())
    }

    fn draw_label(
        &mut self,
        page_index: usize,
        x: f64,
        y: f64,
        label_size: f64,
        item: &LabelItem,
        image: Option<&QrImage>,
    ) -> Result<()> {
        let document = self
            .document
            .as_ref()
            .ok_or_else(|| Error::render("draw_label called before begin_document"))?;
        let layer = document.layers.get(page_index).ok_or_else(|| {
            Error::render(format!(
                "page {page_index} is outside a document of {} page(s)",
                document.layers.len()
            ))
        })?;

        match image {
            Some(image) => self.draw_image(layer, x, y, label_size, image),
            None => self.draw_placeholder(layer, &document.fonts, x, y, label_size),
        }
        self.draw_caption(layer, &document.fonts, x, y, label_size, item);
        Ok(())
    }

    fn finalize(self) -> Result<Vec<u8>> {
        let document = self
            .document
            .ok_or_else(|| Error::render("finalize called before begin_document"))?;

        let mut bytes = Vec::new();
        {
            let mut writer = BufWriter::new(&mut bytes);
            document
                .doc
                .save(&mut writer)
                .map_err(|e| Error::render(e.to_string()))?;
            writer.flush()?;
        }
        debug!("Serialized PDF ({} bytes)", bytes.len());
        Ok(bytes)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn pt(value: f64) -> Mm {
    Mm::from(Pt(value as f32))
}

#[allow(clippy::cast_possible_truncation)]
fn to_f32(value: f64) -> f32 {
    value as f32
}

fn grey() -> Color {
    Color::Rgb(Rgb::new(0.55, 0.55, 0.55, None))
}

fn black() -> Color {
    Color::Rgb(Rgb::new(0.0, 0.0, 0.0, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::items_from_ids;
    use crate::layout::compute_layout;
    use crate::render::render_plan;
    use crate::render::text::ELLIPSIS;

    fn qr() -> QrImage {
        QrImage {
            width: 2,
            height: 2,
            rgb: vec![0, 0, 0, 255, 255, 255, 255, 255, 255, 0, 0, 0],
        }
    }

    const ORIGIN: &str = "https://tags.example.org";

    /// Text drawn on each page, in page order.
    fn page_texts(bytes: &[u8]) -> Vec<Vec<String>> {
        let doc = lopdf::Document::load_mem(bytes).unwrap();
        doc.get_pages()
            .values()
            .map(|&page_id| {
                doc.get_and_decode_page_content(page_id)
                    .unwrap()
                    .operations
                    .iter()
                    .filter(|op| op.operator == "Tj")
                    .filter_map(|op| op.operands.first())
                    .filter_map(|operand| operand.as_str().ok())
                    .map(|raw| String::from_utf8_lossy(raw).into_owned())
                    .collect()
            })
            .collect()
    }

    fn render(ids: &[String], images: &[Option<QrImage>], geometry: PageGeometry) -> Vec<u8> {
        let items = items_from_ids(ids, ORIGIN).unwrap();
        let plan = compute_layout(&items, &geometry).unwrap();
        let sink = PdfSink::new(geometry, "Clinic Batch");
        render_plan(&plan, &geometry, images, sink).unwrap()
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("tag{i}")).collect()
    }

    #[test]
    fn test_renders_labels_and_placeholder() {
        let ids: Vec<String> = ["A", "B", "C"].iter().map(ToString::to_string).collect();
        let images = vec![Some(qr()), None, Some(qr())];
        let bytes = render(&ids, &images, PageGeometry::default());
        assert!(bytes.starts_with(b"%PDF-"));

        let pages = page_texts(&bytes);
        assert_eq!(pages.len(), 1);
        let texts = &pages[0];
        for id in ["A", "B", "C"] {
            assert!(texts.iter().any(|t| t == id), "missing id {id}");
            let url = format!("{ORIGIN}/qr/{id}");
            assert!(texts.contains(&url), "missing url {url}");
        }
        let placeholders = texts.iter().filter(|t| *t == PLACEHOLDER_TEXT).count();
        assert_eq!(placeholders, 1);
    }

    #[test]
    fn test_multi_page_document() {
        let ids = ids(40);
        let images = vec![Some(qr()); ids.len()];
        let bytes = render(&ids, &images, PageGeometry::default());

        let pages = page_texts(&bytes);
        assert_eq!(pages.len(), 3);
        assert!(pages[0].iter().any(|t| t == "Clinic Batch"));
        assert!(pages[0].iter().any(|t| t.starts_with("Generated ")));
        for page in &pages[1..] {
            assert!(!page.iter().any(|t| t == "Clinic Batch"));
            assert!(!page.iter().any(|t| t.starts_with("Generated ")));
        }
        assert!(pages[2].iter().any(|t| t == "tag39"));
        assert!(!pages.iter().flatten().any(|t| t == PLACEHOLDER_TEXT));
    }

    #[test]
    fn test_header_stays_in_reserved_band() {
        let now = Local::now();
        let default = PageGeometry::default();
        let lines = header_lines(&default, "Clinic Batch", now);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "Clinic Batch");
        assert!(lines[1].text.starts_with("Generated "));

        let title_only = PageGeometry {
            header_height: 20.0,
            ..default
        };
        let lines = header_lines(&title_only, "Clinic Batch", now);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].bold);

        let cramped = PageGeometry {
            header_height: 10.0,
            ..default
        };
        assert!(header_lines(&cramped, "Clinic Batch", now).is_empty());

        let none = PageGeometry {
            header_height: 0.0,
            ..default
        };
        assert!(header_lines(&none, "Clinic Batch", now).is_empty());

        for tenth in 0..=600 {
            let geometry = PageGeometry {
                header_height: f64::from(tenth) / 10.0,
                ..default
            };
            let top_of_grid = geometry.derive().unwrap().top_of_grid;
            for line in header_lines(&geometry, "Clinic Batch", now) {
                assert!(line.bottom() <= top_of_grid, "header overlaps grid at {tenth}");
            }
        }
    }

    #[test]
    fn test_cramped_header_is_not_drawn() {
        let geometry = PageGeometry {
            header_height: 10.0,
            ..PageGeometry::default()
        };
        let bytes = render(&ids(2), &[Some(qr()), Some(qr())], geometry);
        let pages = page_texts(&bytes);
        assert!(!pages[0].iter().any(|t| t == "Clinic Batch"));
        assert!(pages[0].iter().any(|t| t == "tag0"));
    }

    #[test]
    fn test_long_title_is_shortened() {
        let geometry = PageGeometry::default();
        let title = "Batch ".repeat(40);
        let lines = header_lines(&geometry, &title, Local::now());
        let max_width = geometry.page_width - 2.0 * geometry.margin;
        assert!(lines[0].text.ends_with(ELLIPSIS));
        assert!(text_width(&lines[0].text, TITLE_FONT_SIZE) <= max_width + 0.01);
    }

    #[test]
    fn test_caption_wraps_and_clamps_url() {
        let geometry = PageGeometry::default();
        let item = LabelItem {
            id: "Ab3dE9xZ".to_string(),
            target_url: format!(
                "https://{}.example.org/qr/Ab3dE9xZ",
                "very-long-host".repeat(8)
            ),
        };
        let (x, y, size) = (36.0, 86.0, geometry.label_size);
        let lines = caption_lines(&geometry, x, y, size, &item);

        // Id plus two URL lines fit in the 34 pt caption band.
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].text, "Ab3dE9xZ");
        assert!(lines[0].bold);
        assert!(lines[2].text.ends_with(ELLIPSIS));

        let band_bottom = y + size + geometry.label_text_height;
        for line in &lines {
            assert!(line.baseline > y + size);
            assert!(line.baseline <= band_bottom);
            assert!(line.x >= x);
            assert!(line.x + text_width(&line.text, line.size) <= x + size + 0.01);
        }
        assert!(lines.windows(2).all(|w| w[0].baseline < w[1].baseline));
    }

    #[test]
    fn test_caption_short_url_is_one_line() {
        let geometry = PageGeometry::default();
        let item = LabelItem::new("A", ORIGIN).unwrap();
        let lines = caption_lines(&geometry, 36.0, 86.0, geometry.label_size, &item);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].text, "https://tags.example.org/qr/A");
    }

    #[test]
    fn test_caption_omitted_without_text_band() {
        let geometry = PageGeometry {
            label_text_height: 5.0,
            ..PageGeometry::default()
        };
        let item = LabelItem::new("A", ORIGIN).unwrap();
        assert!(caption_lines(&geometry, 36.0, 86.0, 110.0, &item).is_empty());
    }

    #[test]
    fn test_placeholder_is_centered_in_frame() {
        let line = placeholder_line(36.0, 86.0, 110.0);
        assert_eq!(line.text, PLACEHOLDER_TEXT);
        let width = text_width(&line.text, line.size);
        assert!((line.x - 36.0 - (110.0 - width) / 2.0).abs() < 1e-9);
        assert!(line.baseline > 86.0 && line.baseline < 196.0);
    }

    #[test]
    fn test_page_out_of_range() {
        let item = items_from_ids(["A"], "https://tags.example.org").unwrap().remove(0);
        let mut sink = PdfSink::new(PageGeometry::default(), "QR Codes");
        sink.begin_document(1).unwrap();

        let result = sink.draw_label(1, 36.0, 86.0, 110.0, &item, None);
        assert!(matches!(result, Err(Error::Render(_))));
        assert!(sink.draw_label(0, 36.0, 86.0, 110.0, &item, None).is_ok());
    }

    #[test]
    fn test_draw_before_begin() {
        let item = items_from_ids(["A"], "https://tags.example.org").unwrap().remove(0);
        let mut sink = PdfSink::new(PageGeometry::default(), "QR Codes");
        let result = sink.draw_label(0, 36.0, 86.0, 110.0, &item, Some(&qr()));
        assert!(matches!(result, Err(Error::Render(_))));
        assert!(matches!(sink.finalize(), Err(Error::Render(_))));
    }

    #[test]
    fn test_zero_pages_rejected() {
        let mut sink = PdfSink::new(PageGeometry::default(), "QR Codes");
        assert!(matches!(sink.begin_document(0), Err(Error::Render(_))));
    }
}
