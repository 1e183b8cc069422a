//! Batch label layout.
//!
//! Places fixed-size square labels on fixed-size pages in row-major reading
//! order. Layout is a pure computation: the same items and geometry always
//! produce the same plan, and nothing here performs I/O.
//!
//! Coordinates are in points with the origin at the top-left corner of the
//! page and y growing downwards. Sinks that use another convention convert.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::label::LabelItem;

/// A4 portrait width in points.
pub const A4_WIDTH_PT: f64 = 595.28;

/// A4 portrait height in points.
pub const A4_HEIGHT_PT: f64 = 841.89;

/// Most rows a single page may hold.
pub const MAX_ROWS_PER_PAGE: usize = 10_000;

/// Page and label dimensions, all in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageGeometry {
    /// Page width.
    pub page_width: f64,
    /// Page height.
    pub page_height: f64,
    /// Margin on every side of the page.
    pub margin: f64,
    /// Side length of the square QR image.
    pub label_size: f64,
    /// Number of labels per row.
    pub qr_per_row: u32,
    /// Height reserved under each image for the two text lines.
    pub label_text_height: f64,
    /// Vertical gap between rows.
    pub vertical_spacing: f64,
    /// Height reserved at the top of the page for the header.
    pub header_height: f64,
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self {
            page_width: A4_WIDTH_PT,
            page_height: A4_HEIGHT_PT,
            margin: 36.0,
            label_size: 110.0,
            qr_per_row: 4,
            label_text_height: 34.0,
            vertical_spacing: 16.0,
            header_height: 50.0,
        }
    }
}

/// Values derived from a validated [`PageGeometry`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DerivedGeometry {
    /// Page width minus both side margins.
    pub effective_width: f64,
    /// Gap between adjacent labels in a row.
    pub horizontal_gap: f64,
    /// Label, text and spacing height of one row.
    pub row_height: f64,
    /// Whole rows that fit below the header.
    pub rows_per_page: usize,
    /// Labels per page.
    pub items_per_page: usize,
    /// Top edge of the first row.
    pub top_of_grid: f64,
}

impl PageGeometry {
    /// Validate the geometry and compute its derived values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a length is negative or not finite,
    /// if the labels of one row do not fit across the page, or if not even one
    /// row fits below the header.
    pub fn derive(&self) -> Result<DerivedGeometry> {
        let lengths = [
            ("page_width", self.page_width),
            ("page_height", self.page_height),
            ("margin", self.margin),
            ("label_size", self.label_size),
            ("label_text_height", self.label_text_height),
            ("vertical_spacing", self.vertical_spacing),
            ("header_height", self.header_height),
        ];
        for (name, value) in lengths {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::configuration(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if self.page_width <= 0.0 || self.page_height <= 0.0 {
            return Err(Error::configuration("page dimensions must be positive"));
        }
        if self.label_size <= 0.0 {
            return Err(Error::configuration("label_size must be positive"));
        }
        if self.qr_per_row == 0 {
            return Err(Error::configuration("qr_per_row must be at least 1"));
        }

        let columns = f64::from(self.qr_per_row);
        let effective_width = self.page_width - 2.0 * self.margin;
        let row_span = self.label_size * columns;
        if row_span > effective_width {
            return Err(Error::configuration(format!(
                "{} label(s) of {} pt need {row_span} pt but only {effective_width} pt fit between the margins",
                self.qr_per_row, self.label_size
            )));
        }

        // A single column has no gap to distribute.
        let horizontal_gap = if self.qr_per_row == 1 {
            0.0
        } else {
            (effective_width - row_span) / (columns - 1.0)
        };

        let row_height = self.label_size + self.label_text_height + self.vertical_spacing;
        let usable_height = self.page_height - 2.0 * self.margin - self.header_height;
        let rows = (usable_height / row_height).floor();
        if !(rows >= 1.0) {
            return Err(Error::configuration(format!(
                "a row needs {row_height} pt but only {usable_height} pt remain below the header"
            )));
        }

        if rows > to_f64(MAX_ROWS_PER_PAGE) {
            return Err(Error::configuration(format!(
                "{rows} rows per page exceeds the limit of {MAX_ROWS_PER_PAGE}"
            )));
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let rows_per_page = rows as usize;
        let items_per_page = usize::try_from(self.qr_per_row)
            .ok()
            .and_then(|columns| columns.checked_mul(rows_per_page))
            .ok_or_else(|| Error::configuration("too many labels per page"))?;

        Ok(DerivedGeometry {
            effective_width,
            horizontal_gap,
            row_height,
            rows_per_page,
            items_per_page,
            top_of_grid: self.margin + self.header_height,
        })
    }
}

/// The position of one label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Placement {
    /// The label being placed.
    pub item: LabelItem,
    /// Zero-based page index.
    pub page_index: usize,
    /// Zero-based row on the page.
    pub row: usize,
    /// Zero-based column in the row.
    pub col: usize,
    /// Left edge of the label.
    pub x: f64,
    /// Top edge of the label.
    pub y: f64,
}

/// The complete layout of an export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutPlan {
    /// Number of pages the document needs.
    pub page_count: usize,
    /// Labels per full page.
    pub items_per_page: usize,
    /// One placement per input item, in input order.
    pub placements: Vec<Placement>,
}

impl LayoutPlan {
    /// Placements that fall on the given page.
    pub fn page(&self, page_index: usize) -> impl Iterator<Item = &Placement> {
        self.placements
            .iter()
            .filter(move |p| p.page_index == page_index)
    }
}

/// Lay out `items` on pages described by `geometry`.
///
/// The first `items_per_page` items go on page 0, the next on page 1, and so
/// on; within a page items fill rows left to right, top to bottom.
///
/// # Errors
///
/// Returns [`Error::Configuration`] if the geometry cannot hold a label and
/// [`Error::EmptySelection`] if `items` is empty.
pub fn compute_layout(items: &[LabelItem], geometry: &PageGeometry) -> Result<LayoutPlan> {
    let derived = geometry.derive()?;
    if items.is_empty() {
        return Err(Error::EmptySelection);
    }

    let per_page = derived.items_per_page;
    let columns = geometry.qr_per_row as usize;
    let column_pitch = geometry.label_size + derived.horizontal_gap;

    let placements = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let position = index % per_page;
            let row = position / columns;
            let col = position % columns;
            Placement {
                item: item.clone(),
                page_index: index / per_page,
                row,
                col,
                x: geometry.margin + to_f64(col) * column_pitch,
                y: derived.top_of_grid + to_f64(row) * derived.row_height,
            }
        })
        .collect();

    Ok(LayoutPlan {
        page_count: items.len().div_ceil(per_page),
        items_per_page: per_page,
        placements,
    })
}

#[allow(clippy::cast_precision_loss)]
fn to_f64(n: usize) -> f64 {
    n as f64
}
