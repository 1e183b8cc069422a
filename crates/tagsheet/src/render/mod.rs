//! Rendering sinks.
//!
//! A sink receives a computed [`LayoutPlan`] one label at a time and turns it
//! into a document. The PDF sink is the production target; tests drive the
//! same trait with a recording sink.

mod pdf;
pub mod text;

pub use pdf::PdfSink;

use tracing::debug;

use crate::assets::QrImage;
use crate::error::{Error, Result};
use crate::label::LabelItem;
use crate::layout::{LayoutPlan, PageGeometry};

/// Text drawn in the frame of a label whose QR image could not be loaded.
pub const PLACEHOLDER_TEXT: &str = "QR unavailable";

/// A drawing target for laid-out labels.
///
/// Coordinates passed to [`draw_label`](RenderSink::draw_label) are in points
/// with a top-left origin, as produced by the layout engine.
pub trait RenderSink {
    /// What the sink produces when finished.
    type Artifact;

    /// Start a document with `page_count` pages.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Render`] if the document cannot be created.
    fn begin_document(&mut self, page_count: usize) -> Result<()>;

    /// Draw one label. A missing image draws a placeholder frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Render`] if `page_index` is outside the document or
    /// the document was never started.
    fn draw_label(
        &mut self,
        page_index: usize,
        x: f64,
        y: f64,
        label_size: f64,
        item: &LabelItem,
        image: Option<&QrImage>,
    ) -> Result<()>;

    /// Finish the document and hand back the artifact.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Render`] if the document cannot be serialized.
    fn finalize(self) -> Result<Self::Artifact>;
}

/// Draw every placement of `plan` into `sink`.
///
/// `images` is indexed like `plan.placements`; `None` entries render as
/// placeholders.
///
/// # Errors
///
/// Returns [`Error::Render`] if `images` does not match the plan, or any
/// error raised by the sink.
pub fn render_plan<S: RenderSink>(
    plan: &LayoutPlan,
    geometry: &PageGeometry,
    images: &[Option<QrImage>],
    mut sink: S,
) -> Result<S::Artifact> {
    if images.len() != plan.placements.len() {
        return Err(Error::render(format!(
            "{} image slot(s) for {} placement(s)",
            images.len(),
            plan.placements.len()
        )));
    }

    debug!(
        "Rendering {} label(s) on {} page(s)",
        plan.placements.len(),
        plan.page_count
    );

    sink.begin_document(plan.page_count)?;
    for (placement, image) in plan.placements.iter().zip(images) {
        sink.draw_label(
            placement.page_index,
            placement.x,
            placement.y,
            geometry.label_size,
            &placement.item,
            image.as_ref(),
        )?;
    }
    sink.finalize()
}
