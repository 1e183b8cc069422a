//! `tagsheet` - Printable QR tag sheets for lost-device labels
//!
//! This library lays out batches of QR codes on fixed-size pages, provisions
//! their images, renders them to PDF, and keeps a local registry of issued
//! codes and their owners.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod assets;
pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod label;
pub mod layout;
pub mod logging;
pub mod registry;
pub mod render;

pub use assets::{
    gather, AssetError, AssetFailure, FailurePolicy, GatherOptions, Gathered, LocalQrSource,
    QrImage, QrImageSource, RemoteQrSource,
};
pub use config::Config;
pub use error::{Error, Result};
pub use export::{ExportReport, Exporter};
pub use label::{items_from_ids, parse_id_list, LabelItem};
pub use layout::{compute_layout, LayoutPlan, PageGeometry, Placement};
pub use logging::init_logging;
pub use registry::{OwnerDetails, QrRecord, Registry, RegistryPage, RegistryStats};
pub use render::{render_plan, PdfSink, RenderSink};
