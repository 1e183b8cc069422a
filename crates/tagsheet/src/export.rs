//! Export pipeline.
//!
//! An export turns an ordered list of tag ids into one PDF file:
//! selection check, layout, concurrent image gathering, rendering, and an
//! atomic write of the finished document.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::assets::{
    gather, AssetFailure, FailurePolicy, LocalQrSource, QrImage, QrImageSource, RemoteQrSource,
};
use crate::config::{AssetSourceKind, Config};
use crate::error::{Error, Result};
use crate::label::{items_from_ids, LabelItem};
use crate::layout::{compute_layout, LayoutPlan, PageGeometry};
use crate::render::{render_plan, PdfSink};

/// Outcome of a finished export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    /// Where the PDF was written.
    pub output: PathBuf,
    /// Pages in the document.
    pub page_count: usize,
    /// Labels drawn, placeholders included.
    pub labels: usize,
    /// Policy applied to failed items.
    pub policy: FailurePolicy,
    /// Items whose QR image could not be loaded, in input order.
    pub failures: Vec<AssetFailure>,
}

impl ExportReport {
    /// Whether every requested label was drawn with its QR image.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs exports with one configuration and image source.
#[derive(Debug, Clone)]
pub struct Exporter {
    config: Config,
    source: Arc<dyn QrImageSource>,
}

impl Exporter {
    /// Create an exporter with an explicit image source.
    #[must_use]
    pub fn new(config: Config, source: Arc<dyn QrImageSource>) -> Self {
        Self { config, source }
    }

    /// Create an exporter using the source named in the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote source cannot be set up.
    pub fn from_config(config: Config) -> Result<Self> {
        let source = build_source(&config)?;
        Ok(Self::new(config, source))
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Lay out `ids` without fetching or rendering anything.
    ///
    /// # Errors
    ///
    /// Returns a selection error for bad ids or a configuration error for an
    /// unusable geometry.
    pub fn plan<S: AsRef<str>>(&self, ids: &[S]) -> Result<LayoutPlan> {
        let items = items_from_ids(ids, &self.config.export.origin)?;
        compute_layout(&items, &self.config.geometry)
    }

    /// Export `ids` to a timestamped file in the configured output directory.
    ///
    /// # Errors
    ///
    /// See [`run_to`](Self::run_to).
    pub async fn run<S: AsRef<str>>(&self, ids: &[S]) -> Result<ExportReport> {
        let output = self.config.output_dir().join(default_file_name(Local::now()));
        self.run_to(ids, &output).await
    }

    /// Export `ids` to `output`.
    ///
    /// The geometry and selection are checked before any image is fetched.
    /// The file appears at `output` only once it is complete.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptySelection`] or [`Error::InvalidSelection`] for a
    /// bad selection, [`Error::Configuration`] for an unusable geometry,
    /// [`Error::AssetFetch`] when the failure policy rejects missing images,
    /// and render or I/O errors from producing the file.
    pub async fn run_to<S: AsRef<str>>(&self, ids: &[S], output: &Path) -> Result<ExportReport> {
        let geometry = self.config.geometry;
        let policy = self.config.export.failure_policy;

        let items = items_from_ids(ids, &self.config.export.origin)?;
        let plan = compute_layout(&items, &geometry)?;
        info!(
            "Exporting {} label(s) on {} page(s) using the {} source",
            items.len(),
            plan.page_count,
            self.source.name()
        );

        let options = self.config.gather_options();
        let gathered = gather(&items, Arc::clone(&self.source), &options).await;
        let failures = gathered.failures;
        let (plan, images) =
            apply_policy(policy, &geometry, items, plan, gathered.images, &failures)?;

        let sink = PdfSink::new(geometry, self.config.export.title.clone());
        let bytes = render_plan(&plan, &geometry, &images, sink)?;
        write_atomic(output, &bytes)?;

        if !failures.is_empty() {
            warn!(
                "{} label(s) could not be loaded and were handled by the {} policy",
                failures.len(),
                policy
            );
        }
        info!("Wrote {} ({} page(s))", output.display(), plan.page_count);

        Ok(ExportReport {
            output: output.to_path_buf(),
            page_count: plan.page_count,
            labels: plan.placements.len(),
            policy,
            failures,
        })
    }
}

/// Build the image source named in the configuration.
///
/// # Errors
///
/// Returns an error if the remote source cannot be set up.
pub fn build_source(config: &Config) -> Result<Arc<dyn QrImageSource>> {
    let source: Arc<dyn QrImageSource> = match config.assets.source {
        AssetSourceKind::Local => Arc::new(LocalQrSource::new(config.assets.module_px)),
        AssetSourceKind::Remote => Arc::new(RemoteQrSource::new(
            &config.assets.service_url,
            config.assets.image_size_px,
            Duration::from_millis(config.assets.timeout_ms),
        )?),
    };
    Ok(source)
}

/// Decide what gets rendered once every fetch has finished.
fn apply_policy(
    policy: FailurePolicy,
    geometry: &PageGeometry,
    items: Vec<LabelItem>,
    plan: LayoutPlan,
    images: Vec<Option<QrImage>>,
    failures: &[AssetFailure],
) -> Result<(LayoutPlan, Vec<Option<QrImage>>)> {
    if failures.is_empty() {
        return Ok((plan, images));
    }

    match policy {
        FailurePolicy::Abort => Err(Error::AssetFetch {
            failed: failures.to_vec(),
        }),
        FailurePolicy::Placeholder => Ok((plan, images)),
        FailurePolicy::Exclude => {
            let (survivors, images): (Vec<LabelItem>, Vec<Option<QrImage>>) = items
                .into_iter()
                .zip(images)
                .filter(|(_, image)| image.is_some())
                .unzip();
            if survivors.is_empty() {
                return Err(Error::AssetFetch {
                    failed: failures.to_vec(),
                });
            }
            debug!(
                "Recomputing layout over {} remaining label(s)",
                survivors.len()
            );
            let plan = compute_layout(&survivors, geometry)?;
            Ok((plan, images))
        }
    }
}

/// Default export file name for the given moment.
#[must_use]
pub fn default_file_name(now: DateTime<Local>) -> String {
    format!("qr-codes-{}.pdf", now.format("%Y%m%d-%H%M%S"))
}

/// Write `bytes` to `path` through a temporary file in the same directory.
///
/// Parent directories are created as needed. Readers never observe a
/// partially written file at `path`.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the file cannot be
/// written or moved into place.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !parent.exists() {
        std::fs::create_dir_all(&parent).map_err(|source| Error::DirectoryCreate {
            path: parent.clone(),
            source,
        })?;
    }

    let file_name = path.file_name().ok_or_else(|| {
        Error::invalid_selection(format!("{} is not a file path", path.display()))
    })?;
    let temp = parent.join(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        std::process::id()
    ));

    let result = std::fs::write(&temp, bytes)
        .and_then(|()| std::fs::File::open(&temp)?.sync_all())
        .and_then(|()| std::fs::rename(&temp, path));
    if let Err(e) = result {
        let _ = std::fs::remove_file(&temp);
        return Err(e.into());
    }

    debug!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetError;
    use crate::logging::init_test_logging;
    use chrono::TimeZone;
    use std::collections::HashSet;

    /// Encodes locally but refuses the listed ids.
    #[derive(Debug)]
    struct PartlyBroken {
        inner: LocalQrSource,
        broken: HashSet<String>,
    }

    impl PartlyBroken {
        fn new(broken: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                inner: LocalQrSource::new(2),
                broken: broken.iter().map(|s| (*s).to_string()).collect(),
            })
        }
    }

    #[async_trait::async_trait]
    impl QrImageSource for PartlyBroken {
        fn name(&self) -> &'static str {
            "partly-broken"
        }

        async fn fetch(&self, item: &LabelItem) -> std::result::Result<QrImage, AssetError> {
            if self.broken.contains(&item.id) {
                return Err(AssetError::Status(404));
            }
            self.inner.fetch(item).await
        }
    }

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "tagsheet-export-{}-{name}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn config(policy: FailurePolicy) -> Config {
        let mut config = Config::default();
        config.export.origin = "https://tags.example.org".to_string();
        config.export.failure_policy = policy;
        config.assets.retries = 0;
        config
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("tag{i}")).collect()
    }

    #[tokio::test]
    async fn test_export_writes_pdf() {
        init_test_logging();
        let dir = test_dir("writes");
        let output = dir.join("out").join("labels.pdf");
        let exporter = Exporter::new(config(FailurePolicy::Abort), PartlyBroken::new(&[]));

        let report = exporter.run_to(&ids(17), &output).await.unwrap();

        assert_eq!(report.page_count, 2);
        assert_eq!(report.labels, 17);
        assert!(report.is_clean());
        let bytes = std::fs::read(&output).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));

        let leftovers: Vec<_> = std::fs::read_dir(output.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_abort_policy_fails_without_output() {
        let dir = test_dir("abort");
        let output = dir.join("labels.pdf");
        let exporter = Exporter::new(
            config(FailurePolicy::Abort),
            PartlyBroken::new(&["tag1", "tag3"]),
        );

        let err = exporter.run_to(&ids(4), &output).await.unwrap_err();

        assert_eq!(err.failed_item_ids(), vec!["tag1", "tag3"]);
        assert!(!output.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_placeholder_policy_keeps_slots() {
        let dir = test_dir("placeholder");
        let output = dir.join("labels.pdf");
        let exporter = Exporter::new(
            config(FailurePolicy::Placeholder),
            PartlyBroken::new(&["tag2"]),
        );

        let report = exporter.run_to(&ids(5), &output).await.unwrap();

        assert_eq!(report.labels, 5);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, "tag2");
        assert!(output.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_exclude_policy_recomputes_layout() {
        let dir = test_dir("exclude");
        let output = dir.join("labels.pdf");
        let exporter = Exporter::new(
            config(FailurePolicy::Exclude),
            PartlyBroken::new(&["tag16"]),
        );

        // 17 items need two pages; dropping one fits them on one.
        let report = exporter.run_to(&ids(17), &output).await.unwrap();

        assert_eq!(report.labels, 16);
        assert_eq!(report.page_count, 1);
        assert_eq!(report.failures[0].id, "tag16");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_exclude_policy_with_no_survivors() {
        let dir = test_dir("exclude-none");
        let output = dir.join("labels.pdf");
        let exporter = Exporter::new(
            config(FailurePolicy::Exclude),
            PartlyBroken::new(&["tag0", "tag1"]),
        );

        let result = exporter.run_to(&ids(2), &output).await;
        assert!(matches!(result, Err(Error::AssetFetch { .. })));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_empty_selection() {
        let exporter = Exporter::new(config(FailurePolicy::Abort), PartlyBroken::new(&[]));
        let result = exporter
            .run_to(&Vec::<String>::new(), Path::new("unused.pdf"))
            .await;
        assert!(matches!(result, Err(Error::EmptySelection)));
    }

    #[tokio::test]
    async fn test_bad_geometry_fails_before_fetch() {
        #[derive(Debug)]
        struct MustNotFetch;

        #[async_trait::async_trait]
        impl QrImageSource for MustNotFetch {
            fn name(&self) -> &'static str {
                "must-not-fetch"
            }
            async fn fetch(&self, _: &LabelItem) -> std::result::Result<QrImage, AssetError> {
                panic!("fetch called despite invalid geometry");
            }
        }

        let mut config = config(FailurePolicy::Abort);
        config.geometry.label_size = 1000.0;
        let exporter = Exporter::new(config, Arc::new(MustNotFetch));

        let result = exporter.run_to(&ids(3), Path::new("unused.pdf")).await;
        assert!(matches!(result, Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_plan_without_rendering() {
        let exporter = Exporter::new(config(FailurePolicy::Abort), PartlyBroken::new(&[]));
        let plan = exporter.plan(&["A", "B", "C"]).unwrap();
        assert_eq!(plan.page_count, 1);
        assert_eq!(plan.placements[2].item.target_url, "https://tags.example.org/qr/C");
        assert!(matches!(
            exporter.plan(&["A", "A"]),
            Err(Error::InvalidSelection { .. })
        ));
    }

    #[test]
    fn test_default_file_name() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(default_file_name(now), "qr-codes-20240309-140507.pdf");
    }

    #[test]
    fn test_write_atomic_replaces_existing() {
        let dir = test_dir("atomic");
        let path = dir.join("file.pdf");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_build_source_by_kind() {
        let mut config = Config::default();
        assert_eq!(build_source(&config).unwrap().name(), "local");
        config.assets.source = AssetSourceKind::Remote;
        assert_eq!(build_source(&config).unwrap().name(), "remote");
    }

    #[test]
    fn test_report_serializes() {
        let report = ExportReport {
            output: PathBuf::from("out.pdf"),
            page_count: 1,
            labels: 2,
            policy: FailurePolicy::Placeholder,
            failures: vec![AssetFailure::new("tag1", "HTTP status 404")],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["output"], "out.pdf");
        assert_eq!(json["policy"], "placeholder");
        assert_eq!(json["failures"][0]["id"], "tag1");
    }
}
