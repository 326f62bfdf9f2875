//! End-to-end tests for merged feature layer builds.
//!
//! Every test writes real GeoPackages into a temporary directory, reads
//! them back through `GeoPackageVectorSource` and merges them with the
//! `BuildOrchestrator`.
//!
//! Run with: `cargo test --test feature_build`

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use gpkg_compositor::build::{BuildOrchestrator, BuildOutcome, BuildState, BuildStatus};
use gpkg_compositor::config::{CompositorSettings, ConfigError, FeatureBuildConfig};
use gpkg_compositor::coord::BoundingBox;
use gpkg_compositor::error::BuildError;
use gpkg_compositor::gpkg::{encode_point, GeoPackage, GeoPackageVectorSource};
use gpkg_compositor::layer::{
    Feature, FeatureStyleLink, GeometryType, IconRow, LayerError, LayerSource, MediaReference,
    MediaRow, StyleKind, StyleRow, TableStyleDefault, Value, VectorSource,
};
use gpkg_compositor::schema::{ColumnDef, DataType, MergedFeatureSchema, RawColumnSet};

// ============================================================================
// Helper Functions
// ============================================================================

/// Creates `table` in the GeoPackage at `path` with one attribute column and
/// one point feature per value.
fn write_source(path: &Path, table: &str, column: ColumnDef, values: Vec<Value>) {
    let gpkg = GeoPackage::create_or_open(path).unwrap();
    let name = column.name.clone();
    let schema = MergedFeatureSchema {
        columns: vec![column],
    };
    gpkg.create_feature_table(table, &schema, None).unwrap();
    for (i, value) in values.into_iter().enumerate() {
        gpkg.insert_feature(
            table,
            &schema,
            Some(&encode_point(i as f64, 1.0)),
            &[(name.clone(), value)],
        )
        .unwrap();
    }
    gpkg.close().unwrap();
}

fn vector_layer(id: &str, path: &Path, table: &str) -> LayerSource {
    let source = GeoPackageVectorSource::open(path, table).unwrap();
    LayerSource::vector(id, path, table, Box::new(source))
}

fn read_features(path: &Path, table: &str) -> Vec<Feature> {
    let source = GeoPackageVectorSource::open(path, table).unwrap();
    let mut features = Vec::new();
    source
        .for_each_feature(&mut |feature| {
            features.push(feature);
            ControlFlow::Continue(())
        })
        .unwrap();
    features
}

fn value<'a>(feature: &'a Feature, column: &str) -> &'a Value {
    feature
        .values
        .iter()
        .find(|(name, _)| name == column)
        .map(|(_, v)| v)
        .unwrap()
}

fn drain(rx: &mut mpsc::Receiver<BuildStatus>) -> Vec<BuildStatus> {
    let mut out = Vec::new();
    while let Ok(status) = rx.try_recv() {
        out.push(status);
    }
    out
}

async fn build(config: FeatureBuildConfig) -> (BuildOutcome, Vec<BuildStatus>) {
    let orchestrator = BuildOrchestrator::default();
    let (tx, mut rx) = orchestrator.status_channel();
    let outcome = orchestrator
        .build_feature_layer(config, tx, CancellationToken::new())
        .await;
    (outcome, drain(&mut rx))
}

fn target_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("merged.gpkg")
}

/// Wraps a GeoPackage source and tampers with the feature stream.
struct Intercept {
    inner: GeoPackageVectorSource,
    /// Cancels the token once this many features were handed out.
    cancel_after: Option<(usize, CancellationToken)>,
    /// Replaces the value of `column` with NULL on feature `id`.
    null_value: Option<(i64, &'static str)>,
}

impl Intercept {
    fn new(path: &Path, table: &str) -> Self {
        Self {
            inner: GeoPackageVectorSource::open(path, table).unwrap(),
            cancel_after: None,
            null_value: None,
        }
    }
}

impl VectorSource for Intercept {
    fn columns(&self) -> Result<RawColumnSet, LayerError> {
        self.inner.columns()
    }

    fn feature_count(&self) -> Result<u64, LayerError> {
        self.inner.feature_count()
    }

    fn for_each_feature(
        &self,
        visit: &mut dyn FnMut(Feature) -> ControlFlow<()>,
    ) -> Result<(), LayerError> {
        let mut handed_out = 0;
        self.inner.for_each_feature(&mut |mut feature| {
            if let Some((id, column)) = self.null_value {
                if feature.id == id {
                    for (name, value) in feature.values.iter_mut() {
                        if name.as_str() == column {
                            *value = Value::Null;
                        }
                    }
                }
            }
            let flow = visit(feature);
            handed_out += 1;
            if let Some((limit, cancel)) = &self.cancel_after {
                if handed_out >= *limit {
                    cancel.cancel();
                }
            }
            flow
        })
    }

    fn style_rows(&self) -> Result<Vec<StyleRow>, LayerError> {
        self.inner.style_rows()
    }

    fn icon_rows(&self) -> Result<Vec<IconRow>, LayerError> {
        self.inner.icon_rows()
    }

    fn feature_style_mapping(&self) -> Result<Vec<FeatureStyleLink>, LayerError> {
        self.inner.feature_style_mapping()
    }

    fn table_style_mapping(&self) -> Result<Vec<TableStyleDefault>, LayerError> {
        self.inner.table_style_mapping()
    }

    fn media_relations(&self, feature_id: i64) -> Result<Vec<MediaReference>, LayerError> {
        self.inner.media_relations(feature_id)
    }

    fn media_row(&self, reference: &MediaReference) -> Result<MediaRow, LayerError> {
        self.inner.media_row(reference)
    }
}

// ============================================================================
// Integration Tests
// ============================================================================

/// A TEXT and an INTEGER `name` column end up as `name` and `name_integer`.
#[tokio::test]
async fn test_conflicting_column_types_are_split() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.gpkg");
    let b = dir.path().join("b.gpkg");
    write_source(
        &a,
        "roads",
        ColumnDef::new("name", DataType::Text),
        vec![Value::Text("alpha".into()), Value::Text("beta".into())],
    );
    write_source(
        &b,
        "rivers",
        ColumnDef::new("name", DataType::Integer),
        vec![Value::Integer(7), Value::Integer(8)],
    );

    let target = target_path(&dir);
    let config = FeatureBuildConfig::new(
        &target,
        "merged",
        vec![
            vector_layer("a", &a, "roads"),
            vector_layer("b", &b, "rivers"),
        ],
    );
    let (outcome, statuses) = build(config).await;

    let report = outcome.report().unwrap();
    assert!(outcome.is_completed());
    assert_eq!(report.features_copied, 4);
    assert_eq!(statuses.last().unwrap().state, BuildState::Completed);

    let gpkg = GeoPackage::open(&target).unwrap();
    let columns = gpkg.table_columns("merged").unwrap();
    let names: Vec<&str> = columns.columns.iter().map(|c| c.name.as_str()).collect();
    assert!(names.contains(&"name"));
    assert!(names.contains(&"name_integer"));

    let features = read_features(&target, "merged");
    assert_eq!(features.len(), 4);
    assert_eq!(value(&features[0], "name"), &Value::Text("alpha".into()));
    assert_eq!(value(&features[0], "name_integer"), &Value::Null);
    assert_eq!(value(&features[2], "name"), &Value::Null);
    assert_eq!(value(&features[2], "name_integer"), &Value::Integer(7));
    assert_eq!(value(&features[3], "name_integer"), &Value::Integer(8));
    assert_eq!(features[3].geometry_type(), GeometryType::Point);
}

/// Features sharing a source style resolve to one shared target style.
#[tokio::test]
async fn test_shared_style_inserted_once() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("styled.gpkg");
    write_source(
        &src,
        "parcels",
        ColumnDef::new("owner", DataType::Text),
        vec![
            Value::Text("x".into()),
            Value::Text("y".into()),
            Value::Text("z".into()),
        ],
    );
    {
        let gpkg = GeoPackage::open(&src).unwrap();
        gpkg.create_style_extension("parcels").unwrap();
        let style = gpkg
            .insert_style(&StyleRow {
                name: Some("red".into()),
                color: Some("#FF0000".into()),
                ..StyleRow::default()
            })
            .unwrap();
        for feature in [1, 3] {
            gpkg.insert_feature_style("parcels", StyleKind::Style, feature, style, None)
                .unwrap();
        }
    }

    let target = target_path(&dir);
    let config = FeatureBuildConfig::new(&target, "merged", vec![vector_layer("s", &src, "parcels")]);
    let (outcome, _) = build(config).await;
    let report = outcome.report().unwrap();
    assert_eq!(report.styles_inserted, 1);
    assert_eq!(report.style_links, 2);

    let gpkg = GeoPackage::open(&target).unwrap();
    let links = gpkg.feature_style_links("merged").unwrap();
    assert_eq!(links.len(), 2);
    assert_eq!(links[0].related_id, links[1].related_id);
    let mut linked: Vec<i64> = links.iter().map(|l| l.feature_id).collect();
    linked.sort_unstable();
    assert_eq!(linked, vec![1, 3]);
}

/// Table defaults are copied for one source and folded into feature links
/// when several sources contribute.
#[tokio::test]
async fn test_table_defaults_only_copied_for_single_source() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.gpkg");
    let b = dir.path().join("b.gpkg");
    for path in [&a, &b] {
        write_source(
            path,
            "sites",
            ColumnDef::new("label", DataType::Text),
            vec![Value::Text("one".into())],
        );
    }
    {
        let gpkg = GeoPackage::open(&a).unwrap();
        gpkg.create_style_extension("sites").unwrap();
        let style = gpkg.insert_style(&StyleRow::default()).unwrap();
        gpkg.insert_table_style_default("sites", StyleKind::Style, style, None)
            .unwrap();
    }

    let single = dir.path().join("single.gpkg");
    let config = FeatureBuildConfig::new(&single, "merged", vec![vector_layer("a", &a, "sites")]);
    let (outcome, _) = build(config).await;
    let report = outcome.report().unwrap();
    assert_eq!(report.defaults_copied, 1);
    assert_eq!(report.style_links, 0);
    let gpkg = GeoPackage::open(&single).unwrap();
    assert_eq!(gpkg.table_style_defaults("merged").unwrap().len(), 1);

    let several = dir.path().join("several.gpkg");
    let config = FeatureBuildConfig::new(
        &several,
        "merged",
        vec![vector_layer("a", &a, "sites"), vector_layer("b", &b, "sites")],
    );
    let (outcome, _) = build(config).await;
    let report = outcome.report().unwrap();
    assert_eq!(report.defaults_copied, 0);
    assert_eq!(report.style_links, 1);
    let gpkg = GeoPackage::open(&several).unwrap();
    assert!(gpkg.table_style_defaults("merged").unwrap().is_empty());
    let links = gpkg.feature_style_links("merged").unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].feature_id, 1);
}

/// One media row referenced from two source tables is stored once and
/// linked twice.
#[tokio::test]
async fn test_shared_media_deduplicated_across_tables() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("field.gpkg");
    write_source(
        &src,
        "wells",
        ColumnDef::new("depth", DataType::Real),
        vec![Value::Real(12.5)],
    );
    write_source(
        &src,
        "springs",
        ColumnDef::new("flow", DataType::Real),
        vec![Value::Real(0.4)],
    );
    {
        let gpkg = GeoPackage::open(&src).unwrap();
        gpkg.create_media_table("media").unwrap();
        let photo = gpkg
            .insert_media(
                "media",
                &[],
                &MediaRow {
                    data: vec![0xFF, 0xD8, 0xFF],
                    content_type: "image/jpeg".into(),
                },
            )
            .unwrap();
        for table in ["wells", "springs"] {
            let mapping = gpkg.create_media_relation(table, "media").unwrap();
            gpkg.insert_relation_link(&mapping, 1, photo).unwrap();
        }
    }

    let target = target_path(&dir);
    let config = FeatureBuildConfig::new(
        &target,
        "merged",
        vec![
            vector_layer("wells", &src, "wells"),
            vector_layer("springs", &src, "springs"),
        ],
    );
    let (outcome, _) = build(config).await;
    let report = outcome.report().unwrap();
    assert_eq!(report.media_inserted, 1);
    assert_eq!(report.media_reused, 1);
    assert_eq!(report.media_links, 2);

    let gpkg = GeoPackage::open(&target).unwrap();
    assert_eq!(gpkg.row_count("media").unwrap(), 1);
    assert_eq!(gpkg.row_count("merged_media").unwrap(), 2);
    let first = gpkg.related_ids("merged_media", 1).unwrap();
    let second = gpkg.related_ids("merged_media", 2).unwrap();
    assert_eq!(first, second);
}

/// Only features intersecting the filter box are copied, and the contents
/// extent covers exactly what was copied.
#[tokio::test]
async fn test_bounding_box_filter() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("points.gpkg");
    write_source(
        &src,
        "points",
        ColumnDef::new("n", DataType::Integer),
        vec![Value::Integer(0), Value::Integer(1), Value::Integer(2)],
    );

    let target = target_path(&dir);
    let config = FeatureBuildConfig::new(&target, "merged", vec![vector_layer("p", &src, "points")])
        .with_bounding_box(BoundingBox::new(0.5, 0.0, 1.5, 2.0));
    let (outcome, _) = build(config).await;
    let report = outcome.report().unwrap();
    assert_eq!(report.features_copied, 1);
    assert_eq!(report.features_filtered, 2);

    let gpkg = GeoPackage::open(&target).unwrap();
    assert_eq!(
        gpkg.contents_bounds("merged").unwrap(),
        Some(BoundingBox::new(1.0, 1.0, 1.0, 1.0))
    );
}

/// An existing target table is fatal and leaves the table untouched.
#[tokio::test]
async fn test_existing_table_fails_build() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("a.gpkg");
    write_source(
        &src,
        "roads",
        ColumnDef::new("name", DataType::Text),
        vec![Value::Text("alpha".into())],
    );

    let target = target_path(&dir);
    write_source(
        &target,
        "merged",
        ColumnDef::new("other", DataType::Integer),
        vec![Value::Integer(1), Value::Integer(2)],
    );

    let config = FeatureBuildConfig::new(&target, "merged", vec![vector_layer("a", &src, "roads")]);
    let (outcome, statuses) = build(config).await;

    assert!(matches!(
        outcome,
        BuildOutcome::Failed(BuildError::TableExists(ref t)) if t == "merged"
    ));
    let last = statuses.last().unwrap();
    assert_eq!(last.state, BuildState::Failed);
    assert!(last.error.as_deref().unwrap().contains("merged"));

    let gpkg = GeoPackage::open(&target).unwrap();
    assert_eq!(gpkg.row_count("merged").unwrap(), 2);
}

/// Cancelling mid-copy ends in Cancelled and keeps the committed features.
#[tokio::test]
async fn test_cancel_keeps_copied_features() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("points.gpkg");
    write_source(
        &src,
        "points",
        ColumnDef::new("n", DataType::Integer),
        (0..20).map(Value::Integer).collect(),
    );

    let cancel = CancellationToken::new();
    let mut source = Intercept::new(&src, "points");
    source.cancel_after = Some((10, cancel.clone()));

    let target = target_path(&dir);
    let config = FeatureBuildConfig::new(
        &target,
        "merged",
        vec![LayerSource::vector("p", &src, "points", Box::new(source))],
    );
    let mut settings = CompositorSettings::default();
    settings.features.batch_size = 4;
    let orchestrator = BuildOrchestrator::new(settings);
    let (tx, mut rx) = orchestrator.status_channel();
    let outcome = orchestrator.build_feature_layer(config, tx, cancel).await;
    let statuses = drain(&mut rx);

    assert_eq!(outcome.state(), BuildState::Cancelled);
    let report = outcome.report().unwrap();
    assert_eq!(report.features_copied, 10);
    assert_eq!(statuses.last().unwrap().state, BuildState::Cancelled);

    let gpkg = GeoPackage::open(&target).unwrap();
    let rows = gpkg.row_count("merged").unwrap();
    assert_eq!(rows, 10);
    drop(gpkg);

    let features = read_features(&target, "merged");
    assert_eq!(features.len(), 10);
    assert_eq!(value(&features[9], "n"), &Value::Integer(9));
}

/// A feature the target rejects is skipped; the rest of the build goes on.
#[tokio::test]
async fn test_rejected_feature_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("roads.gpkg");
    write_source(
        &src,
        "roads",
        ColumnDef::new("name", DataType::Text).not_null(),
        vec![
            Value::Text("alpha".into()),
            Value::Text("beta".into()),
            Value::Text("gamma".into()),
        ],
    );

    let mut source = Intercept::new(&src, "roads");
    source.null_value = Some((2, "name"));

    let target = target_path(&dir);
    let config = FeatureBuildConfig::new(
        &target,
        "merged",
        vec![LayerSource::vector("r", &src, "roads", Box::new(source))],
    );
    let (outcome, statuses) = build(config).await;

    assert!(outcome.is_completed());
    let report = outcome.report().unwrap();
    assert_eq!(report.features_copied, 2);
    assert_eq!(report.features_skipped, 1);
    assert_eq!(statuses.last().unwrap().state, BuildState::Completed);

    let features = read_features(&target, "merged");
    let names: Vec<&Value> = features.iter().map(|f| value(f, "name")).collect();
    assert_eq!(
        names,
        vec![&Value::Text("alpha".into()), &Value::Text("gamma".into())]
    );
}

/// Two layers sharing an id are rejected before the target is touched.
#[tokio::test]
async fn test_duplicate_layer_id_fails_build() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.gpkg");
    let b = dir.path().join("b.gpkg");
    write_source(&a, "roads", ColumnDef::new("name", DataType::Text), vec![Value::Text("x".into())]);
    write_source(&b, "roads", ColumnDef::new("name", DataType::Text), vec![Value::Text("y".into())]);

    let target = target_path(&dir);
    let config = FeatureBuildConfig::new(
        &target,
        "merged",
        vec![vector_layer("roads", &a, "roads"), vector_layer("roads", &b, "roads")],
    );
    let (outcome, _) = build(config).await;

    assert!(matches!(
        outcome,
        BuildOutcome::Failed(BuildError::Config(ConfigError::DuplicateLayerId(ref id))) if id == "roads"
    ));
    assert!(!target.exists());
}
