//! Schema merging for combined feature tables.
//!
//! [`SchemaMerger::merge`] folds the column set of one more source into an
//! accumulated [`MergedFeatureSchema`]. Columns are matched by name
//! (case-insensitively). A column whose type disagrees with an existing
//! same-named column is never coerced; it is added under a new name
//! `<name>_<type>` and the rename is reported in the returned
//! [`NameChanges`] so the copier can route that source's values.
//!
//! Constraint handling only ever widens:
//!
//! - a column stays `NOT NULL` only while every merged source declares it
//!   `NOT NULL`; columns first seen in a later source, and columns a source
//!   lacks, become nullable
//! - matching defaults are kept, one-sided defaults are adopted, conflicting
//!   defaults are dropped
//! - a length limit survives only while every source declares one, as the
//!   larger of the limits

mod types;

pub use types::{ColumnDef, DataType, MergedFeatureSchema, RawColumnSet};

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

/// Source column name → merged column name, for renamed columns only.
pub type NameChanges = BTreeMap<String, String>;

/// Stateless schema merge operation.
pub struct SchemaMerger;

impl SchemaMerger {
    /// Merges `incoming` into `accumulated`.
    ///
    /// Passing `None` starts a new schema from the first source. The primary
    /// key and geometry columns of `incoming` are dropped since the merged
    /// table defines its own.
    pub fn merge(
        accumulated: Option<&MergedFeatureSchema>,
        incoming: &RawColumnSet,
    ) -> (MergedFeatureSchema, NameChanges) {
        let first_source = accumulated.is_none();
        let mut schema = accumulated.cloned().unwrap_or_default();
        let mut name_changes = NameChanges::new();
        // Lowercased merged names already taken by a column of `incoming`.
        let mut present = HashSet::new();

        for column in incoming.attribute_columns() {
            let claimed = |name: &str| present.contains(&name.to_ascii_lowercase());
            let target_name = match schema.position(&column.name) {
                _ if MergedFeatureSchema::is_reserved(&column.name) => {
                    Self::resolve_conflict(&schema, column, &present)
                }
                None if !claimed(&column.name) => column.name.clone(),
                Some(index)
                    if schema.columns[index].data_type == column.data_type
                        && !claimed(&schema.columns[index].name) =>
                {
                    schema.columns[index].name.clone()
                }
                _ => Self::resolve_conflict(&schema, column, &present),
            };

            if target_name != column.name {
                debug!(
                    column = %column.name,
                    renamed = %target_name,
                    data_type = %column.data_type,
                    "Routing conflicting column"
                );
                name_changes.insert(column.name.clone(), target_name.clone());
            }

            match schema.position(&target_name) {
                Some(index) => widen(&mut schema.columns[index], column),
                None => {
                    let mut added = column.clone();
                    added.name = target_name.clone();
                    added.primary_key = false;
                    if !first_source {
                        added.not_null = false;
                    }
                    schema.columns.push(added);
                }
            }
            present.insert(target_name.to_ascii_lowercase());
        }

        if !first_source {
            for column in schema.columns.iter_mut() {
                if !present.contains(&column.name.to_ascii_lowercase()) {
                    column.not_null = false;
                }
            }
        }

        (schema, name_changes)
    }

    /// Merges a whole sequence of column sets, returning the schema and the
    /// name changes of each source in order.
    pub fn merge_all<'a>(
        sources: impl IntoIterator<Item = &'a RawColumnSet>,
    ) -> (MergedFeatureSchema, Vec<NameChanges>) {
        let mut schema: Option<MergedFeatureSchema> = None;
        let mut changes = Vec::new();
        for columns in sources {
            let (merged, renamed) = Self::merge(schema.as_ref(), columns);
            schema = Some(merged);
            changes.push(renamed);
        }
        (schema.unwrap_or_default(), changes)
    }

    /// Picks the merged column a type-conflicting column is routed to.
    ///
    /// Reuses `<name>_<type>` when it already holds the same type, otherwise
    /// appends a counter until a free or type-compatible name is found.
    /// Names in `claimed` belong to another column of the same source and
    /// are never reused.
    fn resolve_conflict(
        schema: &MergedFeatureSchema,
        column: &ColumnDef,
        claimed: &HashSet<String>,
    ) -> String {
        let base = format!("{}_{}", column.name, column.data_type.suffix());
        let mut candidate = base.clone();
        let mut counter = 2;
        loop {
            if !claimed.contains(&candidate.to_ascii_lowercase()) {
                match schema.column(&candidate) {
                    None => return candidate,
                    Some(existing) if existing.data_type == column.data_type => {
                        return existing.name.clone()
                    }
                    Some(_) => {}
                }
            }
            candidate = format!("{}_{}", base, counter);
            counter += 1;
        }
    }
}

/// Widens `existing` so rows valid under `incoming` stay valid.
fn widen(existing: &mut ColumnDef, incoming: &ColumnDef) {
    existing.not_null = existing.not_null && incoming.not_null;

    existing.default_value = match (existing.default_value.take(), &incoming.default_value) {
        (Some(a), Some(b)) if &a == b => Some(a),
        (Some(_), Some(_)) => None,
        (Some(a), None) => Some(a),
        (None, other) => other.clone(),
    };

    existing.max_length = match (existing.max_length, incoming.max_length) {
        (Some(a), Some(b)) => Some(a.max(b)),
        _ => None,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(defs: Vec<ColumnDef>) -> RawColumnSet {
        let mut all = vec![ColumnDef::new("fid", DataType::Integer).primary_key()];
        all.extend(defs);
        all.push(ColumnDef::new("shape", DataType::Blob));
        RawColumnSet::new(all, Some("shape".to_string()))
    }

    #[test]
    fn test_first_source_drops_key_and_geometry() {
        let (schema, changes) = SchemaMerger::merge(
            None,
            &columns(vec![ColumnDef::new("name", DataType::Text).not_null()]),
        );
        assert_eq!(schema.column_names(), vec!["name"]);
        assert!(schema.columns[0].not_null);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_type_conflict_is_renamed_with_suffix() {
        let first = columns(vec![ColumnDef::new("name", DataType::Text)]);
        let second = columns(vec![ColumnDef::new("name", DataType::Integer)]);

        let (schema, _) = SchemaMerger::merge(None, &first);
        let (schema, changes) = SchemaMerger::merge(Some(&schema), &second);

        assert_eq!(schema.column_names(), vec!["name", "name_integer"]);
        assert_eq!(schema.column("name").unwrap().data_type, DataType::Text);
        assert_eq!(
            schema.column("name_integer").unwrap().data_type,
            DataType::Integer
        );
        assert_eq!(changes.get("name").map(String::as_str), Some("name_integer"));
    }

    #[test]
    fn test_repeated_conflict_reuses_renamed_column() {
        let (schema, _) = SchemaMerger::merge_all(&[
            columns(vec![ColumnDef::new("name", DataType::Text)]),
            columns(vec![ColumnDef::new("name", DataType::Integer)]),
        ]);
        let third = columns(vec![ColumnDef::new("name", DataType::Integer)]);
        let (merged, changes) = SchemaMerger::merge(Some(&schema), &third);
        assert_eq!(merged.columns.len(), 2);
        assert_eq!(changes.get("name").map(String::as_str), Some("name_integer"));
    }

    #[test]
    fn test_suffix_collision_gets_counter() {
        let first = columns(vec![
            ColumnDef::new("name", DataType::Text),
            ColumnDef::new("name_integer", DataType::Real),
        ]);
        let second = columns(vec![ColumnDef::new("name", DataType::Integer)]);
        let (schema, _) = SchemaMerger::merge(None, &first);
        let (schema, changes) = SchemaMerger::merge(Some(&schema), &second);
        assert_eq!(
            changes.get("name").map(String::as_str),
            Some("name_integer_2")
        );
        assert_eq!(schema.columns.len(), 3);
    }

    #[test]
    fn test_renamed_column_does_not_absorb_sibling() {
        let (schema, changes) = SchemaMerger::merge_all(&[
            columns(vec![ColumnDef::new("name", DataType::Text)]),
            columns(vec![
                ColumnDef::new("name", DataType::Integer),
                ColumnDef::new("name_integer", DataType::Integer),
            ]),
        ]);
        assert_eq!(
            changes[1].get("name").map(String::as_str),
            Some("name_integer")
        );
        assert_eq!(
            changes[1].get("name_integer").map(String::as_str),
            Some("name_integer_integer")
        );
        assert_eq!(
            schema.column_names(),
            vec!["name", "name_integer", "name_integer_integer"]
        );
    }

    #[test]
    fn test_sibling_seen_first_keeps_its_name() {
        let (_, changes) = SchemaMerger::merge_all(&[
            columns(vec![ColumnDef::new("name", DataType::Text)]),
            columns(vec![
                ColumnDef::new("name_integer", DataType::Integer),
                ColumnDef::new("name", DataType::Integer),
            ]),
        ]);
        assert_eq!(changes[1].get("name_integer"), None);
        assert_eq!(
            changes[1].get("name").map(String::as_str),
            Some("name_integer_2")
        );
    }

    #[test]
    fn test_reserved_names_are_routed() {
        let first = columns(vec![ColumnDef::new("id", DataType::Text)]);
        let (schema, changes) = SchemaMerger::merge(None, &first);
        assert_eq!(schema.column_names(), vec!["id_text"]);
        assert_eq!(changes.get("id").map(String::as_str), Some("id_text"));
    }

    #[test]
    fn test_not_null_survives_only_when_all_sources_require_it() {
        let (schema, _) = SchemaMerger::merge_all(&[
            columns(vec![
                ColumnDef::new("a", DataType::Text).not_null(),
                ColumnDef::new("b", DataType::Text).not_null(),
                ColumnDef::new("c", DataType::Text).not_null(),
            ]),
            columns(vec![
                ColumnDef::new("a", DataType::Text).not_null(),
                ColumnDef::new("b", DataType::Text),
                ColumnDef::new("d", DataType::Text).not_null(),
            ]),
        ]);
        assert!(schema.column("a").unwrap().not_null);
        assert!(!schema.column("b").unwrap().not_null);
        // missing from the second source
        assert!(!schema.column("c").unwrap().not_null);
        // first seen in a later source
        assert!(!schema.column("d").unwrap().not_null);
    }

    #[test]
    fn test_defaults_and_lengths_widen() {
        let (schema, _) = SchemaMerger::merge_all(&[
            columns(vec![
                ColumnDef::new("kind", DataType::Text).with_default("'a'"),
                ColumnDef::new("code", DataType::Text).with_max_length(5),
                ColumnDef::new("note", DataType::Text).with_max_length(5),
                ColumnDef::new("size", DataType::Integer),
            ]),
            columns(vec![
                ColumnDef::new("kind", DataType::Text).with_default("'b'"),
                ColumnDef::new("code", DataType::Text).with_max_length(9),
                ColumnDef::new("note", DataType::Text),
                ColumnDef::new("size", DataType::Integer).with_default("0"),
            ]),
        ]);
        assert_eq!(schema.column("kind").unwrap().default_value, None);
        assert_eq!(schema.column("code").unwrap().max_length, Some(9));
        assert_eq!(schema.column("note").unwrap().max_length, None);
        assert_eq!(
            schema.column("size").unwrap().default_value.as_deref(),
            Some("0")
        );
    }

    #[test]
    fn test_column_match_is_case_insensitive() {
        let (schema, changes) = SchemaMerger::merge_all(&[
            columns(vec![ColumnDef::new("Name", DataType::Text)]),
            columns(vec![ColumnDef::new("NAME", DataType::Text)]),
        ]);
        assert_eq!(schema.column_names(), vec!["Name"]);
        assert_eq!(
            changes[1].get("NAME").map(String::as_str),
            Some("Name")
        );
    }

    #[test]
    fn test_parse_declared_types() {
        assert_eq!(
            DataType::parse_declared("TEXT(50)"),
            (DataType::Text, Some(50))
        );
        assert_eq!(DataType::parse_declared("int"), (DataType::Integer, None));
        assert_eq!(
            DataType::parse_declared("DATETIME"),
            (DataType::DateTime, None)
        );
        assert_eq!(DataType::parse_declared("VARCHAR"), (DataType::Text, None));
    }

    #[test]
    fn test_column_sql_fragment() {
        let column = ColumnDef::new("label", DataType::Text)
            .with_max_length(12)
            .not_null()
            .with_default("'x'");
        assert_eq!(column.to_sql(), "\"label\" TEXT(12) NOT NULL DEFAULT 'x'");
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn data_type() -> impl Strategy<Value = DataType> {
            prop_oneof![
                Just(DataType::Integer),
                Just(DataType::Text),
                Just(DataType::Real),
                Just(DataType::Blob),
                Just(DataType::Boolean),
            ]
        }

        fn column_set() -> impl Strategy<Value = RawColumnSet> {
            prop::collection::vec(
                (
                    prop::sample::select(vec![
                        "name", "kind", "id", "value", "Name", "geom", "name_integer", "name_text",
                    ]),
                    data_type(),
                    any::<bool>(),
                ),
                0..6,
            )
            .prop_map(|cols| {
                let mut seen = HashSet::new();
                let defs = cols
                    .into_iter()
                    .filter(|(name, _, _)| seen.insert(name.to_ascii_lowercase()))
                    .map(|(name, ty, not_null)| {
                        let def = ColumnDef::new(name, ty);
                        if not_null { def.not_null() } else { def }
                    })
                    .collect();
                RawColumnSet::new(defs, None)
            })
        }

        proptest! {
            #[test]
            fn test_merged_names_are_unique(sources in prop::collection::vec(column_set(), 1..5)) {
                let (schema, _) = SchemaMerger::merge_all(&sources);
                let mut names = HashSet::new();
                for column in &schema.columns {
                    prop_assert!(names.insert(column.name.to_ascii_lowercase()), "duplicate {}", column.name);
                    prop_assert!(!MergedFeatureSchema::is_reserved(&column.name));
                }
            }

            #[test]
            fn test_declared_types_never_change(sources in prop::collection::vec(column_set(), 1..5)) {
                let mut schema: Option<MergedFeatureSchema> = None;
                for source in &sources {
                    let (merged, changes) = SchemaMerger::merge(schema.as_ref(), source);
                    if let Some(previous) = &schema {
                        for column in &previous.columns {
                            let now = merged.column(&column.name);
                            prop_assert_eq!(now.map(|c| c.data_type), Some(column.data_type));
                        }
                    }
                    for column in source.attribute_columns() {
                        let target = changes.get(&column.name).cloned().unwrap_or_else(|| column.name.clone());
                        prop_assert_eq!(merged.column(&target).map(|c| c.data_type), Some(column.data_type));
                    }
                    schema = Some(merged);
                }
            }

            #[test]
            fn test_source_columns_have_distinct_targets(sources in prop::collection::vec(column_set(), 1..5)) {
                let mut schema: Option<MergedFeatureSchema> = None;
                for source in &sources {
                    let (merged, changes) = SchemaMerger::merge(schema.as_ref(), source);
                    let mut targets = HashSet::new();
                    for column in source.attribute_columns() {
                        let target = changes.get(&column.name).cloned().unwrap_or_else(|| column.name.clone());
                        prop_assert!(targets.insert(target.to_ascii_lowercase()), "two columns routed to {}", target);
                    }
                    schema = Some(merged);
                }
            }

            #[test]
            fn test_merge_is_deterministic(sources in prop::collection::vec(column_set(), 1..5)) {
                let first = SchemaMerger::merge_all(&sources);
                let second = SchemaMerger::merge_all(&sources);
                prop_assert_eq!(first, second);
            }
        }
    }
}
