//! Table and column definition with freeze semantics.
//!
//! [`SchemaRegistry`] is the single writer of schema state. Tables are
//! defined and populated with columns before the first run; sealing the
//! registry freezes every table and yields the immutable [`Schema`] that
//! workers and the output aggregator share without locking.

use std::sync::Arc;

use indexmap::IndexMap;
use simtab_core::{
    ColumnDef, ColumnId, ColumnKind, Schema, SchemaViolation, TableId, TableSchema, Value,
};

struct TableEntry {
    description: String,
    columns: IndexMap<String, ColumnDef>,
    frozen: bool,
}

/// Registry of output tables, open for definition until sealed.
///
/// # Examples
///
/// ```
/// use simtab_core::ColumnKind;
/// use simtab_schema::SchemaRegistry;
///
/// let mut reg = SchemaRegistry::new();
/// let events = reg.define_table("events", "per-event records").unwrap();
/// reg.add_column(events, "id", ColumnKind::Int).unwrap();
/// reg.add_column(events, "hits", ColumnKind::RealArray { capacity: 3 }).unwrap();
///
/// let schema = reg.seal().unwrap();
/// assert_eq!(schema.table(events).unwrap().width(), 2);
/// assert!(reg.add_column(events, "late", ColumnKind::Int).is_err());
/// ```
#[derive(Default)]
pub struct SchemaRegistry {
    tables: IndexMap<String, TableEntry>,
    sealed: Option<Arc<Schema>>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a new, empty table.
    ///
    /// Fails with [`SchemaViolation::DuplicateTable`] if the name is taken
    /// and [`SchemaViolation::RegistrySealed`] once a run has started.
    pub fn define_table(
        &mut self,
        name: &str,
        description: &str,
    ) -> Result<TableId, SchemaViolation> {
        if self.sealed.is_some() {
            return Err(SchemaViolation::RegistrySealed);
        }
        if name.is_empty() {
            return Err(SchemaViolation::EmptyName);
        }
        if self.tables.contains_key(name) {
            return Err(SchemaViolation::DuplicateTable { name: name.into() });
        }
        let id = TableId(self.tables.len() as u32);
        self.tables.insert(
            name.to_owned(),
            TableEntry {
                description: description.to_owned(),
                columns: IndexMap::new(),
                frozen: false,
            },
        );
        Ok(id)
    }

    /// Append a column with no default to `table`.
    pub fn add_column(
        &mut self,
        table: TableId,
        name: &str,
        kind: ColumnKind,
    ) -> Result<ColumnId, SchemaViolation> {
        self.push_column(table, ColumnDef::new(name, kind))
    }

    /// Append a column whose value is `default` when an event leaves it unset.
    pub fn add_column_with_default(
        &mut self,
        table: TableId,
        name: &str,
        kind: ColumnKind,
        default: impl Into<Value>,
    ) -> Result<ColumnId, SchemaViolation> {
        let default = default.into();
        if !kind.accepts(&default) {
            return Err(SchemaViolation::InvalidDefault {
                table: self.table_name(table)?.to_owned(),
                column: name.to_owned(),
            });
        }
        let mut def = ColumnDef::new(name, kind);
        def.default = Some(default);
        self.push_column(table, def)
    }

    /// Record `fold` as the integer column holding the populated length of
    /// the sequence column `sequence`.
    ///
    /// Several sequences may share one fold column (parallel detector
    /// arrays); each sequence has at most one fold.
    pub fn bind_fold(
        &mut self,
        table: TableId,
        sequence: ColumnId,
        fold: ColumnId,
    ) -> Result<(), SchemaViolation> {
        let (table_name, entry) = self.open_entry_mut(table)?;
        let invalid = |reason: String| SchemaViolation::InvalidFoldBinding {
            table: table_name.clone(),
            reason,
        };

        let fold_def = entry
            .columns
            .get_index(fold.index())
            .map(|(_, c)| c)
            .ok_or_else(|| SchemaViolation::UnknownColumn {
                table: table_name.clone(),
                column: fold,
            })?;
        if fold_def.kind != ColumnKind::Int {
            return Err(invalid(format!("fold column '{}' is not int", fold_def.name)));
        }

        let (_, seq_def) = entry.columns.get_index_mut(sequence.index()).ok_or_else(|| {
            SchemaViolation::UnknownColumn {
                table: table_name.clone(),
                column: sequence,
            }
        })?;
        if !seq_def.kind.is_sequence() {
            return Err(invalid(format!("column '{}' is not a sequence", seq_def.name)));
        }
        if seq_def.fold.is_some() {
            return Err(invalid(format!("column '{}' already has a fold", seq_def.name)));
        }
        seq_def.fold = Some(fold);
        Ok(())
    }

    /// Freeze one table's column list ahead of the first run.
    ///
    /// Tables are frozen implicitly when the registry is sealed; freezing a
    /// table that is already frozen fails with [`SchemaViolation::TableFrozen`].
    pub fn freeze(&mut self, table: TableId) -> Result<(), SchemaViolation> {
        let (name, entry) = self.open_entry_mut(table)?;
        if entry.columns.is_empty() {
            return Err(SchemaViolation::EmptyTable { table: name });
        }
        entry.frozen = true;
        Ok(())
    }

    /// Whether `table` is frozen. Unknown tables report `false`.
    pub fn is_frozen(&self, table: TableId) -> bool {
        self.tables
            .get_index(table.index())
            .is_some_and(|(_, e)| e.frozen)
    }

    /// Whether the registry has been sealed for a run.
    pub fn is_sealed(&self) -> bool {
        self.sealed.is_some()
    }

    /// Freeze every table and return the shared immutable schema.
    ///
    /// Idempotent: later calls return the schema captured by the first.
    pub fn seal(&mut self) -> Result<Arc<Schema>, SchemaViolation> {
        if let Some(schema) = &self.sealed {
            return Ok(Arc::clone(schema));
        }
        if let Some((name, _)) = self.tables.iter().find(|(_, e)| e.columns.is_empty()) {
            return Err(SchemaViolation::EmptyTable {
                table: name.clone(),
            });
        }
        for entry in self.tables.values_mut() {
            entry.frozen = true;
        }
        let schema = Arc::new(self.snapshot());
        tracing::debug!(tables = schema.table_count(), "schema sealed");
        self.sealed = Some(Arc::clone(&schema));
        Ok(schema)
    }

    /// The sealed schema, if the registry has been sealed.
    pub fn schema(&self) -> Option<Arc<Schema>> {
        self.sealed.clone()
    }

    /// The current definitions as a [`Schema`] value, sealed or not.
    pub fn snapshot(&self) -> Schema {
        let tables = self
            .tables
            .iter()
            .enumerate()
            .map(|(i, (name, entry))| TableSchema {
                id: TableId(i as u32),
                name: name.clone(),
                description: entry.description.clone(),
                columns: entry.columns.values().cloned().collect(),
            })
            .collect();
        Schema { tables }
    }

    /// Look up a table ID by name.
    pub fn table_id(&self, name: &str) -> Option<TableId> {
        self.tables.get_index_of(name).map(|i| TableId(i as u32))
    }

    /// Look up a column ID by table and column name.
    pub fn column_id(&self, table: TableId, name: &str) -> Option<ColumnId> {
        self.tables
            .get_index(table.index())
            .and_then(|(_, e)| e.columns.get_index_of(name))
            .map(|i| ColumnId(i as u32))
    }

    /// Number of defined tables.
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    fn push_column(&mut self, table: TableId, def: ColumnDef) -> Result<ColumnId, SchemaViolation> {
        let (table_name, entry) = self.open_entry_mut(table)?;
        if def.name.is_empty() {
            return Err(SchemaViolation::EmptyName);
        }
        if entry.columns.contains_key(&def.name) {
            return Err(SchemaViolation::DuplicateColumn {
                table: table_name,
                name: def.name,
            });
        }
        if def.kind.capacity() == Some(0) {
            return Err(SchemaViolation::InvalidCapacity {
                table: table_name,
                column: def.name,
            });
        }
        let id = ColumnId(entry.columns.len() as u32);
        entry.columns.insert(def.name.clone(), def);
        Ok(id)
    }

    fn table_name(&self, table: TableId) -> Result<&str, SchemaViolation> {
        self.tables
            .get_index(table.index())
            .map(|(name, _)| name.as_str())
            .ok_or(SchemaViolation::UnknownTable { table })
    }

    /// Mutable access to a table that still accepts definitions.
    fn open_entry_mut(
        &mut self,
        table: TableId,
    ) -> Result<(String, &mut TableEntry), SchemaViolation> {
        let (name, entry) = self
            .tables
            .get_index_mut(table.index())
            .ok_or(SchemaViolation::UnknownTable { table })?;
        if entry.frozen {
            return Err(SchemaViolation::TableFrozen {
                table: name.clone(),
            });
        }
        Ok((name.clone(), entry))
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("tables", &self.tables.keys().collect::<Vec<_>>())
            .field("sealed", &self.sealed.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_events() -> (SchemaRegistry, TableId) {
        let mut reg = SchemaRegistry::new();
        let t = reg.define_table("events", "scenario").unwrap();
        reg.add_column(t, "id", ColumnKind::Int).unwrap();
        reg.add_column(t, "hits", ColumnKind::RealArray { capacity: 3 })
            .unwrap();
        reg.add_column(t, "hitFold", ColumnKind::Int).unwrap();
        (reg, t)
    }

    #[test]
    fn ids_follow_definition_order() {
        let (mut reg, t) = registry_with_events();
        let g = reg.define_table("geometry", "").unwrap();
        assert_eq!(t, TableId(0));
        assert_eq!(g, TableId(1));
        assert_eq!(reg.column_id(t, "hitFold"), Some(ColumnId(2)));
        assert_eq!(reg.table_id("geometry"), Some(g));
    }

    #[test]
    fn duplicate_names_rejected() {
        let (mut reg, t) = registry_with_events();
        assert_eq!(
            reg.define_table("events", ""),
            Err(SchemaViolation::DuplicateTable {
                name: "events".into()
            })
        );
        assert!(matches!(
            reg.add_column(t, "id", ColumnKind::Real),
            Err(SchemaViolation::DuplicateColumn { .. })
        ));
    }

    #[test]
    fn zero_capacity_rejected() {
        let (mut reg, t) = registry_with_events();
        assert!(matches!(
            reg.add_column(t, "bad", ColumnKind::IntArray { capacity: 0 }),
            Err(SchemaViolation::InvalidCapacity { .. })
        ));
    }

    #[test]
    fn unknown_table_rejected() {
        let mut reg = SchemaRegistry::new();
        assert_eq!(
            reg.add_column(TableId(4), "x", ColumnKind::Int),
            Err(SchemaViolation::UnknownTable { table: TableId(4) })
        );
    }

    #[test]
    fn explicit_freeze_blocks_columns_and_second_freeze() {
        let (mut reg, t) = registry_with_events();
        reg.freeze(t).unwrap();
        assert!(reg.is_frozen(t));
        assert!(matches!(
            reg.add_column(t, "late", ColumnKind::Int),
            Err(SchemaViolation::TableFrozen { .. })
        ));
        assert!(matches!(
            reg.freeze(t),
            Err(SchemaViolation::TableFrozen { .. })
        ));
    }

    #[test]
    fn seal_freezes_everything_and_is_idempotent() {
        let (mut reg, t) = registry_with_events();
        let first = reg.seal().unwrap();
        let second = reg.seal().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(reg.is_frozen(t));
        assert_eq!(
            reg.define_table("late", ""),
            Err(SchemaViolation::RegistrySealed)
        );
        assert!(matches!(
            reg.freeze(t),
            Err(SchemaViolation::TableFrozen { .. })
        ));
    }

    #[test]
    fn seal_rejects_empty_tables() {
        let (mut reg, _) = registry_with_events();
        reg.define_table("empty", "").unwrap();
        assert_eq!(
            reg.seal(),
            Err(SchemaViolation::EmptyTable {
                table: "empty".into()
            })
        );
        assert!(!reg.is_sealed());
    }

    #[test]
    fn default_must_fit_kind() {
        let (mut reg, t) = registry_with_events();
        assert!(matches!(
            reg.add_column_with_default(t, "label", ColumnKind::Int, "text"),
            Err(SchemaViolation::InvalidDefault { .. })
        ));
        let c = reg
            .add_column_with_default(t, "mode", ColumnKind::Text, "none")
            .unwrap();
        let schema = reg.seal().unwrap();
        let col = schema.table(t).unwrap().column(c).unwrap();
        assert_eq!(col.default, Some(Value::Text("none".into())));
    }

    #[test]
    fn fold_binding_rules() {
        let (mut reg, t) = registry_with_events();
        let hits = ColumnId(1);
        let fold = ColumnId(2);
        // Fold must be an int column.
        assert!(reg.bind_fold(t, fold, hits).is_err());
        reg.bind_fold(t, hits, fold).unwrap();
        // A sequence has at most one fold.
        assert!(reg.bind_fold(t, hits, fold).is_err());
        let schema = reg.seal().unwrap();
        assert_eq!(schema.tables[0].columns[1].fold, Some(fold));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_kind() -> impl Strategy<Value = ColumnKind> {
            prop_oneof![
                Just(ColumnKind::Int),
                Just(ColumnKind::Real),
                Just(ColumnKind::Text),
                (1u32..64).prop_map(|capacity| ColumnKind::IntArray { capacity }),
                (1u32..64).prop_map(|capacity| ColumnKind::RealArray { capacity }),
            ]
        }

        proptest! {
            #[test]
            fn sealed_schema_captures_exactly_the_defined_columns(
                kinds in prop::collection::vec(arb_kind(), 1..12)
            ) {
                let mut reg = SchemaRegistry::new();
                let t = reg.define_table("t", "").unwrap();
                for (i, kind) in kinds.iter().enumerate() {
                    reg.add_column(t, &format!("c{i}"), *kind).unwrap();
                }
                let schema = reg.seal().unwrap();
                let table = schema.table(t).unwrap();
                prop_assert_eq!(table.width(), kinds.len());
                for (col, kind) in table.columns.iter().zip(&kinds) {
                    prop_assert_eq!(col.kind, *kind);
                }
                let late = reg.add_column(t, "late", ColumnKind::Int);
                prop_assert!(
                    matches!(late, Err(SchemaViolation::TableFrozen { .. })),
                    "expected TableFrozen, got {:?}",
                    late
                );
            }
        }
    }
}
