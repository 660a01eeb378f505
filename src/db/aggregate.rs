//! Aggregate row stitching.
//!
//! Joined queries return one flattened row per combination of joined rows. The
//! stitcher folds consecutive rows that describe the same root entity into one
//! group, keeps a per-alias identity map so each primary key materializes
//! once, and then walks the join tree to link forward references and backref
//! collections.
//!
//! A group ends at the first row whose root slice differs from the group's
//! first row. That row is held in a one-row lookahead buffer and seeds the
//! next group.

use crate::db::cursor::CursorState;
use crate::db::driver::RawCursor;
use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnMetadata, Instance, InstanceId, ModelMeta, ObjectGraph, PrimaryKey, RawRow, Relation,
    Value,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Shape of a join edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Destination rows point at the source (one-to-many); attached as a list.
    Backref,
    /// Backref between two aliases of the same table.
    SelfJoin,
    /// Source rows point at the destination (many-to-one); attached as one object.
    Forward,
}

/// One declared join edge between two aliases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinDescriptor {
    pub source: String,
    pub dest: String,
    /// Column holding the reference. On the destination for backrefs and
    /// self-joins, on the source for forward joins.
    pub foreign_key: String,
    pub kind: JoinKind,
    /// Attribute the destination is attached under on the source.
    pub attr: String,
}

impl JoinDescriptor {
    pub fn backref(
        source: impl Into<String>,
        dest: impl Into<String>,
        foreign_key: impl Into<String>,
        attr: impl Into<String>,
    ) -> Self {
        Self::with_kind(JoinKind::Backref, source, dest, foreign_key, attr)
    }

    pub fn self_join(
        source: impl Into<String>,
        dest: impl Into<String>,
        foreign_key: impl Into<String>,
        attr: impl Into<String>,
    ) -> Self {
        Self::with_kind(JoinKind::SelfJoin, source, dest, foreign_key, attr)
    }

    pub fn forward(
        source: impl Into<String>,
        dest: impl Into<String>,
        foreign_key: impl Into<String>,
        attr: impl Into<String>,
    ) -> Self {
        Self::with_kind(JoinKind::Forward, source, dest, foreign_key, attr)
    }

    fn with_kind(
        kind: JoinKind,
        source: impl Into<String>,
        dest: impl Into<String>,
        foreign_key: impl Into<String>,
        attr: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
            foreign_key: foreign_key.into(),
            kind,
            attr: attr.into(),
        }
    }
}

/// Per-query description supplied by the query layer: the models taking part,
/// which model each selected column belongs to, and the join edges.
#[derive(Debug, Clone)]
pub struct QueryMeta {
    root: usize,
    models: Vec<ModelMeta>,
    columns: Option<Vec<(String, String)>>,
    joins: Vec<JoinDescriptor>,
}

impl QueryMeta {
    pub fn new(root: ModelMeta) -> Self {
        Self {
            root: 0,
            models: vec![root],
            columns: None,
            joins: Vec::new(),
        }
    }

    /// Add a joined model and the edge that reaches it.
    pub fn join(mut self, model: ModelMeta, join: JoinDescriptor) -> Self {
        if self.model_index(&model.alias).is_none() {
            self.models.push(model);
        }
        self.joins.push(join);
        self
    }

    /// Attribute each selected column, in order, to `(alias, field)`.
    ///
    /// Without this, columns are attributed by the table reported by the
    /// driver, then by an `alias.field` column name, then to the root model.
    pub fn with_columns<A, F>(mut self, columns: impl IntoIterator<Item = (A, F)>) -> Self
    where
        A: Into<String>,
        F: Into<String>,
    {
        self.columns = Some(
            columns
                .into_iter()
                .map(|(a, f)| (a.into(), f.into()))
                .collect(),
        );
        self
    }

    pub fn root(&self) -> &ModelMeta {
        &self.models[self.root]
    }

    pub fn models(&self) -> &[ModelMeta] {
        &self.models
    }

    pub fn joins(&self) -> &[JoinDescriptor] {
        &self.joins
    }

    pub fn model_index(&self, alias: &str) -> Option<usize> {
        self.models.iter().position(|m| m.alias == alias)
    }

    fn model_index_by_table(&self, table: &str) -> Option<usize> {
        self.model_index(table)
            .or_else(|| self.models.iter().position(|m| m.table == table))
    }
}

/// Column-to-model attribution, captured from the first row's description.
#[derive(Debug, Clone)]
pub(crate) struct RowShape {
    columns: Vec<(usize, String)>,
    model_count: usize,
}

impl RowShape {
    pub(crate) fn new(description: &[ColumnMetadata], meta: &QueryMeta) -> DbResult<Self> {
        let mut columns = Vec::with_capacity(description.len());
        for (i, col) in description.iter().enumerate() {
            let explicit = meta.columns.as_ref().and_then(|cols| cols.get(i));
            let attributed = match explicit {
                Some((alias, field)) => {
                    let idx = meta.model_index(alias).ok_or_else(|| {
                        DbError::invalid_input(format!(
                            "column {i} is attributed to unknown alias '{alias}'"
                        ))
                    })?;
                    (idx, field.clone())
                }
                None => Self::infer(col, meta),
            };
            columns.push(attributed);
        }
        Ok(Self {
            columns,
            model_count: meta.models.len(),
        })
    }

    fn infer(col: &ColumnMetadata, meta: &QueryMeta) -> (usize, String) {
        if let Some(idx) = col.table.as_deref().and_then(|t| meta.model_index_by_table(t)) {
            return (idx, col.name.clone());
        }
        if let Some((alias, field)) = col.name.split_once('.') {
            if let Some(idx) = meta.model_index(alias) {
                return (idx, field.to_string());
            }
        }
        (meta.root, col.name.clone())
    }

    /// Split a row into one value slice per model. Missing cells read as NULL.
    pub(crate) fn split(&self, row: &RawRow) -> Vec<Vec<Value>> {
        let mut slices = vec![Vec::new(); self.model_count];
        for (i, (model, _)) in self.columns.iter().enumerate() {
            slices[*model].push(row.get(i).cloned().unwrap_or(Value::Null));
        }
        slices
    }

    /// Build the instance of `model` from its slice.
    pub(crate) fn instance(&self, meta: &QueryMeta, model: usize, slice: &[Value]) -> Instance {
        let mut instance = Instance::new(meta.models[model].alias.clone());
        let fields = self
            .columns
            .iter()
            .filter(|(m, _)| *m == model)
            .map(|(_, field)| field);
        for (field, value) in fields.zip(slice) {
            instance.set(field.clone(), value.clone());
        }
        instance
    }
}

/// Decode one row into a graph of one instance per model, with forward
/// references attached. Used for non-aggregate model queries.
pub(crate) fn decode_model_row(meta: &QueryMeta, shape: &RowShape, row: &RawRow) -> ObjectGraph {
    let slices = shape.split(row);
    let mut arena = vec![shape.instance(meta, meta.root, &slices[meta.root])];
    let mut ids: Vec<Option<InstanceId>> = vec![None; slices.len()];
    ids[meta.root] = Some(0);

    for (idx, slice) in slices.iter().enumerate() {
        if idx == meta.root {
            continue;
        }
        let instance = shape.instance(meta, idx, slice);
        if instance.is_all_null() {
            continue;
        }
        ids[idx] = Some(arena.len());
        arena.push(instance);
    }

    for join in &meta.joins {
        let source = meta.model_index(&join.source).and_then(|i| ids[i]);
        let dest = meta.model_index(&join.dest).and_then(|i| ids[i]);
        if let (Some(source), Some(dest)) = (source, dest) {
            let relation = match join.kind {
                JoinKind::Forward => Relation::One(dest),
                JoinKind::Backref | JoinKind::SelfJoin => Relation::Many(vec![dest]),
            };
            arena[source].set_relation(join.attr.clone(), relation);
        }
    }

    for (model, id) in ids.iter().enumerate() {
        if let Some(id) = id {
            arena[*id].prepare(meta.models[model].on_prepared);
        }
    }
    ObjectGraph::new(arena, 0)
}

#[derive(Debug, Default)]
struct IdentityMap {
    index: HashMap<PrimaryKey, InstanceId>,
    order: Vec<InstanceId>,
}

impl IdentityMap {
    fn get(&self, key: &PrimaryKey) -> Option<InstanceId> {
        self.index.get(key).copied()
    }
}

/// Instances of the group being assembled.
struct Group {
    arena: Vec<Instance>,
    maps: Vec<IdentityMap>,
}

impl Group {
    fn new(model_count: usize) -> Self {
        Self {
            arena: Vec::new(),
            maps: (0..model_count).map(|_| IdentityMap::default()).collect(),
        }
    }

    /// Insert unless all-NULL, keyed by NULL, or already present. The first
    /// instance seen for a key is the one kept.
    fn add(&mut self, meta: &QueryMeta, model: usize, instance: Instance) -> Option<InstanceId> {
        if instance.is_all_null() {
            return None;
        }
        let key = instance.primary_key(&meta.models[model].primary_key);
        if key.is_null() {
            return None;
        }
        if let Some(existing) = self.maps[model].get(&key) {
            return Some(existing);
        }
        let id = self.arena.len();
        self.arena.push(instance);
        self.maps[model].index.insert(key, id);
        self.maps[model].order.push(id);
        Some(id)
    }

    /// Walk the join tree from the root and link instances.
    fn link(&mut self, meta: &QueryMeta) {
        let Self { arena, maps } = self;
        let mut stack = vec![meta.root];
        let mut visited = HashSet::new();

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            let source_alias = &meta.models[current].alias;
            for join in meta.joins.iter().filter(|j| &j.source == source_alias) {
                let Some(dest) = meta.model_index(&join.dest) else {
                    continue;
                };
                match join.kind {
                    JoinKind::Backref | JoinKind::SelfJoin => {
                        for &owner in &maps[current].order {
                            arena[owner].set_relation(join.attr.clone(), Relation::Many(Vec::new()));
                        }
                        for &child in &maps[dest].order {
                            let owner = arena[child]
                                .get(&join.foreign_key)
                                .filter(|fk| !fk.is_null())
                                .and_then(|fk| maps[current].get(&PrimaryKey::single(fk.clone())));
                            match owner {
                                Some(owner) => arena[owner].push_related(&join.attr, child),
                                None => debug!(
                                    source = %join.source,
                                    dest = %join.dest,
                                    "Unable to join, referenced row not in result"
                                ),
                            }
                        }
                    }
                    JoinKind::Forward => {
                        for &inst in &maps[current].order {
                            let target = arena[inst]
                                .get(&join.foreign_key)
                                .filter(|fk| !fk.is_null())
                                .and_then(|fk| maps[dest].get(&PrimaryKey::single(fk.clone())));
                            if let Some(target) = target {
                                arena[inst].set_relation(join.attr.clone(), Relation::One(target));
                            }
                        }
                    }
                }
                stack.push(dest);
            }

            let hook = meta.models[current].on_prepared;
            for &id in &maps[current].order {
                arena[id].prepare(hook);
            }
        }
    }
}

/// Stateful stitcher over one open cursor.
#[derive(Debug)]
pub struct AggregateStitcher {
    meta: Arc<QueryMeta>,
    shape: Option<RowShape>,
    buffer: Option<RawRow>,
}

impl AggregateStitcher {
    pub fn new(meta: Arc<QueryMeta>) -> Self {
        Self {
            meta,
            shape: None,
            buffer: None,
        }
    }

    /// True while a row of the next group is held back.
    pub fn has_buffered_row(&self) -> bool {
        self.buffer.is_some()
    }

    /// Assemble the next group, or `None` once the rows are exhausted.
    pub async fn next_group<C: RawCursor>(
        &mut self,
        state: &mut CursorState<C>,
    ) -> DbResult<Option<ObjectGraph>> {
        let Self {
            meta,
            shape,
            buffer,
        } = self;
        let meta: &QueryMeta = meta;

        let first_row = match buffer.take() {
            Some(row) => row,
            None => match state.fetch_row().await? {
                Some(row) => row,
                None => return Ok(None),
            },
        };

        if shape.is_none() {
            *shape = Some(RowShape::new(state.description(), meta)?);
        }
        let shape = shape
            .as_ref()
            .ok_or_else(|| DbError::internal("row shape not captured"))?;

        let root = meta.root;
        let first = shape.split(&first_row);
        let mut group = Group::new(first.len());

        let root_instance = shape.instance(meta, root, &first[root]);
        let root_id = match group.add(meta, root, root_instance.clone()) {
            Some(id) => id,
            None => {
                // Keyless root: nothing can join back to it, but its own
                // backref lists and forward references are still linked.
                let id = group.arena.len();
                group.arena.push(root_instance);
                group.maps[root].order.push(id);
                id
            }
        };
        for (idx, slice) in first.iter().enumerate() {
            if idx != root {
                group.add(meta, idx, shape.instance(meta, idx, slice));
            }
        }

        while let Some(row) = state.fetch_row().await? {
            let slices = shape.split(&row);
            if slices[root] != first[root] {
                *buffer = Some(row);
                break;
            }
            for (idx, slice) in slices.iter().enumerate() {
                if idx == root || *slice == first[idx] {
                    continue;
                }
                group.add(meta, idx, shape.instance(meta, idx, slice));
            }
        }

        group.link(meta);
        let hook = meta.root().on_prepared;
        group.arena[root_id].prepare(hook);
        Ok(Some(ObjectGraph::new(group.arena, root_id)))
    }
}
