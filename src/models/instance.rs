//! Materialized records and stitched object graphs.
//!
//! Instances produced for one aggregate group live in an arena
//! ([`ObjectGraph`]) and refer to each other by [`InstanceId`], so forward
//! references and backref lists can form cycles without shared ownership.

use crate::models::{PrimaryKey, Value};
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, HashSet};

/// Index of an instance inside its [`ObjectGraph`].
pub type InstanceId = usize;

/// Hook run once on each instance after it has been fully linked.
pub type PreparedHook = fn(&mut Instance);

/// Static description of a model (or alias of one) taking part in a query.
#[derive(Debug, Clone)]
pub struct ModelMeta {
    /// Alias the model is selected under; equals the table name when unaliased.
    pub alias: String,
    pub table: String,
    /// Primary-key field names in declaration order.
    pub primary_key: Vec<String>,
    pub on_prepared: Option<PreparedHook>,
}

impl ModelMeta {
    pub fn new(table: impl Into<String>, primary_key: &[&str]) -> Self {
        let table = table.into();
        Self {
            alias: table.clone(),
            table,
            primary_key: primary_key.iter().map(|s| s.to_string()).collect(),
            on_prepared: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    pub fn with_prepared_hook(mut self, hook: PreparedHook) -> Self {
        self.on_prepared = Some(hook);
        self
    }
}

/// Link from one instance to others.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    /// Forward reference (many-to-one).
    One(InstanceId),
    /// Backref collection (one-to-many).
    Many(Vec<InstanceId>),
}

/// One materialized row slice of a single model.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub model: String,
    fields: Vec<(String, Value)>,
    relations: BTreeMap<String, Relation>,
    prepared: bool,
}

impl Instance {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            fields: Vec::new(),
            relations: BTreeMap::new(),
            prepared: false,
        }
    }

    /// Set a field, replacing an earlier value of the same name.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((field, value)),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// Fields in selection order.
    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// Primary key built from `pk_fields`; missing fields count as NULL.
    pub fn primary_key(&self, pk_fields: &[String]) -> PrimaryKey {
        PrimaryKey::new(
            pk_fields
                .iter()
                .map(|f| self.get(f).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }

    /// True for the placeholder an outer join produces when nothing matched.
    pub fn is_all_null(&self) -> bool {
        self.fields.iter().all(|(_, value)| value.is_null())
    }

    pub fn relation(&self, attr: &str) -> Option<&Relation> {
        self.relations.get(attr)
    }

    pub fn relations(&self) -> impl Iterator<Item = (&str, &Relation)> {
        self.relations.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn set_relation(&mut self, attr: impl Into<String>, relation: Relation) {
        self.relations.insert(attr.into(), relation);
    }

    pub(crate) fn push_related(&mut self, attr: &str, id: InstanceId) {
        match self.relations.get_mut(attr) {
            Some(Relation::Many(ids)) => ids.push(id),
            _ => {
                self.relations
                    .insert(attr.to_string(), Relation::Many(vec![id]));
            }
        }
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Run the hook unless it already ran. Returns whether it ran now.
    pub(crate) fn prepare(&mut self, hook: Option<PreparedHook>) -> bool {
        if self.prepared {
            return false;
        }
        self.prepared = true;
        if let Some(hook) = hook {
            hook(self);
        }
        true
    }
}

/// Options for [`ObjectGraph::to_json`].
#[derive(Debug, Clone, Copy)]
pub struct DumpOptions {
    /// Follow forward references into nested objects.
    pub recurse: bool,
    /// Include backref collections.
    pub backrefs: bool,
    /// Stop descending below this depth (root is depth 0).
    pub max_depth: Option<usize>,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            recurse: true,
            backrefs: false,
            max_depth: None,
        }
    }
}

/// Instances of one group plus the id of the root instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectGraph {
    instances: Vec<Instance>,
    root: InstanceId,
}

impl ObjectGraph {
    pub(crate) fn new(instances: Vec<Instance>, root: InstanceId) -> Self {
        Self { instances, root }
    }

    pub fn root_id(&self) -> InstanceId {
        self.root
    }

    pub fn root(&self) -> &Instance {
        &self.instances[self.root]
    }

    pub fn instance(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.get(id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Forward-referenced instance under `attr`, if linked.
    pub fn related_one(&self, id: InstanceId, attr: &str) -> Option<&Instance> {
        match self.instances.get(id)?.relation(attr)? {
            Relation::One(target) => self.instances.get(*target),
            Relation::Many(_) => None,
        }
    }

    /// Backref collection under `attr`. Empty when absent.
    pub fn related_many(&self, id: InstanceId, attr: &str) -> Vec<&Instance> {
        match self.instances.get(id).and_then(|i| i.relation(attr)) {
            Some(Relation::Many(ids)) => ids.iter().filter_map(|i| self.instances.get(*i)).collect(),
            _ => Vec::new(),
        }
    }

    /// Ids of a backref collection, for walking further down the graph.
    pub fn related_ids(&self, id: InstanceId, attr: &str) -> Vec<InstanceId> {
        match self.instances.get(id).and_then(|i| i.relation(attr)) {
            Some(Relation::Many(ids)) => ids.clone(),
            Some(Relation::One(target)) => vec![*target],
            None => Vec::new(),
        }
    }

    /// Dump the graph rooted at the root instance as nested JSON objects.
    pub fn to_json(&self, options: DumpOptions) -> JsonValue {
        let mut path = HashSet::new();
        self.dump(self.root, 0, &options, &mut path)
    }

    fn dump(
        &self,
        id: InstanceId,
        depth: usize,
        options: &DumpOptions,
        path: &mut HashSet<InstanceId>,
    ) -> JsonValue {
        let Some(instance) = self.instances.get(id) else {
            return JsonValue::Null;
        };
        let mut out = Map::new();
        for (name, value) in &instance.fields {
            out.insert(name.clone(), value.to_json());
        }

        let can_descend = options.max_depth.is_none_or(|max| depth < max);
        if !can_descend {
            return JsonValue::Object(out);
        }

        // Instances already on the current path are not re-entered.
        path.insert(id);
        for (attr, relation) in &instance.relations {
            match relation {
                Relation::One(target) if options.recurse => {
                    if !path.contains(target) {
                        let nested = self.dump(*target, depth + 1, options, path);
                        out.insert(attr.clone(), nested);
                    }
                }
                Relation::Many(ids) if options.backrefs => {
                    let mut items = Vec::with_capacity(ids.len());
                    for child in ids {
                        if !path.contains(child) {
                            items.push(self.dump(*child, depth + 1, options, path));
                        }
                    }
                    out.insert(attr.clone(), JsonValue::Array(items));
                }
                _ => {}
            }
        }
        path.remove(&id);
        JsonValue::Object(out)
    }
}
