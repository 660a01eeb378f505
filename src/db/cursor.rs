//! Cursor result wrapper.
//!
//! [`ResultWrapper`] drives a raw cursor one row at a time, decodes each row
//! with the [`RowDecoder`] chosen by the query layer and appends the result to
//! an append-only cache. Cached records can be read again by index; rows are
//! never fetched from the server twice.

use crate::db::aggregate::{AggregateStitcher, QueryMeta, RowShape, decode_model_row};
use crate::db::driver::RawCursor;
use crate::error::{DbError, DbResult};
use crate::models::{ColumnMetadata, Instance, ModelMeta, ObjectGraph, RawRow, ResultKind, Value};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Raw cursor plus its lifecycle flags.
#[derive(Debug)]
pub struct CursorState<C> {
    cursor: C,
    populated: bool,
    initialized: bool,
    description: Vec<ColumnMetadata>,
}

impl<C: RawCursor> CursorState<C> {
    pub fn new(cursor: C) -> Self {
        Self {
            cursor,
            populated: false,
            initialized: false,
            description: Vec::new(),
        }
    }

    /// Fetch one row.
    ///
    /// The column description is captured on the first call. At exhaustion the
    /// state is marked populated and the cursor is closed unless it is named.
    pub async fn fetch_row(&mut self) -> DbResult<Option<RawRow>> {
        if self.populated {
            return Ok(None);
        }
        let row = self.cursor.fetch_one().await?;
        if !self.initialized {
            self.description = self.cursor.description().to_vec();
            self.initialized = true;
        }
        if row.is_none() {
            self.populated = true;
            if self.cursor.name().is_none() {
                self.cursor.close().await?;
            } else {
                debug!(cursor = ?self.cursor.name(), "Keeping named cursor open");
            }
        }
        Ok(row)
    }

    pub fn description(&self) -> &[ColumnMetadata] {
        &self.description
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn cursor(&self) -> &C {
        &self.cursor
    }
}

/// Decoding strategy, selected once per query.
#[derive(Debug, Clone)]
pub enum RowDecoder {
    /// All columns flattened onto one instance of the model.
    Naive(Arc<ModelMeta>),
    Tuples,
    Dicts,
    /// One instance per joined model, forward references attached.
    Model(Arc<QueryMeta>),
    /// Consecutive rows stitched into one graph per root entity.
    AggregateModel(Arc<QueryMeta>),
}

impl RowDecoder {
    pub fn kind(&self) -> ResultKind {
        match self {
            Self::Naive(_) => ResultKind::Naive,
            Self::Tuples => ResultKind::Tuples,
            Self::Dicts => ResultKind::Dicts,
            Self::Model(_) => ResultKind::Model,
            Self::AggregateModel(_) => ResultKind::AggregateModel,
        }
    }
}

/// One decoded result.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Tuple(Vec<Value>),
    Dict(BTreeMap<String, Value>),
    Instance(Instance),
    Graph(ObjectGraph),
}

impl Record {
    pub fn as_tuple(&self) -> Option<&[Value]> {
        match self {
            Self::Tuple(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Dict(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Self::Instance(instance) => Some(instance),
            Self::Graph(graph) => Some(graph.root()),
            _ => None,
        }
    }

    pub fn as_graph(&self) -> Option<&ObjectGraph> {
        match self {
            Self::Graph(graph) => Some(graph),
            _ => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Tuple(values) => JsonValue::Array(values.iter().map(Value::to_json).collect()),
            Self::Dict(map) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Self::Instance(instance) => JsonValue::Object(
                instance
                    .fields()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Self::Graph(graph) => graph.to_json(Default::default()),
        }
    }
}

/// Row-at-a-time decoding for everything but aggregate queries.
#[derive(Debug)]
struct FlatDecoder {
    decoder: RowDecoder,
    shape: Option<RowShape>,
}

impl FlatDecoder {
    fn decode(&mut self, row: RawRow, description: &[ColumnMetadata]) -> DbResult<Record> {
        let record = match &self.decoder {
            RowDecoder::Tuples => Record::Tuple(row),
            RowDecoder::Dicts => Record::Dict(
                description
                    .iter()
                    .map(|c| c.name.clone())
                    .zip(row)
                    .collect(),
            ),
            RowDecoder::Naive(model) => {
                let mut instance = Instance::new(model.alias.clone());
                for (col, value) in description.iter().zip(row) {
                    instance.set(col.name.clone(), value);
                }
                instance.prepare(model.on_prepared);
                Record::Instance(instance)
            }
            RowDecoder::Model(meta) => {
                if self.shape.is_none() {
                    self.shape = Some(RowShape::new(description, meta)?);
                }
                let shape = self
                    .shape
                    .as_ref()
                    .ok_or_else(|| DbError::internal("row shape not captured"))?;
                Record::Graph(decode_model_row(meta, shape, &row))
            }
            RowDecoder::AggregateModel(_) => {
                return Err(DbError::internal(
                    "aggregate rows are decoded by the stitcher",
                ));
            }
        };
        Ok(record)
    }
}

#[derive(Debug)]
enum Strategy {
    Flat(FlatDecoder),
    Aggregate(AggregateStitcher),
}

/// Lazy, cache-filling wrapper over a raw cursor.
#[derive(Debug)]
pub struct ResultWrapper<C> {
    state: CursorState<C>,
    strategy: Strategy,
    cache: Vec<Record>,
    /// Next cache index handed out by [`ResultWrapper::next_record`].
    position: usize,
}

impl<C: RawCursor> ResultWrapper<C> {
    pub fn new(cursor: C, decoder: RowDecoder) -> Self {
        let strategy = match decoder {
            RowDecoder::AggregateModel(meta) => Strategy::Aggregate(AggregateStitcher::new(meta)),
            decoder => Strategy::Flat(FlatDecoder {
                decoder,
                shape: None,
            }),
        };
        Self {
            state: CursorState::new(cursor),
            strategy,
            cache: Vec::new(),
            position: 0,
        }
    }

    /// Fetch and decode exactly one new result and append it to the cache.
    ///
    /// Returns `None` once the cursor is exhausted.
    pub async fn iterate(&mut self) -> DbResult<Option<&Record>> {
        let record = match &mut self.strategy {
            Strategy::Flat(decoder) => match self.state.fetch_row().await? {
                Some(row) => Some(decoder.decode(row, self.state.description())?),
                None => None,
            },
            Strategy::Aggregate(stitcher) => stitcher
                .next_group(&mut self.state)
                .await?
                .map(Record::Graph),
        };
        match record {
            Some(record) => {
                self.cache.push(record);
                Ok(self.cache.last())
            }
            None => Ok(None),
        }
    }

    /// Sequential read: cached records first, then fresh ones.
    pub async fn next_record(&mut self) -> DbResult<Option<&Record>> {
        if self.position >= self.cache.len() && self.iterate().await?.is_none() {
            return Ok(None);
        }
        let record = self.cache.get(self.position);
        self.position += 1;
        Ok(record)
    }

    /// Restart sequential reads from the first cached record.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Random access. Indices past the cache fetch one result per index.
    pub async fn get(&mut self, index: usize) -> DbResult<Option<&Record>> {
        while self.cache.len() <= index {
            if self.iterate().await?.is_none() {
                return Ok(None);
            }
        }
        Ok(self.cache.get(index))
    }

    /// Fetch up to `n` more results, or all remaining when `n` is `None`.
    pub async fn fill_cache(&mut self, n: Option<i64>) -> DbResult<()> {
        let limit = match n {
            Some(n) if n < 0 => {
                return Err(DbError::invalid_input(format!(
                    "fill_cache limit must be non-negative, got {n}"
                )));
            }
            Some(n) => Some(n as usize),
            None => None,
        };
        let mut fetched = 0usize;
        while !self.state.is_populated() && limit.is_none_or(|limit| fetched < limit) {
            if self.iterate().await?.is_none() {
                break;
            }
            fetched += 1;
        }
        Ok(())
    }

    /// Total number of results. Drains the cursor.
    pub async fn count(&mut self) -> DbResult<usize> {
        self.fill_cache(None).await?;
        Ok(self.cache.len())
    }

    /// The first `n` results.
    pub async fn peek(&mut self, n: usize) -> DbResult<&[Record]> {
        let missing = n.saturating_sub(self.cache.len());
        self.fill_cache(Some(missing as i64)).await?;
        let end = n.min(self.cache.len());
        Ok(&self.cache[..end])
    }

    pub async fn first(&mut self) -> DbResult<Option<&Record>> {
        self.get(0).await
    }

    /// The first result, or `NotFound` when there is none.
    pub async fn one(&mut self) -> DbResult<&Record> {
        match self.get(0).await? {
            Some(record) => Ok(record),
            None => Err(DbError::not_found("query returned no rows")),
        }
    }

    /// First column of the first result.
    pub async fn scalar(&mut self) -> DbResult<Option<Value>> {
        if self.get(0).await?.is_none() {
            return Ok(None);
        }
        let first_column = self.state.description().first().map(|c| c.name.clone());
        let value = match self.cache.first() {
            Some(Record::Tuple(values)) => values.first().cloned(),
            Some(Record::Dict(map)) => first_column.and_then(|name| map.get(&name).cloned()),
            Some(Record::Instance(instance)) => {
                instance.fields().first().map(|(_, v)| v.clone())
            }
            Some(Record::Graph(graph)) => graph.root().fields().first().map(|(_, v)| v.clone()),
            None => None,
        };
        Ok(value)
    }

    /// Drain the cursor and return every result.
    pub async fn into_vec(mut self) -> DbResult<Vec<Record>> {
        self.fill_cache(None).await?;
        Ok(self.cache)
    }

    pub fn cached(&self) -> &[Record] {
        &self.cache
    }

    pub fn is_populated(&self) -> bool {
        self.state.is_populated()
    }

    pub fn description(&self) -> &[ColumnMetadata] {
        self.state.description()
    }

    pub fn rows_affected(&self) -> u64 {
        self.state.cursor().rows_affected()
    }

    pub fn last_insert_id(&self) -> Option<i64> {
        self.state.cursor().last_insert_id()
    }
}
