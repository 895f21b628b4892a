use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::codec::{keys, values};
use crate::db::config::Config;
use crate::db::response::{ExecResponse, PropResponse, RequestContext, ResponseResult, ResultCode};
use crate::db::transaction::{Transaction, TxnManager, TxnStatsSnapshot};
use crate::engine::{BatchOp, Kvt, Partition, TableId, TxId};
use crate::error::{KvtError, OpResult, Result};
use crate::model::{
    DataSet, DelTags, EdgeKey, EdgeProp, NewEdge, NewVertex, PartitionId, PropertyMap, Row,
    SpaceId, TagId, VertexProp, Vid,
};

/// The adapter runs unsharded; every key lands in partition zero. The
/// partition field stays in the key format so sharding can be turned on later
/// without a format change.
pub(crate) const PART_ID: PartitionId = 0;

/// Table ids provisioned for one graph space.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SpaceTables {
    pub vertices: TableId,
    pub edges: TableId,
    #[allow(dead_code)]
    pub indices: TableId,
}

/// Graph-to-KV adapter: lowers graph mutations and queries into batched
/// transactional work against the [`Kvt`] engine.
///
/// Per space it provisions a vertex table, an edge table (which also holds
/// the reverse-edge index) and a range-partitioned index table. Every edge is
/// written twice, under its source prefix and under its destination prefix,
/// so both scan directions stay cheap; all mutations here preserve that
/// symmetry.
#[derive(Debug)]
pub struct GraphStore {
    pub(crate) kvt: Arc<Kvt>,
    pub(crate) txns: TxnManager,
    pub(crate) config: Config,
    pub(crate) spaces: DashMap<SpaceId, SpaceTables>,
}

impl GraphStore {
    pub fn new(config: Config) -> Self {
        let kvt = Arc::new(Kvt::new(config.cc_mode));
        Self::with_engine(kvt, config)
    }

    /// Builds a store over an existing engine handle. The engine's mode wins
    /// over `config.cc_mode`, which only matters for [`GraphStore::new`].
    pub fn with_engine(kvt: Arc<Kvt>, config: Config) -> Self {
        info!(mode = ?kvt.mode(), "graph store ready");
        Self {
            txns: TxnManager::new(kvt.clone()),
            kvt,
            config,
            spaces: DashMap::new(),
        }
    }

    pub fn engine(&self) -> &Arc<Kvt> {
        &self.kvt
    }

    pub fn txn_stats(&self) -> TxnStatsSnapshot {
        self.txns.stats()
    }

    pub fn begin(&self) -> Result<Transaction> {
        self.txns.begin()
    }

    /// Provisions the three per-space tables on first use. A create that
    /// loses the race to another caller resolves to the winner's table id,
    /// so provisioning is idempotent.
    pub(crate) fn ensure_space(&self, space: SpaceId) -> Result<SpaceTables> {
        if let Some(tables) = self.spaces.get(&space) {
            return Ok(*tables);
        }
        let tables = SpaceTables {
            vertices: self.create_or_lookup(&format!("vertices_space_{space}"), Partition::Hash)?,
            edges: self.create_or_lookup(&format!("edges_space_{space}"), Partition::Hash)?,
            indices: self.create_or_lookup(&format!("indices_space_{space}"), Partition::Range)?,
        };
        self.spaces.insert(space, tables);
        Ok(tables)
    }

    fn create_or_lookup(&self, name: &str, partition: Partition) -> Result<TableId> {
        match self.kvt.create_table(name, partition) {
            Ok(id) => Ok(id),
            Err(KvtError::TableAlreadyExists(_)) => self.kvt.table_id(name),
            Err(err) => Err(err),
        }
    }

    /// Inserts vertices. Each `(vertex, tag)` pair becomes one row keyed by
    /// the vertex id and tag, valued by the tag's properties aligned against
    /// `prop_names[tag]`. With `if_not_exists`, rows whose key already exists
    /// are skipped and reported as such.
    pub fn add_vertices(
        &self,
        ctx: &RequestContext,
        vertices: &[NewVertex],
        prop_names: &HashMap<TagId, Vec<String>>,
        if_not_exists: bool,
        ignore_existed_index: bool,
    ) -> Result<ExecResponse> {
        let started = Instant::now();
        debug!(
            space = ctx.space,
            count = vertices.len(),
            if_not_exists,
            ignore_existed_index,
            "add_vertices"
        );
        let tables = self.ensure_space(ctx.space)?;

        let mut targets = Vec::new();
        for vertex in vertices {
            for tag in &vertex.tags {
                let Some(names) = prop_names.get(&tag.tag_id) else {
                    warn!(tag = tag.tag_id, "no property names for tag; skipping");
                    continue;
                };
                let key =
                    keys::encode_vertex_key(ctx.space, PART_ID, &vertex.id, tag.tag_id).into_bytes();
                let payload = values::encode_props(&values::align_props(names, &tag.props));
                targets.push(WriteTarget {
                    check_key: key.clone(),
                    writes: vec![(key, payload)],
                });
            }
        }

        let (written, skipped, failed) =
            self.write_targets(tables.vertices, &targets, if_not_exists)?;
        Ok(ExecResponse::finish(started, written, skipped, failed))
    }

    /// Inserts edges. Every edge is written under both its forward and its
    /// reverse key with the same payload; `if_not_exists` probes the forward
    /// key only.
    pub fn add_edges(
        &self,
        ctx: &RequestContext,
        edges: &[NewEdge],
        prop_names: &[String],
        if_not_exists: bool,
        ignore_existed_index: bool,
    ) -> Result<ExecResponse> {
        let started = Instant::now();
        debug!(
            space = ctx.space,
            count = edges.len(),
            if_not_exists,
            ignore_existed_index,
            "add_edges"
        );
        let tables = self.ensure_space(ctx.space)?;

        let mut targets = Vec::new();
        for edge in edges {
            let EdgeKey {
                src,
                edge_type,
                ranking,
                dst,
            } = &edge.key;
            let forward =
                keys::encode_edge_key(ctx.space, PART_ID, src, *edge_type, *ranking, dst)
                    .into_bytes();
            let reverse =
                keys::encode_reverse_edge_key(ctx.space, PART_ID, dst, *edge_type, *ranking, src)
                    .into_bytes();
            let payload = values::encode_props(&values::align_props(prop_names, &edge.props));
            targets.push(WriteTarget {
                check_key: forward.clone(),
                writes: vec![(forward, payload.clone()), (reverse, payload)],
            });
        }

        let (written, skipped, failed) = self.write_targets(tables.edges, &targets, if_not_exists)?;
        Ok(ExecResponse::finish(started, written, skipped, failed))
    }

    /// Removes edges, forward and reverse rows together. A key that is
    /// already gone counts toward success.
    pub fn delete_edges(&self, ctx: &RequestContext, edges: &[EdgeKey]) -> Result<ExecResponse> {
        let started = Instant::now();
        debug!(space = ctx.space, count = edges.len(), "delete_edges");
        let tables = self.ensure_space(ctx.space)?;

        let (deleted, failed) = self.txns.execute_with_retry(self.config.max_retries, |tx| {
            let mut ops = Vec::with_capacity(edges.len() * 2);
            for edge in edges {
                let EdgeKey {
                    src,
                    edge_type,
                    ranking,
                    dst,
                } = edge;
                ops.push(BatchOp::del(
                    tables.edges,
                    keys::encode_edge_key(ctx.space, PART_ID, src, *edge_type, *ranking, dst),
                ));
                ops.push(BatchOp::del(
                    tables.edges,
                    keys::encode_reverse_edge_key(
                        ctx.space, PART_ID, dst, *edge_type, *ranking, src,
                    ),
                ));
            }
            let results = collect_batch(self.kvt.batch_execute(tx, &ops))?;
            Ok(count_deletions(&results))
        })?;
        Ok(ExecResponse::finish(started, deleted, 0, failed))
    }

    /// Cascade-deletes vertices inside a single transaction: every tag row,
    /// every outgoing edge with its reverse twin, and every incoming edge
    /// found through the reverse index with its forward twin. Any failure
    /// other than a benign missing key rolls the whole cascade back.
    pub fn delete_vertices(&self, ctx: &RequestContext, ids: &[Vid]) -> Result<ExecResponse> {
        let started = Instant::now();
        debug!(space = ctx.space, count = ids.len(), "delete_vertices");
        let tables = self.ensure_space(ctx.space)?;

        let (deleted, failed) = self.txns.execute_with_retry(self.config.max_retries, |tx| {
            // Establish the scan snapshot for the whole cascade before any
            // delete is issued.
            let mut ops = Vec::new();
            for vid in ids {
                self.collect_vertex_cascade(ctx.space, tx, tables, vid, &mut ops)?;
            }
            let results = collect_batch(self.kvt.batch_execute(tx, &ops))?;
            if let Some(err) = first_hard_error(results) {
                return Err(err);
            }
            Ok((ops.len(), 0))
        })?;
        Ok(ExecResponse::finish(started, deleted, 0, failed))
    }

    fn collect_vertex_cascade(
        &self,
        space: SpaceId,
        tx: TxId,
        tables: SpaceTables,
        vid: &Vid,
        ops: &mut Vec<BatchOp>,
    ) -> Result<()> {
        // Tag rows.
        let prefix = keys::vertex_prefix(space, PART_ID, Some(vid));
        let rows = self.kvt.scan(
            tx,
            tables.vertices,
            prefix.as_bytes(),
            &keys::prefix_upper_bound(&prefix),
            self.config.vertex_scan_limit,
        )?;
        for (key, _) in rows {
            ops.push(BatchOp::del(tables.vertices, key));
        }

        // Outgoing edges, plus their reverse-index twins.
        let prefix = keys::edge_prefix(space, PART_ID, Some(vid), None);
        let rows = self.kvt.scan(
            tx,
            tables.edges,
            prefix.as_bytes(),
            &keys::prefix_upper_bound(&prefix),
            self.config.edge_scan_limit,
        )?;
        for (key, _) in rows {
            if let Ok(parts) = keys::decode_edge_key(&key) {
                ops.push(BatchOp::del(
                    tables.edges,
                    keys::encode_reverse_edge_key(
                        parts.space,
                        parts.part,
                        &parts.dst,
                        parts.edge_type,
                        parts.ranking,
                        &parts.src,
                    ),
                ));
            }
            ops.push(BatchOp::del(tables.edges, key));
        }

        // Incoming edges found through the reverse index, plus their forward
        // twins.
        let prefix = keys::reverse_edge_prefix(space, PART_ID, Some(vid), None);
        let rows = self.kvt.scan(
            tx,
            tables.edges,
            prefix.as_bytes(),
            &keys::prefix_upper_bound(&prefix),
            self.config.edge_scan_limit,
        )?;
        for (key, _) in rows {
            if let Ok(parts) = keys::decode_reverse_edge_key(&key) {
                ops.push(BatchOp::del(
                    tables.edges,
                    keys::encode_edge_key(
                        parts.space,
                        parts.part,
                        &parts.src,
                        parts.edge_type,
                        parts.ranking,
                        &parts.dst,
                    ),
                ));
            }
            ops.push(BatchOp::del(tables.edges, key));
        }
        Ok(())
    }

    /// Removes individual tag rows from vertices without cascading into the
    /// edge table. Missing rows are benign.
    pub fn delete_tags(&self, ctx: &RequestContext, del_tags: &[DelTags]) -> Result<ExecResponse> {
        let started = Instant::now();
        debug!(space = ctx.space, count = del_tags.len(), "delete_tags");
        let tables = self.ensure_space(ctx.space)?;

        let (deleted, failed) = self.txns.execute_with_retry(self.config.max_retries, |tx| {
            let mut ops = Vec::new();
            for del in del_tags {
                for tag in &del.tags {
                    ops.push(BatchOp::del(
                        tables.vertices,
                        keys::encode_vertex_key(ctx.space, PART_ID, &del.id, *tag),
                    ));
                }
            }
            let results = collect_batch(self.kvt.batch_execute(tx, &ops))?;
            Ok(count_deletions(&results))
        })?;
        Ok(ExecResponse::finish(started, deleted, 0, failed))
    }

    /// Fetches properties for a row set of vertex ids or edge tuples. One
    /// output row is produced per successful fetch, projecting the selector's
    /// property names in order; missing properties project as null.
    pub fn get_props(
        &self,
        ctx: &RequestContext,
        input: &DataSet,
        vertex_props: Option<&[VertexProp]>,
        edge_props: Option<&[EdgeProp]>,
        dedup: bool,
        limit: i64,
    ) -> Result<PropResponse> {
        let started = Instant::now();
        debug!(space = ctx.space, rows = input.rows.len(), "get_props");
        let tables = self.ensure_space(ctx.space)?;

        let fetch_vertices = vertex_props.map_or(false, |p| !p.is_empty());
        let fetch_edges = edge_props.map_or(false, |p| !p.is_empty());

        let mut col_names = Vec::new();
        if let Some(selectors) = vertex_props.filter(|_| fetch_vertices) {
            for selector in selectors {
                col_names.extend(selector.props.iter().cloned());
            }
        }
        if let Some(selectors) = edge_props.filter(|_| fetch_edges) {
            for selector in selectors {
                col_names.extend(selector.props.iter().cloned());
            }
        }

        // Each planned op remembers which property names to project.
        let mut plan: Vec<(&[String], BatchOp)> = Vec::new();
        if fetch_vertices {
            for row in &input.rows {
                let Some(vid) = row.values.first().and_then(Vid::from_value) else {
                    warn!("input row lacks a vertex id; skipping");
                    continue;
                };
                for selector in vertex_props.unwrap_or_default() {
                    let key = keys::encode_vertex_key(ctx.space, PART_ID, &vid, selector.tag);
                    plan.push((selector.props.as_slice(), BatchOp::get(tables.vertices, key)));
                }
            }
        }
        if fetch_edges {
            for row in &input.rows {
                let Some(edge) = edge_key_from_row(row) else {
                    warn!("input row is not an edge tuple; skipping");
                    continue;
                };
                for selector in edge_props.unwrap_or_default() {
                    let key = keys::encode_edge_key(
                        ctx.space,
                        PART_ID,
                        &edge.src,
                        edge.edge_type,
                        edge.ranking,
                        &edge.dst,
                    );
                    plan.push((selector.props.as_slice(), BatchOp::get(tables.edges, key)));
                }
            }
        }

        let ops: Vec<BatchOp> = plan.iter().map(|(_, op)| op.clone()).collect();
        let results = self.txns.execute_with_retry(self.config.max_retries, |tx| {
            collect_batch(self.kvt.batch_execute(tx, &ops))
        })?;

        let mut dataset = DataSet::with_columns(col_names);
        let mut failed = 0usize;
        for ((wanted, _), result) in plan.iter().zip(results) {
            match result {
                Ok(Some(payload)) => {
                    let props = values::decode_props(&payload);
                    dataset.rows.push(project_row(wanted, &props));
                }
                Ok(None) => {}
                Err(KvtError::KeyNotFound { .. }) => {}
                Err(err) => {
                    warn!(error = %err, "property fetch failed");
                    failed += 1;
                }
            }
        }
        dataset.dedup_and_limit(dedup, limit);

        let code = if failed > 0 {
            ResultCode::PartialSucceeded
        } else {
            ResultCode::Succeeded
        };
        Ok(PropResponse {
            result: ResponseResult::finish(code, started),
            props: dataset,
        })
    }

    // Extension points with unimplemented contracts.

    pub fn update_vertex(
        &self,
        _ctx: &RequestContext,
        _id: &Vid,
        _tag: TagId,
        _props: &PropertyMap,
    ) -> Result<ExecResponse> {
        Err(KvtError::Unsupported("update_vertex"))
    }

    pub fn update_edge(
        &self,
        _ctx: &RequestContext,
        _key: &EdgeKey,
        _props: &PropertyMap,
    ) -> Result<ExecResponse> {
        Err(KvtError::Unsupported("update_edge"))
    }

    pub fn lookup_index(
        &self,
        _ctx: &RequestContext,
        _index_id: u32,
        _value: &str,
    ) -> Result<PropResponse> {
        Err(KvtError::Unsupported("lookup_index"))
    }

    pub fn scan_vertex(
        &self,
        _ctx: &RequestContext,
        _props: &[VertexProp],
        _limit: i64,
    ) -> Result<PropResponse> {
        Err(KvtError::Unsupported("scan_vertex"))
    }

    pub fn scan_edge(
        &self,
        _ctx: &RequestContext,
        _props: &[EdgeProp],
        _limit: i64,
    ) -> Result<PropResponse> {
        Err(KvtError::Unsupported("scan_edge"))
    }

    /// Shared `if_not_exists` write path. Per target key:
    /// checking -> present -> skipped, or absent -> writing -> written or
    /// failed. Without the flag every target goes straight to writing. Runs
    /// inside one retried transaction so the check and the write see the same
    /// state.
    fn write_targets(
        &self,
        table: TableId,
        targets: &[WriteTarget],
        if_not_exists: bool,
    ) -> Result<(usize, usize, usize)> {
        self.txns.execute_with_retry(self.config.max_retries, |tx| {
            let mut written = 0usize;
            let mut skipped = 0usize;
            let mut failed = 0usize;

            let mut to_write: Vec<&WriteTarget> = Vec::with_capacity(targets.len());
            if if_not_exists {
                let checks: Vec<BatchOp> = targets
                    .iter()
                    .map(|t| BatchOp::get(table, t.check_key.clone()))
                    .collect();
                let results = collect_batch(self.kvt.batch_execute(tx, &checks))?;
                for (target, result) in targets.iter().zip(&results) {
                    match result {
                        Ok(_) => skipped += 1,
                        Err(KvtError::KeyNotFound { .. }) => to_write.push(target),
                        Err(err) => {
                            warn!(error = %err, "existence check failed");
                            failed += 1;
                        }
                    }
                }
            } else {
                to_write.extend(targets.iter());
            }

            let ops: Vec<BatchOp> = to_write
                .iter()
                .flat_map(|t| {
                    t.writes
                        .iter()
                        .map(|(k, v)| BatchOp::set(table, k.clone(), v.clone()))
                })
                .collect();
            let results = collect_batch(self.kvt.batch_execute(tx, &ops))?;

            let mut cursor = 0usize;
            for target in &to_write {
                let n = target.writes.len();
                let ok = results[cursor..cursor + n].iter().all(OpResult::is_ok);
                cursor += n;
                if ok {
                    written += 1;
                } else {
                    failed += 1;
                }
            }
            Ok((written, skipped, failed))
        })
    }
}

struct WriteTarget {
    check_key: Vec<u8>,
    writes: Vec<(Vec<u8>, Vec<u8>)>,
}

/// Flattens a partial batch into its per-op results; only transport-level
/// failures remain errors.
pub(crate) fn collect_batch(outcome: Result<Vec<OpResult>>) -> Result<Vec<OpResult>> {
    match outcome {
        Ok(results) => Ok(results),
        Err(KvtError::BatchNotFullySuccess { results, .. }) => Ok(results),
        Err(err) => Err(err),
    }
}

/// Counts delete outcomes; a missing key is success in delete context.
fn count_deletions(results: &[OpResult]) -> (usize, usize) {
    let mut deleted = 0usize;
    let mut failed = 0usize;
    for result in results {
        match result {
            Ok(_) | Err(KvtError::KeyNotFound { .. }) => deleted += 1,
            Err(err) => {
                warn!(error = %err, "delete failed");
                failed += 1;
            }
        }
    }
    (deleted, failed)
}

/// First error that is not a benign missing key, taken by value so it can be
/// propagated.
fn first_hard_error(results: Vec<OpResult>) -> Option<KvtError> {
    results.into_iter().find_map(|result| match result {
        Ok(_) | Err(KvtError::KeyNotFound { .. }) => None,
        Err(err) => Some(err),
    })
}

fn edge_key_from_row(row: &Row) -> Option<EdgeKey> {
    if row.values.len() < 4 {
        return None;
    }
    let src = Vid::from_value(&row.values[0])?;
    let edge_type = match row.values[1] {
        crate::model::Value::Int(v) => v as i32,
        _ => return None,
    };
    let ranking = match row.values[2] {
        crate::model::Value::Int(v) => v,
        _ => return None,
    };
    let dst = Vid::from_value(&row.values[3])?;
    Some(EdgeKey {
        src,
        edge_type,
        ranking,
        dst,
    })
}

/// Projects the requested property names, in order, nulls for the missing.
pub(crate) fn project_row(wanted: &[String], props: &PropertyMap) -> Row {
    Row::new(
        wanted
            .iter()
            .map(|name| props.get(name).cloned().unwrap_or(crate::model::Value::Null))
            .collect(),
    )
}
