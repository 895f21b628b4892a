//! Neighbor queries over the forward and reverse edge prefixes.
//!
//! Results come out in (source-input-order, scan-output-order): sources are
//! walked as given, and each prefix scan yields table-key order. Dedup
//! compares whole rows after properties are attached, and the limit applies
//! after dedup. The whole query runs inside one transaction so edge rows and
//! joined vertex properties come from a single consistent snapshot.

use std::time::Instant;

use tracing::debug;

use crate::codec::{keys, values};
use crate::db::response::{NeighborsResponse, RequestContext, ResponseResult, ResultCode};
use crate::db::store::{project_row, GraphStore, SpaceTables, PART_ID};
use crate::engine::{BatchOp, TxId};
use crate::error::Result;
use crate::model::{DataSet, EdgeDirection, EdgeProp, EdgeTypeId, Row, Value, VertexProp, Vid};

impl GraphStore {
    /// For each source vertex and requested edge type, scans OUT edges via
    /// the forward prefix and IN edges via the reverse prefix, joins
    /// destination vertex properties when asked, and assembles rows of
    /// `(src, edge_type, ranking, dst, edge props.., vertex props..)`.
    ///
    /// An empty `edge_types` set yields no edges; callers expand wildcards
    /// before getting here.
    #[allow(clippy::too_many_arguments)]
    pub fn get_neighbors(
        &self,
        ctx: &RequestContext,
        col_names: Vec<String>,
        vids: &[Vid],
        edge_types: &[EdgeTypeId],
        direction: EdgeDirection,
        vertex_props: Option<&[VertexProp]>,
        edge_props: Option<&[EdgeProp]>,
        dedup: bool,
        limit: i64,
    ) -> Result<NeighborsResponse> {
        let started = Instant::now();
        debug!(
            space = ctx.space,
            sources = vids.len(),
            ?direction,
            "get_neighbors"
        );
        let tables = self.ensure_space(ctx.space)?;
        let scan_cap = if limit > 0 {
            limit as usize
        } else {
            self.config.edge_scan_limit
        };

        let rows = self.txns.execute_with_retry(self.config.max_retries, |tx| {
            let mut rows = Vec::new();
            for vid in vids {
                let edges =
                    self.scan_adjacent_edges(ctx, tx, tables, vid, edge_types, direction, scan_cap)?;
                for (edge_key, payload) in edges {
                    let Ok(parts) = keys::decode_edge_key(&edge_key) else {
                        continue;
                    };
                    let mut row = vec![
                        parts.src.to_value(),
                        Value::Int(parts.edge_type as i64),
                        Value::Int(parts.ranking),
                        parts.dst.to_value(),
                    ];
                    if let Some(selectors) = edge_props.filter(|p| !p.is_empty()) {
                        let props = values::decode_props(&payload);
                        for selector in selectors {
                            row.extend(project_row(&selector.props, &props).values);
                        }
                    }
                    if let Some(selectors) = vertex_props.filter(|p| !p.is_empty()) {
                        self.join_vertex_props(ctx, tx, tables, &parts.dst, selectors, &mut row)?;
                    }
                    rows.push(Row::new(row));
                }
            }
            Ok(rows)
        })?;

        let mut dataset = DataSet::with_columns(col_names);
        dataset.rows = rows;
        dataset.dedup_and_limit(dedup, limit);

        Ok(NeighborsResponse {
            result: ResponseResult::finish(ResultCode::Succeeded, started),
            vertices: dataset,
        })
    }

    /// Collects the adjacent edges of `vid`, normalized to forward keys. IN
    /// edges come from the reverse index and are rebuilt into forward
    /// orientation so downstream decoding is uniform.
    #[allow(clippy::too_many_arguments)]
    fn scan_adjacent_edges(
        &self,
        ctx: &RequestContext,
        tx: TxId,
        tables: SpaceTables,
        vid: &Vid,
        edge_types: &[EdgeTypeId],
        direction: EdgeDirection,
        scan_cap: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut edges = Vec::new();
        for edge_type in edge_types {
            if matches!(direction, EdgeDirection::Out | EdgeDirection::Both) {
                let prefix = keys::edge_prefix(ctx.space, PART_ID, Some(vid), Some(*edge_type));
                let found = self.kvt.scan(
                    tx,
                    tables.edges,
                    prefix.as_bytes(),
                    &keys::prefix_upper_bound(&prefix),
                    scan_cap,
                )?;
                edges.extend(found);
            }
            if matches!(direction, EdgeDirection::In | EdgeDirection::Both) {
                let prefix =
                    keys::reverse_edge_prefix(ctx.space, PART_ID, Some(vid), Some(*edge_type));
                let found = self.kvt.scan(
                    tx,
                    tables.edges,
                    prefix.as_bytes(),
                    &keys::prefix_upper_bound(&prefix),
                    scan_cap,
                )?;
                for (reverse_key, payload) in found {
                    let Ok(parts) = keys::decode_reverse_edge_key(&reverse_key) else {
                        continue;
                    };
                    let forward = keys::encode_edge_key(
                        parts.space,
                        parts.part,
                        &parts.src,
                        parts.edge_type,
                        parts.ranking,
                        &parts.dst,
                    );
                    edges.push((forward.into_bytes(), payload));
                }
            }
        }
        Ok(edges)
    }

    /// Fetches the requested tag rows of `dst` in one batch and appends the
    /// projected properties to the row, nulls where a tag row or property is
    /// absent.
    fn join_vertex_props(
        &self,
        ctx: &RequestContext,
        tx: TxId,
        tables: SpaceTables,
        dst: &Vid,
        selectors: &[VertexProp],
        row: &mut Vec<Value>,
    ) -> Result<()> {
        let ops: Vec<BatchOp> = selectors
            .iter()
            .map(|selector| {
                BatchOp::get(
                    tables.vertices,
                    keys::encode_vertex_key(ctx.space, PART_ID, dst, selector.tag),
                )
            })
            .collect();
        let results = crate::db::store::collect_batch(self.kvt.batch_execute(tx, &ops))?;
        for (selector, result) in selectors.iter().zip(results) {
            let props = match result {
                Ok(Some(payload)) => values::decode_props(&payload),
                _ => Default::default(),
            };
            row.extend(project_row(&selector.props, &props).values);
        }
        Ok(())
    }
}
