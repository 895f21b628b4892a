pub mod codec;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;

pub use crate::db::{
    Config, ExecResponse, GraphStore, NeighborsResponse, PropResponse, RequestContext,
    ResponseResult, ResultCode, Transaction, TxState, TxnManager, TxnStatsSnapshot,
};
pub use crate::engine::{BatchOp, CcMode, Kvt, Op, Partition, TableId, TxId, ONE_SHOT};
pub use crate::error::{KvtError, OpResult, Result};
pub use crate::model::{
    DataSet, DelTags, EdgeDirection, EdgeKey, EdgeProp, NewEdge, NewTag, NewVertex, PropertyMap,
    Row, SpaceId, TagId, Value, VertexProp, Vid,
};
