mod config;
mod neighbors;
mod response;
mod store;
mod transaction;

#[cfg(test)]
mod tests;

pub use config::Config;
pub use response::{
    ExecResponse, NeighborsResponse, PropResponse, RequestContext, ResponseResult, ResultCode,
};
pub use store::GraphStore;
pub use transaction::{Transaction, TxState, TxnManager, TxnStatsSnapshot};
