use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::model::{DataSet, SpaceId};

/// Common request envelope carried by every graph operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub space: SpaceId,
    pub session: i64,
    pub plan: i64,
    pub profile: bool,
}

impl RequestContext {
    pub fn new(space: SpaceId) -> Self {
        Self {
            space,
            session: 0,
            plan: 0,
            profile: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultCode {
    Succeeded,
    PartialSucceeded,
    Error,
}

/// Common response header: outcome plus wall-clock latency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseResult {
    pub code: ResultCode,
    pub latency_in_us: u64,
}

impl ResponseResult {
    pub(crate) fn finish(code: ResultCode, started: Instant) -> Self {
        Self {
            code,
            latency_in_us: started.elapsed().as_micros() as u64,
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.code == ResultCode::Succeeded
    }
}

/// Response for mutating operations, with per-entry outcome counts. Writes
/// skipped by `if_not_exists` count separately from written ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResponse {
    pub result: ResponseResult,
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ExecResponse {
    pub(crate) fn finish(started: Instant, written: usize, skipped: usize, failed: usize) -> Self {
        let code = if failed > 0 {
            ResultCode::PartialSucceeded
        } else {
            ResultCode::Succeeded
        };
        Self {
            result: ResponseResult::finish(code, started),
            written,
            skipped,
            failed,
        }
    }
}

/// Response for property fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropResponse {
    pub result: ResponseResult,
    pub props: DataSet,
}

/// Response for neighbor queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborsResponse {
    pub result: ResponseResult,
    pub vertices: DataSet,
}
