use actix_web::HttpRequest;
use bytes::Bytes;
use std::fmt;
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum HookStage {
    Entrypoint,
    RawAuctionRequest,
}

/// A hook module refused the request
#[derive(Debug, Clone)]
pub struct HookRejection {
    pub stage: HookStage,
    pub reason: String,
}

impl fmt::Display for HookRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request rejected at {} stage: {}", self.stage, self.reason)
    }
}

impl std::error::Error for HookRejection {}

/// Executes the hook stages that run while a request is parsed.
/// Each stage may return a rewritten body or reject the request
pub trait HookStageExecutor: Send + Sync {
    fn execute_entrypoint_stage(
        &self,
        req: &HttpRequest,
        body: Bytes,
    ) -> Result<Bytes, HookRejection>;

    fn execute_raw_auction_stage(&self, body: Bytes) -> Result<Bytes, HookRejection>;
}

pub struct NoopHookExecutor;

impl HookStageExecutor for NoopHookExecutor {
    fn execute_entrypoint_stage(&self, _: &HttpRequest, body: Bytes) -> Result<Bytes, HookRejection> {
        Ok(body)
    }

    fn execute_raw_auction_stage(&self, body: Bytes) -> Result<Bytes, HookRejection> {
        Ok(body)
    }
}
