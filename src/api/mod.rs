// ==========================================
// 成绩核算与评审引擎 - API 层
// ==========================================
// 职责: 提供业务 API 接口, 组合 Repository 与引擎
// ==========================================

pub mod deliberation_api;
pub mod error;
pub mod ledger_api;
pub mod results_api;

// 重导出核心类型
pub use deliberation_api::{CaseLocks, DeliberationApi};
pub use error::{ApiError, ApiResult, BatchFailure};
pub use ledger_api::LedgerApi;
pub use results_api::ResultsApi;
