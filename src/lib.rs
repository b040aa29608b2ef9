// ==========================================
// 成绩核算与评审引擎 - 核心库
// ==========================================
// 组成: 成绩台账 / 结果计算 / 评审委员会
// 技术栈: Rust + SQLite
// 系统定位: 决策支持 (评审委员会保留最终裁定权)
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 导入层 - 成绩单
pub mod importer;

// 配置层 - 核算策略
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// 性能埋点
pub mod perf;

// API 层 - 业务接口
pub mod api;

// 应用层 - 装配
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    CaseStatus, EvaluationType, FinalVerdict, Mention, Recommendation, RecordState,
    SessionStatus, StudentSituation, VoteDecision,
};

// 领域实体
pub use domain::{
    ActionLog, ActionType, DeliberationCase, DeliberationMinutes, DeliberationSession, GradeKey,
    GradeRecord, QuorumPolicy, RosterSnapshot, StudentResult, SubjectSpec,
};

// 引擎
pub use engine::{DeliberationEngine, GradeValidationEngine, MinutesGenerator, ResultsCalculator};

// API
pub use api::{ApiError, ApiResult, DeliberationApi, LedgerApi, ResultsApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "成绩核算与评审引擎";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
