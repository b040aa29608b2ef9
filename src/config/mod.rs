// ==========================================
// 成绩核算与评审引擎 - 配置层
// ==========================================
// 职责: 核算策略参数管理,支持覆写与快照
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod results_policy;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager};
pub use results_policy::{ConfigResult, MentionThresholds, ResultsPolicy, ResultsPolicyReader};
