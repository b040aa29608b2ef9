// ==========================================
// 成绩核算与评审引擎 - 操作日志数据仓储
// ==========================================
// 对齐: action_log 表
// 红线: 所有状态迁移必须记录
// ==========================================

mod core;
mod queries;


pub use core::ActionLogRepository;
pub(crate) use core::insert_action_log;
