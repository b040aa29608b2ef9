// ==========================================
// 成绩核算与评审引擎 - 应用层
// ==========================================
// 职责: 装配 Repository / 引擎 / API, 供宿主程序持有
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};
