// ==========================================
// 成绩核算与评审引擎 - 引擎层
// ==========================================
// 职责: 实现业务规则引擎,不拼 SQL
// 红线: Engine 不拼 SQL, 所有拒绝必须输出 reason
// ==========================================

pub mod deliberation;
pub mod events;
pub mod grade_validation;
pub mod minutes;
pub mod results;

// 重导出核心引擎
pub use deliberation::{DeliberationEngine, DeliberationRuleError};
pub use events::{
    LedgerEvent, LedgerEventPublisher, LedgerEventType, NoOpEventPublisher,
    OptionalEventPublisher,
};
pub use grade_validation::{GradeValidationEngine, ScoreCheck};
pub use minutes::MinutesGenerator;
pub use results::ResultsCalculator;
