// ==========================================
// 成绩核算与评审引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体、封闭枚举、值对象
// 红线: 不含数据访问逻辑,不含引擎规则
// ==========================================

pub mod action_log;
pub mod deliberation;
pub mod grade;
pub mod result;
pub mod roster;
pub mod types;

// 重导出核心类型
pub use action_log::{ActionLog, ActionType};
pub use deliberation::{
    CaseSnapshot, DeliberationCase, DeliberationMinutes, DeliberationSession, DiscussionPoint,
    MinutesEntry, QuorumPolicy, Vote, VoteEvent, VoteTally,
};
pub use grade::{GradeIssue, GradeIssueCode, GradeKey, GradeRecord};
pub use result::{CohortStatistics, DeliberationCandidate, StudentResult, SubjectAggregate, UeResult};
pub use roster::{RosterSnapshot, SubjectSpec, TeachingUnit};
pub use types::{
    CaseStatus, EvaluationType, FinalVerdict, Mention, Recommendation, RecordState,
    SessionStatus, StudentSituation, VoteDecision,
};
