// ==========================================
// 成绩核算与评审引擎 - 评审委员会状态机
// ==========================================
// 会议: Draft -> Active -> Completed -> Archived (Active 也可直接归档)
// 案例: Pending -> Discussion -> Approved | Rejected
// 红线: 纯规则, 不拼 SQL; 拒绝必须给出原因
// 红线: Archived 会议及其案例拒绝一切变更
// 红线: 达到法定票数也不自动裁定
// ==========================================

use crate::domain::deliberation::{
    CaseSnapshot, DeliberationCase, DeliberationSession, DiscussionPoint, Vote,
};
use crate::domain::result::StudentResult;
use crate::domain::types::{
    CaseStatus, FinalVerdict, Recommendation, SessionStatus, StudentSituation,
};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use thiserror::Error;

/// 状态机拒绝原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliberationRuleError {
    #[error("评审会议已归档: {session_id}")]
    SessionArchived { session_id: String },

    #[error("前置条件不满足: {reason}")]
    Precondition {
        reason: String,
        /// 阻断迁移的案例 (case_id, 原因)
        blocking: Vec<(String, String)>,
    },

    #[error("未达法定票数: 已投 {recorded}, 需要 {required}")]
    QuorumNotMet { recorded: usize, required: usize },

    #[error("输入无效: {0}")]
    InvalidInput(String),
}

impl DeliberationRuleError {
    fn precondition(reason: impl Into<String>) -> Self {
        DeliberationRuleError::Precondition {
            reason: reason.into(),
            blocking: Vec::new(),
        }
    }
}

pub type RuleResult<T> = Result<T, DeliberationRuleError>;

// ==========================================
// DeliberationEngine
// ==========================================
pub struct DeliberationEngine;

impl DeliberationEngine {
    // ==========================================
    // 会议
    // ==========================================

    /// 归档会议拒绝一切变更
    pub fn ensure_not_archived(session: &DeliberationSession) -> RuleResult<()> {
        if session.is_archived() {
            return Err(DeliberationRuleError::SessionArchived {
                session_id: session.session_id.clone(),
            });
        }
        Ok(())
    }

    fn ensure_active(session: &DeliberationSession, action: &str) -> RuleResult<()> {
        Self::ensure_not_archived(session)?;
        if !session.is_active() {
            return Err(DeliberationRuleError::precondition(format!(
                "会议状态为 {}, {}需要 ACTIVE",
                session.status, action
            )));
        }
        Ok(())
    }

    /// 校验新会议参数
    pub fn check_new_session(session: &DeliberationSession) -> RuleResult<()> {
        if session.panel_members.is_empty() {
            return Err(DeliberationRuleError::InvalidInput(
                "评审委员会至少需要一名委员".to_string(),
            ));
        }
        if session.panel_members.iter().any(|m| m.trim().is_empty()) {
            return Err(DeliberationRuleError::InvalidInput("委员标识不能为空".to_string()));
        }
        Ok(())
    }

    /// Draft -> Active
    pub fn activate(session: &DeliberationSession) -> RuleResult<SessionStatus> {
        Self::ensure_not_archived(session)?;
        if session.status != SessionStatus::Draft {
            return Err(DeliberationRuleError::precondition(format!(
                "会议状态为 {}, 只能从 DRAFT 激活",
                session.status
            )));
        }
        Ok(SessionStatus::Active)
    }

    /// Active -> Completed (全部案例已裁定)
    pub fn complete(
        session: &DeliberationSession,
        cases: &[DeliberationCase],
    ) -> RuleResult<SessionStatus> {
        Self::ensure_active(session, "结束会议")?;
        Self::ensure_all_terminal(cases, "仍有未裁定案例, 不能结束会议")?;
        Ok(SessionStatus::Completed)
    }

    /// Active | Completed -> Archived (全部案例已裁定)
    pub fn archive(
        session: &DeliberationSession,
        cases: &[DeliberationCase],
    ) -> RuleResult<SessionStatus> {
        Self::ensure_not_archived(session)?;
        if !matches!(session.status, SessionStatus::Active | SessionStatus::Completed) {
            return Err(DeliberationRuleError::precondition(format!(
                "会议状态为 {}, 不能归档",
                session.status
            )));
        }
        Self::ensure_all_terminal(cases, "仍有未裁定案例, 不能归档")?;
        Ok(SessionStatus::Archived)
    }

    fn ensure_all_terminal(cases: &[DeliberationCase], reason: &str) -> RuleResult<()> {
        let blocking: Vec<(String, String)> = cases
            .iter()
            .filter(|c| !c.status.is_terminal())
            .map(|c| (c.case_id.clone(), format!("案例状态为 {}", c.status)))
            .collect();

        if blocking.is_empty() {
            Ok(())
        } else {
            Err(DeliberationRuleError::Precondition {
                reason: reason.to_string(),
                blocking,
            })
        }
    }

    // ==========================================
    // 案例
    // ==========================================

    /// 从学生结果创建案例 (快照固化, 不再与台账联动)
    pub fn open_case(
        session: &DeliberationSession,
        existing: &[DeliberationCase],
        result: &StudentResult,
        situation: StudentSituation,
        recommendation: Recommendation,
        case_id: String,
        position: i32,
    ) -> RuleResult<DeliberationCase> {
        Self::ensure_active(session, "开案")?;

        if result.session_id != session.exam_session_id {
            return Err(DeliberationRuleError::precondition(format!(
                "学生结果属于考试季 {}, 会议关联考试季 {}",
                result.session_id, session.exam_session_id
            )));
        }

        if let Some(dup) = existing.iter().find(|c| c.student_id == result.student_id) {
            return Err(DeliberationRuleError::Precondition {
                reason: format!("学生 {} 已有案例", result.student_id),
                blocking: vec![(dup.case_id.clone(), "重复开案".to_string())],
            });
        }

        Ok(DeliberationCase {
            case_id,
            session_id: session.session_id.clone(),
            student_id: result.student_id.clone(),
            position,
            snapshot: CaseSnapshot {
                current_average: result.final_average,
                situation,
                recommendation,
                eliminatory_subjects: result.eliminatory_subjects.clone(),
                rank: result.rank,
            },
            votes: BTreeMap::new(),
            status: CaseStatus::Pending,
            final_decision: None,
            decision_date: None,
            discussion_points: Vec::new(),
            revision: 0,
        })
    }

    fn ensure_case_open(case: &DeliberationCase) -> RuleResult<()> {
        if !case.is_open() {
            return Err(DeliberationRuleError::precondition(format!(
                "案例 {} 已裁定为 {}, 不可变更",
                case.case_id, case.status
            )));
        }
        Ok(())
    }

    /// 投票: 同一委员后投覆盖先投; 首票 Pending -> Discussion
    pub fn cast_vote(
        session: &DeliberationSession,
        case: &mut DeliberationCase,
        vote: Vote,
    ) -> RuleResult<()> {
        Self::ensure_active(session, "投票")?;
        Self::ensure_case_open(case)?;

        if !session.is_panel_member(&vote.member) {
            return Err(DeliberationRuleError::precondition(format!(
                "{} 不是本次会议的委员",
                vote.member
            )));
        }

        if case.status == CaseStatus::Pending {
            case.status = CaseStatus::Discussion;
        }
        case.votes.insert(vote.member.clone(), vote);
        Ok(())
    }

    /// 追加讨论要点
    pub fn add_discussion_point(
        session: &DeliberationSession,
        case: &mut DeliberationCase,
        author: &str,
        text: &str,
        now: NaiveDateTime,
    ) -> RuleResult<DiscussionPoint> {
        Self::ensure_active(session, "追加讨论要点")?;
        Self::ensure_case_open(case)?;

        if text.trim().is_empty() {
            return Err(DeliberationRuleError::InvalidInput("讨论要点不能为空".to_string()));
        }

        let point = DiscussionPoint {
            seq_no: case.discussion_points.len() as i32 + 1,
            author: author.to_string(),
            text: text.trim().to_string(),
            created_at: now,
        };
        case.discussion_points.push(point.clone());
        Ok(point)
    }

    /// 裁定: 仅 Discussion 状态, 且已达法定票数
    pub fn finalize(
        session: &DeliberationSession,
        case: &mut DeliberationCase,
        verdict: FinalVerdict,
        decision_date: NaiveDateTime,
        note: Option<&str>,
    ) -> RuleResult<()> {
        Self::ensure_active(session, "裁定")?;

        if case.status != CaseStatus::Discussion {
            return Err(DeliberationRuleError::precondition(format!(
                "案例 {} 状态为 {}, 裁定需要 DISCUSSION",
                case.case_id, case.status
            )));
        }

        let recorded = case.votes.len();
        let required = session.required_votes();
        if recorded < required {
            return Err(DeliberationRuleError::QuorumNotMet { recorded, required });
        }

        let status = verdict.as_case_status();
        case.status = status;
        case.final_decision = Some(match note.map(str::trim).filter(|n| !n.is_empty()) {
            Some(note) => format!("{}: {}", status, note),
            None => status.to_string(),
        });
        case.decision_date = Some(decision_date);
        Ok(())
    }
}
