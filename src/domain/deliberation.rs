// ==========================================
// 成绩核算与评审引擎 - 评审委员会领域模型
// ==========================================
// 红线: Archived 会议及其案例不可变
// 红线: 案例快照在开案时固化,不与成绩台账实时联动
// 红线: 投票为只追加事件日志, votes 为"每位委员最新一票"投影
// ==========================================

use crate::domain::types::{
    CaseStatus, Recommendation, SessionStatus, StudentSituation, VoteDecision,
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ==========================================
// QuorumPolicy - 法定票数策略
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuorumPolicy {
    All,           // 全体委员
    Fraction(f64), // 委员人数比例 (向上取整)
    Count(u32),    // 固定票数
}

impl Default for QuorumPolicy {
    fn default() -> Self {
        QuorumPolicy::All
    }
}

impl QuorumPolicy {
    /// 计算所需票数 (至少 1 票, 至多全体委员)
    pub fn required_votes(&self, panel_size: usize) -> usize {
        let required = match self {
            QuorumPolicy::All => panel_size,
            QuorumPolicy::Fraction(f) => {
                let f = f.clamp(0.0, 1.0);
                (f * panel_size as f64 - 1e-9).ceil().max(0.0) as usize
            }
            QuorumPolicy::Count(n) => *n as usize,
        };
        required.clamp(1, panel_size.max(1))
    }

    /// 从配置字符串解析: ALL / FRACTION:0.75 / COUNT:3
    pub fn from_str(s: &str) -> Option<Self> {
        let s = s.trim().to_uppercase();
        if s == "ALL" {
            return Some(QuorumPolicy::All);
        }
        if let Some(raw) = s.strip_prefix("FRACTION:") {
            return raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| *f > 0.0 && *f <= 1.0)
                .map(QuorumPolicy::Fraction);
        }
        if let Some(raw) = s.strip_prefix("COUNT:") {
            return raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .map(QuorumPolicy::Count);
        }
        None
    }

    pub fn to_db_string(&self) -> String {
        match self {
            QuorumPolicy::All => "ALL".to_string(),
            QuorumPolicy::Fraction(f) => format!("FRACTION:{}", f),
            QuorumPolicy::Count(n) => format!("COUNT:{}", n),
        }
    }
}

impl fmt::Display for QuorumPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

// ==========================================
// DeliberationSession - 评审会议
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliberationSession {
    pub session_id: String,
    pub exam_session_id: String,      // 关联的考试季 (成绩台账 session_id)
    pub promotion: String,            // 年级
    pub session_date: NaiveDate,
    pub panel_members: BTreeSet<String>,
    pub quorum_policy: QuorumPolicy,
    pub status: SessionStatus,
    pub config_snapshot_json: Option<String>,
    pub created_by: String,
    pub created_at: NaiveDateTime,
    pub revision: i32,
}

impl DeliberationSession {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn is_archived(&self) -> bool {
        self.status == SessionStatus::Archived
    }

    pub fn is_panel_member(&self, member: &str) -> bool {
        self.panel_members.contains(member)
    }

    pub fn required_votes(&self) -> usize {
        self.quorum_policy.required_votes(self.panel_members.len())
    }
}

// ==========================================
// CaseSnapshot - 开案时固化的结果快照
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseSnapshot {
    pub current_average: Option<f64>,
    pub situation: StudentSituation,
    pub recommendation: Recommendation,
    pub eliminatory_subjects: Vec<String>,
    pub rank: Option<u32>,
}

// ==========================================
// Vote / VoteEvent - 投票
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub member: String,
    pub decision: VoteDecision,
    pub comment: Option<String>,
    pub cast_at: NaiveDateTime,
}

/// 投票事件 (只追加)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteEvent {
    pub event_id: String,
    pub case_id: String,
    pub seq_no: i64,
    pub vote: Vote,
}

// ==========================================
// DiscussionPoint - 讨论要点
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscussionPoint {
    pub seq_no: i32,
    pub author: String,
    pub text: String,
    pub created_at: NaiveDateTime,
}

// ==========================================
// DeliberationCase - 评审案例
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliberationCase {
    pub case_id: String,
    pub session_id: String,
    pub student_id: String,
    pub position: i32,                       // 会议内顺序
    pub snapshot: CaseSnapshot,
    pub votes: BTreeMap<String, Vote>,       // 每位委员最新一票
    pub status: CaseStatus,
    pub final_decision: Option<String>,
    pub decision_date: Option<NaiveDateTime>,
    pub discussion_points: Vec<DiscussionPoint>,
    pub revision: i32,
}

impl DeliberationCase {
    pub fn is_open(&self) -> bool {
        matches!(self.status, CaseStatus::Pending | CaseStatus::Discussion)
    }

    pub fn tally(&self) -> VoteTally {
        VoteTally::from_votes(self.votes.values())
    }
}

// ==========================================
// VoteTally - 计票
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub approve: usize,
    pub reject: usize,
    pub abstain: usize,
}

impl VoteTally {
    pub fn from_votes<'a>(votes: impl IntoIterator<Item = &'a Vote>) -> Self {
        let mut tally = VoteTally::default();
        for vote in votes {
            match vote.decision {
                VoteDecision::Approve => tally.approve += 1,
                VoteDecision::Reject => tally.reject += 1,
                VoteDecision::Abstain => tally.abstain += 1,
            }
        }
        tally
    }

    pub fn total(&self) -> usize {
        self.approve + self.reject + self.abstain
    }
}

// ==========================================
// DeliberationMinutes - 评审纪要 (PV)
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliberationMinutes {
    pub session_id: String,
    pub promotion: String,
    pub session_date: NaiveDate,
    pub status: SessionStatus,
    pub attendees: Vec<String>,
    pub quorum_policy: QuorumPolicy,
    pub entries: Vec<MinutesEntry>,
    pub generated_at: NaiveDateTime,
    pub is_official: bool, // 仅 Completed / Archived 为正式纪要
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinutesEntry {
    pub case_id: String,
    pub student_id: String,
    pub snapshot: CaseSnapshot,
    pub status: CaseStatus,
    pub final_decision: Option<String>,
    pub decision_date: Option<NaiveDateTime>,
    pub tally: VoteTally,
    pub discussion_points: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quorum_required_votes() {
        assert_eq!(QuorumPolicy::All.required_votes(4), 4);
        assert_eq!(QuorumPolicy::Fraction(0.5).required_votes(4), 2);
        assert_eq!(QuorumPolicy::Fraction(0.6).required_votes(4), 3);
        assert_eq!(QuorumPolicy::Fraction(0.75).required_votes(4), 3);
        assert_eq!(QuorumPolicy::Count(10).required_votes(4), 4);
        assert_eq!(QuorumPolicy::Count(2).required_votes(4), 2);
        // 空委员会也至少需要 1 票
        assert_eq!(QuorumPolicy::All.required_votes(0), 1);
    }

    #[test]
    fn test_quorum_policy_parsing() {
        assert_eq!(QuorumPolicy::from_str("all"), Some(QuorumPolicy::All));
        assert_eq!(
            QuorumPolicy::from_str("FRACTION:0.75"),
            Some(QuorumPolicy::Fraction(0.75))
        );
        assert_eq!(QuorumPolicy::from_str("count: 3"), Some(QuorumPolicy::Count(3)));
        assert_eq!(QuorumPolicy::from_str("FRACTION:1.5"), None);
        assert_eq!(QuorumPolicy::from_str("COUNT:0"), None);
        assert_eq!(QuorumPolicy::from_str("majority"), None);
    }
}
