// ==========================================
// 成绩核算与评审引擎 - 领域类型定义
// ==========================================
// 红线: 所有状态均为封闭枚举,禁止以字符串比较驱动状态机
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 成绩记录状态 (Record State)
// ==========================================
// 状态机: Draft -> Validated -> Locked, Locked -> Draft (显式解锁)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordState {
    Draft,     // 草稿(可编辑)
    Validated, // 已校验
    Locked,    // 已锁定(只读)
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl RecordState {
    /// 从字符串解析
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "DRAFT" => Some(RecordState::Draft),
            "VALIDATED" => Some(RecordState::Validated),
            "LOCKED" => Some(RecordState::Locked),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            RecordState::Draft => "DRAFT",
            RecordState::Validated => "VALIDATED",
            RecordState::Locked => "LOCKED",
        }
    }
}

// ==========================================
// 评价类型 (Evaluation Type)
// ==========================================
// 平时成绩可有多次 (CC1/CC2...), 用序号区分
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationType {
    ContinuousAssessment(u8), // 平时测验 CCn
    Practical,                // 实践/TP
    FinalExam,                // 期末考试
    Resit,                    // 补考
}

impl fmt::Display for EvaluationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

impl EvaluationType {
    /// 从字符串解析 (兼容 "CC1" / "cc 2" / "EXAM" 等导入写法)
    pub fn from_str(s: &str) -> Option<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_uppercase();

        match normalized.as_str() {
            "TP" | "PRACTICAL" => return Some(EvaluationType::Practical),
            "EXAM" | "FINAL_EXAM" | "FINALEXAM" => return Some(EvaluationType::FinalExam),
            "RESIT" | "RATTRAPAGE" => return Some(EvaluationType::Resit),
            _ => {}
        }

        normalized
            .strip_prefix("CC")
            .and_then(|n| n.parse::<u8>().ok())
            .filter(|n| *n > 0)
            .map(EvaluationType::ContinuousAssessment)
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_string(&self) -> String {
        match self {
            EvaluationType::ContinuousAssessment(n) => format!("CC{}", n),
            EvaluationType::Practical => "TP".to_string(),
            EvaluationType::FinalExam => "EXAM".to_string(),
            EvaluationType::Resit => "RESIT".to_string(),
        }
    }
}

// ==========================================
// 评语等级 (Mention)
// ==========================================
// 顺序: Ajourne < Passable < AssezBien < Bien < TresBien
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mention {
    Ajourne,   // 不及格 (<10)
    Passable,  // 及格
    AssezBien, // 中等
    Bien,      // 良好
    TresBien,  // 优秀
}

impl fmt::Display for Mention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mention::Ajourne => write!(f, "Ajourné"),
            Mention::Passable => write!(f, "Passable"),
            Mention::AssezBien => write!(f, "Assez Bien"),
            Mention::Bien => write!(f, "Bien"),
            Mention::TresBien => write!(f, "Très Bien"),
        }
    }
}

// ==========================================
// 评审会议状态 (Deliberation Session Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Draft,     // 筹备
    Active,    // 进行中
    Completed, // 已结束
    Archived,  // 已归档(不可变)
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl SessionStatus {
    /// 从字符串解析
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "DRAFT" => Some(SessionStatus::Draft),
            "ACTIVE" => Some(SessionStatus::Active),
            "COMPLETED" => Some(SessionStatus::Completed),
            "ARCHIVED" => Some(SessionStatus::Archived),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            SessionStatus::Draft => "DRAFT",
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Archived => "ARCHIVED",
        }
    }
}

// ==========================================
// 评审案例状态 (Deliberation Case Status)
// ==========================================
// 状态机: Pending -> Discussion -> Approved | Rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    Pending,    // 待审
    Discussion, // 讨论中(已有投票)
    Approved,   // 通过
    Rejected,   // 不通过
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl CaseStatus {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaseStatus::Approved | CaseStatus::Rejected)
    }

    /// 从字符串解析
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(CaseStatus::Pending),
            "DISCUSSION" => Some(CaseStatus::Discussion),
            "APPROVED" => Some(CaseStatus::Approved),
            "REJECTED" => Some(CaseStatus::Rejected),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            CaseStatus::Pending => "PENDING",
            CaseStatus::Discussion => "DISCUSSION",
            CaseStatus::Approved => "APPROVED",
            CaseStatus::Rejected => "REJECTED",
        }
    }
}

// ==========================================
// 投票意见 (Vote Decision)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteDecision {
    Approve, // 赞成
    Reject,  // 反对
    Abstain, // 弃权
}

impl fmt::Display for VoteDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl VoteDecision {
    /// 从字符串解析
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "APPROVE" => Some(VoteDecision::Approve),
            "REJECT" => Some(VoteDecision::Reject),
            "ABSTAIN" => Some(VoteDecision::Abstain),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            VoteDecision::Approve => "APPROVE",
            VoteDecision::Reject => "REJECT",
            VoteDecision::Abstain => "ABSTAIN",
        }
    }
}

// ==========================================
// 最终裁定 (Final Verdict)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalVerdict {
    Approved,
    Rejected,
}

impl FinalVerdict {
    /// 对应的案例终态
    pub fn as_case_status(&self) -> CaseStatus {
        match self {
            FinalVerdict::Approved => CaseStatus::Approved,
            FinalVerdict::Rejected => CaseStatus::Rejected,
        }
    }
}

// ==========================================
// 学生处境 (Student Situation)
// ==========================================
// 取代旧系统中 "validé"/"risque"/"rattrapage" 之类的状态字符串
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StudentSituation {
    Validated,  // 直接通过
    AtRisk,     // 临界(低于及格线但在评审窗口内)
    Resit,      // 需补考
    Eliminated, // 淘汰科目触发
    Incomplete, // 无任何有效成绩
}

impl fmt::Display for StudentSituation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl StudentSituation {
    /// 从字符串解析
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "VALIDATED" => Some(StudentSituation::Validated),
            "AT_RISK" => Some(StudentSituation::AtRisk),
            "RESIT" => Some(StudentSituation::Resit),
            "ELIMINATED" => Some(StudentSituation::Eliminated),
            "INCOMPLETE" => Some(StudentSituation::Incomplete),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            StudentSituation::Validated => "VALIDATED",
            StudentSituation::AtRisk => "AT_RISK",
            StudentSituation::Resit => "RESIT",
            StudentSituation::Eliminated => "ELIMINATED",
            StudentSituation::Incomplete => "INCOMPLETE",
        }
    }
}

// ==========================================
// 评审建议 (Recommendation)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Admit,       // 建议通过
    PanelReview, // 交委员会裁量
    Resit,       // 建议补考
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl Recommendation {
    /// 从字符串解析
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ADMIT" => Some(Recommendation::Admit),
            "PANEL_REVIEW" => Some(Recommendation::PanelReview),
            "RESIT" => Some(Recommendation::Resit),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            Recommendation::Admit => "ADMIT",
            Recommendation::PanelReview => "PANEL_REVIEW",
            Recommendation::Resit => "RESIT",
        }
    }
}
