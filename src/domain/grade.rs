// ==========================================
// 成绩核算与评审引擎 - 成绩记录领域模型
// ==========================================
// 红线: 成绩存在时必须落在 [0, 20]
// 红线: Locked 记录只能经由显式解锁回到 Draft
// 红线: 存在校验问题的记录不得进入 Validated
// ==========================================

use crate::domain::types::{EvaluationType, RecordState};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// GradeKey - 成绩记录标识
// ==========================================
// 复合主键: session + student + subject + evaluation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GradeKey {
    pub session_id: String,         // 考试季ID
    pub student_id: String,         // 学生ID
    pub subject_id: String,         // 科目ID
    pub evaluation: EvaluationType, // 评价类型
}

impl GradeKey {
    pub fn new(
        session_id: impl Into<String>,
        student_id: impl Into<String>,
        subject_id: impl Into<String>,
        evaluation: EvaluationType,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            student_id: student_id.into(),
            subject_id: subject_id.into(),
            evaluation,
        }
    }
}

impl fmt::Display for GradeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.session_id, self.student_id, self.subject_id, self.evaluation
        )
    }
}

// ==========================================
// GradeIssue - 成绩校验问题 (数据,不是异常)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GradeIssueCode {
    MissingScore, // 成绩缺失
    OutOfRange,   // 超出 [0, 20]
    NotANumber,   // 非数值输入
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeIssue {
    pub code: GradeIssueCode,
    pub message: String,
    pub rejected_input: Option<String>, // 被拒绝的原始输入(越界值不会写入 score)
}

impl GradeIssue {
    pub fn missing_score() -> Self {
        Self {
            code: GradeIssueCode::MissingScore,
            message: "成绩缺失".to_string(),
            rejected_input: None,
        }
    }

    pub fn out_of_range(value: f64, min: f64, max: f64) -> Self {
        Self {
            code: GradeIssueCode::OutOfRange,
            message: format!("成绩 {} 超出范围 [{}, {}]", value, min, max),
            rejected_input: Some(value.to_string()),
        }
    }

    pub fn not_a_number(raw: &str) -> Self {
        Self {
            code: GradeIssueCode::NotANumber,
            message: format!("无法解析为成绩: {}", raw),
            rejected_input: Some(raw.to_string()),
        }
    }
}

// ==========================================
// GradeRecord - 成绩记录
// ==========================================
// 对齐: grade_record 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeRecord {
    // ===== 主键 =====
    pub key: GradeKey,

    // ===== 成绩数据 =====
    pub coefficient: f64,          // 评价在科目内的权重 (>0)
    pub score: Option<f64>,        // 原始成绩, None 表示未录入或被拒绝
    pub issues: Vec<GradeIssue>,   // 校验问题集合
    pub is_eliminatory: bool,      // 科目级淘汰标志

    // ===== 状态 =====
    pub state: RecordState,
    pub revision: i32,             // 乐观锁: 修订号
    pub updated_by: Option<String>,
    pub updated_at: NaiveDateTime,
}

impl GradeRecord {
    /// 按排考创建草稿记录 (成绩为空)
    pub fn scheduled(key: GradeKey, coefficient: f64, is_eliminatory: bool, now: NaiveDateTime) -> Self {
        Self {
            key,
            coefficient,
            score: None,
            issues: vec![GradeIssue::missing_score()],
            is_eliminatory,
            state: RecordState::Draft,
            revision: 0,
            updated_by: None,
            updated_at: now,
        }
    }

    pub fn is_draft(&self) -> bool {
        self.state == RecordState::Draft
    }

    pub fn is_validated(&self) -> bool {
        self.state == RecordState::Validated
    }

    pub fn is_locked(&self) -> bool {
        self.state == RecordState::Locked
    }

    /// 是否满足校验条件: 有成绩且无问题
    pub fn is_clean(&self) -> bool {
        self.score.is_some() && self.issues.is_empty()
    }
}
