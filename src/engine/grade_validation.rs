// ==========================================
// 成绩核算与评审引擎 - 成绩校验与台账状态机
// ==========================================
// 职责: 成绩区间/存在性检查, Draft/Validated/Locked 迁移规则
// 红线: 无状态、无 I/O; 校验问题作为数据写入记录,不抛出
// 红线: 每条拒绝都必须输出 reason
// ==========================================

use crate::config::ResultsPolicy;
use crate::domain::grade::{GradeIssue, GradeIssueCode, GradeRecord};
use crate::domain::types::RecordState;
use chrono::NaiveDateTime;

// ==========================================
// ScoreCheck - 单个成绩的检查结果
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreCheck {
    /// 可写入的成绩 (越界/非数值时为 None)
    pub accepted: Option<f64>,
    pub issues: Vec<GradeIssue>,
}

impl ScoreCheck {
    pub fn is_clean(&self) -> bool {
        self.accepted.is_some() && self.issues.is_empty()
    }
}

// ==========================================
// GradeValidationEngine
// ==========================================
#[derive(Debug, Clone, Copy)]
pub struct GradeValidationEngine {
    score_min: f64,
    score_max: f64,
}

impl Default for GradeValidationEngine {
    fn default() -> Self {
        Self::new(&ResultsPolicy::default())
    }
}

impl GradeValidationEngine {
    pub fn new(policy: &ResultsPolicy) -> Self {
        Self {
            score_min: policy.score_min,
            score_max: policy.score_max,
        }
    }

    /// 检查数值成绩
    ///
    /// # 规则
    /// - None → MissingScore
    /// - NaN → NotANumber
    /// - 超出 [score_min, score_max] → OutOfRange, 成绩不写入
    pub fn check_score(&self, score: Option<f64>) -> ScoreCheck {
        match score {
            None => ScoreCheck {
                accepted: None,
                issues: vec![GradeIssue::missing_score()],
            },
            Some(v) if v.is_nan() => ScoreCheck {
                accepted: None,
                issues: vec![GradeIssue::not_a_number("NaN")],
            },
            Some(v) if v < self.score_min || v > self.score_max => ScoreCheck {
                accepted: None,
                issues: vec![GradeIssue::out_of_range(v, self.score_min, self.score_max)],
            },
            Some(v) => ScoreCheck {
                accepted: Some(v),
                issues: Vec::new(),
            },
        }
    }

    /// 检查原始文本成绩 (导入场景)
    ///
    /// 空串/"ABS" 视为缺失; 接受逗号小数 ("12,5")
    pub fn check_raw(&self, raw: &str) -> ScoreCheck {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("abs") {
            return self.check_score(None);
        }

        match trimmed.replace(',', ".").parse::<f64>() {
            Ok(v) => self.check_score(Some(v)),
            Err(_) => ScoreCheck {
                accepted: None,
                issues: vec![GradeIssue::not_a_number(trimmed)],
            },
        }
    }

    /// 将检查结果写入记录
    ///
    /// # 规则
    /// - Locked → 拒绝 (需先解锁)
    /// - Validated → 回到 Draft (成绩变动后须重新校验)
    /// - Draft → 保持 Draft
    pub fn apply_score(
        &self,
        record: &mut GradeRecord,
        check: ScoreCheck,
        actor: &str,
        now: NaiveDateTime,
    ) -> Result<(), String> {
        if record.is_locked() {
            return Err(format!("记录 {} 已锁定, 需先解锁", record.key));
        }

        record.score = check.accepted;
        record.issues = check.issues;
        record.state = RecordState::Draft;
        record.updated_by = Some(actor.to_string());
        record.updated_at = now;
        Ok(())
    }

    // ==========================================
    // 批量迁移检查 (供 compare-and-set 使用)
    // ==========================================

    /// Draft/Validated → Validated 的阻断原因
    pub fn validation_blocker(record: &GradeRecord) -> Option<String> {
        if record.is_locked() {
            return Some("记录已锁定".to_string());
        }
        if record.score.is_none() {
            return Some("成绩缺失".to_string());
        }
        if !record.issues.is_empty() {
            let codes: Vec<&str> = record.issues.iter().map(|i| issue_code_str(i.code)).collect();
            return Some(format!("存在校验问题: {}", codes.join(",")));
        }
        None
    }

    /// Validated → Locked 的阻断原因
    pub fn lock_blocker(record: &GradeRecord) -> Option<String> {
        if record.is_validated() {
            None
        } else {
            Some(format!("状态为 {}, 需为 VALIDATED", record.state))
        }
    }

    /// Locked → Draft 的阻断原因
    pub fn unlock_blocker(record: &GradeRecord) -> Option<String> {
        if record.is_locked() {
            None
        } else {
            Some(format!("状态为 {}, 未锁定", record.state))
        }
    }

    /// 执行迁移 (调用方已通过对应 blocker 检查)
    pub fn transition(record: &mut GradeRecord, to: RecordState, actor: &str, now: NaiveDateTime) {
        record.state = to;
        record.updated_by = Some(actor.to_string());
        record.updated_at = now;
    }
}

fn issue_code_str(code: GradeIssueCode) -> &'static str {
    match code {
        GradeIssueCode::MissingScore => "MISSING_SCORE",
        GradeIssueCode::OutOfRange => "OUT_OF_RANGE",
        GradeIssueCode::NotANumber => "NOT_A_NUMBER",
    }
}
