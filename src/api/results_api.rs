// ==========================================
// 成绩核算与评审引擎 - 核算结果 API
// ==========================================
// 职责: 从台账一致快照计算学生结果 / 排名 / 统计 / 评审候选
// 红线: 只读, 不修改台账
// 红线: 标记为"正式"的结果只能来自全部 Locked 的台账
// ==========================================

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::api::error::{ApiError, ApiResult, BatchFailure};
use crate::config::ResultsPolicy;
use crate::domain::grade::GradeRecord;
use crate::domain::result::{CohortStatistics, DeliberationCandidate, StudentResult};
use crate::domain::roster::RosterSnapshot;
use crate::engine::results::ResultsCalculator;
use crate::perf::PerfGuard;
use crate::repository::grade_repo::GradeRecordRepository;

// ==========================================
// ResultsApi - 核算结果 API
// ==========================================
pub struct ResultsApi {
    grade_repo: Arc<GradeRecordRepository>,
    calculator: ResultsCalculator,
}

impl ResultsApi {
    /// 创建新的ResultsApi实例
    pub fn new(grade_repo: Arc<GradeRecordRepository>, policy: ResultsPolicy) -> Self {
        Self {
            grade_repo,
            calculator: ResultsCalculator::new(policy),
        }
    }

    pub fn calculator(&self) -> &ResultsCalculator {
        &self.calculator
    }

    fn snapshot(&self, session_id: &str) -> ApiResult<Vec<GradeRecord>> {
        if session_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("考试季ID不能为空".to_string()));
        }
        Ok(self.grade_repo.find_by_session(session_id)?)
    }

    /// 计算考试季全体学生结果 (临时结果, 任意台账状态)
    pub fn compute_session_results(
        &self,
        session_id: &str,
        roster: &RosterSnapshot,
    ) -> ApiResult<Vec<StudentResult>> {
        let _perf = PerfGuard::new("results.compute_session");
        let records = self.snapshot(session_id)?;
        let results = self.calculator.compute_session(session_id, &records, roster);

        debug!(
            session_id = session_id,
            records = records.len(),
            students = results.len(),
            snapshot_version = %roster.snapshot_version,
            "考试季结果计算完成"
        );
        Ok(results)
    }

    /// 以指定策略重新计算 (不影响本实例的默认策略)
    pub fn compute_with_policy(
        &self,
        session_id: &str,
        roster: &RosterSnapshot,
        policy: ResultsPolicy,
    ) -> ApiResult<Vec<StudentResult>> {
        let records = self.snapshot(session_id)?;
        Ok(ResultsCalculator::new(policy).compute_session(session_id, &records, roster))
    }

    /// 单个学生结果 (含整届口径排名)
    pub fn student_result(
        &self,
        session_id: &str,
        student_id: &str,
        roster: &RosterSnapshot,
    ) -> ApiResult<StudentResult> {
        self.compute_session_results(session_id, roster)?
            .into_iter()
            .find(|r| r.student_id == student_id)
            .ok_or_else(|| {
                ApiError::NotFound(format!("考试季 {} 中没有学生 {}", session_id, student_id))
            })
    }

    /// 正式结果: 要求考试季全部记录均已 Locked
    ///
    /// # 错误
    /// - `PreconditionFailed`: 无记录或存在未锁定记录 (列出每条)
    pub fn official_results(
        &self,
        session_id: &str,
        roster: &RosterSnapshot,
    ) -> ApiResult<Vec<StudentResult>> {
        let records = self.snapshot(session_id)?;

        if records.is_empty() {
            return Err(ApiError::precondition(format!(
                "考试季 {} 没有任何成绩记录",
                session_id
            )));
        }

        let unlocked: Vec<BatchFailure> = records
            .iter()
            .filter(|r| !r.is_locked())
            .map(|r| BatchFailure {
                target: r.key.to_string(),
                reason: format!("状态为 {}", r.state),
            })
            .collect();

        if !unlocked.is_empty() {
            return Err(ApiError::PreconditionFailed {
                reason: "正式结果要求全部记录为 LOCKED".to_string(),
                failures: unlocked,
            });
        }

        let results = self.calculator.compute_session(session_id, &records, roster);
        info!(session_id = session_id, students = results.len(), "正式结果已生成");
        Ok(results)
    }

    /// 台账各状态记录数 (DRAFT / VALIDATED / LOCKED), 用于判断能否出正式结果
    pub fn ledger_state_counts(&self, session_id: &str) -> ApiResult<BTreeMap<String, usize>> {
        if session_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("考试季ID不能为空".to_string()));
        }
        Ok(self.grade_repo.count_by_state(session_id)?)
    }

    /// 整届统计
    pub fn cohort_statistics(
        &self,
        session_id: &str,
        roster: &RosterSnapshot,
    ) -> ApiResult<CohortStatistics> {
        let results = self.compute_session_results(session_id, roster)?;
        Ok(self.calculator.cohort_statistics(session_id, &results))
    }

    /// 评审候选 (淘汰或临界)
    pub fn deliberation_candidates(
        &self,
        session_id: &str,
        roster: &RosterSnapshot,
    ) -> ApiResult<Vec<DeliberationCandidate>> {
        let results = self.compute_session_results(session_id, roster)?;
        Ok(self.calculator.deliberation_candidates(&results))
    }
}
