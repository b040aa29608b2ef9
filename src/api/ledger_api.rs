// ==========================================
// 成绩核算与评审引擎 - 成绩台账 API
// ==========================================
// 职责: 排考 / 录分 / 批量校验 / 锁定 / 解锁
// 红线: 每次状态迁移写 ActionLog (与迁移同事务), 并发布事件
// 红线: 批量迁移全有或全无, 失败时列出每条失败记录
// ==========================================

use std::sync::Arc;

use tracing::{info, warn};

use crate::api::error::{ApiError, ApiResult, BatchFailure};
use crate::config::ResultsPolicy;
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::grade::{GradeKey, GradeRecord};
use crate::domain::roster::SubjectSpec;
use crate::domain::types::{EvaluationType, RecordState};
use crate::engine::events::{LedgerEvent, LedgerEventType, OptionalEventPublisher};
use crate::engine::grade_validation::{GradeValidationEngine, ScoreCheck};
use crate::perf::PerfGuard;
use crate::repository::action_log_repo::ActionLogRepository;
use crate::repository::deliberation_repo::DeliberationRepository;
use crate::repository::error::RepositoryError;
use crate::repository::grade_repo::{BatchCasOutcome, GradeRecordRepository};

/// 未指定期望修订号时, 遇到并发冲突的最大重试次数
const RECORD_SCORE_MAX_ATTEMPTS: usize = 3;

// ==========================================
// LedgerApi - 成绩台账 API
// ==========================================
pub struct LedgerApi {
    grade_repo: Arc<GradeRecordRepository>,
    deliberation_repo: Arc<DeliberationRepository>,
    action_log_repo: Arc<ActionLogRepository>,
    validation: GradeValidationEngine,
    events: OptionalEventPublisher,
}

impl LedgerApi {
    /// 创建新的LedgerApi实例
    pub fn new(
        grade_repo: Arc<GradeRecordRepository>,
        deliberation_repo: Arc<DeliberationRepository>,
        action_log_repo: Arc<ActionLogRepository>,
        policy: &ResultsPolicy,
        events: OptionalEventPublisher,
    ) -> Self {
        Self {
            grade_repo,
            deliberation_repo,
            action_log_repo,
            validation: GradeValidationEngine::new(policy),
            events,
        }
    }

    // ==========================================
    // 排考
    // ==========================================

    /// 为学生排定一次评价, 创建空成绩的 Draft 记录
    ///
    /// # 参数
    /// - `subject`: 名册中的科目 (提供科目级淘汰标志)
    /// - `coefficient`: 该评价在科目内的权重 (>0)
    pub fn schedule_evaluation(
        &self,
        session_id: &str,
        student_id: &str,
        subject: &SubjectSpec,
        evaluation: EvaluationType,
        coefficient: f64,
        actor: &str,
    ) -> ApiResult<GradeRecord> {
        if session_id.trim().is_empty() || student_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("考试季与学生ID不能为空".to_string()));
        }
        if !(coefficient.is_finite() && coefficient > 0.0) {
            return Err(ApiError::InvalidInput(format!(
                "评价系数必须为正数: {}",
                coefficient
            )));
        }
        self.ensure_not_archived(session_id)?;

        let key = GradeKey::new(session_id, student_id, &subject.subject_id, evaluation);
        let record = GradeRecord::scheduled(
            key.clone(),
            coefficient,
            subject.is_eliminatory,
            chrono::Utc::now().naive_utc(),
        );

        let audit = ActionLog::new(Some(session_id.to_string()), ActionType::ScheduleEvaluation, actor)
            .with_payload(&serde_json::json!({
                "key": key.to_string(),
                "coefficient": coefficient,
                "is_eliminatory": subject.is_eliminatory,
            }));

        self.grade_repo
            .insert(&record, Some(&audit))
            .map_err(|e| match e {
                RepositoryError::UniqueConstraintViolation(_) => {
                    ApiError::precondition(format!("评价已排定: {}", key))
                }
                other => other.into(),
            })?;

        info!(key = %key, actor = actor, "排考完成");
        self.events.publish(LedgerEvent::new(
            session_id,
            LedgerEventType::EvaluationScheduled,
            actor,
            vec![key.to_string()],
        ));

        Ok(record)
    }

    // ==========================================
    // 录分
    // ==========================================

    /// 录入成绩
    ///
    /// 越界/缺失不报错: 问题写入记录的 issues, 记录保持 Draft
    ///
    /// # 参数
    /// - `expected_revision`: 调用方读到的修订号; 为 None 时按"最后写入为准"并在冲突时重试
    ///
    /// # 错误
    /// - `SessionArchived`: 考试季已有归档的评审会议
    /// - `PreconditionFailed`: 记录已锁定
    /// - `Conflict`: expected_revision 已过期
    /// - `NotFound`: 记录未排考
    pub fn record_score(
        &self,
        key: &GradeKey,
        score: Option<f64>,
        actor: &str,
        expected_revision: Option<i32>,
    ) -> ApiResult<GradeRecord> {
        let check = self.validation.check_score(score);
        self.apply_check(key, check, actor, expected_revision)
    }

    /// 录入原始文本成绩 (导入场景, "12,5" / "ABS" / 非数值)
    pub fn record_raw_score(
        &self,
        key: &GradeKey,
        raw: &str,
        actor: &str,
        expected_revision: Option<i32>,
    ) -> ApiResult<GradeRecord> {
        let check = self.validation.check_raw(raw);
        self.apply_check(key, check, actor, expected_revision)
    }

    fn apply_check(
        &self,
        key: &GradeKey,
        check: ScoreCheck,
        actor: &str,
        expected_revision: Option<i32>,
    ) -> ApiResult<GradeRecord> {
        self.ensure_not_archived(&key.session_id)?;

        let mut attempt = 0;
        loop {
            attempt += 1;

            let mut record = self
                .grade_repo
                .find_by_key(key)?
                .ok_or_else(|| ApiError::NotFound(format!("成绩记录 {} 未排考", key)))?;

            if let Some(expected) = expected_revision {
                if expected != record.revision {
                    return Err(ApiError::Conflict {
                        entity: "GradeRecord".to_string(),
                        id: key.to_string(),
                        expected,
                        actual: record.revision,
                    });
                }
            }

            let previous_state = record.state;
            self.validation
                .apply_score(&mut record, check.clone(), actor, chrono::Utc::now().naive_utc())
                .map_err(ApiError::precondition)?;

            let audit = ActionLog::new(Some(key.session_id.clone()), ActionType::RecordScore, actor)
                .with_payload(&serde_json::json!({
                    "key": key.to_string(),
                    "score": record.score,
                    "issues": record.issues,
                    "previous_state": previous_state.to_db_str(),
                }));

            match self.grade_repo.update(&record, Some(&audit)) {
                Ok(new_revision) => {
                    record.revision = new_revision;
                    if record.issues.is_empty() {
                        info!(key = %key, score = ?record.score, "成绩已录入");
                    } else {
                        warn!(key = %key, issues = record.issues.len(), "成绩录入存在校验问题");
                    }
                    self.events.publish(LedgerEvent::new(
                        key.session_id.as_str(),
                        LedgerEventType::ScoreRecorded,
                        actor,
                        vec![key.to_string()],
                    ));
                    return Ok(record);
                }
                Err(RepositoryError::OptimisticLockFailure { .. })
                    if expected_revision.is_none() && attempt < RECORD_SCORE_MAX_ATTEMPTS =>
                {
                    warn!(key = %key, attempt, "录分并发冲突, 重试");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    // ==========================================
    // 批量迁移
    // ==========================================

    /// 批量校验: 全部有成绩且无问题才整体迁移为 Validated
    ///
    /// 失败时不修改任何记录, 返回 `ValidationFailed` 列出每条失败记录
    pub fn validate_all(&self, keys: &[GradeKey], actor: &str) -> ApiResult<Vec<GradeRecord>> {
        let _perf = PerfGuard::new("ledger.validate_all").records(keys.len());
        self.run_batch(
            keys,
            actor,
            ActionType::ValidateBatch,
            LedgerEventType::RecordsValidated,
            None,
            GradeValidationEngine::validation_blocker,
            RecordState::Validated,
            |failures| ApiError::ValidationFailed {
                reason: "存在缺失成绩或校验问题".to_string(),
                failures,
            },
        )
    }

    /// 批量锁定: 全部为 Validated 才整体迁移为 Locked
    pub fn lock(&self, keys: &[GradeKey], actor: &str) -> ApiResult<Vec<GradeRecord>> {
        let _perf = PerfGuard::new("ledger.lock").records(keys.len());
        self.run_batch(
            keys,
            actor,
            ActionType::LockBatch,
            LedgerEventType::RecordsLocked,
            None,
            GradeValidationEngine::lock_blocker,
            RecordState::Locked,
            |failures| ApiError::PreconditionFailed {
                reason: "锁定要求全部记录为 VALIDATED".to_string(),
                failures,
            },
        )
    }

    /// 批量解锁 (管理员干预): Locked -> Draft, 必须给出原因
    pub fn unlock(&self, keys: &[GradeKey], actor: &str, reason: &str) -> ApiResult<Vec<GradeRecord>> {
        if actor.trim().is_empty() {
            return Err(ApiError::InvalidInput("解锁操作人不能为空".to_string()));
        }
        if reason.trim().is_empty() {
            return Err(ApiError::InvalidInput("解锁原因不能为空".to_string()));
        }

        let _perf = PerfGuard::new("ledger.unlock").records(keys.len());
        self.run_batch(
            keys,
            actor,
            ActionType::UnlockBatch,
            LedgerEventType::RecordsUnlocked,
            Some(reason),
            GradeValidationEngine::unlock_blocker,
            RecordState::Draft,
            |failures| ApiError::PreconditionFailed {
                reason: "解锁要求全部记录为 LOCKED".to_string(),
                failures,
            },
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn run_batch(
        &self,
        keys: &[GradeKey],
        actor: &str,
        action: ActionType,
        event_type: LedgerEventType,
        reason: Option<&str>,
        blocker: fn(&GradeRecord) -> Option<String>,
        target_state: RecordState,
        on_reject: impl FnOnce(Vec<BatchFailure>) -> ApiError,
    ) -> ApiResult<Vec<GradeRecord>> {
        if keys.is_empty() {
            return Err(ApiError::InvalidInput("记录列表不能为空".to_string()));
        }

        let mut sessions: Vec<&str> = keys.iter().map(|k| k.session_id.as_str()).collect();
        sessions.sort_unstable();
        sessions.dedup();
        for session_id in &sessions {
            self.ensure_not_archived(session_id)?;
        }

        let key_strings: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let audit_session = (sessions.len() == 1).then(|| sessions[0].to_string());
        let mut audit = ActionLog::new(audit_session.clone(), action, actor).with_payload(
            &serde_json::json!({
                "keys": key_strings,
                "target_state": target_state.to_db_str(),
            }),
        );
        if let Some(reason) = reason {
            audit = audit.with_detail(reason);
        }

        let now = chrono::Utc::now().naive_utc();
        let outcome = self.grade_repo.compare_and_set_batch(
            keys,
            blocker,
            |record| GradeValidationEngine::transition(record, target_state, actor, now),
            Some(&audit),
        )?;

        match outcome {
            BatchCasOutcome::Applied(records) => {
                info!(
                    action = action.as_str(),
                    count = records.len(),
                    actor = actor,
                    "批量迁移完成"
                );
                let mut event = LedgerEvent::new(
                    audit_session.unwrap_or_default(),
                    event_type,
                    actor,
                    key_strings,
                );
                if let Some(reason) = reason {
                    event = event.with_detail(reason);
                }
                self.events.publish(event);
                Ok(records)
            }
            BatchCasOutcome::Rejected(rejections) => {
                warn!(
                    action = action.as_str(),
                    failed = rejections.len(),
                    total = keys.len(),
                    "批量迁移被拒绝, 未修改任何记录"
                );
                Err(on_reject(rejections.into_iter().map(BatchFailure::from).collect()))
            }
        }
    }

    // ==========================================
    // 查询接口
    // ==========================================

    /// 查询单条记录
    pub fn get_record(&self, key: &GradeKey) -> ApiResult<GradeRecord> {
        self.grade_repo
            .find_by_key(key)?
            .ok_or_else(|| ApiError::NotFound(format!("成绩记录 {} 不存在", key)))
    }

    /// 考试季全部记录 (一致快照)
    pub fn session_records(&self, session_id: &str) -> ApiResult<Vec<GradeRecord>> {
        Ok(self.grade_repo.find_by_session(session_id)?)
    }

    /// 单个学生的全部记录
    pub fn student_records(&self, session_id: &str, student_id: &str) -> ApiResult<Vec<GradeRecord>> {
        Ok(self.grade_repo.find_by_student(session_id, student_id)?)
    }

    /// 考试季审计轨迹
    pub fn audit_trail(&self, session_id: &str) -> ApiResult<Vec<ActionLog>> {
        Ok(self.action_log_repo.find_by_session_id(session_id)?)
    }

    // ==========================================
    // 内部辅助
    // ==========================================

    fn ensure_not_archived(&self, session_id: &str) -> ApiResult<()> {
        if self.deliberation_repo.is_exam_session_archived(session_id)? {
            return Err(ApiError::SessionArchived {
                session_id: session_id.to_string(),
            });
        }
        Ok(())
    }
}
