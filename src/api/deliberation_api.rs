// ==========================================
// 成绩核算与评审引擎 - 评审委员会 API
// ==========================================
// 职责: 会议生命周期 / 开案 / 投票 / 讨论要点 / 裁定 / 纪要
// 并发: 同一案例的操作按案例串行 (CaseLocks); 不同案例互不阻塞
//       开案与会议状态迁移按会议串行, 避免归档时插入新案例
// 红线: 达到法定票数也不自动裁定
// ==========================================

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{info, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::config::ConfigManager;
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::deliberation::{
    DeliberationCase, DeliberationMinutes, DeliberationSession, DiscussionPoint, QuorumPolicy,
    Vote, VoteEvent,
};
use crate::domain::result::StudentResult;
use crate::domain::types::{FinalVerdict, SessionStatus, VoteDecision};
use crate::engine::deliberation::{DeliberationEngine, DeliberationRuleError};
use crate::engine::events::{LedgerEvent, LedgerEventType, OptionalEventPublisher};
use crate::engine::minutes::MinutesGenerator;
use crate::engine::results::ResultsCalculator;
use crate::repository::deliberation_repo::DeliberationRepository;
use crate::repository::error::RepositoryError;

// ==========================================
// CaseLocks - 按键串行化的锁表
// ==========================================
#[derive(Debug, Default)]
pub struct CaseLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CaseLocks {
    /// 取得指定键的互斥锁 (不存在时创建)
    pub fn lock_for(&self, key: &str) -> ApiResult<Arc<Mutex<()>>> {
        let mut map = self
            .inner
            .lock()
            .map_err(|e| ApiError::InternalError(format!("锁表获取失败: {}", e)))?;
        Ok(map
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }
}

/// 持有键锁执行闭包
fn with_key_lock<T>(locks: &CaseLocks, key: &str, f: impl FnOnce() -> ApiResult<T>) -> ApiResult<T> {
    let lock = locks.lock_for(key)?;
    let _guard = lock
        .lock()
        .map_err(|e| ApiError::InternalError(format!("案例锁获取失败: {}", e)))?;
    f()
}

fn session_lock_key(session_id: &str) -> String {
    format!("session:{}", session_id)
}

fn case_lock_key(case_id: &str) -> String {
    format!("case:{}", case_id)
}

// ==========================================
// DeliberationApi - 评审委员会 API
// ==========================================
pub struct DeliberationApi {
    repo: Arc<DeliberationRepository>,
    config_manager: Arc<ConfigManager>,
    calculator: ResultsCalculator,
    locks: CaseLocks,
    events: OptionalEventPublisher,
}

impl DeliberationApi {
    /// 创建新的DeliberationApi实例
    ///
    /// `calculator` 用于开案时判定学生处境与建议, 其策略中的
    /// quorum_policy 为新会议的默认法定票数策略
    pub fn new(
        repo: Arc<DeliberationRepository>,
        config_manager: Arc<ConfigManager>,
        calculator: ResultsCalculator,
        events: OptionalEventPublisher,
    ) -> Self {
        Self {
            repo,
            config_manager,
            calculator,
            locks: CaseLocks::default(),
            events,
        }
    }

    // ==========================================
    // 会议生命周期
    // ==========================================

    /// 创建会议 (Draft), 固化当前配置快照
    ///
    /// # 参数
    /// - `quorum_override`: 本次会议的法定票数策略; None 时使用配置
    pub fn create_session(
        &self,
        exam_session_id: &str,
        promotion: &str,
        session_date: NaiveDate,
        panel_members: impl IntoIterator<Item = String>,
        quorum_override: Option<QuorumPolicy>,
        actor: &str,
    ) -> ApiResult<DeliberationSession> {
        if exam_session_id.trim().is_empty() || promotion.trim().is_empty() {
            return Err(ApiError::InvalidInput("考试季与年级不能为空".to_string()));
        }

        let config_snapshot_json = self
            .config_manager
            .get_config_snapshot()
            .map_err(|e| ApiError::InternalError(format!("配置快照失败: {}", e)))?;

        let session = DeliberationSession {
            session_id: uuid::Uuid::new_v4().to_string(),
            exam_session_id: exam_session_id.to_string(),
            promotion: promotion.to_string(),
            session_date,
            panel_members: panel_members
                .into_iter()
                .map(|m| m.trim().to_string())
                .collect::<BTreeSet<_>>(),
            quorum_policy: quorum_override.unwrap_or(self.calculator.policy().quorum_policy),
            status: SessionStatus::Draft,
            config_snapshot_json: Some(config_snapshot_json),
            created_by: actor.to_string(),
            created_at: chrono::Utc::now().naive_utc(),
            revision: 0,
        };
        DeliberationEngine::check_new_session(&session)?;

        let audit = ActionLog::new(Some(session.session_id.clone()), ActionType::CreateSession, actor)
            .with_payload(&serde_json::json!({
                "exam_session_id": exam_session_id,
                "promotion": promotion,
                "panel_members": session.panel_members,
                "quorum_policy": session.quorum_policy.to_db_string(),
            }));
        self.repo.insert_session(&session, Some(&audit))?;

        info!(
            session_id = %session.session_id,
            panel = session.panel_members.len(),
            quorum = %session.quorum_policy,
            "评审会议已创建"
        );
        Ok(session)
    }

    /// Draft -> Active
    pub fn activate_session(&self, session_id: &str, actor: &str) -> ApiResult<DeliberationSession> {
        with_key_lock(&self.locks, &session_lock_key(session_id), || {
            let session = self.load_session(session_id)?;
            let next = DeliberationEngine::activate(&session)?;
            self.transition_session(session, next, ActionType::ActivateSession, actor)
        })
    }

    /// Active -> Completed (全部案例已裁定)
    pub fn complete_session(&self, session_id: &str, actor: &str) -> ApiResult<DeliberationSession> {
        with_key_lock(&self.locks, &session_lock_key(session_id), || {
            let session = self.load_session(session_id)?;
            let cases = self.repo.find_cases_by_session(session_id)?;
            let next = DeliberationEngine::complete(&session, &cases)?;
            self.transition_session(session, next, ActionType::CompleteSession, actor)
        })
    }

    /// Active | Completed -> Archived (全部案例已裁定); 归档后拒绝一切变更
    pub fn archive_session(&self, session_id: &str, actor: &str) -> ApiResult<DeliberationSession> {
        with_key_lock(&self.locks, &session_lock_key(session_id), || {
            let session = self.load_session(session_id)?;
            let cases = self.repo.find_cases_by_session(session_id)?;
            let next = DeliberationEngine::archive(&session, &cases)?;
            self.transition_session(session, next, ActionType::ArchiveSession, actor)
        })
    }

    fn transition_session(
        &self,
        mut session: DeliberationSession,
        next: SessionStatus,
        action: ActionType,
        actor: &str,
    ) -> ApiResult<DeliberationSession> {
        let audit = ActionLog::new(Some(session.session_id.clone()), action, actor).with_payload(
            &serde_json::json!({
                "from": session.status.to_db_str(),
                "to": next.to_db_str(),
            }),
        );
        session.revision = self.repo.update_session_status(&session, next, Some(&audit))?;

        info!(
            session_id = %session.session_id,
            from = %session.status,
            to = %next,
            "评审会议状态变更"
        );
        session.status = next;

        self.events.publish(
            LedgerEvent::new(
                session.session_id.as_str(),
                LedgerEventType::SessionStatusChanged,
                actor,
                vec![session.session_id.clone()],
            )
            .with_detail(next.to_db_str()),
        );
        Ok(session)
    }

    // ==========================================
    // 案例
    // ==========================================

    /// 从学生结果开案 (快照固化)
    pub fn open_case(
        &self,
        session_id: &str,
        result: &StudentResult,
        actor: &str,
    ) -> ApiResult<DeliberationCase> {
        with_key_lock(&self.locks, &session_lock_key(session_id), || {
            let session = self.load_session(session_id)?;
            let existing = self.repo.find_cases_by_session(session_id)?;
            let position = self.repo.next_case_position(session_id)?;
            let (situation, recommendation) = self.calculator.classify(result);

            let case = DeliberationEngine::open_case(
                &session,
                &existing,
                result,
                situation,
                recommendation,
                uuid::Uuid::new_v4().to_string(),
                position,
            )?;

            let audit = ActionLog::new(Some(session_id.to_string()), ActionType::OpenCase, actor)
                .with_payload(&serde_json::json!({
                    "case_id": case.case_id,
                    "student_id": case.student_id,
                    "snapshot": case.snapshot,
                }));
            self.repo.insert_case(&case, Some(&audit))?;

            info!(
                session_id = session_id,
                case_id = %case.case_id,
                student_id = %case.student_id,
                situation = %situation,
                "评审案例已开立"
            );
            self.events.publish(LedgerEvent::new(
                session_id,
                LedgerEventType::CaseOpened,
                actor,
                vec![case.case_id.clone()],
            ));
            Ok(case)
        })
    }

    /// 投票 (同一委员后投覆盖先投; 完整历史保留在投票事件日志)
    pub fn cast_vote(
        &self,
        case_id: &str,
        member: &str,
        decision: VoteDecision,
        comment: Option<&str>,
    ) -> ApiResult<DeliberationCase> {
        with_key_lock(&self.locks, &case_lock_key(case_id), || {
            let mut case = self.load_case(case_id)?;
            let session = self.load_session(&case.session_id)?;

            let vote = Vote {
                member: member.to_string(),
                decision,
                comment: comment.map(str::to_string),
                cast_at: chrono::Utc::now().naive_utc(),
            };
            DeliberationEngine::cast_vote(&session, &mut case, vote.clone())?;

            let audit = ActionLog::new(Some(session.session_id.clone()), ActionType::CastVote, member)
                .with_payload(&serde_json::json!({
                    "case_id": case_id,
                    "decision": decision.to_db_str(),
                    "comment": comment,
                }));
            let event = self.repo.append_vote(&case, &vote, Some(&audit))?;
            case.revision += 1;

            info!(
                case_id = case_id,
                member = member,
                decision = %decision,
                seq_no = event.seq_no,
                votes = case.votes.len(),
                required = session.required_votes(),
                "投票已记录"
            );
            self.events.publish(
                LedgerEvent::new(
                    session.session_id.as_str(),
                    LedgerEventType::VoteCast,
                    member,
                    vec![case_id.to_string()],
                )
                .with_detail(decision.to_db_str()),
            );
            Ok(case)
        })
    }

    /// 追加讨论要点
    pub fn add_discussion_point(
        &self,
        case_id: &str,
        author: &str,
        text: &str,
    ) -> ApiResult<DiscussionPoint> {
        with_key_lock(&self.locks, &case_lock_key(case_id), || {
            let mut case = self.load_case(case_id)?;
            let session = self.load_session(&case.session_id)?;

            let point = DeliberationEngine::add_discussion_point(
                &session,
                &mut case,
                author,
                text,
                chrono::Utc::now().naive_utc(),
            )?;

            let audit = ActionLog::new(
                Some(session.session_id.clone()),
                ActionType::AddDiscussionPoint,
                author,
            )
            .with_payload(&serde_json::json!({ "case_id": case_id, "seq_no": point.seq_no }))
            .with_detail(point.text.clone());
            self.repo.append_discussion_point(&case, &point, Some(&audit))?;

            Ok(point)
        })
    }

    /// 裁定案例 (需 Discussion 状态且达法定票数); 裁定后案例不可变
    pub fn finalize(
        &self,
        case_id: &str,
        verdict: FinalVerdict,
        decision_date: NaiveDateTime,
        note: Option<&str>,
        actor: &str,
    ) -> ApiResult<DeliberationCase> {
        with_key_lock(&self.locks, &case_lock_key(case_id), || {
            let mut case = self.load_case(case_id)?;
            let session = self.load_session(&case.session_id)?;

            DeliberationEngine::finalize(&session, &mut case, verdict, decision_date, note).map_err(
                |e| match e {
                    DeliberationRuleError::QuorumNotMet { recorded, required } => {
                        warn!(case_id = case_id, recorded, required, "未达法定票数, 拒绝裁定");
                        ApiError::QuorumNotMet {
                            case_id: case_id.to_string(),
                            recorded,
                            required,
                        }
                    }
                    other => other.into(),
                },
            )?;

            let tally = case.tally();
            let audit = ActionLog::new(Some(session.session_id.clone()), ActionType::FinalizeCase, actor)
                .with_payload(&serde_json::json!({
                    "case_id": case_id,
                    "status": case.status.to_db_str(),
                    "final_decision": case.final_decision,
                    "tally": tally,
                }));
            case.revision = self.repo.update_case(&case, Some(&audit))?;

            info!(
                case_id = case_id,
                status = %case.status,
                approve = tally.approve,
                reject = tally.reject,
                abstain = tally.abstain,
                "案例已裁定"
            );
            self.events.publish(
                LedgerEvent::new(
                    session.session_id.as_str(),
                    LedgerEventType::CaseFinalized,
                    actor,
                    vec![case_id.to_string()],
                )
                .with_detail(case.status.to_db_str()),
            );
            Ok(case)
        })
    }

    // ==========================================
    // 查询接口
    // ==========================================

    pub fn get_session(&self, session_id: &str) -> ApiResult<DeliberationSession> {
        self.load_session(session_id)
    }

    pub fn get_case(&self, case_id: &str) -> ApiResult<DeliberationCase> {
        self.load_case(case_id)
    }

    /// 会议内全部案例 (按开案顺序)
    pub fn list_cases(&self, session_id: &str) -> ApiResult<Vec<DeliberationCase>> {
        self.load_session(session_id)?;
        Ok(self.repo.find_cases_by_session(session_id)?)
    }

    /// 案例的完整投票历史
    pub fn vote_history(&self, case_id: &str) -> ApiResult<Vec<VoteEvent>> {
        self.load_case(case_id)?;
        Ok(self.repo.vote_history(case_id)?)
    }

    /// 生成纪要 (只读投影, 任意状态可调用)
    pub fn generate_minutes(&self, session_id: &str) -> ApiResult<DeliberationMinutes> {
        let session = self.load_session(session_id)?;
        let cases = self.repo.find_cases_by_session(session_id)?;
        Ok(MinutesGenerator::generate(
            &session,
            &cases,
            chrono::Utc::now().naive_utc(),
        ))
    }

    // ==========================================
    // 内部辅助
    // ==========================================

    fn load_session(&self, session_id: &str) -> ApiResult<DeliberationSession> {
        self.repo
            .find_session(session_id)?
            .ok_or_else(|| {
                RepositoryError::NotFound {
                    entity: "DeliberationSession".to_string(),
                    id: session_id.to_string(),
                }
                .into()
            })
    }

    fn load_case(&self, case_id: &str) -> ApiResult<DeliberationCase> {
        self.repo.find_case(case_id)?.ok_or_else(|| {
            RepositoryError::NotFound {
                entity: "DeliberationCase".to_string(),
                id: case_id.to_string(),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_locks_share_per_key() {
        let locks = CaseLocks::default();
        let a1 = locks.lock_for("case:C1").unwrap();
        let a2 = locks.lock_for("case:C1").unwrap();
        let b = locks.lock_for("case:C2").unwrap();

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
    }
}
