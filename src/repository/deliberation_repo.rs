// ==========================================
// 成绩核算与评审引擎 - 评审会议数据仓储
// ==========================================
// 对齐: deliberation_session / deliberation_case /
//       deliberation_vote_event / deliberation_discussion_point 表
// 红线: Repository 不含业务逻辑, 状态机规则由 engine 决定
// 并发: 会议与案例行均带 revision, 写入时 WHERE revision = ?
// ==========================================

use crate::domain::action_log::ActionLog;
use crate::domain::deliberation::{
    CaseSnapshot, DeliberationCase, DeliberationSession, DiscussionPoint, QuorumPolicy, Vote,
    VoteEvent,
};
use crate::domain::types::{CaseStatus, SessionStatus, VoteDecision};
use crate::repository::action_log_repo::insert_action_log;
use crate::repository::error::{
    enum_column_error, json_column_error, parse_ts, RepositoryError, RepositoryResult, TS_FORMAT,
};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

const DATE_FORMAT: &str = "%Y-%m-%d";

const SESSION_COLUMNS: &str = r#"
    SELECT session_id, exam_session_id, promotion, session_date, panel_json, quorum_policy,
           status, config_snapshot_json, created_by, created_at, revision
    FROM deliberation_session
"#;

const CASE_COLUMNS: &str = r#"
    SELECT case_id, session_id, student_id, position, snapshot_json, status,
           final_decision, decision_date, revision
    FROM deliberation_case
"#;

// ==========================================
// DeliberationRepository - 评审会议仓储
// ==========================================
pub struct DeliberationRepository {
    conn: Arc<Mutex<Connection>>,
}

impl DeliberationRepository {
    /// 创建新的DeliberationRepository实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 会议 (Session)
    // ==========================================

    /// 创建会议
    pub fn insert_session(
        &self,
        session: &DeliberationSession,
        audit: Option<&ActionLog>,
    ) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"INSERT INTO deliberation_session (
                session_id, exam_session_id, promotion, session_date, panel_json, quorum_policy,
                status, config_snapshot_json, created_by, created_at, revision
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &session.session_id,
                &session.exam_session_id,
                &session.promotion,
                session.session_date.format(DATE_FORMAT).to_string(),
                serde_json::to_string(&session.panel_members)?,
                session.quorum_policy.to_db_string(),
                session.status.to_db_str(),
                &session.config_snapshot_json,
                &session.created_by,
                session.created_at.format(TS_FORMAT).to_string(),
                session.revision,
            ],
        )?;

        if let Some(log) = audit {
            insert_action_log(&tx, log)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// 按ID查询会议
    pub fn find_session(&self, session_id: &str) -> RepositoryResult<Option<DeliberationSession>> {
        let conn = self.get_conn()?;
        let session = conn
            .query_row(
                &format!("{} WHERE session_id = ?", SESSION_COLUMNS),
                params![session_id],
                Self::map_session_row,
            )
            .optional()?;
        Ok(session)
    }

    /// 查询关联某考试季的全部会议
    pub fn find_sessions_by_exam_session(
        &self,
        exam_session_id: &str,
    ) -> RepositoryResult<Vec<DeliberationSession>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE exam_session_id = ? ORDER BY session_date, created_at",
            SESSION_COLUMNS
        ))?;
        let sessions = stmt
            .query_map(params![exam_session_id], Self::map_session_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// 考试季是否已有归档的评审会议 (归档后成绩台账不可再录分)
    pub fn is_exam_session_archived(&self, exam_session_id: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let archived: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM deliberation_session WHERE exam_session_id = ? AND status = ? LIMIT 1",
                params![exam_session_id, SessionStatus::Archived.to_db_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(archived.is_some())
    }

    /// 更新会议状态 (带乐观锁检查), 返回新的 revision
    pub fn update_session_status(
        &self,
        session: &DeliberationSession,
        new_status: SessionStatus,
        audit: Option<&ActionLog>,
    ) -> RepositoryResult<i32> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let rows = tx.execute(
            r#"UPDATE deliberation_session
               SET status = ?, revision = revision + 1
               WHERE session_id = ? AND revision = ?"#,
            params![new_status.to_db_str(), &session.session_id, session.revision],
        )?;

        if rows == 0 {
            return Err(Self::revision_conflict(
                &tx,
                "deliberation_session",
                "session_id",
                "DeliberationSession",
                &session.session_id,
                session.revision,
            )?);
        }

        if let Some(log) = audit {
            insert_action_log(&tx, log)?;
        }

        tx.commit()?;
        Ok(session.revision + 1)
    }

    // ==========================================
    // 案例 (Case)
    // ==========================================

    /// 创建案例 (同一会议内学生唯一)
    pub fn insert_case(
        &self,
        case: &DeliberationCase,
        audit: Option<&ActionLog>,
    ) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"INSERT INTO deliberation_case (
                case_id, session_id, student_id, position, snapshot_json, status,
                final_decision, decision_date, revision
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &case.case_id,
                &case.session_id,
                &case.student_id,
                case.position,
                serde_json::to_string(&case.snapshot)?,
                case.status.to_db_str(),
                &case.final_decision,
                case.decision_date.map(|d| d.format(TS_FORMAT).to_string()),
                case.revision,
            ],
        )?;

        if let Some(log) = audit {
            insert_action_log(&tx, log)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// 按ID查询案例 (含投票投影与讨论要点)
    pub fn find_case(&self, case_id: &str) -> RepositoryResult<Option<DeliberationCase>> {
        let conn = self.get_conn()?;

        let case = conn
            .query_row(
                &format!("{} WHERE case_id = ?", CASE_COLUMNS),
                params![case_id],
                Self::map_case_row,
            )
            .optional()?;

        match case {
            Some(mut case) => {
                Self::hydrate_case(&conn, &mut case)?;
                Ok(Some(case))
            }
            None => Ok(None),
        }
    }

    /// 查询会议内全部案例 (按开案顺序)
    pub fn find_cases_by_session(&self, session_id: &str) -> RepositoryResult<Vec<DeliberationCase>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            "{} WHERE session_id = ? ORDER BY position",
            CASE_COLUMNS
        ))?;
        let mut cases = stmt
            .query_map(params![session_id], Self::map_case_row)?
            .collect::<Result<Vec<_>, _>>()?;

        for case in cases.iter_mut() {
            Self::hydrate_case(&conn, case)?;
        }

        Ok(cases)
    }

    /// 下一个案例序号
    pub fn next_case_position(&self, session_id: &str) -> RepositoryResult<i32> {
        let conn = self.get_conn()?;
        let next: i32 = conn.query_row(
            "SELECT COALESCE(MAX(position), 0) + 1 FROM deliberation_case WHERE session_id = ?",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(next)
    }

    /// 追加投票事件并写回案例状态
    ///
    /// `case` 为迁移后的案例, `case.revision` 仍为读取时的修订号
    pub fn append_vote(
        &self,
        case: &DeliberationCase,
        vote: &Vote,
        audit: Option<&ActionLog>,
    ) -> RepositoryResult<VoteEvent> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        Self::write_case_row(&tx, case)?;

        let seq_no: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq_no), 0) + 1 FROM deliberation_vote_event WHERE case_id = ?",
            params![&case.case_id],
            |row| row.get(0),
        )?;

        let event = VoteEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            case_id: case.case_id.clone(),
            seq_no,
            vote: vote.clone(),
        };

        tx.execute(
            r#"INSERT INTO deliberation_vote_event (
                event_id, case_id, seq_no, member, decision, comment, cast_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &event.event_id,
                &event.case_id,
                event.seq_no,
                &vote.member,
                vote.decision.to_db_str(),
                &vote.comment,
                vote.cast_at.format(TS_FORMAT).to_string(),
            ],
        )?;

        if let Some(log) = audit {
            insert_action_log(&tx, log)?;
        }

        tx.commit()?;
        Ok(event)
    }

    /// 追加讨论要点并写回案例
    pub fn append_discussion_point(
        &self,
        case: &DeliberationCase,
        point: &DiscussionPoint,
        audit: Option<&ActionLog>,
    ) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        Self::write_case_row(&tx, case)?;

        tx.execute(
            r#"INSERT INTO deliberation_discussion_point (case_id, seq_no, author, text, created_at)
               VALUES (?, ?, ?, ?, ?)"#,
            params![
                &case.case_id,
                point.seq_no,
                &point.author,
                &point.text,
                point.created_at.format(TS_FORMAT).to_string(),
            ],
        )?;

        if let Some(log) = audit {
            insert_action_log(&tx, log)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// 写回案例状态/裁定 (带乐观锁检查)
    pub fn update_case(
        &self,
        case: &DeliberationCase,
        audit: Option<&ActionLog>,
    ) -> RepositoryResult<i32> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        Self::write_case_row(&tx, case)?;

        if let Some(log) = audit {
            insert_action_log(&tx, log)?;
        }

        tx.commit()?;
        Ok(case.revision + 1)
    }

    /// 案例的完整投票历史 (按追加顺序)
    pub fn vote_history(&self, case_id: &str) -> RepositoryResult<Vec<VoteEvent>> {
        let conn = self.get_conn()?;
        Self::load_vote_events(&conn, case_id)
    }

    // ==========================================
    // 内部辅助
    // ==========================================

    fn write_case_row(conn: &Connection, case: &DeliberationCase) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"UPDATE deliberation_case
               SET status = ?, final_decision = ?, decision_date = ?, revision = revision + 1
               WHERE case_id = ? AND revision = ?"#,
            params![
                case.status.to_db_str(),
                &case.final_decision,
                case.decision_date.map(|d| d.format(TS_FORMAT).to_string()),
                &case.case_id,
                case.revision,
            ],
        )?;

        if rows == 0 {
            return Err(Self::revision_conflict(
                conn,
                "deliberation_case",
                "case_id",
                "DeliberationCase",
                &case.case_id,
                case.revision,
            )?);
        }
        Ok(())
    }

    /// 更新 0 行时区分 "不存在" 与 "revision 冲突"
    fn revision_conflict(
        conn: &Connection,
        table: &str,
        id_column: &str,
        entity: &str,
        id: &str,
        expected: i32,
    ) -> RepositoryResult<RepositoryError> {
        let actual: Option<i32> = conn
            .query_row(
                &format!("SELECT revision FROM {} WHERE {} = ?", table, id_column),
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(match actual {
            Some(actual) => RepositoryError::OptimisticLockFailure {
                entity: entity.to_string(),
                id: id.to_string(),
                expected,
                actual,
            },
            None => RepositoryError::NotFound {
                entity: entity.to_string(),
                id: id.to_string(),
            },
        })
    }

    /// 填充投票投影与讨论要点
    fn hydrate_case(conn: &Connection, case: &mut DeliberationCase) -> RepositoryResult<()> {
        // 按 seq_no 折叠: 同一委员后投覆盖先投
        let mut votes = BTreeMap::new();
        for event in Self::load_vote_events(conn, &case.case_id)? {
            votes.insert(event.vote.member.clone(), event.vote);
        }
        case.votes = votes;

        let mut stmt = conn.prepare(
            r#"SELECT seq_no, author, text, created_at
               FROM deliberation_discussion_point
               WHERE case_id = ?
               ORDER BY seq_no"#,
        )?;
        case.discussion_points = stmt
            .query_map(params![&case.case_id], |row| {
                Ok(DiscussionPoint {
                    seq_no: row.get(0)?,
                    author: row.get(1)?,
                    text: row.get(2)?,
                    created_at: parse_ts(3, &row.get::<_, String>(3)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(())
    }

    fn load_vote_events(conn: &Connection, case_id: &str) -> RepositoryResult<Vec<VoteEvent>> {
        let mut stmt = conn.prepare(
            r#"SELECT event_id, case_id, seq_no, member, decision, comment, cast_at
               FROM deliberation_vote_event
               WHERE case_id = ?
               ORDER BY seq_no"#,
        )?;

        let events = stmt
            .query_map(params![case_id], |row| {
                let decision_raw: String = row.get(4)?;
                let decision = VoteDecision::from_str(&decision_raw)
                    .ok_or_else(|| enum_column_error(4, &decision_raw))?;
                Ok(VoteEvent {
                    event_id: row.get(0)?,
                    case_id: row.get(1)?,
                    seq_no: row.get(2)?,
                    vote: Vote {
                        member: row.get(3)?,
                        decision,
                        comment: row.get(5)?,
                        cast_at: parse_ts(6, &row.get::<_, String>(6)?)?,
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(events)
    }

    /// 映射数据库行到DeliberationSession对象
    fn map_session_row(row: &Row) -> rusqlite::Result<DeliberationSession> {
        let date_raw: String = row.get(3)?;
        let session_date = NaiveDate::parse_from_str(&date_raw, DATE_FORMAT).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

        let panel_raw: String = row.get(4)?;
        let panel_members: BTreeSet<String> =
            serde_json::from_str(&panel_raw).map_err(|e| json_column_error(4, e))?;

        let quorum_raw: String = row.get(5)?;
        let quorum_policy =
            QuorumPolicy::from_str(&quorum_raw).ok_or_else(|| enum_column_error(5, &quorum_raw))?;

        let status_raw: String = row.get(6)?;
        let status =
            SessionStatus::from_str(&status_raw).ok_or_else(|| enum_column_error(6, &status_raw))?;

        Ok(DeliberationSession {
            session_id: row.get(0)?,
            exam_session_id: row.get(1)?,
            promotion: row.get(2)?,
            session_date,
            panel_members,
            quorum_policy,
            status,
            config_snapshot_json: row.get(7)?,
            created_by: row.get(8)?,
            created_at: parse_ts(9, &row.get::<_, String>(9)?)?,
            revision: row.get(10)?,
        })
    }

    /// 映射数据库行到DeliberationCase对象 (投票与讨论要点另行填充)
    fn map_case_row(row: &Row) -> rusqlite::Result<DeliberationCase> {
        let snapshot_raw: String = row.get(4)?;
        let snapshot: CaseSnapshot =
            serde_json::from_str(&snapshot_raw).map_err(|e| json_column_error(4, e))?;

        let status_raw: String = row.get(5)?;
        let status =
            CaseStatus::from_str(&status_raw).ok_or_else(|| enum_column_error(5, &status_raw))?;

        let decision_date = row
            .get::<_, Option<String>>(7)?
            .map(|raw| parse_ts(7, &raw))
            .transpose()?;

        Ok(DeliberationCase {
            case_id: row.get(0)?,
            session_id: row.get(1)?,
            student_id: row.get(2)?,
            position: row.get(3)?,
            snapshot,
            votes: BTreeMap::new(),
            status,
            final_decision: row.get(6)?,
            decision_date,
            discussion_points: Vec::new(),
            revision: row.get(8)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Recommendation, StudentSituation};
    use chrono::Utc;

    fn setup_test_db() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::init_schema(&conn).unwrap();
        Arc::new(Mutex::new(conn))
    }

    fn make_session(id: &str) -> DeliberationSession {
        DeliberationSession {
            session_id: id.to_string(),
            exam_session_id: "S2026-1".to_string(),
            promotion: "L3".to_string(),
            session_date: NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            panel_members: ["alice", "bob"].iter().map(|s| s.to_string()).collect(),
            quorum_policy: QuorumPolicy::Fraction(0.5),
            status: SessionStatus::Active,
            config_snapshot_json: Some("{}".to_string()),
            created_by: "dean".to_string(),
            created_at: Utc::now().naive_utc(),
            revision: 0,
        }
    }

    fn make_case(case_id: &str, session_id: &str, student_id: &str) -> DeliberationCase {
        DeliberationCase {
            case_id: case_id.to_string(),
            session_id: session_id.to_string(),
            student_id: student_id.to_string(),
            position: 1,
            snapshot: CaseSnapshot {
                current_average: Some(9.5),
                situation: StudentSituation::AtRisk,
                recommendation: Recommendation::PanelReview,
                eliminatory_subjects: vec![],
                rank: Some(3),
            },
            votes: BTreeMap::new(),
            status: CaseStatus::Pending,
            final_decision: None,
            decision_date: None,
            discussion_points: vec![],
            revision: 0,
        }
    }

    fn vote(member: &str, decision: VoteDecision) -> Vote {
        Vote {
            member: member.to_string(),
            decision,
            comment: None,
            cast_at: Utc::now().naive_utc(),
        }
    }

    #[test]
    fn test_session_roundtrip_and_status_update() {
        let repo = DeliberationRepository::new(setup_test_db());
        let session = make_session("D1");
        repo.insert_session(&session, None).unwrap();

        let loaded = repo.find_session("D1").unwrap().unwrap();
        assert_eq!(loaded.panel_members.len(), 2);
        assert_eq!(loaded.quorum_policy, QuorumPolicy::Fraction(0.5));
        assert!(!repo.is_exam_session_archived("S2026-1").unwrap());

        assert_eq!(
            repo.update_session_status(&loaded, SessionStatus::Archived, None).unwrap(),
            1
        );
        assert!(repo.is_exam_session_archived("S2026-1").unwrap());

        // 过期 revision
        let stale = repo.update_session_status(&loaded, SessionStatus::Completed, None);
        assert!(matches!(stale, Err(RepositoryError::OptimisticLockFailure { .. })));
    }

    #[test]
    fn test_votes_fold_to_latest_per_member() {
        let repo = DeliberationRepository::new(setup_test_db());
        repo.insert_session(&make_session("D1"), None).unwrap();
        let mut case = make_case("C1", "D1", "E1");
        repo.insert_case(&case, None).unwrap();

        case.status = CaseStatus::Discussion;
        repo.append_vote(&case, &vote("alice", VoteDecision::Reject), None).unwrap();
        case.revision += 1;
        repo.append_vote(&case, &vote("alice", VoteDecision::Approve), None).unwrap();

        let loaded = repo.find_case("C1").unwrap().unwrap();
        assert_eq!(loaded.status, CaseStatus::Discussion);
        assert_eq!(loaded.revision, 2);
        assert_eq!(loaded.votes.len(), 1);
        assert_eq!(loaded.votes["alice"].decision, VoteDecision::Approve);

        let history = repo.vote_history("C1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].seq_no, 1);
        assert_eq!(history[0].vote.decision, VoteDecision::Reject);
    }

    #[test]
    fn test_duplicate_student_case_rejected() {
        let repo = DeliberationRepository::new(setup_test_db());
        repo.insert_session(&make_session("D1"), None).unwrap();
        repo.insert_case(&make_case("C1", "D1", "E1"), None).unwrap();

        let dup = repo.insert_case(&make_case("C2", "D1", "E1"), None);
        assert!(matches!(dup, Err(RepositoryError::UniqueConstraintViolation(_))));
        assert_eq!(repo.next_case_position("D1").unwrap(), 2);
    }

    #[test]
    fn test_stale_case_write_rolls_back_vote() {
        let repo = DeliberationRepository::new(setup_test_db());
        repo.insert_session(&make_session("D1"), None).unwrap();
        let case = make_case("C1", "D1", "E1");
        repo.insert_case(&case, None).unwrap();

        repo.append_vote(&case, &vote("alice", VoteDecision::Approve), None).unwrap();
        // 仍持有 revision=0
        let stale = repo.append_vote(&case, &vote("bob", VoteDecision::Approve), None);
        assert!(matches!(stale, Err(RepositoryError::OptimisticLockFailure { .. })));
        assert_eq!(repo.vote_history("C1").unwrap().len(), 1);
    }

    #[test]
    fn test_discussion_points_in_order() {
        let repo = DeliberationRepository::new(setup_test_db());
        repo.insert_session(&make_session("D1"), None).unwrap();
        let mut case = make_case("C1", "D1", "E1");
        repo.insert_case(&case, None).unwrap();

        for (i, text) in ["assiduité", "progression"].iter().enumerate() {
            let point = DiscussionPoint {
                seq_no: i as i32 + 1,
                author: "alice".to_string(),
                text: text.to_string(),
                created_at: Utc::now().naive_utc(),
            };
            repo.append_discussion_point(&case, &point, None).unwrap();
            case.revision += 1;
        }

        let loaded = repo.find_case("C1").unwrap().unwrap();
        let texts: Vec<_> = loaded.discussion_points.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["assiduité", "progression"]);
    }
}
