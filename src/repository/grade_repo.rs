// ==========================================
// 成绩核算与评审引擎 - 成绩记录数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑 (规则由调用方以闭包传入)
// 并发: 单条更新使用乐观锁 (revision); 批量迁移在单事务内 compare-and-set
// ==========================================

use crate::domain::action_log::ActionLog;
use crate::domain::grade::{GradeIssue, GradeKey, GradeRecord};
use crate::domain::types::{EvaluationType, RecordState};
use crate::repository::action_log_repo::insert_action_log;
use crate::repository::error::{
    enum_column_error, json_column_error, parse_ts, RepositoryError, RepositoryResult, TS_FORMAT,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

const SELECT_COLUMNS: &str = r#"
    SELECT session_id, student_id, subject_id, evaluation, coefficient, score,
           issues_json, is_eliminatory, state, revision, updated_by, updated_at
    FROM grade_record
"#;

// ==========================================
// 批量 compare-and-set 结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRejection {
    pub key: GradeKey,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub enum BatchCasOutcome {
    /// 全部通过检查并已写入 (返回写入后的记录)
    Applied(Vec<GradeRecord>),
    /// 至少一条未通过检查, 未写入任何记录
    Rejected(Vec<BatchRejection>),
}

// ==========================================
// GradeRecordRepository - 成绩记录仓储
// ==========================================
pub struct GradeRecordRepository {
    conn: Arc<Mutex<Connection>>,
}

impl GradeRecordRepository {
    /// 创建新的GradeRecordRepository实例
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
    // 写入操作
    // ==========================================

    /// 插入新记录 (主键重复时返回 UniqueConstraintViolation)
    pub fn insert(&self, record: &GradeRecord, audit: Option<&ActionLog>) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"INSERT INTO grade_record (
                session_id, student_id, subject_id, evaluation, coefficient, score,
                issues_json, is_eliminatory, state, revision, updated_by, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &record.key.session_id,
                &record.key.student_id,
                &record.key.subject_id,
                record.key.evaluation.to_db_string(),
                record.coefficient,
                record.score,
                serde_json::to_string(&record.issues)?,
                record.is_eliminatory,
                record.state.to_db_str(),
                record.revision,
                &record.updated_by,
                record.updated_at.format(TS_FORMAT).to_string(),
            ],
        )?;

        if let Some(log) = audit {
            insert_action_log(&tx, log)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// 更新单条记录 (带乐观锁检查)
    ///
    /// `record.revision` 为调用方读到的修订号; 成功后库内 revision + 1
    ///
    /// # 错误
    /// - `RepositoryError::OptimisticLockFailure`: revision 不匹配
    /// - `RepositoryError::NotFound`: 记录不存在
    pub fn update(&self, record: &GradeRecord, audit: Option<&ActionLog>) -> RepositoryResult<i32> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let rows_affected = Self::write_mutable_fields(&tx, record)?;

        if rows_affected == 0 {
            let actual: Option<i32> = tx
                .query_row(
                    r#"SELECT revision FROM grade_record
                       WHERE session_id = ? AND student_id = ? AND subject_id = ? AND evaluation = ?"#,
                    Self::key_params(&record.key),
                    |row| row.get(0),
                )
                .optional()?;

            return Err(match actual {
                Some(actual) => RepositoryError::OptimisticLockFailure {
                    entity: "GradeRecord".to_string(),
                    id: record.key.to_string(),
                    expected: record.revision,
                    actual,
                },
                None => RepositoryError::NotFound {
                    entity: "GradeRecord".to_string(),
                    id: record.key.to_string(),
                },
            });
        }

        if let Some(log) = audit {
            insert_action_log(&tx, log)?;
        }

        tx.commit()?;
        Ok(record.revision + 1)
    }

    /// 批量 compare-and-set
    ///
    /// 在同一事务内读取全部目标记录, 逐条执行 `check`;
    /// 任一记录缺失或 `check` 返回拒绝原因时整体回滚, 不写入任何记录;
    /// 否则对每条记录执行 `apply` 并写回 (revision + 1), 审计日志同事务写入。
    pub fn compare_and_set_batch<C, A>(
        &self,
        keys: &[GradeKey],
        check: C,
        apply: A,
        audit: Option<&ActionLog>,
    ) -> RepositoryResult<BatchCasOutcome>
    where
        C: Fn(&GradeRecord) -> Option<String>,
        A: Fn(&mut GradeRecord),
    {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(keys.len());
        let mut rejections = Vec::new();

        for key in keys {
            if !seen.insert(key.clone()) {
                continue;
            }
            match Self::load_one(&tx, key)? {
                Some(record) => {
                    if let Some(reason) = check(&record) {
                        rejections.push(BatchRejection {
                            key: key.clone(),
                            reason,
                        });
                    }
                    records.push(record);
                }
                None => rejections.push(BatchRejection {
                    key: key.clone(),
                    reason: "记录不存在".to_string(),
                }),
            }
        }

        if !rejections.is_empty() {
            // 事务随 drop 回滚
            return Ok(BatchCasOutcome::Rejected(rejections));
        }

        for record in records.iter_mut() {
            apply(record);
            let rows = Self::write_mutable_fields(&tx, record)?;
            if rows != 1 {
                return Err(RepositoryError::DatabaseTransactionError(format!(
                    "批量写入失败: {}",
                    record.key
                )));
            }
            record.revision += 1;
        }

        if let Some(log) = audit {
            insert_action_log(&tx, log)?;
        }

        tx.commit()?;
        Ok(BatchCasOutcome::Applied(records))
    }

    // ==========================================
    // 查询操作
    // ==========================================

    /// 按主键查询
    pub fn find_by_key(&self, key: &GradeKey) -> RepositoryResult<Option<GradeRecord>> {
        let conn = self.get_conn()?;
        Self::load_one(&conn, key)
    }

    /// 查询考试季全部记录 (单条语句, 快照一致)
    pub fn find_by_session(&self, session_id: &str) -> RepositoryResult<Vec<GradeRecord>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            "{} WHERE session_id = ? ORDER BY student_id, subject_id, evaluation",
            SELECT_COLUMNS
        ))?;

        let records = stmt
            .query_map(params![session_id], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// 查询单个学生在考试季内的全部记录
    pub fn find_by_student(
        &self,
        session_id: &str,
        student_id: &str,
    ) -> RepositoryResult<Vec<GradeRecord>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            "{} WHERE session_id = ? AND student_id = ? ORDER BY subject_id, evaluation",
            SELECT_COLUMNS
        ))?;

        let records = stmt
            .query_map(params![session_id, student_id], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// 统计考试季内各状态记录数
    pub fn count_by_state(&self, session_id: &str) -> RepositoryResult<BTreeMap<String, usize>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            "SELECT state, COUNT(*) FROM grade_record WHERE session_id = ? GROUP BY state",
        )?;

        let mut counts = BTreeMap::new();
        let rows = stmt.query_map(params![session_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (state, count) = row?;
            counts.insert(state, count as usize);
        }

        Ok(counts)
    }

    // ==========================================
    // 内部辅助
    // ==========================================

    fn key_params(key: &GradeKey) -> [String; 4] {
        [
            key.session_id.clone(),
            key.student_id.clone(),
            key.subject_id.clone(),
            key.evaluation.to_db_string(),
        ]
    }

    fn load_one(conn: &Connection, key: &GradeKey) -> RepositoryResult<Option<GradeRecord>> {
        let record = conn
            .query_row(
                &format!(
                    "{} WHERE session_id = ? AND student_id = ? AND subject_id = ? AND evaluation = ?",
                    SELECT_COLUMNS
                ),
                Self::key_params(key),
                Self::map_row,
            )
            .optional()?;
        Ok(record)
    }

    /// 写回可变字段, WHERE 带 revision 条件
    fn write_mutable_fields(conn: &Connection, record: &GradeRecord) -> RepositoryResult<usize> {
        let rows = conn.execute(
            r#"UPDATE grade_record
               SET score = ?, issues_json = ?, state = ?, updated_by = ?, updated_at = ?,
                   revision = revision + 1
               WHERE session_id = ? AND student_id = ? AND subject_id = ? AND evaluation = ?
                 AND revision = ?"#,
            params![
                record.score,
                serde_json::to_string(&record.issues)?,
                record.state.to_db_str(),
                &record.updated_by,
                record.updated_at.format(TS_FORMAT).to_string(),
                &record.key.session_id,
                &record.key.student_id,
                &record.key.subject_id,
                record.key.evaluation.to_db_string(),
                record.revision,
            ],
        )?;
        Ok(rows)
    }

    /// 映射数据库行到GradeRecord对象
    fn map_row(row: &Row) -> rusqlite::Result<GradeRecord> {
        let evaluation_raw: String = row.get(3)?;
        let evaluation = EvaluationType::from_str(&evaluation_raw)
            .ok_or_else(|| enum_column_error(3, &evaluation_raw))?;

        let issues_raw: String = row.get(6)?;
        let issues: Vec<GradeIssue> =
            serde_json::from_str(&issues_raw).map_err(|e| json_column_error(6, e))?;

        let state_raw: String = row.get(8)?;
        let state = RecordState::from_str(&state_raw).ok_or_else(|| enum_column_error(8, &state_raw))?;

        Ok(GradeRecord {
            key: GradeKey {
                session_id: row.get(0)?,
                student_id: row.get(1)?,
                subject_id: row.get(2)?,
                evaluation,
            },
            coefficient: row.get(4)?,
            score: row.get(5)?,
            issues,
            is_eliminatory: row.get(7)?,
            state,
            revision: row.get(9)?,
            updated_by: row.get(10)?,
            updated_at: parse_ts(11, &row.get::<_, String>(11)?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn setup_test_db() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::init_schema(&conn).unwrap();
        Arc::new(Mutex::new(conn))
    }

    fn make_record(student: &str, eval: EvaluationType, score: Option<f64>, state: RecordState) -> GradeRecord {
        let mut record = GradeRecord::scheduled(
            GradeKey::new("S1", student, "MATH", eval),
            0.5,
            false,
            Utc::now().naive_utc(),
        );
        record.score = score;
        if score.is_some() {
            record.issues.clear();
        }
        record.state = state;
        record
    }

    #[test]
    fn test_insert_and_find_by_key() {
        let repo = GradeRecordRepository::new(setup_test_db());
        let record = make_record("E1", EvaluationType::FinalExam, Some(12.5), RecordState::Draft);
        repo.insert(&record, None).unwrap();

        let found = repo.find_by_key(&record.key).unwrap().unwrap();
        assert_eq!(found.score, Some(12.5));
        assert_eq!(found.state, RecordState::Draft);
        assert_eq!(found.revision, 0);

        // 主键重复
        let dup = repo.insert(&record, None);
        assert!(matches!(dup, Err(RepositoryError::UniqueConstraintViolation(_))));
    }

    #[test]
    fn test_update_detects_stale_revision() {
        let repo = GradeRecordRepository::new(setup_test_db());
        let mut record = make_record("E1", EvaluationType::FinalExam, None, RecordState::Draft);
        repo.insert(&record, None).unwrap();

        record.score = Some(14.0);
        record.issues.clear();
        assert_eq!(repo.update(&record, None).unwrap(), 1);

        // 仍持有 revision=0 的写入方应检测到冲突
        record.score = Some(15.0);
        match repo.update(&record, None) {
            Err(RepositoryError::OptimisticLockFailure { expected, actual, .. }) => {
                assert_eq!(expected, 0);
                assert_eq!(actual, 1);
            }
            other => panic!("Expected OptimisticLockFailure, got {:?}", other),
        }
        assert_eq!(repo.find_by_key(&record.key).unwrap().unwrap().score, Some(14.0));
    }

    #[test]
    fn test_compare_and_set_batch_is_all_or_nothing() {
        let repo = GradeRecordRepository::new(setup_test_db());
        let a = make_record("E1", EvaluationType::FinalExam, Some(12.0), RecordState::Validated);
        let b = make_record("E2", EvaluationType::FinalExam, Some(9.0), RecordState::Draft);
        repo.insert(&a, None).unwrap();
        repo.insert(&b, None).unwrap();

        let keys = vec![a.key.clone(), b.key.clone()];
        let outcome = repo
            .compare_and_set_batch(
                &keys,
                |r| (!r.is_validated()).then(|| format!("状态为{}", r.state)),
                |r| r.state = RecordState::Locked,
                None,
            )
            .unwrap();

        match outcome {
            BatchCasOutcome::Rejected(rejections) => {
                assert_eq!(rejections.len(), 1);
                assert_eq!(rejections[0].key, b.key);
            }
            BatchCasOutcome::Applied(_) => panic!("Expected rejection"),
        }

        // 两条记录都未被锁定
        for key in &keys {
            assert!(!repo.find_by_key(key).unwrap().unwrap().is_locked());
        }
    }

    #[test]
    fn test_compare_and_set_batch_reports_missing_keys() {
        let repo = GradeRecordRepository::new(setup_test_db());
        let missing = GradeKey::new("S1", "GHOST", "MATH", EvaluationType::FinalExam);

        let outcome = repo
            .compare_and_set_batch(&[missing.clone()], |_| None, |_| {}, None)
            .unwrap();
        match outcome {
            BatchCasOutcome::Rejected(rejections) => assert_eq!(rejections[0].key, missing),
            BatchCasOutcome::Applied(_) => panic!("Expected rejection"),
        }
    }

    #[test]
    fn test_count_by_state() {
        let repo = GradeRecordRepository::new(setup_test_db());
        repo.insert(&make_record("E1", EvaluationType::FinalExam, Some(12.0), RecordState::Validated), None)
            .unwrap();
        repo.insert(&make_record("E2", EvaluationType::FinalExam, None, RecordState::Draft), None)
            .unwrap();
        repo.insert(
            &make_record("E2", EvaluationType::ContinuousAssessment(1), None, RecordState::Draft),
            None,
        )
        .unwrap();

        let counts = repo.count_by_state("S1").unwrap();
        assert_eq!(counts.get("DRAFT"), Some(&2));
        assert_eq!(counts.get("VALIDATED"), Some(&1));
        assert_eq!(counts.get("LOCKED"), None);
    }
}
