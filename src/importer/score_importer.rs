// ==========================================
// 成绩核算与评审引擎 - 成绩单导入器
// ==========================================
// 职责: CSV / Excel 成绩单 -> 逐行录分
// 列: student_id, subject_id, evaluation, score (支持中文别名)
// 红线: 单行失败不终止导入; 越界/缺失成绩照常写入并标记问题
// 红线: 导入本身写一条 ImportScores 审计日志
// ==========================================

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::ledger_api::LedgerApi;
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::grade::GradeKey;
use crate::domain::types::EvaluationType;
use crate::engine::events::{LedgerEvent, LedgerEventType, OptionalEventPublisher};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::file_parser::{FileParser, RawRow, UniversalFileParser};
use crate::repository::action_log_repo::ActionLogRepository;

const COL_STUDENT: &str = "student_id";
const COL_SUBJECT: &str = "subject_id";
const COL_EVALUATION: &str = "evaluation";
const COL_SCORE: &str = "score";

/// 标准列名 -> 可接受的表头
fn column_aliases(column: &str) -> &'static [&'static str] {
    match column {
        COL_STUDENT => &["student_id", "学号", "学生ID"],
        COL_SUBJECT => &["subject_id", "科目", "科目ID"],
        COL_EVALUATION => &["evaluation", "评价", "评价类型"],
        COL_SCORE => &["score", "成绩", "分数"],
        _ => &[],
    }
}

fn cell<'a>(row: &'a HashMap<String, String>, column: &str) -> Option<&'a str> {
    column_aliases(column)
        .iter()
        .find_map(|alias| row.get(*alias))
        .map(|v| v.trim())
}

// ==========================================
// 导入报告
// ==========================================

/// 已写入的行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportedRow {
    pub row_number: usize,
    pub key: String,
    pub revision: i32,
}

/// 被拒绝的行 (未写入)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedRow {
    pub row_number: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreImportReport {
    pub import_id: String,
    pub session_id: String,
    pub source: String,
    pub total_rows: usize,
    pub accepted: Vec<ImportedRow>,
    /// 已写入但带有校验问题 (缺失/越界/非数值)
    pub with_issues: Vec<ImportedRow>,
    pub rejected: Vec<RejectedRow>,
    pub elapsed_ms: u64,
}

impl ScoreImportReport {
    pub fn written(&self) -> usize {
        self.accepted.len() + self.with_issues.len()
    }
}

// ==========================================
// ScoreImporter
// ==========================================
pub struct ScoreImporter {
    ledger: Arc<LedgerApi>,
    action_log_repo: Arc<ActionLogRepository>,
    events: OptionalEventPublisher,
}

impl ScoreImporter {
    pub fn new(
        ledger: Arc<LedgerApi>,
        action_log_repo: Arc<ActionLogRepository>,
        events: OptionalEventPublisher,
    ) -> Self {
        Self {
            ledger,
            action_log_repo,
            events,
        }
    }

    /// 导入成绩单文件 (按扩展名选择解析器)
    pub fn import_file(
        &self,
        session_id: &str,
        file_path: impl AsRef<Path>,
        actor: &str,
    ) -> ImportResult<ScoreImportReport> {
        let path = file_path.as_ref();
        info!(session_id = session_id, file = %path.display(), "开始导入成绩单");

        let rows = UniversalFileParser.parse_to_raw_rows(path)?;
        self.import_rows(session_id, rows, &path.display().to_string(), actor)
    }

    /// 导入已解析的行
    pub fn import_rows(
        &self,
        session_id: &str,
        rows: Vec<RawRow>,
        source: &str,
        actor: &str,
    ) -> ImportResult<ScoreImportReport> {
        let started = Instant::now();
        Self::check_columns(&rows)?;

        let mut report = ScoreImportReport {
            import_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            source: source.to_string(),
            total_rows: rows.len(),
            accepted: Vec::new(),
            with_issues: Vec::new(),
            rejected: Vec::new(),
            elapsed_ms: 0,
        };

        for (row_number, row) in &rows {
            let key = match Self::row_key(session_id, row) {
                Ok(key) => key,
                Err(reason) => {
                    report.rejected.push(RejectedRow {
                        row_number: *row_number,
                        reason,
                    });
                    continue;
                }
            };
            let raw = cell(row, COL_SCORE).unwrap_or("");

            match self.ledger.record_raw_score(&key, raw, actor, None) {
                Ok(record) => {
                    let imported = ImportedRow {
                        row_number: *row_number,
                        key: key.to_string(),
                        revision: record.revision,
                    };
                    if record.is_clean() {
                        report.accepted.push(imported);
                    } else {
                        report.with_issues.push(imported);
                    }
                }
                Err(e) => {
                    warn!(row = row_number, key = %key, error = %e, "成绩行被拒绝");
                    report.rejected.push(RejectedRow {
                        row_number: *row_number,
                        reason: e.to_string(),
                    });
                }
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;

        let audit = ActionLog::new(Some(session_id.to_string()), ActionType::ImportScores, actor)
            .with_payload(&serde_json::json!({
                "import_id": report.import_id,
                "source": report.source,
                "total_rows": report.total_rows,
                "accepted": report.accepted.len(),
                "with_issues": report.with_issues.len(),
                "rejected": report.rejected.len(),
            }));
        self.action_log_repo
            .insert(&audit)
            .map_err(|e| ImportError::AuditWriteError(e.to_string()))?;

        info!(
            session_id = session_id,
            import_id = %report.import_id,
            total = report.total_rows,
            accepted = report.accepted.len(),
            with_issues = report.with_issues.len(),
            rejected = report.rejected.len(),
            elapsed_ms = report.elapsed_ms,
            "成绩单导入完成"
        );
        self.events.publish(
            LedgerEvent::new(
                session_id,
                LedgerEventType::ScoresImported,
                actor,
                report
                    .accepted
                    .iter()
                    .chain(report.with_issues.iter())
                    .map(|r| r.key.clone())
                    .collect(),
            )
            .with_detail(report.import_id.clone()),
        );

        Ok(report)
    }

    /// 有数据时必须能找到全部标准列
    fn check_columns(rows: &[RawRow]) -> ImportResult<()> {
        let Some((_, first)) = rows.first() else {
            return Ok(());
        };
        for column in [COL_STUDENT, COL_SUBJECT, COL_EVALUATION, COL_SCORE] {
            let present = column_aliases(column)
                .iter()
                .any(|alias| first.contains_key(*alias));
            if !present {
                return Err(ImportError::MissingColumn(column.to_string()));
            }
        }
        Ok(())
    }

    fn row_key(session_id: &str, row: &HashMap<String, String>) -> Result<GradeKey, String> {
        let student_id = cell(row, COL_STUDENT)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| "学生ID为空".to_string())?;
        let subject_id = cell(row, COL_SUBJECT)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| "科目ID为空".to_string())?;
        let raw_eval = cell(row, COL_EVALUATION).unwrap_or("");
        let evaluation = EvaluationType::from_str(raw_eval)
            .ok_or_else(|| format!("无法识别的评价类型: '{}'", raw_eval))?;

        Ok(GradeKey::new(session_id, student_id, subject_id, evaluation))
    }
}
