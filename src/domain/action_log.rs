// ==========================================
// 成绩核算与评审引擎 - 操作日志领域模型
// ==========================================
// 红线: 所有状态迁移必须记录 (谁 / 何时 / 做了什么)
// 用途: 审计追踪, 导出方核对
// 对齐: action_log 表
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// ActionLog - 操作日志
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLog {
    pub action_id: String,
    pub session_id: Option<String>, // 考试季或评审会议ID
    pub action_type: String,        // 操作类型 (存储为字符串)
    pub action_ts: NaiveDateTime,
    pub actor: String,

    // ===== 操作负载 =====
    pub payload_json: Option<JsonValue>,
    pub detail: Option<String>,
}

// ==========================================
// ActionType - 操作类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    // ===== 成绩台账 =====
    ScheduleEvaluation,
    RecordScore,
    ValidateBatch,
    LockBatch,
    UnlockBatch,
    ImportScores,
    // ===== 评审委员会 =====
    CreateSession,
    ActivateSession,
    OpenCase,
    CastVote,
    AddDiscussionPoint,
    FinalizeCase,
    CompleteSession,
    ArchiveSession,
}

impl ActionType {
    /// 转换为字符串 (用于数据库存储)
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::ScheduleEvaluation => "ScheduleEvaluation",
            ActionType::RecordScore => "RecordScore",
            ActionType::ValidateBatch => "ValidateBatch",
            ActionType::LockBatch => "LockBatch",
            ActionType::UnlockBatch => "UnlockBatch",
            ActionType::ImportScores => "ImportScores",
            ActionType::CreateSession => "CreateSession",
            ActionType::ActivateSession => "ActivateSession",
            ActionType::OpenCase => "OpenCase",
            ActionType::CastVote => "CastVote",
            ActionType::AddDiscussionPoint => "AddDiscussionPoint",
            ActionType::FinalizeCase => "FinalizeCase",
            ActionType::CompleteSession => "CompleteSession",
            ActionType::ArchiveSession => "ArchiveSession",
        }
    }

    /// 从字符串解析
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ScheduleEvaluation" => Some(ActionType::ScheduleEvaluation),
            "RecordScore" => Some(ActionType::RecordScore),
            "ValidateBatch" => Some(ActionType::ValidateBatch),
            "LockBatch" => Some(ActionType::LockBatch),
            "UnlockBatch" => Some(ActionType::UnlockBatch),
            "ImportScores" => Some(ActionType::ImportScores),
            "CreateSession" => Some(ActionType::CreateSession),
            "ActivateSession" => Some(ActionType::ActivateSession),
            "OpenCase" => Some(ActionType::OpenCase),
            "CastVote" => Some(ActionType::CastVote),
            "AddDiscussionPoint" => Some(ActionType::AddDiscussionPoint),
            "FinalizeCase" => Some(ActionType::FinalizeCase),
            "CompleteSession" => Some(ActionType::CompleteSession),
            "ArchiveSession" => Some(ActionType::ArchiveSession),
            _ => None,
        }
    }
}

// ==========================================
// ActionLog 辅助方法
// ==========================================
impl ActionLog {
    /// 创建新的操作日志 (ID 使用 UUID v4)
    pub fn new(session_id: Option<String>, action_type: ActionType, actor: &str) -> Self {
        Self {
            action_id: uuid::Uuid::new_v4().to_string(),
            session_id,
            action_type: action_type.as_str().to_string(),
            action_ts: chrono::Utc::now().naive_utc(),
            actor: actor.to_string(),
            payload_json: None,
            detail: None,
        }
    }

    /// 设置操作负载 (转换为JSON)
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Self {
        self.payload_json = serde_json::to_value(payload).ok();
        self
    }

    /// 设置详细描述
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// 解析操作类型
    pub fn kind(&self) -> Option<ActionType> {
        ActionType::from_str(&self.action_type)
    }
}
