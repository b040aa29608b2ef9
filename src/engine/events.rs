// ==========================================
// 成绩核算与评审引擎 - 引擎层事件发布
// ==========================================
// 职责: 定义状态迁移事件发布 trait, 供审计/导出方订阅
// 说明: Engine 层定义 trait, 外部协作方实现适配器
// ==========================================

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;

// ==========================================
// 事件类型
// ==========================================

/// 台账与评审事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEventType {
    /// 排考 (新建草稿记录)
    EvaluationScheduled,
    /// 录入/修改成绩
    ScoreRecorded,
    /// 批量校验通过
    RecordsValidated,
    /// 批量锁定
    RecordsLocked,
    /// 批量解锁 (管理员干预)
    RecordsUnlocked,
    /// 批量导入完成
    ScoresImported,
    /// 会议状态变更
    SessionStatusChanged,
    /// 开案
    CaseOpened,
    /// 投票
    VoteCast,
    /// 案例裁定
    CaseFinalized,
}

impl LedgerEventType {
    /// 转换为字符串标识
    pub fn as_str(&self) -> &str {
        match self {
            LedgerEventType::EvaluationScheduled => "EvaluationScheduled",
            LedgerEventType::ScoreRecorded => "ScoreRecorded",
            LedgerEventType::RecordsValidated => "RecordsValidated",
            LedgerEventType::RecordsLocked => "RecordsLocked",
            LedgerEventType::RecordsUnlocked => "RecordsUnlocked",
            LedgerEventType::ScoresImported => "ScoresImported",
            LedgerEventType::SessionStatusChanged => "SessionStatusChanged",
            LedgerEventType::CaseOpened => "CaseOpened",
            LedgerEventType::VoteCast => "VoteCast",
            LedgerEventType::CaseFinalized => "CaseFinalized",
        }
    }
}

/// 状态迁移事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// 考试季或评审会议 ID
    pub session_id: String,
    pub event_type: LedgerEventType,
    pub actor: String,
    /// 受影响对象 (成绩记录键 / 案例 ID)
    pub affected: Vec<String>,
    pub detail: Option<String>,
}

impl LedgerEvent {
    pub fn new(
        session_id: impl Into<String>,
        event_type: LedgerEventType,
        actor: impl Into<String>,
        affected: Vec<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            event_type,
            actor: actor.into(),
            affected,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// ==========================================
// 事件发布 Trait
// ==========================================

/// 事件发布者 Trait
///
/// # 返回
/// - `Ok(id)`: 下游分配的 ID（如果支持）或空字符串
/// - `Err`: 发布失败 (调用方记录 warn, 不回滚已提交的迁移)
pub trait LedgerEventPublisher: Send + Sync {
    fn publish(&self, event: LedgerEvent) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// 空操作事件发布者
///
/// 用于不需要事件发布的场景（如单元测试）
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

impl LedgerEventPublisher for NoOpEventPublisher {
    fn publish(&self, event: LedgerEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpEventPublisher: 跳过事件发布 - session_id={}, event_type={}",
            event.session_id,
            event.event_type.as_str()
        );
        Ok(String::new())
    }
}

/// 可选的事件发布者包装
///
/// 简化 Option<Arc<dyn LedgerEventPublisher>> 的使用
#[derive(Clone)]
pub struct OptionalEventPublisher {
    inner: Option<Arc<dyn LedgerEventPublisher>>,
}

impl OptionalEventPublisher {
    /// 创建带发布者的实例
    pub fn with_publisher(publisher: Arc<dyn LedgerEventPublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    /// 创建空实例（不发布事件）
    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 发布事件; 失败只记录日志
    pub fn publish(&self, event: LedgerEvent) {
        let Some(publisher) = &self.inner else {
            tracing::debug!(
                "OptionalEventPublisher: 未配置发布者，跳过事件 - session_id={}, event_type={}",
                event.session_id,
                event.event_type.as_str()
            );
            return;
        };

        let event_type = event.event_type;
        if let Err(e) = publisher.publish(event) {
            tracing::warn!(event_type = event_type.as_str(), error = %e, "事件发布失败");
        }
    }

    /// 检查是否配置了发布者
    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalEventPublisher {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        events: Mutex<Vec<LedgerEvent>>,
    }

    impl LedgerEventPublisher for RecordingPublisher {
        fn publish(&self, event: LedgerEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
            self.events.lock().unwrap().push(event);
            Ok("evt-1".to_string())
        }
    }

    struct FailingPublisher;

    impl LedgerEventPublisher for FailingPublisher {
        fn publish(&self, _event: LedgerEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
            Err("queue unavailable".into())
        }
    }

    #[test]
    fn test_noop_publisher() {
        let event = LedgerEvent::new("S1", LedgerEventType::RecordsLocked, "registrar", vec![]);
        let result = NoOpEventPublisher.publish(event);
        assert!(result.unwrap().is_empty());
    }

    #[test]
    fn test_optional_publisher_forwards() {
        let recorder = Arc::new(RecordingPublisher::default());
        let publisher = OptionalEventPublisher::with_publisher(recorder.clone());
        assert!(publisher.is_configured());

        publisher.publish(
            LedgerEvent::new("S1", LedgerEventType::VoteCast, "alice", vec!["C1".into()])
                .with_detail("APPROVE"),
        );

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].detail.as_deref(), Some("APPROVE"));
    }

    #[test]
    fn test_optional_publisher_swallows_failures() {
        let publisher = OptionalEventPublisher::with_publisher(Arc::new(FailingPublisher));
        publisher.publish(LedgerEvent::new("S1", LedgerEventType::ScoreRecorded, "t", vec![]));

        assert!(!OptionalEventPublisher::none().is_configured());
    }
}
