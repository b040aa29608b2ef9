// ==========================================
// 成绩核算与评审引擎 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型，转换Repository/引擎错误为带原因的类型化结果
// 约束: 批量操作必须列出每个失败对象及原因, 便于只重试失败项
// ==========================================

use crate::engine::deliberation::DeliberationRuleError;
use crate::repository::error::RepositoryError;
use crate::repository::grade_repo::BatchRejection;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ==========================================
// 批量失败详情
// ==========================================

/// 批量失败详情
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// 失败对象 (成绩记录键 / 案例ID)
    pub target: String,
    /// 失败原因
    pub reason: String,
}

impl From<BatchRejection> for BatchFailure {
    fn from(r: BatchRejection) -> Self {
        Self {
            target: r.key.to_string(),
            reason: r.reason,
        }
    }
}

/// API层错误类型
/// 所有错误信息必须包含显式原因
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 业务规则错误
    // ==========================================
    /// 批量校验未通过 (未修改任何记录)
    #[error("校验未通过: {reason} ({} 条失败)", .failures.len())]
    ValidationFailed {
        reason: String,
        failures: Vec<BatchFailure>,
    },

    #[error("前置条件不满足: {reason}")]
    PreconditionFailed {
        reason: String,
        failures: Vec<BatchFailure>,
    },

    #[error("未达法定票数: case_id={case_id}, 已投{recorded}票, 需要{required}票")]
    QuorumNotMet {
        case_id: String,
        recorded: usize,
        required: usize,
    },

    #[error("评审会议已归档: session_id={session_id}")]
    SessionArchived { session_id: String },

    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    // ==========================================
    // 并发控制错误
    // ==========================================
    #[error("并发冲突: {entity}(id={id}) 已被修改 (期望revision={expected}，实际revision={actual})")]
    Conflict {
        entity: String,
        id: String,
        expected: i32,
        actual: i32,
    },

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// 单一原因的前置条件失败
    pub fn precondition(reason: impl Into<String>) -> Self {
        ApiError::PreconditionFailed {
            reason: reason.into(),
            failures: Vec::new(),
        }
    }

    /// 批量失败列表 (非批量错误为空)
    pub fn failures(&self) -> &[BatchFailure] {
        match self {
            ApiError::ValidationFailed { failures, .. }
            | ApiError::PreconditionFailed { failures, .. } => failures,
            _ => &[],
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            // 并发控制错误
            RepositoryError::OptimisticLockFailure {
                entity,
                id,
                expected,
                actual,
            } => ApiError::Conflict {
                entity,
                id,
                expected,
                actual,
            },

            // 数据库错误
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseTransactionError(msg)
            | RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::precondition(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::precondition(format!("外键约束违反: {}", msg))
            }

            // 数据质量错误
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InternalError(format!("字段{}错误: {}", field, message))
            }

            // 通用错误
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// 从状态机拒绝转换 (QuorumNotMet 需要 case_id, 由调用方处理)
// ==========================================
impl From<DeliberationRuleError> for ApiError {
    fn from(err: DeliberationRuleError) -> Self {
        match err {
            DeliberationRuleError::SessionArchived { session_id } => {
                ApiError::SessionArchived { session_id }
            }
            DeliberationRuleError::Precondition { reason, blocking } => {
                ApiError::PreconditionFailed {
                    reason,
                    failures: blocking
                        .into_iter()
                        .map(|(target, reason)| BatchFailure { target, reason })
                        .collect(),
                }
            }
            DeliberationRuleError::QuorumNotMet { recorded, required } => ApiError::QuorumNotMet {
                case_id: String::new(),
                recorded,
                required,
            },
            DeliberationRuleError::InvalidInput(msg) => ApiError::InvalidInput(msg),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_conversion() {
        let repo_err = RepositoryError::NotFound {
            entity: "GradeRecord".to_string(),
            id: "S1/E1/MATH/EXAM".to_string(),
        };
        match ApiError::from(repo_err) {
            ApiError::NotFound(msg) => {
                assert!(msg.contains("GradeRecord"));
                assert!(msg.contains("S1/E1/MATH/EXAM"));
            }
            other => panic!("Expected NotFound, got {:?}", other),
        }

        let repo_err = RepositoryError::OptimisticLockFailure {
            entity: "DeliberationCase".to_string(),
            id: "C1".to_string(),
            expected: 1,
            actual: 2,
        };
        match ApiError::from(repo_err) {
            ApiError::Conflict { id, expected, actual, .. } => {
                assert_eq!(id, "C1");
                assert_eq!((expected, actual), (1, 2));
            }
            other => panic!("Expected Conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_rule_error_conversion_keeps_blocking_cases() {
        let err = ApiError::from(DeliberationRuleError::Precondition {
            reason: "仍有未裁定案例".to_string(),
            blocking: vec![("C7".to_string(), "案例状态为 PENDING".to_string())],
        });
        assert_eq!(err.failures().len(), 1);
        assert_eq!(err.failures()[0].target, "C7");

        let archived = ApiError::from(DeliberationRuleError::SessionArchived {
            session_id: "D1".to_string(),
        });
        assert!(matches!(archived, ApiError::SessionArchived { .. }));
    }
}
