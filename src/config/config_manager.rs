// ==========================================
// 成绩核算与评审引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::results_policy::{ConfigResult, MentionThresholds, ResultsPolicyReader};
use crate::db::open_sqlite_connection;
use crate::domain::deliberation::QuorumPolicy;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ConfigResult<Self> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    fn get_conn(&self) -> ConfigResult<MutexGuard<'_, Connection>> {
        Ok(self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?)
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    fn get_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self.get_conn()?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 读取 global scope 的配置值（公开方法，供其他模块复用）
    pub fn get_global_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        self.get_config_value(key)
    }

    /// 写入 global scope 的配置值 (UPSERT)
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        tracing::info!(config_key = key, value, "配置已更新");
        Ok(())
    }

    /// 读取浮点配置, 缺失或格式错误时回退默认值
    fn get_f64_or_default(&self, key: &str, default: f64) -> ConfigResult<f64> {
        match self.get_config_value(key)? {
            None => Ok(default),
            Some(raw) => match raw.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(v),
                _ => {
                    tracing::warn!(config_key = key, raw_value = %raw, default, "配置值格式错误，使用默认值");
                    Ok(default)
                }
            },
        }
    }

    /// 获取所有配置的快照（JSON格式）
    ///
    /// # 用途
    /// - 创建评审会议时固化当时的核算口径
    pub fn get_config_snapshot(&self) -> ConfigResult<String> {
        let conn = self.get_conn()?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let mut config_map: HashMap<String, String> = HashMap::new();
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        Ok(serde_json::to_string(&json!(config_map))?)
    }

    /// 从配置快照恢复配置
    ///
    /// # 注意
    /// - 覆盖现有的 global 配置, 以 `__meta_` 开头的键不回写
    pub fn restore_config_from_snapshot(&self, snapshot_json: &str) -> ConfigResult<usize> {
        let config_map: HashMap<String, String> = serde_json::from_str(snapshot_json)?;

        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let mut count = 0;
        for (key, value) in config_map.iter() {
            if key.starts_with("__meta_") {
                continue;
            }
            count += tx.execute(
                "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
                 ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2",
                params![key, value],
            )?;
        }

        tx.commit()?;
        Ok(count)
    }
}

// ==========================================
// ResultsPolicyReader Trait 实现
// ==========================================
#[async_trait]
impl ResultsPolicyReader for ConfigManager {
    async fn get_elimination_threshold(&self) -> ConfigResult<f64> {
        self.get_f64_or_default(config_keys::ELIMINATION_THRESHOLD, 8.0)
    }

    async fn get_pass_threshold(&self) -> ConfigResult<f64> {
        self.get_f64_or_default(config_keys::PASS_THRESHOLD, 10.0)
    }

    async fn get_borderline_window(&self) -> ConfigResult<f64> {
        self.get_f64_or_default(config_keys::BORDERLINE_WINDOW, 1.0)
    }

    async fn get_mention_thresholds(&self) -> ConfigResult<MentionThresholds> {
        let defaults = MentionThresholds::default();
        Ok(MentionThresholds {
            tres_bien: self.get_f64_or_default(config_keys::MENTION_TRES_BIEN, defaults.tres_bien)?,
            bien: self.get_f64_or_default(config_keys::MENTION_BIEN, defaults.bien)?,
            assez_bien: self.get_f64_or_default(config_keys::MENTION_ASSEZ_BIEN, defaults.assez_bien)?,
            passable: self.get_f64_or_default(config_keys::MENTION_PASSABLE, defaults.passable)?,
        })
    }

    async fn get_quorum_policy(&self) -> ConfigResult<QuorumPolicy> {
        let value = self.get_config_value(config_keys::QUORUM_POLICY)?;
        match value {
            None => Ok(QuorumPolicy::All),
            Some(raw) => Ok(QuorumPolicy::from_str(&raw).unwrap_or_else(|| {
                tracing::warn!(
                    config_key = config_keys::QUORUM_POLICY,
                    raw_value = %raw,
                    "法定票数策略格式错误，使用 ALL"
                );
                QuorumPolicy::All
            })),
        }
    }

    async fn get_score_max(&self) -> ConfigResult<f64> {
        self.get_f64_or_default(config_keys::SCORE_MAX, 20.0)
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 成绩区间
    pub const SCORE_MAX: &str = "score_max";

    // 淘汰 / 及格
    pub const ELIMINATION_THRESHOLD: &str = "elimination_threshold";
    pub const PASS_THRESHOLD: &str = "pass_threshold";
    pub const BORDERLINE_WINDOW: &str = "borderline_window";

    // 评语等级
    pub const MENTION_TRES_BIEN: &str = "mention_tres_bien";
    pub const MENTION_BIEN: &str = "mention_bien";
    pub const MENTION_ASSEZ_BIEN: &str = "mention_assez_bien";
    pub const MENTION_PASSABLE: &str = "mention_passable";

    // 评审委员会
    pub const QUORUM_POLICY: &str = "quorum_policy"; // ALL / FRACTION:x / COUNT:n
}
