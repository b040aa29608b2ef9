// ==========================================
// 成绩核算与评审引擎 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享状态和API实例
// 约束: 全部 Repository 共享同一个连接 (Arc<Mutex<Connection>>)
// ==========================================

use std::sync::{Arc, Mutex};

use crate::api::{DeliberationApi, LedgerApi, ResultsApi};
use crate::config::{ConfigManager, ResultsPolicy, ResultsPolicyReader};
use crate::engine::events::{LedgerEventPublisher, OptionalEventPublisher};
use crate::engine::results::ResultsCalculator;
use crate::importer::ScoreImporter;
use crate::repository::{ActionLogRepository, DeliberationRepository, GradeRecordRepository};

/// 应用状态
///
/// 包含所有API实例和共享资源
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 启动时生效的核算策略
    pub policy: ResultsPolicy,

    /// 成绩台账API
    pub ledger_api: Arc<LedgerApi>,

    /// 核算结果API
    pub results_api: Arc<ResultsApi>,

    /// 评审委员会API
    pub deliberation_api: Arc<DeliberationApi>,

    /// 成绩单导入器
    pub score_importer: Arc<ScoreImporter>,

    /// 配置管理器
    pub config_manager: Arc<ConfigManager>,

    /// 操作日志仓储（用于审计追踪）
    pub action_log_repo: Arc<ActionLogRepository>,
}

impl AppState {
    /// 创建新的AppState实例, 核算策略从 config_kv 读取
    ///
    /// # 说明
    /// 该方法会：
    /// 1. 打开数据库并初始化 schema
    /// 2. 通过 ResultsPolicyReader 加载核算策略
    /// 3. 创建所有API实例
    pub async fn new(db_path: String) -> Result<Self, String> {
        Self::with_publisher(db_path, None).await
    }

    /// 创建AppState, 并挂接外部事件发布器
    pub async fn with_publisher(
        db_path: String,
        publisher: Option<Arc<dyn LedgerEventPublisher>>,
    ) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = Arc::new(Mutex::new(open_database(&db_path)?));
        let config_manager = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );
        let policy = config_manager
            .load_results_policy()
            .await
            .map_err(|e| format!("核算策略加载失败: {}", e))?;

        Ok(Self::assemble(db_path, conn, config_manager, policy, publisher))
    }

    /// 以显式策略创建AppState (不读取 config_kv 中的策略)
    pub fn with_policy(db_path: String, policy: ResultsPolicy) -> Result<Self, String> {
        let problems = policy.check();
        if !problems.is_empty() {
            return Err(format!("核算策略不自洽: {}", problems.join("; ")));
        }

        let conn = Arc::new(Mutex::new(open_database(&db_path)?));
        let config_manager = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );

        Ok(Self::assemble(db_path, conn, config_manager, policy, None))
    }

    fn assemble(
        db_path: String,
        conn: Arc<Mutex<rusqlite::Connection>>,
        config_manager: Arc<ConfigManager>,
        policy: ResultsPolicy,
        publisher: Option<Arc<dyn LedgerEventPublisher>>,
    ) -> Self {
        // ==========================================
        // 初始化Repository层
        // ==========================================
        let grade_repo = Arc::new(GradeRecordRepository::new(conn.clone()));
        let deliberation_repo = Arc::new(DeliberationRepository::new(conn.clone()));
        let action_log_repo = Arc::new(ActionLogRepository::new(conn));

        let events = match publisher {
            Some(p) => OptionalEventPublisher::with_publisher(p),
            None => OptionalEventPublisher::none(),
        };

        // ==========================================
        // 创建API实例
        // ==========================================
        let ledger_api = Arc::new(LedgerApi::new(
            grade_repo.clone(),
            deliberation_repo.clone(),
            action_log_repo.clone(),
            &policy,
            events.clone(),
        ));
        let results_api = Arc::new(ResultsApi::new(grade_repo, policy));
        let deliberation_api = Arc::new(DeliberationApi::new(
            deliberation_repo,
            config_manager.clone(),
            ResultsCalculator::new(policy),
            events.clone(),
        ));
        let score_importer = Arc::new(ScoreImporter::new(
            ledger_api.clone(),
            action_log_repo.clone(),
            events,
        ));

        tracing::info!(
            pass_threshold = policy.pass_threshold,
            elimination_threshold = policy.elimination_threshold,
            quorum = %policy.quorum_policy,
            "AppState初始化完成"
        );

        Self {
            db_path,
            policy,
            ledger_api,
            results_api,
            deliberation_api,
            score_importer,
            config_manager,
            action_log_repo,
        }
    }
}

/// 打开数据库并执行幂等建表
fn open_database(db_path: &str) -> Result<rusqlite::Connection, String> {
    let conn = crate::db::open_sqlite_connection(db_path)
        .map_err(|e| format!("无法打开数据库: {}", e))?;
    crate::db::init_schema(&conn).map_err(|e| format!("数据库初始化失败: {}", e))?;
    Ok(conn)
}

// ==========================================
// 默认路径
// ==========================================

/// 获取默认数据库路径
///
/// # 返回
/// - 环境变量 ACADEMIC_RESULTS_DB_PATH (若设置)
/// - 开发环境: 用户数据目录/academic-results-dev/academic_results.db
/// - 生产环境: 用户数据目录/academic-results/academic_results.db
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    // 允许通过环境变量显式指定 DB 路径（便于调试/测试/CI）
    if let Ok(path) = std::env::var("ACADEMIC_RESULTS_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./academic_results.db");

    if let Some(data_dir) = dirs::data_dir() {
        // 开发环境使用独立目录，避免污染正式数据
        #[cfg(debug_assertions)]
        {
            path = data_dir.join("academic-results-dev");
        }

        #[cfg(not(debug_assertions))]
        {
            path = data_dir.join("academic-results");
        }

        // 目录创建失败时由打开数据库报错
        std::fs::create_dir_all(&path).ok();
        path = path.join("academic_results.db");
    }

    path.to_string_lossy().to_string()
}
