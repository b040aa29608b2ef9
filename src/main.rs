// ==========================================
// 成绩核算与评审引擎 - 命令行入口
// ==========================================
// 用法:
//   academic-results                                  打开数据库并输出状态
//   academic-results import <考试季ID> <文件> [操作人]  导入成绩单
// ==========================================

use academic_results::app::{get_default_db_path, AppState};
use academic_results::db;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    academic_results::logging::init();

    tracing::info!("==================================================");
    tracing::info!("{}", academic_results::APP_NAME);
    tracing::info!("系统版本: {}", academic_results::VERSION);
    tracing::info!("==================================================");

    let db_path = get_default_db_path();
    tracing::info!("使用数据库: {}", db_path);

    let state = AppState::new(db_path.clone())
        .await
        .map_err(anyhow::Error::msg)?;

    let schema_version = {
        let conn = db::open_sqlite_connection(&db_path)?;
        db::read_schema_version(&conn)?
    };
    tracing::info!(schema_version = ?schema_version, policy = ?state.policy, "数据库就绪");

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None => Ok(()),
        Some("import") => {
            let (Some(session_id), Some(file)) = (args.get(1), args.get(2)) else {
                anyhow::bail!("用法: academic-results import <考试季ID> <文件> [操作人]");
            };
            let actor = args.get(3).map(String::as_str).unwrap_or("cli");

            let report = state.score_importer.import_file(session_id, file, actor)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Some(other) => anyhow::bail!("未知命令: {}", other),
    }
}
