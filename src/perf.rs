// ==========================================
// 成绩核算与评审引擎 - 批量操作耗时追踪
// ==========================================
// 职责: 台账批量操作 / 结果计算的耗时、语句数、慢 SQL 统计
// 开关: ACADEMIC_RESULTS_PERF_SQL (Debug 默认开启), ACADEMIC_RESULTS_SLOW_SQL_MS
// ==========================================

use rusqlite::Connection;
use std::cell::RefCell;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

const PERF_SQL_ENV: &str = "ACADEMIC_RESULTS_PERF_SQL";
const SLOW_SQL_MS_ENV: &str = "ACADEMIC_RESULTS_SLOW_SQL_MS";
const SQL_LOG_MAX_CHARS: usize = 420;

static SETTINGS: OnceLock<PerfSettings> = OnceLock::new();

/// SQL 追踪设置 (进程内只读取一次环境变量)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerfSettings {
    pub sql_tracing: bool,
    pub slow_sql_ms: u64,
}

impl PerfSettings {
    fn parse(tracing_flag: Option<&str>, slow_ms: Option<&str>) -> Self {
        let sql_tracing = tracing_flag
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(cfg!(debug_assertions));
        let slow_sql_ms = slow_ms
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(if cfg!(debug_assertions) { 50 } else { 200 });
        Self {
            sql_tracing,
            slow_sql_ms,
        }
    }

    pub fn from_env() -> Self {
        Self::parse(
            std::env::var(PERF_SQL_ENV).ok().as_deref(),
            std::env::var(SLOW_SQL_MS_ENV).ok().as_deref(),
        )
    }

    fn current() -> Self {
        *SETTINGS.get_or_init(Self::from_env)
    }
}

/// 当前线程上正在计时的操作计数
#[derive(Default)]
struct OpCounters {
    depth: u32,
    statements: u64,
    slow_statements: u64,
}

thread_local! {
    static COUNTERS: RefCell<OpCounters> = RefCell::new(OpCounters::default());
}

fn one_line(sql: &str) -> String {
    let s = sql.trim().replace('\n', " ");
    match s.char_indices().nth(SQL_LOG_MAX_CHARS) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s,
    }
}

/// 为连接安装语句 profile 回调
pub fn install_sqlite_tracing(conn: &mut Connection) {
    if PerfSettings::current().sql_tracing {
        conn.profile(Some(on_statement));
    } else {
        conn.profile(None);
    }
}

fn on_statement(sql: &str, duration: Duration) {
    let ms = duration.as_millis() as u64;
    let threshold = PerfSettings::current().slow_sql_ms;
    let slow = threshold > 0 && ms >= threshold;

    if slow {
        tracing::warn!(target: "slow_sql", duration_ms = ms, sql = %one_line(sql), "slow sql");
    }

    COUNTERS.with(|c| {
        let mut c = c.borrow_mut();
        if c.depth > 0 {
            c.statements += 1;
            if slow {
                c.slow_statements += 1;
            }
        }
    });
}

/// 操作计时 Guard, Drop 时输出耗时与语句数
///
/// ```ignore
/// let _perf = PerfGuard::new("ledger.lock").records(keys.len());
/// ```
pub struct PerfGuard {
    op: &'static str,
    records: Option<usize>,
    start: Instant,
    statements_at_start: u64,
    slow_at_start: u64,
}

impl PerfGuard {
    pub fn new(op: &'static str) -> Self {
        let (statements_at_start, slow_at_start) = COUNTERS.with(|c| {
            let mut c = c.borrow_mut();
            c.depth += 1;
            (c.statements, c.slow_statements)
        });
        Self {
            op,
            records: None,
            start: Instant::now(),
            statements_at_start,
            slow_at_start,
        }
    }

    /// 批量操作涉及的记录数
    pub fn records(mut self, count: usize) -> Self {
        self.records = Some(count);
        self
    }
}

impl Drop for PerfGuard {
    fn drop(&mut self) {
        let (sql_count, slow_sql_count) = COUNTERS.with(|c| {
            let mut c = c.borrow_mut();
            c.depth = c.depth.saturating_sub(1);
            (
                c.statements - self.statements_at_start,
                c.slow_statements - self.slow_at_start,
            )
        });

        tracing::debug!(
            target: "perf",
            op = self.op,
            records = ?self.records,
            elapsed_ms = self.start.elapsed().as_millis() as u64,
            sql_count,
            slow_sql_count,
            "done"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_line_respects_char_boundaries() {
        assert_eq!(one_line("SELECT 1"), "SELECT 1");
        let long = format!("SELECT '{}'", "成".repeat(500));
        let logged = one_line(&long);
        assert_eq!(logged.chars().count(), SQL_LOG_MAX_CHARS + 1);
        assert!(logged.ends_with('…'));
    }

    #[test]
    fn test_settings_parse() {
        let on = PerfSettings::parse(Some("yes"), Some(" 75 "));
        assert!(on.sql_tracing);
        assert_eq!(on.slow_sql_ms, 75);

        let off = PerfSettings::parse(Some("0"), Some("abc"));
        assert!(!off.sql_tracing);
        assert!(off.slow_sql_ms > 0);
    }

    #[test]
    fn test_guard_counts_statements_on_traced_connection() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.profile(Some(on_statement));

        let guard = PerfGuard::new("test.batch").records(2);
        conn.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1);")
            .unwrap();
        let counted = COUNTERS.with(|c| c.borrow().statements) - guard.statements_at_start;
        drop(guard);

        assert!(counted >= 2);
        assert_eq!(COUNTERS.with(|c| c.borrow().depth), 0);
    }
}
