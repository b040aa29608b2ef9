// ==========================================
// 成绩核算与评审引擎 - 导入层
// ==========================================
// 职责: 外部成绩单导入, 逐行交给成绩台账录分
// 支持: Excel, CSV
// ==========================================

pub mod error;
pub mod file_parser;
pub mod score_importer;

// 重导出核心类型
pub use error::{ImportError, ImportResult};
pub use file_parser::{CsvParser, ExcelParser, FileParser, RawRow, UniversalFileParser};
pub use score_importer::{ImportedRow, RejectedRow, ScoreImportReport, ScoreImporter};
