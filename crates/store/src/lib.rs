//! SQLite 行情存储，实现 `DataSource` 端口。

pub mod bars;

pub use bars::SqliteBarStore;
