//! 文件型历史行情数据源。

pub mod columns;
pub mod file;

pub use file::FileDataSource;
