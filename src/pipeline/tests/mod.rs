//! Pipeline 单元测试

mod cache;
mod key;
mod range;
