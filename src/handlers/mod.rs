//! HTTP 处理器模块

pub mod audit;
pub mod authz;
pub mod complaint;
pub mod health;
pub mod role;
