//! 数据模型模块
//! 角色权限、访问上下文、审计日志、投诉工单及其状态机

pub mod access;
pub mod audit;
pub mod complaint;
pub mod lifecycle;
pub mod role;
