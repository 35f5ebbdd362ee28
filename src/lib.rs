//! 投诉工单访问控制与审计工作流
//! 权限引擎（RBAC + ABAC）、审计记录器、投诉状态机与工作流操作

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod realtime;
pub mod repository;
pub mod routes;
pub mod services;
pub mod telemetry;
