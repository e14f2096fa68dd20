//! 共享库
//!
//! 积分系统各进程共用的基础设施代码：配置加载、数据库连接池、基础设施错误、
//! 熔断器、Luhn 校验以及可观测性（日志 + Prometheus 指标）。

pub mod circuit_breaker;
pub mod config;
pub mod database;
pub mod error;
pub mod luhn;
pub mod observability;
pub mod test_utils;
