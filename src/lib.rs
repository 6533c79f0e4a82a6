//! 策略驱动的数据访问引擎
//! 授权、审计、保留策略、功能开关与凭据保险库

pub mod clock;
pub mod config;
pub mod crypto;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod redact;
pub mod repository;
pub mod retry;
pub mod services;
pub mod telemetry;

pub use engine::{AccessEngine, Stores};
pub use error::{AppError, Result};
