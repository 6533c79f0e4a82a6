//! 数据模型模块
//! 主体、资源、策略规则、审计、保留策略、功能开关与凭据

pub mod audit;
pub mod credential;
pub mod feature;
pub mod policy;
pub mod principal;
pub mod resource;
pub mod retention;
