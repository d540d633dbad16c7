//! 领域模型
//!
//! 任务、定时任务及其状态机，以及任务记录存储的抽象接口。

pub mod entities;
pub mod repositories;

pub use entities::*;
pub use repositories::*;
