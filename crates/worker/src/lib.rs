//! 任务执行
//!
//! 按 `task_type` 注册的处理器，以及从优先级队列取任务执行的 worker 池。

pub mod executors;
pub mod handler;
pub mod pool;


pub use executors::{HttpHandler, HttpTaskParams, NoopHandler, ShellHandler, ShellTaskParams};
pub use handler::{HandlerRegistry, TaskContext, TaskHandler, TaskOutcome};
pub use pool::{WorkerPool, WorkerPoolStatus, NO_HANDLER_ERROR};
