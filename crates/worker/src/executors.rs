use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskq_core::{TaskQueueError, TaskQueueResult};
use tokio::process::Command;
use tracing::{error, info};

use crate::handler::{TaskContext, TaskHandler, TaskOutcome};

/// Shell任务参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellTaskParams {
    /// 要执行的命令
    pub command: String,
    /// 命令参数
    pub args: Option<Vec<String>>,
    /// 工作目录
    pub working_dir: Option<String>,
    /// 环境变量
    pub env_vars: Option<HashMap<String, String>>,
}

/// HTTP任务参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTaskParams {
    /// 请求URL
    pub url: String,
    /// HTTP方法
    pub method: Option<String>,
    /// 请求头
    pub headers: Option<HashMap<String, String>>,
    /// 请求体
    pub body: Option<String>,
    /// 超时时间（秒）
    pub timeout_seconds: Option<u64>,
}

fn parse_params<T: serde::de::DeserializeOwned>(
    context: &TaskContext,
    kind: &str,
) -> TaskQueueResult<T> {
    serde_json::from_value(context.parameters.clone())
        .map_err(|e| TaskQueueError::Validation(format!("解析{kind}任务参数失败: {e}")))
}

/// Shell任务处理器，退出码非零视为失败
#[derive(Debug, Default)]
pub struct ShellHandler;

impl ShellHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TaskHandler for ShellHandler {
    fn name(&self) -> &str {
        "shell"
    }

    async fn handle(&self, context: &TaskContext) -> TaskQueueResult<TaskOutcome> {
        let params: ShellTaskParams = parse_params(context, "Shell")?;
        let args = params.args.unwrap_or_default();

        info!(
            "执行Shell任务: task_id={}, command={}, args={:?}",
            context.task_id, params.command, args
        );

        let mut cmd = Command::new(&params.command);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // 超时后 future 被丢弃时终止子进程
            .kill_on_drop(true);

        if let Some(ref dir) = params.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in params.env_vars.unwrap_or_default() {
            cmd.env(key, value);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| TaskQueueError::TaskExecution(format!("启动Shell命令失败: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
        let exit_code = output.status.code();

        info!(
            "Shell任务执行完成: task_id={}, success={}, exit_code={:?}",
            context.task_id,
            output.status.success(),
            exit_code
        );

        if output.status.success() {
            Ok(TaskOutcome::success((!stdout.is_empty()).then_some(stdout)))
        } else {
            let message = if stderr.is_empty() {
                format!("命令执行失败，退出码: {exit_code:?}")
            } else {
                format!("命令执行失败，退出码: {exit_code:?}: {stderr}")
            };
            Ok(TaskOutcome {
                success: false,
                output: (!stdout.is_empty()).then_some(stdout),
                error_message: Some(message),
            })
        }
    }
}

/// HTTP任务处理器，非 2xx 响应视为失败
#[derive(Debug, Default)]
pub struct HttpHandler {
    client: reqwest::Client,
}

impl HttpHandler {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TaskHandler for HttpHandler {
    fn name(&self) -> &str {
        "http"
    }

    async fn handle(&self, context: &TaskContext) -> TaskQueueResult<TaskOutcome> {
        let params: HttpTaskParams = parse_params(context, "HTTP")?;
        let method = params.method.unwrap_or_else(|| "GET".to_string());
        let url = params.url;

        info!(
            "执行HTTP任务: task_id={}, method={}, url={}",
            context.task_id, method, url
        );

        let mut request_builder = match method.to_uppercase().as_str() {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "DELETE" => self.client.delete(&url),
            "PATCH" => self.client.patch(&url),
            "HEAD" => self.client.head(&url),
            _ => {
                return Err(TaskQueueError::Validation(format!(
                    "不支持的HTTP方法: {method}"
                )));
            }
        };

        if let Some(timeout_seconds) = params.timeout_seconds {
            request_builder = request_builder.timeout(Duration::from_secs(timeout_seconds));
        }
        for (key, value) in params.headers.unwrap_or_default() {
            request_builder = request_builder.header(&key, &value);
        }
        if let Some(body) = params.body {
            request_builder = request_builder.body(body);
        }

        match request_builder.send().await {
            Ok(response) => {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|e| format!("读取响应体失败: {e}"));
                let output = format!("HTTP {method} {url}\nStatus: {}\n{body}", status.as_u16());

                info!(
                    "HTTP任务执行完成: task_id={}, status={}",
                    context.task_id,
                    status.as_u16()
                );

                if status.is_success() {
                    Ok(TaskOutcome::success(Some(output)))
                } else {
                    Ok(TaskOutcome {
                        success: false,
                        output: Some(output),
                        error_message: Some(format!("HTTP请求失败，状态码: {}", status.as_u16())),
                    })
                }
            }
            Err(e) => {
                error!("HTTP任务执行失败: task_id={}, error={}", context.task_id, e);
                Ok(TaskOutcome::failure(format!("HTTP请求失败: {e}")))
            }
        }
    }
}

/// 总是成功的处理器，用于冒烟测试和演示
#[derive(Debug, Default)]
pub struct NoopHandler;

#[async_trait]
impl TaskHandler for NoopHandler {
    fn name(&self) -> &str {
        "noop"
    }

    async fn handle(&self, context: &TaskContext) -> TaskQueueResult<TaskOutcome> {
        Ok(TaskOutcome::success(Some(format!(
            "noop task {} done",
            context.task_id
        ))))
    }
}
