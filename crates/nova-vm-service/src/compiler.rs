//! Expression compilation.
//!
//! Source-level expressions are compiled to JavaScript by an external collaborator before
//! the backend can run them. The compiled expression refers to the scope names as free
//! variables and to the evaluation target as `this`.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileRequest {
    pub expression: String,
    /// Library whose top-level scope the expression is compiled in.
    pub library_uri: String,
    /// Free variable names bound by the caller.
    pub scope: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<FrameTarget>,
}

/// Source position of the paused frame for `evaluateInFrame`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FrameTarget {
    pub uri: String,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CompileError {
    message: String,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[async_trait]
pub trait ExpressionCompiler: Send + Sync {
    async fn compile(&self, request: CompileRequest) -> Result<String, CompileError>;
}

/// Forwards expressions unchanged. Useful when the program is plain JavaScript.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughCompiler;

#[async_trait]
impl ExpressionCompiler for PassthroughCompiler {
    async fn compile(&self, request: CompileRequest) -> Result<String, CompileError> {
        if request.expression.trim().is_empty() {
            return Err(CompileError::new("expression is empty"));
        }
        Ok(request.expression)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompileResponse {
    succeeded: bool,
    #[serde(default)]
    js_expression: Option<String>,
    #[serde(default)]
    errors: Vec<String>,
}

/// Runs an external compiler process once per expression.
///
/// The request is written to stdin as JSON; stdout must hold
/// `{"succeeded": true, "jsExpression": "..."}` or `{"succeeded": false, "errors": [...]}`.
#[derive(Clone, Debug)]
pub struct CommandCompiler {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandCompiler {
    pub fn new(command: &[String], timeout: Duration) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }
}

#[async_trait]
impl ExpressionCompiler for CommandCompiler {
    async fn compile(&self, request: CompileRequest) -> Result<String, CompileError> {
        let payload = serde_json::to_vec(&request)
            .map_err(|err| CompileError::new(format!("failed to encode request: {err}")))?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| {
            CompileError::new(format!("failed to spawn {}: {err}", self.program))
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| CompileError::new("compiler stdin unavailable"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| CompileError::new("compiler stdout unavailable"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| CompileError::new("compiler stderr unavailable"))?;

        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf).await;
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        });

        stdin
            .write_all(&payload)
            .await
            .map_err(|err| CompileError::new(format!("failed to write compile request: {err}")))?;
        drop(stdin);

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(err)) => {
                stdout_task.abort();
                stderr_task.abort();
                return Err(CompileError::new(format!("compiler failed: {err}")));
            }
            Err(_elapsed) => {
                let _ = child.start_kill();
                let _ = tokio::time::timeout(Duration::from_secs(2), child.wait()).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(CompileError::new(format!(
                    "compiler timed out after {:?}",
                    self.timeout
                )));
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(CompileError::new(format!(
                "compiler exited with {status}: {}",
                stderr.trim()
            )));
        }

        let response: CompileResponse = serde_json::from_slice(&stdout)
            .map_err(|err| CompileError::new(format!("invalid compiler output: {err}")))?;
        parse_response(response)
    }
}

fn parse_response(response: CompileResponse) -> Result<String, CompileError> {
    if !response.succeeded {
        if response.errors.is_empty() {
            return Err(CompileError::new("compilation failed"));
        }
        return Err(CompileError::new(response.errors.join("\n")));
    }
    response
        .js_expression
        .ok_or_else(|| CompileError::new("compiler reported success without an expression"))
}
