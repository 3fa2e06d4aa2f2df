//! Expression evaluation through the compiler collaborator.

use nova_cdp::{CallArgument, CdpClient, EvaluateResult};

use crate::compiler::{CompileRequest, ExpressionCompiler, FrameTarget};
use crate::error::{ServiceError, ServiceResult};
use crate::instances::Inspector;
use crate::protocol::{ErrorKind, ErrorRef, EvalResult};

/// Where a top-level or instance evaluation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalTarget {
    /// Library whose scope the expression is compiled in.
    pub library_uri: String,
    /// Backend object bound to `this`.
    pub this: Option<String>,
    pub context_id: Option<i64>,
}

/// Paused frame an evaluation runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameEvalTarget {
    pub call_frame_id: String,
    pub library_uri: String,
    pub position: Option<FrameTarget>,
    pub scope: Vec<String>,
}

async fn compile(
    compiler: &dyn ExpressionCompiler,
    request: CompileRequest,
) -> ServiceResult<String> {
    compiler
        .compile(request)
        .await
        .map_err(|err| ServiceError::Compile(err.message().to_string()))
}

/// Wrap a compiled expression so scope names become parameters.
pub fn wrap_function(scope: &[String], js: &str) -> String {
    format!("function({}) {{ return {js}; }}", scope.join(", "))
}

pub async fn evaluate(
    client: &CdpClient,
    compiler: &dyn ExpressionCompiler,
    inspector: &Inspector<'_>,
    target: EvalTarget,
    expression: &str,
    scope: Vec<(String, CallArgument)>,
) -> ServiceResult<EvalResult> {
    let (names, arguments): (Vec<String>, Vec<CallArgument>) = scope.into_iter().unzip();
    let js = compile(
        compiler,
        CompileRequest {
            expression: expression.to_string(),
            library_uri: target.library_uri,
            scope: names.clone(),
            target: None,
        },
    )
    .await?;

    let result = if target.this.is_none() && names.is_empty() {
        client.evaluate(&js, target.context_id, false).await?
    } else {
        let context_id = if target.this.is_some() {
            None
        } else {
            target.context_id
        };
        client
            .call_function_on(
                target.this.as_deref(),
                context_id,
                &wrap_function(&names, &js),
                arguments,
            )
            .await?
    };
    Ok(to_eval_result(inspector, result))
}

pub async fn evaluate_in_frame(
    client: &CdpClient,
    compiler: &dyn ExpressionCompiler,
    inspector: &Inspector<'_>,
    target: FrameEvalTarget,
    expression: &str,
) -> ServiceResult<EvalResult> {
    let js = compile(
        compiler,
        CompileRequest {
            expression: expression.to_string(),
            library_uri: target.library_uri,
            scope: target.scope,
            target: target.position,
        },
    )
    .await?;
    let result = client.evaluate_on_call_frame(&target.call_frame_id, &js).await?;
    Ok(to_eval_result(inspector, result))
}

/// A thrown value is data for the client, not a failed call.
pub fn to_eval_result(inspector: &Inspector<'_>, result: EvaluateResult) -> EvalResult {
    match result.exception_details {
        Some(details) => {
            let thrown = details.exception.clone().unwrap_or(result.result);
            let id = inspector.instance_ref(&thrown).id;
            EvalResult::Error(ErrorRef {
                id,
                kind: ErrorKind::UnhandledException,
                message: details.message(),
            })
        }
        None => EvalResult::Instance(inspector.instance_ref(&result.result)),
    }
}
