//! Command handler
//!
//! Runs one popped command through the executor with the console attached.
//! A failing command is reported on the console and through the completion
//! code; it never takes the loop down.

use bytes::Bytes;
use cloudclient_shared::state_machine::AgentState;
use cloudclient_shared::CompletionCode;
use std::error::Error as _;
use tracing::{debug, warn};

use super::{reset, HandlerContext};
use crate::command::{ExecError, HandlerOutcome};
use crate::transport::StoreError;

fn error_trace(fault: &ExecError) -> String {
    let mut trace = format!("Error: {fault}\n");
    let mut source = fault.source();
    while let Some(cause) = source {
        trace.push_str(&format!("  caused by: {cause}\n"));
        source = cause.source();
    }
    trace
}

/// Handle a `command` queue entry
pub async fn handle_command(
    ctx: &mut HandlerContext<'_>,
    code: Bytes,
) -> Result<HandlerOutcome, StoreError> {
    ctx.session.console_mut().clear().await?;
    ctx.session.clear_completion().await?;
    ctx.enter(AgentState::RunningCommand).await?;

    debug!("Running command ({} bytes)", code.len());

    if ctx.settings.echo_commands {
        let console = ctx.session.console_mut();
        console.write(&code).await?;
        if !code.ends_with(b"\n") {
            console.write(b"\n").await?;
        }
    }

    let result = match ctx.executor.execute(&code, ctx.session.console_mut()).await {
        Ok(()) => CompletionCode::Success,
        Err(ExecError::Console(e)) => return Err(e),
        Err(fault) => {
            warn!("Command failed: {}", fault);
            ctx.session
                .console_mut()
                .write(error_trace(&fault).as_bytes())
                .await?;
            CompletionCode::Failure
        }
    };

    ctx.session.console_mut().flush().await?;
    ctx.session.signal_completion(result).await?;

    if ctx.settings.reset_after_command {
        return reset::begin_reset(ctx).await;
    }

    ctx.finish().await?;
    Ok(HandlerOutcome::Completed(result))
}
