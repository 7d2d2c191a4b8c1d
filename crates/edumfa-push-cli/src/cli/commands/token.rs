use edumfa_push::{RolloutOutcome, Token};

use super::super::args::{EnrollArgs, SerialArgs};
use super::context::Context;
use crate::exit_codes::{FAILED, SUCCESS};

pub async fn enroll(ctx: &Context, args: EnrollArgs) -> anyhow::Result<i32> {
    let enrollment = ctx.agent.enroll(&args.uri).await?;
    println!("{}", format_token(&enrollment.token));
    Ok(report_outcome(&enrollment.token.id, &enrollment.outcome))
}

pub async fn list(ctx: &Context) -> anyhow::Result<i32> {
    let tokens = ctx.agent.tokens().await?;
    if tokens.is_empty() {
        println!("No tokens enrolled.");
    }
    for token in &tokens {
        println!("{}", format_token(token));
    }
    Ok(SUCCESS)
}

pub async fn retry(ctx: &Context, args: SerialArgs) -> anyhow::Result<i32> {
    let outcome = ctx.agent.retry_rollout(&args.serial).await?;
    Ok(report_outcome(&args.serial, &outcome))
}

pub async fn resume(ctx: &Context) -> anyhow::Result<i32> {
    let handles = ctx.agent.engine().start_pending_rollouts().await?;
    if handles.is_empty() {
        println!("Nothing to resume.");
        return Ok(SUCCESS);
    }
    let mut code = SUCCESS;
    for handle in handles {
        let outcome = handle.await?;
        if !outcome.is_success() {
            code = FAILED;
        }
        if let Some(error) = outcome.error() {
            eprintln!("rollout failed: {}", error);
        }
    }
    list(ctx).await?;
    Ok(code)
}

pub async fn delete(ctx: &Context, args: SerialArgs) -> anyhow::Result<i32> {
    if ctx.agent.delete_token(&args.serial).await? {
        println!("Deleted {}", args.serial);
        Ok(SUCCESS)
    } else {
        eprintln!("No token {}", args.serial);
        Ok(FAILED)
    }
}

fn report_outcome(serial: &str, outcome: &RolloutOutcome) -> i32 {
    match outcome {
        RolloutOutcome::Completed { .. } => {
            println!("{}: rollout completed", serial);
            SUCCESS
        }
        RolloutOutcome::Rejected { error } => {
            eprintln!("{}: rollout not started: {}", serial, error);
            FAILED
        }
        RolloutOutcome::Failed { state, error } => {
            eprintln!("{}: {:?}: {}", serial, state, error);
            FAILED
        }
    }
}

pub fn format_token(token: &Token) -> String {
    let name = match &token.issuer {
        Some(issuer) if !issuer.is_empty() => format!("{}:{}", issuer, token.label),
        _ => token.label.clone(),
    };
    format!(
        "{:<16} {:<28} {:>3}%  {:?}",
        token.id,
        name,
        token.rollout_state.progress(),
        token.rollout_state
    )
}
