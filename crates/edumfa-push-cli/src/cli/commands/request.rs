use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use edumfa_push::{PollReport, PushRequest};
use tracing::{info, warn};

use super::super::args::{PollArgs, RequestArgs, RequestsArgs};
use super::context::Context;
use crate::exit_codes::{FAILED, SUCCESS};

pub async fn poll(ctx: &Context, args: PollArgs) -> anyhow::Result<i32> {
    let Some(secs) = args.watch else {
        return Ok(poll_once(ctx).await);
    };

    let mut interval = tokio::time::interval(Duration::from_secs(secs.max(1)));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                poll_once(ctx).await;
                ctx.agent.expire_stale().await;
                ctx.save().await?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("stopping");
                return Ok(SUCCESS);
            }
        }
    }
}

async fn poll_once(ctx: &Context) -> i32 {
    let Some(report) = ctx.agent.poll().await else {
        return SUCCESS;
    };
    print_report(&report);
    for request in ctx.agent.ledger().pending().await {
        println!("{}", format_request(&request));
    }
    if report.success() {
        SUCCESS
    } else {
        FAILED
    }
}

fn print_report(report: &PollReport) {
    println!("{} challenge(s) found, {} new", report.found, report.added);
    if let Some(error) = &report.error {
        warn!(failed = report.failed, "{}", error);
    }
}

pub async fn list(ctx: &Context, args: RequestsArgs) -> anyhow::Result<i32> {
    let ledger = ctx.agent.ledger();
    if args.clear {
        ledger.clear_all().await;
        println!("Cleared push requests.");
        return Ok(SUCCESS);
    }

    ctx.agent.expire_stale().await;
    let requests = if args.all {
        ledger.snapshot().await
    } else {
        ledger.pending().await
    };
    if requests.is_empty() {
        println!("No push requests.");
    }
    for request in &requests {
        println!("{}", format_request(request));
    }
    Ok(SUCCESS)
}

pub async fn answer(ctx: &Context, args: RequestArgs, accept: bool) -> anyhow::Result<i32> {
    let ledger = ctx.agent.ledger();
    let request = match ledger.get_by_id(&args.id).await {
        Some(request) => Some(request),
        None => ledger.get_by_nonce(&args.id).await,
    };
    let Some(request) = request else {
        eprintln!("No push request {}", args.id);
        return Ok(FAILED);
    };
    if !request.is_pending() {
        eprintln!("Push request {} is already {:?}", request.id, request.status);
        return Ok(FAILED);
    }

    let answered = if accept {
        ctx.agent.accept(&request.id).await?
    } else {
        ctx.agent.decline(&request.id).await?
    };
    println!("{}", format_request(&answered));
    Ok(SUCCESS)
}

pub fn format_request(request: &PushRequest) -> String {
    let sent = Utc
        .timestamp_millis_opt(request.sent_at)
        .single()
        .map(|t: DateTime<Utc>| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    format!(
        "{} [{:?}] {} {}: {} ({})",
        request.id, request.status, sent, request.title, request.question, request.serial
    )
}
