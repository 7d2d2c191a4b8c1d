use super::super::args::*;
use super::context::Context;
use crate::exit_codes::SUCCESS;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    if let Command::Version = cli.cmd {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    let ctx = Context::open(&cli).await?;
    let code = match cli.cmd {
        Command::Enroll(args) => super::token::enroll(&ctx, args).await,
        Command::Tokens => super::token::list(&ctx).await,
        Command::Retry(args) => super::token::retry(&ctx, args).await,
        Command::Resume => super::token::resume(&ctx).await,
        Command::Delete(args) => super::token::delete(&ctx, args).await,
        Command::Poll(args) => super::request::poll(&ctx, args).await,
        Command::Requests(args) => super::request::list(&ctx, args).await,
        Command::Accept(args) => super::request::answer(&ctx, args, true).await,
        Command::Decline(args) => super::request::answer(&ctx, args, false).await,
        Command::Version => Ok(SUCCESS),
    };
    ctx.save().await?;
    code
}
