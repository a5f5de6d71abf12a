use crate::cmd::SayArgs;
use crate::exit::{peer_error, CliResult, SUCCESS};

pub async fn run(args: SayArgs) -> CliResult<i32> {
    let (_server, session) = args.server.connect().await?;
    session
        .say(&args.message)
        .await
        .map_err(|err| peer_error("say failed", err))?;

    let _ = session.close("message sent").await;
    Ok(SUCCESS)
}
