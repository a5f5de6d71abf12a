use crate::cmd::RunArgs;
use crate::exit::{peer_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_outputs, OutputFormat};

pub async fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let commands: Vec<String> = args
        .commands
        .iter()
        .map(|command| command.strip_prefix('/').unwrap_or(command).to_string())
        .collect();

    let (_server, session) = args.server.connect().await?;
    let outputs = session
        .run_commands(commands.clone())
        .await
        .map_err(|err| peer_error("run failed", err))?;
    print_outputs(&commands, &outputs, format);

    let _ = session.close("commands complete").await;
    if args.strict && outputs.iter().any(|output| !output.is_success()) {
        return Ok(FAILURE);
    }
    Ok(SUCCESS)
}
