use std::fs;

use serde_json::Value;
use wsbridge_frame::{validate_channel_name, Payload};

use crate::cmd::SendArgs;
use crate::exit::{frame_error, io_error, peer_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_receipt, OutputFormat};

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    validate_channel_name(&args.channel).map_err(|err| frame_error("invalid channel", err))?;
    let payload = resolve_payload(&args)?;

    let (_server, session) = args.server.connect().await?;
    let receipt = session
        .send_data(&args.channel, payload)
        .await
        .map_err(|err| peer_error("send failed", err))?;
    print_receipt(&receipt, format);

    let _ = session.close("transfer complete").await;
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Payload> {
    if let Some(json) = &args.json {
        let value: Value = serde_json::from_str(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(Payload::from(value));
    }
    if let Some(data) = &args.data {
        return Ok(Payload::from(data.as_str()));
    }
    if let Some(path) = &args.file {
        let text = fs::read_to_string(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
        return Ok(match serde_json::from_str::<Value>(&text) {
            Ok(value) => Payload::from(value),
            Err(_) => Payload::Text(text),
        });
    }
    Err(CliError::new(USAGE, "one of --json, --data or --file is required"))
}
