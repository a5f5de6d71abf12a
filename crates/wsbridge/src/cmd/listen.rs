use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use wsbridge_frame::validate_channel_name;
use wsbridge_peer::{Delivery, PollEntry, PollingChannel, PollingConfig};

use crate::cmd::{parse_duration, ListenArgs};
use crate::exit::{frame_error, peer_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_delivery, print_poll_entry, OutputFormat};

enum Item {
    Delivery(Delivery),
    Entry(PollEntry),
}

pub async fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    if args.channels.is_empty() && !args.poll {
        return Err(CliError::new(
            USAGE,
            "nothing to listen for: pass --channel and/or --poll",
        ));
    }
    for channel in &args.channels {
        validate_channel_name(channel).map_err(|err| frame_error("invalid channel", err))?;
    }
    let polling_config = PollingConfig {
        interval: parse_duration(&args.poll_interval)?,
        ..PollingConfig::default()
    };

    let mut server = args.server.bind().await?;
    let mut printed = 0usize;

    loop {
        let session = args.server.accept(&mut server).await?;
        let (tx, mut rx) = mpsc::unbounded_channel();

        for channel in &args.channels {
            let tx = tx.clone();
            session
                .subscribe(channel, move |delivery| {
                    let _ = tx.send(Item::Delivery(delivery));
                })
                .await
                .map_err(|err| peer_error("subscribe failed", err))?;
        }

        let cancel = CancellationToken::new();
        if args.poll {
            let polling = PollingChannel::new(session.clone(), polling_config.clone())
                .map_err(|err| peer_error("polling setup failed", err))?;
            let tx = tx.clone();
            tokio::spawn(polling.run(cancel.clone(), move |entry| {
                let _ = tx.send(Item::Entry(entry));
            }));
        }
        drop(tx);

        loop {
            let item = tokio::select! {
                item = rx.recv() => item,
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted");
                    cancel.cancel();
                    let _ = session.close("interrupted").await;
                    return Ok(SUCCESS);
                }
            };

            let Some(item) = item else {
                info!("game client disconnected");
                cancel.cancel();
                break;
            };
            match item {
                Item::Delivery(delivery) => print_delivery(&delivery, format),
                Item::Entry(entry) => print_poll_entry(&entry, format),
            }
            printed = printed.saturating_add(1);

            if let Some(count) = args.count {
                if printed >= count {
                    cancel.cancel();
                    let _ = session.close("done").await;
                    return Ok(SUCCESS);
                }
            }
        }
    }
}
