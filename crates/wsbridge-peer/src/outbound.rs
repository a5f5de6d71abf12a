//! Command plans for outbound transfers and chat broadcasts.

use serde_json::Value;
use wsbridge_frame::{
    command_wire_size, encode_payload, packetize, script_event_command, validate_channel_name,
    ControlMessage, FrameError, Payload,
};

/// Every command of one outbound transfer, in send order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    pub channel: String,
    pub transfer_id: String,
    pub commands: Vec<String>,
}

impl TransferPlan {
    /// Number of `FRAGMENT` commands.
    pub fn fragment_count(&self) -> usize {
        self.commands.len().saturating_sub(2)
    }
}

/// Plan `BEGIN`, the fragments and `END` for `payload` on `channel`.
///
/// Fragments are sized against the envelope a command would travel in, using
/// `sample_request_id` for the id width. Every planned command fits `budget`.
pub fn plan_transfer(
    namespace: &str,
    channel: &str,
    payload: &Payload,
    transfer_id: &str,
    sample_request_id: &str,
    budget: usize,
) -> Result<TransferPlan, FrameError> {
    validate_channel_name(channel)?;
    let data = encode_payload(payload)?;

    let fragments = packetize(&data, budget, |index, chunk| {
        let message = fragment_message(index, transfer_id, chunk);
        command_wire_size(sample_request_id, &script_event_command(namespace, channel, &message))
    })?;

    let mut commands = Vec::with_capacity(fragments.len() + 2);
    let begin = ControlMessage::Begin {
        total: fragments.len(),
        transfer_id: transfer_id.to_string(),
    };
    commands.push(script_event_command(namespace, channel, &begin.to_string()));
    for (index, chunk) in fragments.iter().enumerate() {
        let message = fragment_message(index, transfer_id, chunk);
        commands.push(script_event_command(namespace, channel, &message));
    }
    let end = ControlMessage::End {
        transfer_id: transfer_id.to_string(),
    };
    commands.push(script_event_command(namespace, channel, &end.to_string()));

    for command in [&commands[0], &commands[commands.len() - 1]] {
        let size = command_wire_size(sample_request_id, command);
        if size > budget {
            return Err(FrameError::EnvelopeTooLarge { size, max: budget });
        }
    }

    Ok(TransferPlan {
        channel: channel.to_string(),
        transfer_id: transfer_id.to_string(),
        commands,
    })
}

fn fragment_message(index: usize, transfer_id: &str, chunk: &str) -> String {
    format!("FRAGMENT:{index}:{transfer_id}:{chunk}")
}

/// Plan `tellraw` commands that show `message` to every player.
///
/// Long messages are split so that each command fits `budget`.
pub fn plan_say(
    message: &str,
    sample_request_id: &str,
    budget: usize,
) -> Result<Vec<String>, FrameError> {
    let chunks = packetize(message, budget, |_, chunk| {
        command_wire_size(sample_request_id, &tellraw_command(chunk))
    })?;
    Ok(chunks.iter().map(|chunk| tellraw_command(chunk)).collect())
}

fn tellraw_command(text: &str) -> String {
    let text = Value::String(text.to_string());
    format!(r#"tellraw @a {{"rawtext":[{{"text":{text}}}]}}"#)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wsbridge_frame::{decode_payload, ControlMessage, MAX_ENVELOPE_BYTES};

    use super::*;

    fn control_of(command: &str) -> ControlMessage {
        let message = command
            .strip_prefix("scriptevent yb:data ")
            .expect("scriptevent prefix");
        ControlMessage::parse(message).expect("control message")
    }

    #[test]
    fn small_payload_is_one_fragment() {
        let plan = plan_transfer(
            "yb",
            "data",
            &Payload::from("hi"),
            "t1",
            "abcdef",
            MAX_ENVELOPE_BYTES,
        )
        .unwrap();
        assert_eq!(
            plan.commands,
            vec![
                "scriptevent yb:data BEGIN:1:t1".to_string(),
                r#"scriptevent yb:data FRAGMENT:0:t1:"hi""#.to_string(),
                "scriptevent yb:data END:t1".to_string(),
            ]
        );
        assert_eq!(plan.fragment_count(), 1);
    }

    #[test]
    fn large_payload_round_trips_through_plan() {
        let items: Vec<Value> = (0..300)
            .map(|i| json!({ "id": i, "name": format!("項目-{i}") }))
            .collect();
        let payload = Payload::from(json!({ "items": items }));
        let plan = plan_transfer("yb", "data", &payload, "t1", "abcdef", MAX_ENVELOPE_BYTES)
            .unwrap();

        assert!(plan.fragment_count() > 10);
        for command in &plan.commands {
            assert!(command_wire_size("abcdef", command) <= MAX_ENVELOPE_BYTES);
        }

        let ControlMessage::Begin { total, .. } = control_of(&plan.commands[0]) else {
            panic!("first command must be BEGIN");
        };
        assert_eq!(total, plan.fragment_count());

        let mut data = String::new();
        for (expected, command) in plan.commands[1..=total].iter().enumerate() {
            match control_of(command) {
                ControlMessage::Fragment { index, data: chunk, .. } => {
                    assert_eq!(index, expected);
                    data.push_str(&chunk);
                }
                other => panic!("expected fragment, got {other:?}"),
            }
        }
        assert!(matches!(
            control_of(plan.commands.last().unwrap()),
            ControlMessage::End { .. }
        ));
        assert_eq!(decode_payload(&data).unwrap(), payload);
    }

    #[test]
    fn rejects_bad_channel() {
        assert!(matches!(
            plan_transfer("yb", "no spaces", &Payload::from("x"), "t", "r", 661),
            Err(FrameError::InvalidChannelName { .. })
        ));
    }

    #[test]
    fn tiny_budget_is_overhead_error() {
        assert!(matches!(
            plan_transfer("yb", "data", &Payload::from("x"), "t", "r", 100),
            Err(FrameError::OverheadTooLarge { .. })
        ));
    }

    #[test]
    fn say_builds_tellraw() {
        let commands = plan_say(r#"hello "world""#, "abcdef", MAX_ENVELOPE_BYTES).unwrap();
        assert_eq!(
            commands,
            vec![r#"tellraw @a {"rawtext":[{"text":"hello \"world\""}]}"#.to_string()]
        );
    }

    #[test]
    fn long_say_is_split() {
        let message = "a".repeat(2000);
        let commands = plan_say(&message, "abcdef", MAX_ENVELOPE_BYTES).unwrap();
        assert!(commands.len() >= 4);
        for command in &commands {
            assert!(command_wire_size("abcdef", command) <= MAX_ENVELOPE_BYTES);
        }
        let text: String = commands
            .iter()
            .map(|c| {
                let json = c.strip_prefix("tellraw @a ").unwrap();
                let value: Value = serde_json::from_str(json).unwrap();
                value["rawtext"][0]["text"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(text, message);
    }
}
