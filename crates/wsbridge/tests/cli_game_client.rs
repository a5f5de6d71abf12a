#![cfg(feature = "cli")]

use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use wsbridge::frame::{decode_payload, Payload};
use wsbridge::peer::TransferManager;

type GameSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn free_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("ephemeral port should bind");
    let addr = listener.local_addr().expect("bound socket has an address");
    addr.to_string()
}

fn wsbridge(args: &[&str]) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_wsbridge"));
    command
        .args(["--log-level", "error", "--format", "json"])
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    command
}

async fn connect_game(addr: &str) -> GameSocket {
    let start = Instant::now();
    loop {
        if let Ok((ws, _)) = connect_async(format!("ws://{addr}")).await {
            return ws;
        }
        if start.elapsed() >= Duration::from_secs(5) {
            panic!("wsbridge did not start listening on {addr}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Next command request, or `None` once the server closed the socket.
async fn next_request(ws: &mut GameSocket) -> Option<Value> {
    while let Some(message) = ws.next().await {
        match message {
            Ok(Message::Text(text)) => {
                return Some(serde_json::from_str(&text).expect("request should be json"))
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}

async fn respond(ws: &mut GameSocket, request: &Value, message: &str) {
    let response = json!({
        "header": {"requestId": request["header"]["requestId"], "messagePurpose": "commandResponse", "version": 1},
        "body": {"statusCode": 0, "statusMessage": message}
    });
    ws.send(Message::Text(response.to_string()))
        .await
        .expect("response should send");
}

async fn script_event(ws: &mut GameSocket, id: &str, message: &str) {
    let event = json!({
        "header": {"messagePurpose": "event", "eventName": "ScriptEventReceived", "version": 1},
        "body": {"id": id, "message": message}
    });
    ws.send(Message::Text(event.to_string()))
        .await
        .expect("event should send");
}

async fn finish(child: std::process::Child) -> Output {
    tokio::task::spawn_blocking(move || child.wait_with_output())
        .await
        .expect("wait task should join")
        .expect("wsbridge should exit")
}

#[tokio::test]
async fn run_prints_command_outputs() {
    let addr = free_addr();
    let child = wsbridge(&["run", "/list", "--bind", &addr, "--no-greeting"])
        .spawn()
        .expect("run should start");

    let mut ws = connect_game(&addr).await;
    let request = next_request(&mut ws).await.expect("command request");
    assert_eq!(request["body"]["commandLine"], "list");
    assert_eq!(request["header"]["version"], 26);
    respond(&mut ws, &request, "There are 0/10 players online").await;
    assert!(next_request(&mut ws).await.is_none());

    let output = finish(child).await;
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"kind\":\"command_output\""));
    assert!(stdout.contains("There are 0/10 players online"));
}

#[tokio::test]
async fn listen_prints_reassembled_transfer() {
    let addr = free_addr();
    let child = wsbridge(&["listen", "--bind", &addr, "--channel", "x", "--count", "1"])
        .spawn()
        .expect("listen should start");

    let mut ws = connect_game(&addr).await;
    // The greeting goes out once the session is up.
    let greeting = next_request(&mut ws).await.expect("greeting");
    assert!(greeting["body"]["commandLine"]
        .as_str()
        .expect("command line")
        .starts_with("tellraw @a"));
    respond(&mut ws, &greeting, "").await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    for message in [
        "BEGIN:2:ab12",
        "FRAGMENT:1:ab12:\"b\":2}",
        "FRAGMENT:0:ab12:{\"a\":1,",
        "END:ab12",
    ] {
        script_event(&mut ws, "yb:x", message).await;
    }

    let output = finish(child).await;
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout
        .lines()
        .find(|line| line.contains("\"kind\":\"delivery\""))
        .expect("delivery should be printed");
    let record: Value = serde_json::from_str(line).expect("delivery line is json");
    assert_eq!(record["channel"], "x");
    assert_eq!(record["transfer_id"], "ab12");
    assert_eq!(record["payload"], json!({"a": 1, "b": 2}));
}

#[tokio::test]
async fn send_emits_a_complete_transfer() {
    let addr = free_addr();
    let payload = json!({
        "players": (0..120).map(|i| format!("玩家{i}")).collect::<Vec<_>>()
    });
    let payload_arg = payload.to_string();
    let child = wsbridge(&[
        "send",
        "--bind",
        &addr,
        "--no-greeting",
        "--channel",
        "roster",
        "--json",
        &payload_arg,
    ])
    .spawn()
    .expect("send should start");

    let mut ws = connect_game(&addr).await;
    let mut commands = Vec::new();
    while let Some(request) = next_request(&mut ws).await {
        let line = request["body"]["commandLine"]
            .as_str()
            .expect("command line")
            .to_string();
        respond(&mut ws, &request, "").await;
        commands.push(line);
    }

    let output = finish(child).await;
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("\"kind\":\"transfer_sent\""));

    let mut receiver = TransferManager::default();
    let mut completed = None;
    for command in &commands {
        let message = command
            .strip_prefix("scriptevent yb:roster ")
            .expect("transfer command");
        if let Some(done) = receiver.handle("roster", message, tokio::time::Instant::now()) {
            completed = Some(done);
        }
    }
    let completed = completed.expect("transfer should reassemble");
    assert_eq!(
        decode_payload(&completed.data).expect("payload decodes"),
        Payload::Structured(payload)
    );
}

#[test]
fn accept_timeout_returns_124() {
    let addr = free_addr();
    let output = wsbridge(&["say", "hello", "--bind", &addr, "--accept-timeout", "200ms"])
        .output()
        .expect("say should run");
    assert_eq!(output.status.code(), Some(124));
}

#[test]
fn invalid_channel_returns_64() {
    let output = wsbridge(&["send", "--channel", "bad name", "--data", "x"])
        .output()
        .expect("send should run");
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_prints_name() {
    let output = wsbridge(&["version"]).output().expect("version should run");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("wsbridge "));
}
