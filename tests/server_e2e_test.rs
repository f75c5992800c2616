use std::net::SocketAddr;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use chess_live::adapter::{create_hello, run_server, Collaborators, ServerConfig};

struct TestClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect failed");
        let (read_half, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read_half).lines(),
            writer,
        }
    }

    async fn send(&mut self, value: Value) {
        let line = serde_json::to_string(&value).unwrap();
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn hello(&mut self, token: &str, scale: Option<u32>) -> Value {
        let hello = serde_json::to_value(create_hello(1, token, scale)).unwrap();
        self.send(hello).await;
        self.until(|v| v["type"] == "welcome").await
    }

    /// Next line, or None once the server closed the connection
    async fn next(&mut self) -> Option<Value> {
        let line = tokio::time::timeout(Duration::from_secs(2), self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .expect("read failed")?;
        Some(serde_json::from_str(&line).expect("server sent invalid json"))
    }

    /// Skip lines until one matches
    async fn until(&mut self, pred: impl Fn(&Value) -> bool) -> Value {
        for _ in 0..64 {
            match self.next().await {
                Some(v) if pred(&v) => return v,
                Some(_) => continue,
                None => panic!("connection closed before expected message"),
            }
        }
        panic!("expected message never arrived");
    }

    async fn closed(&mut self) {
        for _ in 0..64 {
            if self.next().await.is_none() {
                return;
            }
        }
        panic!("connection was not closed");
    }
}

async fn start_server(config: ServerConfig) -> (SocketAddr, JoinHandle<()>) {
    let (ready_tx, ready_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        let _ = run_server(config, Collaborators::default(), Some(ready_tx)).await;
    });
    let addr = tokio::time::timeout(Duration::from_secs(2), ready_rx)
        .await
        .expect("server did not signal ready")
        .expect("ready channel dropped");
    (addr, handle)
}

fn test_config() -> ServerConfig {
    ServerConfig {
        port: 0,
        ..ServerConfig::default()
    }
}

fn delta(event: &'static str) -> impl Fn(&Value) -> bool {
    move |v| v["type"] == "delta" && v["event"] == event
}

fn ack(seq: u64) -> impl Fn(&Value) -> bool {
    move |v| v["type"] == "ack" && v["seq"] == seq
}

#[tokio::test]
async fn two_players_pair_move_and_resign() {
    let (addr, server) = start_server(test_config()).await;
    let mut alice = TestClient::connect(addr).await;
    let mut bob = TestClient::connect(addr).await;

    let welcome = alice.hello("alice", Some(10)).await;
    assert_eq!(welcome["seq"], 1);
    assert_eq!(welcome["name"], "alice");
    bob.hello("bob", None).await;

    alice.send(json!({"type": "seek", "seq": 2})).await;
    let waiting = alice.until(|v| v["type"] == "waiting").await;
    assert_eq!(waiting["seq"], 2);

    bob.send(json!({"type": "seek", "seq": 2})).await;
    let matched = alice.until(|v| v["type"] == "matched").await;
    assert_eq!(matched["color"], "white");
    assert_eq!(matched["opponent"], "bob");
    let bob_matched = bob.until(|v| v["type"] == "matched").await;
    assert_eq!(bob_matched["color"], "black");
    assert_eq!(bob_matched["match_id"], matched["match_id"]);
    let position = bob.until(delta("position")).await;
    assert_eq!(position["pieces"].as_array().map(Vec::len), Some(32));

    alice.send(json!({"type": "select", "seq": 3, "tile": "2e"})).await;
    let selected = alice.until(delta("selected")).await;
    assert_eq!(selected["at"]["top"], 60);
    assert_eq!(selected["at"]["left"], 40);
    let ok = alice.until(ack(3)).await;
    assert_eq!(ok["status"], "ok");

    alice.send(json!({"type": "move", "seq": 4, "tile": "4e"})).await;
    let moved = alice.until(delta("moved")).await;
    assert_eq!((moved["to"]["top"].clone(), moved["to"]["left"].clone()), (json!(40), json!(40)));
    alice.until(ack(4)).await;
    let bob_moved = bob.until(delta("moved")).await;
    assert_eq!(bob_moved["to"]["tile"], "4e");
    assert_eq!((bob_moved["to"]["top"].clone(), bob_moved["to"]["left"].clone()), (json!(320), json!(320)));

    bob.send(json!({"type": "select", "seq": 3, "tile": "2e"})).await;
    let rejected = bob.until(ack(3)).await;
    assert_eq!(rejected["status"], "rejected");
    assert_eq!(rejected["reason"], "not_your_piece");

    bob.send(json!({"type": "resign", "seq": 4})).await;
    let over = alice.until(delta("game_over")).await;
    assert_eq!(over["result"], "white wins");
    assert_eq!(over["score"], "1-0");
    assert_eq!(over["reason"], "resignation");
    bob.until(delta("game_over")).await;
    assert_eq!(bob.until(ack(4)).await["status"], "ok");

    alice.closed().await;
    bob.closed().await;
    server.abort();
}

#[tokio::test]
async fn commands_before_hello_are_refused() {
    let (addr, server) = start_server(test_config()).await;
    let mut client = TestClient::connect(addr).await;

    client.send(json!({"type": "seek", "seq": 1})).await;
    let err = client.until(|v| v["type"] == "error").await;
    assert_eq!(err["code"], "handshake_required");
    assert_eq!(err["seq"], 1);

    client.send(json!({"type": "teleport", "seq": 7})).await;
    let err = client.until(|v| v["type"] == "error").await;
    assert_eq!(err["seq"], 7);

    client
        .send(json!({
            "type": "hello",
            "seq": 2,
            "token": "carol",
            "protocol_version": "1.0.0",
            "scale": 2147483647u32
        }))
        .await;
    let err = client.until(|v| v["type"] == "error").await;
    assert_eq!(err["code"], "invalid_scale");

    client
        .send(json!({"type": "hello", "seq": 4, "token": "carol", "protocol_version": "9.0.0"}))
        .await;
    let err = client.until(|v| v["type"] == "error").await;
    assert_eq!(err["code"], "protocol_mismatch");
    client.closed().await;
    server.abort();
}

#[tokio::test]
async fn seq_and_tiles_are_validated() {
    let (addr, server) = start_server(test_config()).await;
    let mut client = TestClient::connect(addr).await;
    client.hello("dave", None).await;

    client.send(json!({"type": "seek", "seq": 1})).await;
    let err = client.until(|v| v["type"] == "error").await;
    assert_eq!(err["message"], "seq must be strictly increasing");

    client.send(json!({"type": "select", "seq": 2, "tile": "9z"})).await;
    assert_eq!(client.until(|v| v["type"] == "error").await["code"], "invalid_tile");

    client.send(json!({"type": "move", "seq": 3, "tile": "4e"})).await;
    assert_eq!(client.until(|v| v["type"] == "error").await["code"], "not_in_match");

    client.send(json!({"type": "rescale", "seq": 4, "scale": 0})).await;
    assert_eq!(client.until(|v| v["type"] == "error").await["code"], "invalid_scale");

    client
        .send(json!({"type": "rescale", "seq": 5, "scale": 2147483647u32}))
        .await;
    assert_eq!(client.until(|v| v["type"] == "error").await["code"], "invalid_scale");

    client.send(json!({"type": "seek", "seq": 6})).await;
    client.until(|v| v["type"] == "waiting").await;
    client.send(json!({"type": "seek", "seq": 7})).await;
    assert_eq!(client.until(|v| v["type"] == "error").await["code"], "already_queued");
    server.abort();
}

#[tokio::test]
async fn dropped_player_can_rejoin() {
    let (addr, server) = start_server(test_config()).await;
    let mut alice = TestClient::connect(addr).await;
    let mut bob = TestClient::connect(addr).await;
    alice.hello("alice", None).await;
    bob.hello("bob", None).await;
    alice.send(json!({"type": "seek", "seq": 2})).await;
    alice.until(|v| v["type"] == "waiting").await;
    bob.send(json!({"type": "seek", "seq": 2})).await;
    let matched = bob.until(|v| v["type"] == "matched").await;

    drop(alice);
    let notice = bob
        .until(|v| v["type"] == "delta" && v["event"] == "opponent" && v["connected"] == false)
        .await;
    assert_eq!(notice["grace_secs"], 30);

    let mut again = TestClient::connect(addr).await;
    let welcome = again.hello("alice", Some(20)).await;
    assert_eq!(welcome["rejoined"], matched["match_id"]);
    let position = again.until(delta("position")).await;
    assert_eq!(position["turn"], "white");
    bob.until(|v| v["type"] == "delta" && v["event"] == "opponent" && v["connected"] == true)
        .await;

    again.send(json!({"type": "select", "seq": 2, "tile": "2e"})).await;
    let selected = again.until(delta("selected")).await;
    assert_eq!(selected["at"]["top"], 120);
    server.abort();
}

#[tokio::test]
async fn command_right_after_matched_reaches_the_room() {
    let (addr, server) = start_server(test_config()).await;
    let mut alice = TestClient::connect(addr).await;
    let mut bob = TestClient::connect(addr).await;
    alice.hello("alice", None).await;
    bob.hello("bob", None).await;

    alice.send(json!({"type": "seek", "seq": 2})).await;
    alice.until(|v| v["type"] == "waiting").await;
    bob.send(json!({"type": "seek", "seq": 2})).await;

    let first = alice
        .until(|v| v["type"] == "matched" || v["type"] == "delta")
        .await;
    assert_eq!(first["type"], "matched");
    alice.send(json!({"type": "select", "seq": 3, "tile": "2e"})).await;
    let reply = alice
        .until(|v| v["seq"] == 3 && (v["type"] == "ack" || v["type"] == "error"))
        .await;
    assert_eq!(reply["type"], "ack");
    assert_eq!(reply["status"], "ok");
    server.abort();
}
