// tests/integration/test_helpers.rs

//! Test helpers: an in-process scripted Valkey stand-in that answers the
//! handful of commands the failover client issues and records what it saw.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use valkey_vigil::core::protocol::{RespFrame, RespFrameCodec};

/// The replication role a mock server reports and mutates via `REPLICAOF`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MockRole {
    #[default]
    Master,
    ReplicaOf(String, u16),
}

/// State shared between a mock server and the test body.
#[derive(Debug, Default)]
pub struct MockState {
    pub run_id: String,
    pub role: MockRole,
    /// Every received command, rendered as space-joined words.
    pub commands: Vec<String>,
    /// When set, connections are dropped on the next command.
    pub dead: bool,
}

/// A minimal in-process Valkey stand-in bound to a loopback port.
pub struct MockValkey {
    addr: SocketAddr,
    pub state: Arc<Mutex<MockState>>,
    accept_task: JoinHandle<()>,
}

impl MockValkey {
    pub async fn start(run_id: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock listener");
        let addr = listener.local_addr().expect("mock listener addr");
        let state = Arc::new(Mutex::new(MockState {
            run_id: run_id.to_string(),
            ..Default::default()
        }));
        let accept_task = spawn_accept_loop(listener, state.clone());
        Self {
            addr,
            state,
            accept_task,
        }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// The `host:port` form used in node lists.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host(), self.port())
    }

    pub fn run_id(&self) -> String {
        self.state.lock().unwrap().run_id.clone()
    }

    pub fn set_run_id(&self, run_id: &str) {
        self.state.lock().unwrap().run_id = run_id.to_string();
    }

    pub fn role(&self) -> MockRole {
        self.state.lock().unwrap().role.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Number of received commands starting with `prefix`.
    pub fn command_count(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Simulates the server process dying: the listener goes away and every
    /// established connection is dropped on its next command.
    pub fn kill(&self) {
        self.accept_task.abort();
        self.state.lock().unwrap().dead = true;
    }

    /// Simulates a restart on the same port. The server comes back as a
    /// master with a fresh command log, the way a restarted Valkey would.
    pub async fn restart(&mut self, run_id: &str) {
        let listener = TcpListener::bind(self.addr)
            .await
            .expect("rebind mock listener");
        {
            let mut state = self.state.lock().unwrap();
            state.dead = false;
            state.run_id = run_id.to_string();
            state.role = MockRole::Master;
            state.commands.clear();
        }
        self.accept_task = spawn_accept_loop(listener, self.state.clone());
    }
}

impl Drop for MockValkey {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

fn spawn_accept_loop(listener: TcpListener, state: Arc<Mutex<MockState>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(serve_connection(stream, state.clone()));
        }
    })
}

async fn serve_connection(stream: TcpStream, state: Arc<Mutex<MockState>>) {
    let mut framed = Framed::new(stream, RespFrameCodec);

    while let Some(Ok(frame)) = framed.next().await {
        let parts = command_parts(&frame);
        if parts.is_empty() {
            break;
        }

        let reply = {
            let mut state = state.lock().unwrap();
            if state.dead {
                return;
            }
            state.commands.push(parts.join(" "));

            match parts[0].to_uppercase().as_str() {
                "PING" => RespFrame::SimpleString("PONG".to_string()),
                "AUTH" => RespFrame::SimpleString("OK".to_string()),
                "INFO" => {
                    let section = parts.get(1).map(|s| s.to_lowercase()).unwrap_or_default();
                    RespFrame::BulkString(Bytes::from(render_info(&state, &section)))
                }
                "REPLICAOF" => {
                    state.role = match (parts.get(1), parts.get(2)) {
                        (Some(no), Some(one))
                            if no.eq_ignore_ascii_case("no") && one.eq_ignore_ascii_case("one") =>
                        {
                            MockRole::Master
                        }
                        (Some(host), Some(port)) => {
                            MockRole::ReplicaOf(host.clone(), port.parse().unwrap_or(0))
                        }
                        _ => state.role.clone(),
                    };
                    RespFrame::SimpleString("OK".to_string())
                }
                _ => RespFrame::Error("ERR unknown command".to_string()),
            }
        };

        if framed.send(reply).await.is_err() {
            break;
        }
    }
}

fn command_parts(frame: &RespFrame) -> Vec<String> {
    let RespFrame::Array(items) = frame else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            RespFrame::BulkString(bs) => Some(String::from_utf8_lossy(bs).to_string()),
            _ => None,
        })
        .collect()
}

fn render_info(state: &MockState, section: &str) -> String {
    match section {
        "server" => format!("# Server\r\nrun_id:{}\r\ntcp_port:0\r\n", state.run_id),
        "replication" => match &state.role {
            MockRole::Master => {
                "# Replication\r\nrole:master\r\nconnected_slaves:0\r\n".to_string()
            }
            MockRole::ReplicaOf(host, port) => format!(
                "# Replication\r\nrole:slave\r\nmaster_host:{host}\r\nmaster_port:{port}\r\n"
            ),
        },
        _ => String::new(),
    }
}
