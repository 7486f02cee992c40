//! In-process stand-in for beanstalkd used by the unit tests.
//!
//! Understands `use` and `put`, hands out increasing job ids starting at 1,
//! and keeps enough bookkeeping to observe concurrency from the broker side.

use core::time::Duration;
use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

#[derive(Default)]
struct BrokerState {
    next_id: AtomicU64,
    connections: AtomicUsize,
    closed: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    commands: Mutex<Vec<String>>,
}

pub(crate) struct FakeBroker {
    addr: SocketAddr,
    state: Arc<BrokerState>,
    accept_task: JoinHandle<()>,
}

impl FakeBroker {
    /// A body that makes the broker drop the connection instead of replying.
    pub(crate) const HANG_UP: &'static [u8] = b"__hang_up__";

    /// A body the broker rejects with `JOB_TOO_BIG`.
    pub(crate) const TOO_BIG: &'static [u8] = b"__too_big__";

    pub(crate) async fn start() -> Self {
        Self::with_delay(Duration::ZERO).await
    }

    /// Starts a broker that holds every `put` for `delay` before replying.
    pub(crate) async fn with_delay(delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(BrokerState {
            next_id: AtomicU64::new(1),
            ..BrokerState::default()
        });

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    serve(stream, &state, delay).await;
                    state.closed.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        Self {
            addr,
            state,
            accept_task,
        }
    }

    /// An address nothing listens on.
    pub(crate) async fn unreachable_endpoint() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr.to_string()
    }

    pub(crate) fn endpoint(&self) -> String {
        self.addr.to_string()
    }

    pub(crate) fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Puts currently held by the broker before replying.
    pub(crate) fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.state.commands.lock().unwrap().clone()
    }

    /// Waits until at least `count` client connections have been closed.
    pub(crate) async fn wait_closed(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.state.closed.load(Ordering::SeqCst) < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connections were not closed");
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve(stream: TcpStream, state: &BrokerState, delay: Duration) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let command = line.trim_end().to_string();
        state.commands.lock().unwrap().push(command.clone());

        let reply = if let Some(tube) = command.strip_prefix("use ") {
            format!("USING {tube}\r\n")
        } else if let Some(args) = command.strip_prefix("put ") {
            let Some(len) = args.split(' ').nth(3).and_then(|n| n.parse::<usize>().ok()) else {
                return;
            };
            let mut body = vec![0; len + 2];
            if reader.read_exact(&mut body).await.is_err() {
                return;
            }
            body.truncate(len);

            if body == FakeBroker::HANG_UP {
                return;
            }
            if body == FakeBroker::TOO_BIG {
                "JOB_TOO_BIG\r\n".to_string()
            } else {
                let current = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                state.max_in_flight.fetch_max(current, Ordering::SeqCst);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                state.in_flight.fetch_sub(1, Ordering::SeqCst);

                let id = state.next_id.fetch_add(1, Ordering::SeqCst);
                format!("INSERTED {id}\r\n")
            }
        } else {
            "UNKNOWN_COMMAND\r\n".to_string()
        };

        if write.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}
