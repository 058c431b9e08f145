//! A small RESP server backed by `MemoryStore`, enough to exercise the client

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tollgate::{CounterStore, KeyTtl, MemoryStore, StoreError};
use tollgate_client::{RespParser, RespSerializer, RespValue};

pub struct MockRedis {
    pub addr: SocketAddr,
    pub store: Arc<MemoryStore>,
    pub lists: Arc<Mutex<HashMap<String, Vec<Bytes>>>>,
}

impl MockRedis {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let store = Arc::new(MemoryStore::new());
        let lists = Arc::new(Mutex::new(HashMap::new()));

        let state = State {
            store: store.clone(),
            lists: lists.clone(),
        };
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let state = state.clone();
                tokio::spawn(async move { serve(socket, state).await });
            }
        });

        Self { addr, store, lists }
    }

    pub fn list(&self, name: &str) -> Vec<Bytes> {
        self.lists.lock().get(name).cloned().unwrap_or_default()
    }
}

#[derive(Clone)]
struct State {
    store: Arc<MemoryStore>,
    lists: Arc<Mutex<HashMap<String, Vec<Bytes>>>>,
}

async fn serve(mut socket: TcpStream, state: State) {
    let mut buf = BytesMut::with_capacity(4096);
    let mut parser = RespParser::new();

    loop {
        while let Ok(Some((command, consumed))) = parser.parse(&buf) {
            buf.advance(consumed);
            let reply = dispatch(command, &state).await;
            if socket
                .write_all(&RespSerializer::serialize(&reply))
                .await
                .is_err()
            {
                return;
            }
        }
        match socket.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

fn args(command: RespValue) -> Vec<Bytes> {
    match command {
        RespValue::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                RespValue::BulkString(Some(data)) => Some(data),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn text(arg: &Bytes) -> String {
    String::from_utf8_lossy(arg).into_owned()
}

fn int_arg(arg: &Bytes) -> i64 {
    text(arg).parse().unwrap_or_default()
}

fn reply<T>(result: Result<T, StoreError>, map: impl FnOnce(T) -> RespValue) -> RespValue {
    match result {
        Ok(value) => map(value),
        Err(StoreError::NotAnInteger { .. }) => {
            RespValue::Error("ERR value is not an integer or out of range".to_string())
        }
        Err(e) => RespValue::Error(format!("ERR {e}")),
    }
}

async fn dispatch(command: RespValue, state: &State) -> RespValue {
    let args = args(command);
    let Some(name) = args.first().map(|a| text(a).to_ascii_uppercase()) else {
        return RespValue::Error("ERR empty command".to_string());
    };
    let store = &state.store;

    match (name.as_str(), &args[1..]) {
        ("PING", []) => RespValue::SimpleString("PONG".to_string()),
        ("INCR", [key]) => reply(store.incr(&text(key)).await, RespValue::Integer),
        ("DECRBY", [key, amount]) => reply(
            store.decr_by(&text(key), int_arg(amount)).await,
            RespValue::Integer,
        ),
        ("GET", [key]) => reply(store.get(&text(key)).await, RespValue::BulkString),
        ("SET", [key, value]) => reply(store.set(&text(key), value.clone(), None).await, |_| {
            RespValue::SimpleString("OK".to_string())
        }),
        ("SET", [key, value, px, ms]) if text(px).eq_ignore_ascii_case("PX") => {
            let ttl = Duration::from_millis(int_arg(ms) as u64);
            reply(store.set(&text(key), value.clone(), Some(ttl)).await, |_| {
                RespValue::SimpleString("OK".to_string())
            })
        }
        ("PEXPIRE", [key, ms]) => {
            let ttl = Duration::from_millis(int_arg(ms) as u64);
            reply(store.expire(&text(key), ttl).await, |set| {
                RespValue::Integer(i64::from(set))
            })
        }
        ("PTTL", [key]) => reply(store.ttl(&text(key)).await, |ttl| match ttl {
            KeyTtl::Missing => RespValue::Integer(-2),
            KeyTtl::Persistent => RespValue::Integer(-1),
            KeyTtl::Expires(left) => RespValue::Integer(left.as_millis() as i64),
        }),
        ("DEL", [key]) => reply(store.del(&text(key)).await, |deleted| {
            RespValue::Integer(i64::from(deleted))
        }),
        ("RPUSH", [list, value]) => {
            let mut lists = state.lists.lock();
            let entries = lists.entry(text(list)).or_default();
            entries.push(value.clone());
            RespValue::Integer(entries.len() as i64)
        }
        _ => RespValue::Error(format!("ERR unknown command '{name}'")),
    }
}
