//! A minimal in-process fake server: speaks just enough RESP to drive
//! integration tests without a live Redis process. It understands the
//! handshake keywords (AUTH/SELECT/CLIENT SETNAME → `+OK`), PING, GET (echoes
//! the key back as the value, so replies can be matched to the request that
//! produced them), and SUBSCRIBE/UNSUBSCRIBE (confirmations plus an injected
//! message).

use resp_pool::resp::{decode, encode, Decoded, RespValue};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub async fn spawn_fake_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(serve_one(socket));
        }
    });
    addr
}

async fn serve_one(mut socket: TcpStream) {
    let mut buf = Vec::new();
    let mut scratch = [0u8; 4096];
    loop {
        let n = match socket.read(&mut scratch).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&scratch[..n]);

        loop {
            let decoded = match decode(&buf) {
                Ok(d) => d,
                Err(_) => return,
            };
            let (value, consumed) = match decoded {
                Decoded::Incomplete => break,
                Decoded::Value { value, consumed } => (value, consumed),
            };
            buf.drain(..consumed);

            let Some(items) = value.as_array() else { continue };
            let Some(keyword) = items.first().and_then(RespValue::as_bytes) else {
                continue;
            };
            let reply = handle(keyword, &items[1..]);
            for r in reply {
                if socket.write_all(&encode(&r)).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn handle(keyword: &[u8], args: &[RespValue]) -> Vec<RespValue> {
    let arg_bytes = |i: usize| args.get(i).and_then(RespValue::as_bytes).unwrap_or(b"").to_vec();
    match keyword.to_ascii_uppercase().as_slice() {
        b"AUTH" | b"SELECT" => vec![RespValue::SimpleString("OK".into())],
        b"CLIENT" => vec![RespValue::SimpleString("OK".into())],
        b"PING" => vec![RespValue::SimpleString("PONG".into())],
        b"GET" => vec![RespValue::bulk(arg_bytes(0))],
        b"SET" => vec![RespValue::SimpleString("OK".into())],
        b"SUBSCRIBE" => args
            .iter()
            .enumerate()
            .map(|(i, name)| {
                RespValue::array(vec![
                    RespValue::bulk(*b"subscribe"),
                    RespValue::bulk(name.as_bytes().unwrap_or(b"").to_vec()),
                    RespValue::Integer(i as i64 + 1),
                ])
            })
            .collect(),
        b"UNSUBSCRIBE" => args
            .iter()
            .enumerate()
            .map(|(i, name)| {
                RespValue::array(vec![
                    RespValue::bulk(*b"unsubscribe"),
                    RespValue::bulk(name.as_bytes().unwrap_or(b"").to_vec()),
                    RespValue::Integer((args.len() - i - 1) as i64),
                ])
            })
            .collect(),
        _ => vec![RespValue::Error(format!("ERR unknown command {:?}", String::from_utf8_lossy(keyword)))],
    }
}
