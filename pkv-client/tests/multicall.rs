use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use pkv_client::{BatchSender, Call, ClientConfig, ClientError, Connection, KVClient, ReplyError};

/// Answers one parsed command: `(connection, command, args, stream)`, with
/// both indexes counted from zero.
type Handler = fn(usize, usize, Vec<Vec<u8>>, &mut TcpStream);

/// Scripted RESP2 server on an ephemeral port. Each of the first
/// `connections` clients is served on its own thread until it hangs up.
fn start_server(connections: usize, handler: Handler) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    thread::spawn(move || {
        for (conn, stream) in listener.incoming().take(connections).enumerate() {
            let stream = stream.expect("accept");
            thread::spawn(move || serve(conn, stream, handler));
        }
    });

    addr
}

fn serve(conn: usize, mut stream: TcpStream, handler: Handler) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let mut reader = BufReader::new(stream.try_clone().expect("clone"));
    let mut seq = 0;
    while let Some(args) = next_command(&mut reader) {
        handler(conn, seq, args, &mut stream);
        seq += 1;
    }
}

/// Reads one `*N` array of bulk strings; `None` once the client is gone.
fn next_command(reader: &mut impl BufRead) -> Option<Vec<Vec<u8>>> {
    let count = header(reader, '*')?;
    (0..count)
        .map(|_| {
            let len = header(reader, '$')?;
            let mut data = vec![0u8; len + 2];
            reader.read_exact(&mut data).ok()?;
            data.truncate(len);
            Some(data)
        })
        .collect()
}

fn header(reader: &mut impl BufRead, marker: char) -> Option<usize> {
    let mut line = String::new();
    reader.read_line(&mut line).ok()?;
    line.strip_suffix("\r\n")?.strip_prefix(marker)?.parse().ok()
}

fn write_raw(stream: &mut TcpStream, data: &[u8]) {
    let _ = stream.write_all(data);
    let _ = stream.flush();
}

fn client_with_addr(addr: String) -> KVClient {
    let config = ClientConfig {
        addr,
        read_timeout: Some(Duration::from_secs(1)),
        write_timeout: Some(Duration::from_secs(1)),
        connect_timeout: Some(Duration::from_secs(1)),
        ..ClientConfig::default()
    };
    KVClient::with_config(config).expect("client")
}

#[test]
fn multi_call_pipelines_in_order() {
    let addr = start_server(1, |_, idx, args, stream| match idx {
        0 => {
            assert_eq!(args, vec![b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()]);
            write_raw(stream, b"+OK\r\n");
        }
        1 => {
            assert_eq!(args[0], b"GET");
            write_raw(stream, b"$1\r\nv\r\n");
        }
        _ => {
            assert_eq!(args[0], b"INCR");
            write_raw(stream, b"-ERR value is not an integer\r\n");
        }
    });

    let client = client_with_addr(addr);
    let reply = client
        .multi_call(|mc| {
            mc.set("k", "v").get("k").incr("k");
            Ok(())
        })
        .expect("multi call");

    assert_eq!(reply.error(), None);
    assert_eq!(reply.len(), 3);
    assert!(reply.elems()[0].elems().is_empty());
    assert_eq!(reply.elems()[0].str().expect("status"), "OK");
    assert_eq!(reply.elems()[1].str().expect("bulk"), "v");
    assert!(reply.elems()[2].error().is_some());
}

#[test]
fn transaction_returns_body_results_only() {
    let addr = start_server(1, |_, idx, args, stream| match idx {
        0 => {
            assert_eq!(args[0], b"MULTI");
            write_raw(stream, b"+OK\r\n");
        }
        1 | 2 => write_raw(stream, b"+QUEUED\r\n"),
        _ => {
            assert_eq!(args[0], b"EXEC");
            write_raw(stream, b"*2\r\n+OK\r\n$1\r\n1\r\n");
        }
    });

    let client = client_with_addr(addr);
    let reply = client
        .transaction(|tx| {
            tx.set("a", 1).get("a");
            Ok(())
        })
        .expect("transaction");

    assert_eq!(reply.error(), None);
    assert_eq!(reply.len(), 2);
    assert_eq!(reply.elems()[0].str().expect("ack"), "OK");
    assert_eq!(reply.elems()[1].str().expect("value"), "1");
}

#[test]
fn transaction_abort_on_watched_key_change() {
    let addr = start_server(1, |_, idx, args, stream| match idx {
        0 => {
            assert_eq!(args, vec![b"WATCH".to_vec(), b"counter".to_vec()]);
            write_raw(stream, b"+OK\r\n");
        }
        1 => {
            assert_eq!(args[0], b"GET");
            write_raw(stream, b"$1\r\n5\r\n");
        }
        2 => {
            assert_eq!(args[0], b"MULTI");
            write_raw(stream, b"+OK\r\n");
        }
        3 => {
            assert_eq!(args, vec![b"SET".to_vec(), b"counter".to_vec(), b"6".to_vec()]);
            write_raw(stream, b"+QUEUED\r\n");
        }
        _ => {
            assert_eq!(args[0], b"EXEC");
            write_raw(stream, b"*-1\r\n");
        }
    });

    let client = client_with_addr(addr);
    let reply = client
        .transaction(|tx| {
            let current = tx.watch(["counter"]).get("counter").flush()?;
            let next = current.elems()[1].int()? + 1;
            tx.set("counter", next);
            Ok(())
        })
        .expect("transaction");

    assert_eq!(reply.error(), Some(&ReplyError::UnknownTransaction));
    assert!(reply.is_empty());
}

#[test]
fn transaction_exec_error_is_top_level() {
    let addr = start_server(1, |_, idx, _args, stream| match idx {
        0 => write_raw(stream, b"+OK\r\n"),
        1 => write_raw(stream, b"-ERR unknown command 'BOGUS'\r\n"),
        _ => write_raw(stream, b"-EXECABORT Transaction discarded because of previous errors.\r\n"),
    });

    let client = client_with_addr(addr);
    let reply = client
        .transaction(|tx| {
            tx.call("BOGUS", ["x"]);
            Ok(())
        })
        .expect("transaction");

    assert!(matches!(
        reply.error(),
        Some(ReplyError::Server(message)) if message.starts_with("EXECABORT")
    ));
    assert!(reply.is_empty());
}

#[test]
fn connect_selects_database() {
    let addr = start_server(1, |_, idx, args, stream| {
        if idx == 0 {
            assert_eq!(args, vec![b"SELECT".to_vec(), b"8".to_vec()]);
            write_raw(stream, b"+OK\r\n");
        } else {
            assert_eq!(args, vec![b"PING".to_vec()]);
            write_raw(stream, b"+PONG\r\n");
        }
    });

    let config = ClientConfig {
        addr,
        database: 8,
        read_timeout: Some(Duration::from_secs(1)),
        ..ClientConfig::default()
    };
    let client = KVClient::with_config(config).expect("client");
    let reply = client.call("PING", Vec::<&str>::new()).expect("ping");
    assert_eq!(reply.str().expect("pong"), "PONG");
}

#[test]
fn truncated_reply_is_transport_error() {
    let addr = start_server(1, |_, _, _args, stream| {
        write_raw(stream, b"$5\r\nab");
        let _ = stream.shutdown(std::net::Shutdown::Write);
    });

    let client = client_with_addr(addr);
    let result = client.multi_call(|mc| {
        mc.get("k");
        Ok(())
    });
    assert!(matches!(result, Err(ClientError::Io(_))));
}

fn echo_key(stream: &mut TcpStream, args: &[Vec<u8>]) {
    let key = &args[1];
    let mut reply = format!("${}\r\n", key.len()).into_bytes();
    reply.extend_from_slice(key);
    reply.extend_from_slice(b"\r\n");
    write_raw(stream, &reply);
}

fn impatient_config(addr: String) -> ClientConfig {
    ClientConfig {
        addr,
        read_timeout: Some(Duration::from_millis(100)),
        connect_timeout: Some(Duration::from_secs(1)),
        ..ClientConfig::default()
    }
}

#[test]
fn timed_out_connection_is_not_reused() {
    // The first connection answers too late; its reply must never be read
    // as the answer to a later call.
    let addr = start_server(2, |conn, _, args, stream| {
        if conn == 0 {
            thread::sleep(Duration::from_millis(300));
        }
        echo_key(stream, &args);
    });

    let client = KVClient::with_config(impatient_config(addr)).expect("client");
    let first = client.multi_call(|mc| {
        mc.get("A");
        Ok(())
    });
    assert!(matches!(first, Err(ClientError::Io(_))));

    let second = client
        .multi_call(|mc| {
            mc.get("B");
            Ok(())
        })
        .expect("fresh connection");
    assert_eq!(second.len(), 1);
    assert_eq!(second.elems()[0].str().expect("value"), "B");

    let third = client.call("GET", ["C"]).expect("call");
    assert_eq!(third.str().expect("value"), "C");
}

#[test]
fn broken_connection_refuses_further_batches() {
    let addr = start_server(1, |_, _, args, stream| {
        thread::sleep(Duration::from_millis(300));
        echo_key(stream, &args);
    });

    let mut conn = Connection::connect(&impatient_config(addr)).expect("connect");
    let first = conn.send_batch(vec![Call::new("GET", ["A"])]);
    assert!(matches!(first, Err(ClientError::Io(_))));
    assert!(!conn.is_valid());

    thread::sleep(Duration::from_millis(300));
    let second = conn.send_batch(vec![Call::new("GET", ["B"])]);
    assert!(matches!(second, Err(ClientError::ConnectionBroken)));
}
