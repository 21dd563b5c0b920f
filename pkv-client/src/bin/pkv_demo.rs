//! # Batching Demo
//!
//! Purpose: Exercise plain pipelines, transactions and a WATCH-based atomic
//! increment against a live server.
//!
//! Usage: `pkv-demo [config.json]`. Without a config file the client connects
//! to 127.0.0.1:6379, database 8. Set `RUST_LOG=debug` to see round trips.

use std::env;
use std::fs;

use anyhow::{bail, Context, Result};
use pkv_client::{ClientConfig, KVClient, Reply};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn load_config() -> Result<ClientConfig> {
    match env::args().nth(1) {
        Some(path) => {
            let raw = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))
        }
        None => Ok(ClientConfig {
            database: 8,
            ..ClientConfig::default()
        }),
    }
}

/// Increments `key` with WATCH + read + MULTI/EXEC, retrying on conflicts.
fn atomic_incr(client: &KVClient, key: &str) -> Result<i64> {
    for attempt in 1..=5 {
        let mut next = 0;
        let reply = client.transaction(|tx| {
            let current = tx.watch([key]).get(key).flush()?;
            let value = match current.elem(1) {
                Some(elem) if !elem.is_nil() => elem.int()?,
                _ => 0,
            };
            next = value + 1;
            debug!(state = ?tx.state(), current = value, "read watched key");
            tx.set(key, next);
            Ok(())
        })?;

        match reply.error() {
            None => return Ok(next),
            Some(err) => info!(attempt, error = %err, "transaction conflict, retrying"),
        }
    }
    bail!("gave up incrementing {key}")
}

fn check(reply: &Reply) -> Result<()> {
    if let Some(err) = reply.error() {
        bail!("redis: {err}");
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let client = KVClient::with_config(load_config()?).context("connecting")?;
    check(&client.call("FLUSHDB", Vec::<&str>::new())?)?;

    let reply = client.multi_call(|mc| {
        mc.set("multikey", "multival").get("multikey");
        Ok(())
    })?;
    check(&reply)?;
    let value = reply.elems()[1].str()?;
    info!(%value, "multikey");

    let reply = client.transaction(|tx| {
        tx.set("trankey", "tranval").get("trankey");
        Ok(())
    })?;
    check(&reply)?;
    let value = reply.elems()[1].str()?;
    info!(%value, "trankey");

    for _ in 0..3 {
        atomic_incr(&client, "ctrankey")?;
    }
    let value = client.call("GET", ["ctrankey"])?.str()?;
    info!(%value, "ctrankey");
    Ok(())
}
