use std::{net::TcpStream, sync::mpsc, time::Duration};

use anyhow::{Context, Result};
use bytes::Bytes;

use redis_mux::{Command, Multiplexer, MultiplexerConfig, RESPFrame, WorkerPool};

/**
 * Runs a few commands against a Redis server through the pipeline in each
 * calling style, then prints the pipeline counters.
 *
 * Usage: redis-mux [ADDR] [COMMAND [ARGS...]]
 */
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let address = args.next().unwrap_or_else(|| "127.0.0.1:6379".to_string());
    let custom: Vec<String> = args.collect();

    let config = MultiplexerConfig::from_env();
    let pool = WorkerPool::new(config.pool_threads).context("failed to start worker pool")?;
    let mux = Multiplexer::with_pool(config, pool.clone());

    let stream = TcpStream::connect(&address).with_context(|| format!("failed to connect to {}", address))?;
    stream.set_nodelay(true)?;
    let source = stream.try_clone()?;
    let connection = mux.attach_stream(address.clone(), source, stream)?;
    tracing::info!(address, "connected");

    // Blocking
    let pong: String = mux.execute(&connection, Command::ping())?;
    println!("PING -> {}", pong);

    // Continuation
    let (sender, receiver) = mpsc::channel();
    for word in ["first", "second", "third"] {
        let sender = sender.clone();
        mux.execute_with(&connection, Command::new("ECHO").arg(word), move |reply: Result<String, _>| {
            let _ = sender.send(reply);
        });
    }
    drop(sender);
    for reply in receiver.iter() {
        println!("ECHO (callback) -> {}", reply?);
    }

    // Async
    let echoed = pool
        .handle()
        .block_on(mux.execute_async::<Bytes>(&connection, Command::new("ECHO").arg("async")))?;
    println!("ECHO (async) -> {}", String::from_utf8_lossy(&echoed));

    mux.heartbeat(&connection);

    if let Some((name, rest)) = custom.split_first() {
        let command = rest.iter().fold(Command::new(name), |command, arg| command.arg(arg));
        match mux.execute_timeout::<RESPFrame>(&connection, command, Duration::from_secs(10)) {
            Ok(reply) => println!("{} -> {:?}", name, reply),
            Err(err) => println!("{} -> error: {}", name, err),
        }
    }

    println!("{:#?}", mux.stats());
    mux.shutdown();
    Ok(())
}
