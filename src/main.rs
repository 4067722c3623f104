/*!
 * BridgeFS Console
 *
 * Hosts a filesystem on the terminal:
 * - stdin lines are delivered to the port inbox as `S0` messages
 * - outbound `S1`/`S2` messages are printed to stdout/stderr
 * - a worker thread echoes its stdin to stdout and into a store file
 *
 * End of input is signalled to the worker with an EOT byte (Ctrl-D).
 */

use bridgefs::channel::{parse_port_message, port_message};
use bridgefs::{init_tracing, FileSystem, FsConfig, MemoryStore};
use bytes::Bytes;
use miette::{IntoDiagnostic, Result};
use nix::libc;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};

const EOT: u8 = 0x04;
const TRANSCRIPT: &str = "/session/transcript";

fn main() -> Result<()> {
    init_tracing();

    let (tx, rx) = flume::unbounded::<Bytes>();
    let fs = Arc::new(FileSystem::new(
        FsConfig::from_env(),
        Arc::new(MemoryStore::new()),
        Arc::new(tx),
    )?);
    info!("Console filesystem ready");

    let printer = thread::Builder::new()
        .name("bridgefs-printer".into())
        .spawn(move || print_outbound(rx))
        .into_diagnostic()?;

    let worker_fs = Arc::clone(&fs);
    let worker = thread::Builder::new()
        .name("bridgefs-worker".into())
        .spawn(move || echo(&worker_fs))
        .into_diagnostic()?;

    for line in io::stdin().lock().lines() {
        let mut line = line.into_diagnostic()?;
        line.push('\n');
        fs.handle_message(&port_message(0, line.as_bytes()));
    }
    fs.handle_message(&port_message(0, &[EOT]));

    match worker.join() {
        Ok(Ok(stored)) => info!(bytes = stored, path = TRANSCRIPT, "Worker finished"),
        Ok(Err(errno)) => error!(errno = %errno, "Worker failed"),
        Err(_) => error!("Worker panicked"),
    }

    info!(stats = ?fs.stats(), "Shutting down");
    fs.shutdown();
    drop(fs);

    if printer.join().is_err() {
        error!("Printer panicked");
    }
    Ok(())
}

/// Copy stdin to stdout and the transcript until EOT
fn echo(fs: &FileSystem) -> bridgefs::FsResult<u64> {
    fs.mkdir("/session", 0o755)?;
    let fd = fs.open(
        TRANSCRIPT,
        libc::O_CREAT | libc::O_WRONLY | libc::O_APPEND,
        0o644,
    )?;

    loop {
        let chunk = fs.read(0, 4096)?;
        let (data, done) = match chunk.iter().position(|b| *b == EOT) {
            Some(end) => (chunk.slice(..end), true),
            None => (chunk, false),
        };
        if !data.is_empty() {
            fs.write(1, &data)?;
            fs.write(fd, &data)?;
        }
        if done {
            break;
        }
    }

    fs.close(fd)?;
    let stored = fs.stat(TRANSCRIPT)?.size;
    fs.write(2, format!("stored {} bytes in {}\n", stored, TRANSCRIPT).as_bytes())?;
    Ok(stored)
}

/// Print port output until every sender is gone
fn print_outbound(rx: flume::Receiver<Bytes>) {
    for message in rx.iter() {
        let written = match parse_port_message(&message) {
            Some((1, data)) => io::stdout().write_all(data).and_then(|_| io::stdout().flush()),
            Some((2, data)) => io::stderr().write_all(data),
            Some((stream, _)) => {
                warn!(stream = stream, "Output on an unknown stream");
                Ok(())
            }
            None => {
                warn!(len = message.len(), "Unexpected outbound message");
                Ok(())
            }
        };
        if let Err(e) = written {
            error!(error = %e, "Failed to print port output");
        }
    }
}
