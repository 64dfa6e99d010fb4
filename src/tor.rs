//! Tor control-port client, just enough to ask for a fresh circuit.

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Quote a control-port argument
fn quoted(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn authenticate_command(password: Option<&str>) -> String {
    match password.filter(|p| !p.is_empty()) {
        Some(password) => format!("AUTHENTICATE {}\r\n", quoted(password)),
        None => "AUTHENTICATE\r\n".to_string(),
    }
}

async fn command<S>(stream: &mut BufReader<S>, line: &str, what: &str) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    stream.get_mut().write_all(line.as_bytes()).await?;
    stream.get_mut().flush().await?;

    let mut reply = String::new();
    stream
        .read_line(&mut reply)
        .await
        .with_context(|| format!("no reply to {what}"))?;
    let reply = reply.trim_end();
    debug!("Tor control reply to {}: {}", what, reply);

    if reply.starts_with("250") {
        Ok(())
    } else if reply.is_empty() {
        Err(anyhow!("Tor control port closed the connection during {what}"))
    } else {
        Err(anyhow!("Tor rejected {}: {}", what, reply))
    }
}

/// Authenticate on the control port at `address` and send `SIGNAL NEWNYM`
pub async fn request_new_circuit(address: &str, password: Option<&str>) -> Result<()> {
    let stream = TcpStream::connect(address)
        .await
        .with_context(|| format!("Failed to connect to Tor control port at {address}"))?;
    let mut stream = BufReader::new(stream);

    command(&mut stream, &authenticate_command(password), "AUTHENTICATE").await?;
    command(&mut stream, "SIGNAL NEWNYM\r\n", "SIGNAL NEWNYM").await?;

    info!("🧅 Requested a new Tor circuit");
    Ok(())
}
