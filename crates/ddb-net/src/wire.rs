use anyhow::{Context, Result};
use ddb_proto::{decode, encode, frame_len, Message};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Write one `u32 big-endian length || JSON payload` frame.
pub async fn write_frame(stream: &mut TcpStream, msg: &Message) -> Result<()> {
    let bytes = encode(msg)?;
    stream
        .write_all(&(bytes.len() as u32).to_be_bytes())
        .await
        .context("write frame length")?;
    stream.write_all(&bytes).await.context("write frame body")?;
    Ok(())
}

/// Read one frame, enforce the length bounds, decode, and verify the
/// checksum. Protocol violations surface as [`ddb_proto::WireError`]
/// inside the error chain so callers can answer them distinctly.
pub async fn read_frame(stream: &mut TcpStream) -> Result<Message> {
    let mut prefix = [0u8; 4];
    stream
        .read_exact(&mut prefix)
        .await
        .context("read frame length")?;
    let len = frame_len(prefix)?;

    let mut body = vec![0u8; len];
    stream
        .read_exact(&mut body)
        .await
        .context("read frame body")?;
    Ok(decode(&body)?)
}
