//! Stdio transport: a bidirectional line-delimited JSON-RPC relay between
//! the calling process's own stdin/stdout and a spawned child MCP server.
//!
//! Generalizes the teacher's synchronous `mcp.rs::McpServer::run_stdio`
//! (one process, `std::io::stdin().lines()`) into an async relay across
//! two processes: the child is the real tool server, and every line that
//! passes through in either direction is classified and, where relevant,
//! handed to the [`MessageHandler`].

use std::process::Stdio;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::codec::{self, Kind};
use crate::handler::{MessageHandler, Outcome};

/// Lines longer than this are refused — the caller forwards them unchanged
/// rather than buffering an unbounded amount of memory.
const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StdioProxyError {
    #[error("failed to spawn child process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("child process exposes no stdin")]
    MissingChildStdin,
    #[error("child process exposes no stdout")]
    MissingChildStdout,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs the stdio proxy to completion: spawns `command`, relays
/// `client_in`/`client_out` against the child's stdin/stdout, and returns
/// once both directions have closed and the child has exited.
pub async fn run<R, W>(
    command: &str,
    args: &[String],
    handler: Arc<MessageHandler>,
    client_in: R,
    client_out: W,
) -> Result<(), StdioProxyError>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let mut child = Command::new(command)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(StdioProxyError::Spawn)?;

    let child_stdin = child.stdin.take().ok_or(StdioProxyError::MissingChildStdin)?;
    let child_stdout = child.stdout.take().ok_or(StdioProxyError::MissingChildStdout)?;

    let client_out = Arc::new(Mutex::new(client_out));

    let to_server = client_to_server(client_in, child_stdin, Arc::clone(&handler), Arc::clone(&client_out));
    let to_client = server_to_client(child_stdout, Arc::clone(&client_out), handler);

    let (to_server_result, to_client_result) = tokio::join!(to_server, to_client);
    to_server_result?;
    to_client_result?;

    wait_for_child(&mut child).await
}

async fn wait_for_child(child: &mut Child) -> Result<(), StdioProxyError> {
    child.wait().await?;
    Ok(())
}

async fn client_to_server<R, W>(
    client_in: R,
    mut child_stdin: W,
    handler: Arc<MessageHandler>,
    client_out: Arc<Mutex<impl tokio::io::AsyncWrite + Unpin>>,
) -> Result<(), StdioProxyError>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(client_in);
    let mut line = String::new();
    loop {
        line.clear();
        let bytes_read = read_capped_line(&mut reader, &mut line).await?;
        if bytes_read == 0 {
            break;
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            continue;
        }

        match codec::parse(trimmed) {
            Ok((message, Kind::ToolsCall)) => {
                match handler.handle_tools_call(&message) {
                    Outcome::Block { response } => write_line(&client_out, &response).await?,
                    Outcome::Forward => write_line_raw(&mut child_stdin, trimmed).await?,
                }
            }
            Ok((message, Kind::ResourcesRead)) => {
                match handler.handle_resources_read(&message) {
                    Outcome::Block { response } => write_line(&client_out, &response).await?,
                    Outcome::Forward => write_line_raw(&mut child_stdin, trimmed).await?,
                }
            }
            _ => write_line_raw(&mut child_stdin, trimmed).await?,
        }
    }

    child_stdin.shutdown().await?;
    Ok(())
}

async fn server_to_client<R>(
    child_stdout: R,
    client_out: Arc<Mutex<impl tokio::io::AsyncWrite + Unpin>>,
    handler: Arc<MessageHandler>,
) -> Result<(), StdioProxyError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut reader = BufReader::new(child_stdout);
    let mut line = String::new();
    loop {
        line.clear();
        let bytes_read = read_capped_line(&mut reader, &mut line).await?;
        if bytes_read == 0 {
            break;
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            continue;
        }

        let forwarded = handler
            .filter_tools_list_response(trimmed)
            .unwrap_or_else(|| trimmed.to_string());
        write_line(&client_out, &forwarded).await?;
    }
    Ok(())
}

async fn read_capped_line<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    line: &mut String,
) -> Result<usize, StdioProxyError> {
    let n = reader.read_line(line).await?;
    if line.len() > MAX_LINE_BYTES {
        return Err(StdioProxyError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "line exceeded 10 MiB cap",
        )));
    }
    Ok(n)
}

async fn write_line<W: tokio::io::AsyncWrite + Unpin>(
    writer: &Arc<Mutex<W>>,
    content: &str,
) -> Result<(), StdioProxyError> {
    let mut guard = writer.lock().await;
    guard.write_all(content.as_bytes()).await?;
    guard.write_all(b"\n").await?;
    guard.flush().await?;
    Ok(())
}

async fn write_line_raw<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    content: &str,
) -> Result<(), StdioProxyError> {
    writer.write_all(content.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::noop_sink;
    use crate::policy::{McpPolicy, RawPolicy};
    use tokio::io::duplex;

    fn handler() -> Arc<MessageHandler> {
        let raw: RawPolicy = serde_yaml::from_str("blocked_tools: [\"execute_command\"]\n").unwrap();
        Arc::new(MessageHandler::new(McpPolicy::compile(raw).unwrap(), noop_sink()))
    }

    #[tokio::test]
    async fn blocked_tool_call_never_reaches_server() {
        let (mut client_write, client_read) = duplex(4096);
        let (server_write, mut server_read) = duplex(4096);
        let client_out = Arc::new(Mutex::new(Vec::<u8>::new()));

        let h = handler();
        let relay = tokio::spawn(client_to_server(
            client_read,
            server_write,
            Arc::clone(&h),
            Arc::clone(&client_out),
        ));

        let line = b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/call\",\"params\":{\"name\":\"execute_command\",\"arguments\":{}}}\n";
        client_write.write_all(line).await.unwrap();
        drop(client_write);

        relay.await.unwrap().unwrap();

        let mut server_buf = Vec::new();
        use tokio::io::AsyncReadExt;
        server_read.read_to_end(&mut server_buf).await.unwrap();
        assert!(server_buf.is_empty(), "server must not see a blocked call");

        let out = client_out.lock().await;
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("-32600"));
    }

    #[tokio::test]
    async fn allowed_call_forwards_verbatim() {
        let (mut client_write, client_read) = duplex(4096);
        let (server_write, mut server_read) = duplex(4096);
        let client_out = Arc::new(Mutex::new(Vec::<u8>::new()));

        let h = handler();
        let line = "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/call\",\"params\":{\"name\":\"read_file\",\"arguments\":{\"path\":\"/tmp/safe\"}}}\n";
        let relay = tokio::spawn(client_to_server(
            client_read,
            server_write,
            Arc::clone(&h),
            Arc::clone(&client_out),
        ));
        client_write.write_all(line.as_bytes()).await.unwrap();
        drop(client_write);
        relay.await.unwrap().unwrap();

        let mut server_buf = Vec::new();
        use tokio::io::AsyncReadExt;
        server_read.read_to_end(&mut server_buf).await.unwrap();
        assert_eq!(String::from_utf8(server_buf).unwrap(), line);
    }
}
