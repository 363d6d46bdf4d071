//! IPC client implementation

use escrow_api::{Command, Event, Request, Response, ResponseResult};
use escrow_util::AccountId;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use crate::{IpcError, IpcResult};

/// IPC Client for connecting to escrowd
pub struct IpcClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
    next_request_id: u64,
    caller: Option<AccountId>,
}

impl IpcClient {
    /// Connect to escrowd
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_request_id: 1,
            caller: None,
        })
    }

    /// Identity attached to every subsequent request
    pub fn with_caller(mut self, caller: AccountId) -> Self {
        self.caller = Some(caller);
        self
    }

    /// Send a command and wait for response
    pub async fn send(&mut self, command: Command) -> IpcResult<Response> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let mut request = Request::new(request_id, command);
        request.caller = self.caller.clone();

        let mut json = serde_json::to_string(&request)?;
        json.push('\n');
        self.writer.write_all(json.as_bytes()).await?;

        let mut line = String::new();
        let response: Response = loop {
            line.clear();
            let n = self.reader.read_line(&mut line).await?;
            if n == 0 {
                return Err(IpcError::ConnectionClosed);
            }

            // Events can overtake the reply to a subscribe
            match serde_json::from_str::<Response>(line.trim()) {
                Ok(response) => break response,
                Err(e) if serde_json::from_str::<Event>(line.trim()).is_ok() => {
                    debug!(error = %e, "Skipping event while waiting for response");
                }
                Err(e) => return Err(e.into()),
            }
        };

        if response.request_id != request_id {
            return Err(IpcError::InvalidMessage(format!(
                "response for request {} while waiting for {}",
                response.request_id, request_id
            )));
        }

        Ok(response)
    }

    /// Subscribe to events and consume this client to return an event stream
    pub async fn subscribe(mut self) -> IpcResult<EventStream> {
        let response = self.send(Command::SubscribeEvents).await?;

        if let ResponseResult::Err(e) = response.result {
            return Err(IpcError::ServerError(e.message));
        }

        Ok(EventStream {
            reader: self.reader,
            _writer: self.writer,
        })
    }
}

/// Stream of events from escrowd
pub struct EventStream {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    // Dropping the write half would half-close the connection
    _writer: tokio::net::unix::OwnedWriteHalf,
}

impl EventStream {
    /// Wait for the next event
    pub async fn next(&mut self) -> IpcResult<Event> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(IpcError::ConnectionClosed);
        }

        let event: Event = serde_json::from_str(line.trim())?;
        Ok(event)
    }
}
