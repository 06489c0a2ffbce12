//! The local request socket.
//!
//! External callers connect to a Unix stream socket and write JSON requests
//! `{"module_name", "module_function", "return_output"}`. Each request gets a
//! single-line JSON reply once the module answers.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use automato_transport::SocketListener;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CoordinatorError, Result};

/// Upper bound on an unterminated request before the client is dropped.
const MAX_REQUEST_BYTES: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketRequest {
    pub module_name: String,
    pub module_function: String,
    #[serde(default = "default_true")]
    pub return_output: bool,
}

fn default_true() -> bool {
    true
}

/// `output_type` values of a [`SocketReply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum OutputType {
    None = 0,
    SignedInt = 1,
    UnsignedInt = 2,
    SignedBigInt = 3,
    UnsignedBigInt = 4,
    Float = 5,
    Double = 6,
    Bool = 7,
    Void = 8,
}

impl OutputType {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::None,
            1 => Self::SignedInt,
            2 => Self::UnsignedInt,
            3 => Self::SignedBigInt,
            4 => Self::UnsignedBigInt,
            5 => Self::Float,
            6 => Self::Double,
            7 => Self::Bool,
            8 => Self::Void,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::SignedInt => "signed-int",
            Self::UnsignedInt => "unsigned-int",
            Self::SignedBigInt => "signed-big-int",
            Self::UnsignedBigInt => "unsigned-big-int",
            Self::Float => "float",
            Self::Double => "double",
            Self::Bool => "bool",
            Self::Void => "void",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketReply {
    pub module_function: String,
    pub module_name: String,
    pub output: String,
    pub output_type: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SocketReply {
    pub fn new(request: &SocketRequest, output: String, output_type: OutputType) -> Self {
        Self {
            module_function: request.module_function.clone(),
            module_name: request.module_name.clone(),
            output,
            output_type: output_type as u8,
            error: None,
        }
    }

    pub fn empty(request: &SocketRequest) -> Self {
        Self::new(request, String::new(), OutputType::None)
    }

    pub fn failed(request: &SocketRequest, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::empty(request)
        }
    }
}

/// Where the reply to a request goes.
pub trait ReplySink: Send {
    fn reply(&mut self, reply: &SocketReply) -> Result<()>;
}

/// Write half of a connected client.
#[derive(Debug)]
pub struct ClientHandle {
    id: u64,
    stream: UnixStream,
}

impl ClientHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl ReplySink for ClientHandle {
    fn reply(&mut self, reply: &SocketReply) -> Result<()> {
        let mut line = serde_json::to_vec(reply)?;
        line.push(b'\n');
        self.stream.set_nonblocking(false)?;
        self.stream.write_all(&line)?;
        debug!(client = self.id, "reply sent");
        Ok(())
    }
}

struct Client {
    stream: UnixStream,
    buf: Vec<u8>,
}

/// Accepts clients and collects their requests without blocking.
pub struct SocketBridge {
    listener: SocketListener,
    clients: HashMap<u64, Client>,
    next_id: u64,
}

impl SocketBridge {
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            listener: SocketListener::bind(path)?,
            clients: HashMap::new(),
            next_id: 1,
        })
    }

    pub fn path(&self) -> &Path {
        self.listener.path()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Accept waiting clients and return every complete request received.
    pub fn poll(&mut self) -> Result<Vec<(ClientHandle, SocketRequest)>> {
        while let Some(stream) = self.listener.accept()? {
            stream.set_nonblocking(true)?;
            let id = self.next_id;
            self.next_id += 1;
            info!(client = id, "socket client connected");
            self.clients.insert(
                id,
                Client {
                    stream,
                    buf: Vec::new(),
                },
            );
        }

        let mut requests = Vec::new();
        let mut closed = Vec::new();
        for (&id, client) in &mut self.clients {
            match read_available(client) {
                Ok(open) => {
                    if !open {
                        closed.push(id);
                    }
                }
                Err(err) => {
                    warn!(client = id, error = %err, "socket read failed");
                    closed.push(id);
                    continue;
                }
            }
            match take_requests(&mut client.buf) {
                Ok(parsed) => {
                    for request in parsed {
                        let stream = client.stream.try_clone()?;
                        requests.push((ClientHandle { id, stream }, request));
                    }
                }
                Err(err) => {
                    warn!(client = id, error = %err, "malformed socket request; dropping client");
                    closed.push(id);
                }
            }
            if client.buf.len() > MAX_REQUEST_BYTES {
                warn!(client = id, "request too large; dropping client");
                closed.push(id);
            }
        }
        for id in closed {
            if self.clients.remove(&id).is_some() {
                debug!(client = id, "socket client disconnected");
            }
        }
        Ok(requests)
    }
}

/// Drain readable bytes into the client buffer. Returns `false` on EOF.
fn read_available(client: &mut Client) -> std::io::Result<bool> {
    let mut chunk = [0u8; 256];
    loop {
        match client.stream.read(&mut chunk) {
            Ok(0) => return Ok(false),
            Ok(n) => client.buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(true),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Parse every complete JSON request at the front of `buf`, keeping a
/// trailing partial one.
fn take_requests(buf: &mut Vec<u8>) -> std::result::Result<Vec<SocketRequest>, serde_json::Error> {
    let mut requests = Vec::new();
    let mut stream = serde_json::Deserializer::from_slice(buf).into_iter::<SocketRequest>();
    let consumed = loop {
        let offset = stream.byte_offset();
        match stream.next() {
            Some(Ok(request)) => requests.push(request),
            Some(Err(err)) if err.is_eof() => break offset,
            Some(Err(err)) => return Err(err),
            None => break stream.byte_offset(),
        }
    };
    buf.drain(..consumed);
    Ok(requests)
}

/// Client side of the request socket, used by the CLI.
pub struct SocketClient {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

impl SocketClient {
    pub fn connect(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let stream = SocketListener::connect(path)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
        })
    }

    /// Send a request and wait for its reply.
    pub fn request(&mut self, request: &SocketRequest) -> Result<SocketReply> {
        serde_json::to_writer(&mut self.writer, request)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;

        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(CoordinatorError::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "coordinator closed the connection",
            )));
        }
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn request(name: &str) -> SocketRequest {
        SocketRequest {
            module_name: name.to_string(),
            module_function: "read".to_string(),
            return_output: true,
        }
    }

    #[test]
    fn requests_split_across_reads() {
        let mut buf = br#"{"module_name":"a","module_function":"read","return_output":true}{"module_na"#.to_vec();
        let parsed = take_requests(&mut buf).unwrap();
        assert_eq!(parsed, vec![request("a")]);
        assert_eq!(buf, br#"{"module_na"#.to_vec());

        buf.extend_from_slice(br#"me":"b","module_function":"read"}"#);
        buf.extend_from_slice(b"\n");
        let parsed = take_requests(&mut buf).unwrap();
        assert_eq!(parsed, vec![request("b")]);
        assert!(buf.iter().all(u8::is_ascii_whitespace));
    }

    #[test]
    fn malformed_request_is_an_error() {
        let mut buf = br#"{"module_name": 5}"#.to_vec();
        assert!(take_requests(&mut buf).is_err());
    }

    #[test]
    fn reply_serialization_omits_missing_error() {
        let reply = SocketReply::new(&request("a"), "21".to_string(), OutputType::SignedInt);
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "module_function": "read",
                "module_name": "a",
                "output": "21",
                "output_type": 1
            })
        );
    }

    #[test]
    fn bridge_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coordinator.sock");
        let mut bridge = SocketBridge::bind(&path).unwrap();

        let client_path = path.clone();
        let client = std::thread::spawn(move || {
            let mut client = SocketClient::connect(&client_path, Duration::from_secs(5)).unwrap();
            client.request(&request("thermo")).unwrap()
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        let (mut handle, received) = loop {
            let mut polled = bridge.poll().unwrap();
            if let Some(first) = polled.pop() {
                break first;
            }
            assert!(Instant::now() < deadline, "request never arrived");
            std::thread::sleep(Duration::from_millis(5));
        };
        assert_eq!(received, request("thermo"));
        assert_eq!(bridge.client_count(), 1);

        handle
            .reply(&SocketReply::new(&received, "true".to_string(), OutputType::Bool))
            .unwrap();
        let reply = client.join().unwrap();
        assert_eq!(reply.output, "true");
        assert_eq!(reply.output_type, OutputType::Bool as u8);
    }
}
