//! Sending one complete message to the target and timing its answer.

use std::{
    io,
    sync::Arc,
    time::{Duration, Instant},
};

use thiserror::Error;
use tokio::{net::TcpStream, runtime::Runtime};
use tracing::{debug, trace};

use crate::{
    config::TransportConfig,
    endpoint::Endpoint,
    wire::{Connection, ErrorMessage, Hello, Message, MessageType, WireError},
};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("no answer within {0:?}")]
    Timeout(Duration),
    #[error("server rejected the hello: {0}")]
    Rejected(ErrorMessage),
    #[error("expected an acknowledge, got {0:?}")]
    Handshake(MessageType),
    #[error("connection closed during the handshake")]
    Closed,
}

/// First answer of the server to a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Message(Message),
    /// Connection closed without any answer
    Closed,
}

impl Response {
    pub fn error(&self) -> Option<&ErrorMessage> {
        match self {
            Self::Message(Message::Error(error)) => Some(error),
            _ => None,
        }
    }
}

/// Response together with the time from sending until its first byte arrived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    pub response: Response,
    pub elapsed: Duration,
}

impl QueryResult {
    pub fn elapsed_nanos(&self) -> u64 {
        self.elapsed.as_nanos().try_into().unwrap_or(u64::MAX)
    }
}

/// Delivers one complete message to the target, one connection per call
pub trait Transport {
    fn exchange(&mut self, payload: &[u8]) -> Result<QueryResult, TransportError>;
}

/// Blocking TCP transport driven by its own single threaded runtime
#[derive(Clone)]
pub struct TcpTransport {
    address: String,
    endpoint_url: String,
    config: TransportConfig,
    runtime: Arc<Runtime>,
}

impl TcpTransport {
    pub fn new<const LIMBS: usize>(
        endpoint: &Endpoint<LIMBS>,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            address: format!("{}:{}", endpoint.host, endpoint.port),
            endpoint_url: endpoint.endpoint_url.clone(),
            config,
            runtime: Arc::new(runtime),
        })
    }

    async fn exchange_async(&self, payload: &[u8]) -> Result<QueryResult, TransportError> {
        let stream = TcpStream::connect(&self.address).await?;
        stream.set_nodelay(true)?;
        let mut connection = Connection::new(stream);

        let hello = Message::Hello(Hello::new(self.endpoint_url.as_str(), &self.config));
        connection.write_frame(&hello).await?;
        match connection.read_frame::<Message>().await? {
            Some(Message::Acknowledge(_)) => {}
            Some(Message::Error(error)) => return Err(TransportError::Rejected(error)),
            Some(other) => return Err(TransportError::Handshake(other.message_type())),
            None => return Err(TransportError::Closed),
        }

        connection.write_raw(payload).await?;
        let start = Instant::now();
        let readable = match connection.readable().await {
            Ok(readable) => readable,
            Err(WireError::Io(e)) if e.kind() == io::ErrorKind::ConnectionReset => false,
            Err(e) => return Err(e.into()),
        };
        let elapsed = start.elapsed();

        let response = if readable {
            match connection.read_frame::<Message>().await? {
                Some(message) => Response::Message(message),
                None => Response::Closed,
            }
        } else {
            Response::Closed
        };
        trace!(?elapsed, ?response, "exchange finished");

        Ok(QueryResult { response, elapsed })
    }
}

impl Transport for TcpTransport {
    fn exchange(&mut self, payload: &[u8]) -> Result<QueryResult, TransportError> {
        let timeout = self.config.timeout;
        let result = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, self.exchange_async(payload)).await });
        result.map_err(|_| {
            debug!(address = %self.address, ?timeout, "exchange timed out");
            TransportError::Timeout(timeout)
        })?
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crypto_bigint::U512;
    use tokio::net::TcpListener;

    use super::*;
    use crate::{bigint::rsa::tests::keys_512, wire::Acknowledge};

    /// Serves one connection: acknowledges the hello, reads one chunk and runs `answer`
    fn serve_once(answer: Option<Message>, delay: Duration) -> (Runtime, u16) {
        let runtime = Runtime::new().unwrap();
        let listener = runtime
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let port = listener.local_addr().unwrap().port();

        runtime.spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut connection = Connection::new(stream);
            let Some(Message::Hello(hello)) = connection.read_frame::<Message>().await.unwrap() else {
                return;
            };
            connection
                .write_frame(&Message::Acknowledge(Acknowledge::from(&hello)))
                .await
                .unwrap();
            let _ = connection.read_frame::<Message>().await.unwrap();
            tokio::time::sleep(delay).await;
            if let Some(answer) = answer {
                connection.write_frame(&answer).await.unwrap();
            }
        });
        (runtime, port)
    }

    fn transport(port: u16, timeout: Duration) -> TcpTransport {
        let (public_key, _) = keys_512();
        let endpoint = Endpoint::<{ U512::LIMBS }>::new("127.0.0.1", port, public_key);
        TcpTransport::new(&endpoint, TransportConfig::default().with_timeout(timeout)).unwrap()
    }

    fn chunk() -> Vec<u8> {
        let mut bytes = b"OPNF\x0c\0\0\0".to_vec();
        bytes.extend_from_slice(&[0; 4]);
        bytes
    }

    #[test]
    fn test_error_response_is_timed() {
        let error = ErrorMessage::new(0x8013_0000, "checks failed");
        let (_server, port) = serve_once(Some(Message::Error(error.clone())), Duration::from_millis(20));

        let result = transport(port, Duration::from_secs(5)).exchange(&chunk()).unwrap();
        assert_eq!(result.response.error(), Some(&error));
        assert!(result.elapsed >= Duration::from_millis(20));
        assert!(result.elapsed_nanos() >= 20_000_000);
    }

    #[test]
    fn test_closed_without_answer() {
        let (_server, port) = serve_once(None, Duration::ZERO);

        let result = transport(port, Duration::from_secs(5)).exchange(&chunk()).unwrap();
        assert_eq!(result.response, Response::Closed);
        assert_eq!(result.response.error(), None);
    }

    #[test]
    fn test_timeout() {
        let (_server, port) = serve_once(None, Duration::from_secs(2));

        let result = transport(port, Duration::from_millis(100)).exchange(&chunk());
        assert!(matches!(result, Err(TransportError::Timeout(_))));
    }
}
