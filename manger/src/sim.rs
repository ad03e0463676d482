//! Simulated OPC UA server whose asymmetric decryption leaks whether a plaintext is below B.
//!
//! The victim answers every OPN request with an error frame after decrypting its first cipher
//! block. Depending on the configured [`Leak`] the error code, the error reason or the response
//! time depends on the plaintext class. It is usable in process as a [`Transport`] and behind a
//! TCP listener through [`serve`].

use std::{
    io,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::{BufMut, BytesMut};
use crypto_bigint::{Encoding, Uint};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_core::{CryptoRng, RngCore};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, trace};

use crate::{
    bigint::{
        from_block,
        rsa::{Key, PrivateKey, PublicKey, RSA},
        to_block,
    },
    cipher::{block_offset, extract_block, FormatError, OPN_TAG},
    endpoint::{Endpoint, SecurityPolicy},
    learner::LearnerError,
    manger::random_below_boundary,
    transport::{QueryResult, Response, Transport, TransportError},
    wire::{
        status::{BAD_DECODING_ERROR, BAD_SECURITY_CHECKS_FAILED, BAD_TCP_MESSAGE_TYPE_INVALID},
        Acknowledge, Connection, ErrorMessage, Message, MessageType, WireError,
    },
};

pub const REASON_LESS_B: &str = "OAEP label hash does not match";
pub const REASON_GEQ_B: &str = "decrypted block does not start with zero";
pub const REASON_DECRYPTION: &str = "asymmetric decryption failed";

/// Processing time every request costs in process
const BASE_NANOS: u64 = 40_000;

/// How the victim gives away the plaintext class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leak {
    /// BadSecurityChecksFailed below B, BadDecodingError otherwise
    ErrorCode,
    /// Same code for both classes, different reasons
    ErrorReason,
    /// Same answer for both classes, delayed by class
    Timing { less_b: Duration, geq_b: Duration },
    /// Answers never depend on the plaintext
    None,
}

/// Builds an OPN request frame with `blocks` freshly encrypted cipher blocks.
///
/// Certificate and thumbprint are null, the policy is Basic256Sha256.
pub fn open_request<const LIMBS: usize>(
    public_key: &PublicKey<LIMBS>,
    blocks: usize,
    rng: &mut (impl RngCore + CryptoRng),
) -> Vec<u8>
where
    Uint<LIMBS>: Encoding,
{
    let uri = SecurityPolicy::Basic256Sha256.uri();
    let mut frame = BytesMut::new();
    frame.put_slice(OPN_TAG);
    frame.put_u8(b'F');
    frame.put_u32_le(0);
    frame.put_u32_le(0);
    frame.put_u32_le(uri.len() as u32);
    frame.put_slice(uri.as_bytes());
    frame.put_u32_le(u32::MAX);
    frame.put_u32_le(u32::MAX);

    // valid OAEP plaintexts start with a zero byte
    for _ in 0..blocks {
        let plain = random_below_boundary(public_key, rng);
        frame.put_slice(&to_block(&public_key.encrypt(&plain), public_key.block_len()));
    }

    let size = frame.len() as u32;
    frame[4..8].copy_from_slice(&size.to_le_bytes());
    frame.to_vec()
}

/// Request supplier producing fresh OPN requests with two cipher blocks
pub fn request_source<const LIMBS: usize>(
) -> impl FnMut(&Endpoint<LIMBS>) -> Result<Vec<u8>, LearnerError>
where
    Uint<LIMBS>: Encoding,
{
    let mut rng = StdRng::from_entropy();
    move |endpoint| Ok(open_request(&endpoint.public_key, 2, &mut rng))
}

#[derive(Clone)]
pub struct SimulatedVictim<const LIMBS: usize> {
    private_key: PrivateKey<LIMBS>,
    leak: Leak,
    rng: StdRng,
    /// Last decrypted block and its class
    last: Option<(Vec<u8>, bool)>,
    exchanges: Arc<AtomicU64>,
}

impl<const LIMBS: usize> SimulatedVictim<LIMBS>
where
    Uint<LIMBS>: Encoding,
{
    pub fn new(private_key: PrivateKey<LIMBS>, leak: Leak) -> Self {
        Self::with_seed(private_key, leak, 0x6d61_6e67)
    }

    /// Victim with a reproducible jitter sequence
    pub fn with_seed(private_key: PrivateKey<LIMBS>, leak: Leak, seed: u64) -> Self {
        Self {
            private_key,
            leak,
            rng: StdRng::seed_from_u64(seed),
            last: None,
            exchanges: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Requests handled by this victim and all its clones
    pub fn exchanges(&self) -> u64 {
        self.exchanges.load(Ordering::Relaxed)
    }

    /// Whether the first cipher block of an OPN message decrypts below B
    fn classify(&mut self, message: &[u8]) -> Result<bool, FormatError> {
        let block_len = self.private_key.block_len();
        let offset = block_offset(message, block_len)?;
        let block = extract_block(message, offset, block_len, 0)?;

        if let Some((last, less)) = &self.last {
            if *last == block {
                return Ok(*less);
            }
        }
        let less = RSA::apply_block(&self.private_key, &block)
            .and_then(|plain| from_block::<LIMBS>(&plain))
            .is_some_and(|m| m < self.private_key.boundary());
        self.last = Some((block, less));
        Ok(less)
    }

    /// Error answer and processing delay for one request frame
    fn respond(&mut self, message: &[u8]) -> (ErrorMessage, Duration) {
        self.exchanges.fetch_add(1, Ordering::Relaxed);
        let less = match self.classify(message) {
            Ok(less) => less,
            Err(error) => {
                debug!(%error, "malformed request");
                return (ErrorMessage::new(BAD_DECODING_ERROR, error.to_string()), Duration::ZERO);
            }
        };
        trace!(less, "request decrypted");

        match self.leak {
            Leak::ErrorCode if less => (
                ErrorMessage::new(BAD_SECURITY_CHECKS_FAILED, REASON_DECRYPTION),
                Duration::ZERO,
            ),
            Leak::ErrorCode => (ErrorMessage::new(BAD_DECODING_ERROR, REASON_DECRYPTION), Duration::ZERO),
            Leak::ErrorReason => {
                let reason = if less { REASON_LESS_B } else { REASON_GEQ_B };
                (ErrorMessage::new(BAD_SECURITY_CHECKS_FAILED, reason), Duration::ZERO)
            }
            Leak::Timing { less_b, geq_b } => (
                ErrorMessage::new(BAD_SECURITY_CHECKS_FAILED, REASON_DECRYPTION),
                if less { less_b } else { geq_b },
            ),
            Leak::None => (
                ErrorMessage::new(BAD_SECURITY_CHECKS_FAILED, REASON_DECRYPTION),
                Duration::ZERO,
            ),
        }
    }

    /// Small jitter with occasional large spikes, like a loaded network
    fn jitter(&mut self) -> Duration {
        let mut nanos = self.rng.gen_range(0..2_000);
        if self.rng.gen_bool(0.05) {
            nanos += self.rng.gen_range(0..200_000);
        }
        Duration::from_nanos(nanos)
    }
}

impl<const LIMBS: usize> Transport for SimulatedVictim<LIMBS>
where
    Uint<LIMBS>: Encoding,
{
    fn exchange(&mut self, payload: &[u8]) -> Result<QueryResult, TransportError> {
        let (error, delay) = self.respond(payload);
        let elapsed = Duration::from_nanos(BASE_NANOS) + delay + self.jitter();
        Ok(QueryResult {
            response: Response::Message(Message::Error(error)),
            elapsed,
        })
    }
}

/// One client connection of the simulated server
struct Session<const LIMBS: usize> {
    connection: Connection<TcpStream>,
    victim: SimulatedVictim<LIMBS>,
}

impl<const LIMBS: usize> Session<LIMBS>
where
    Uint<LIMBS>: Encoding,
{
    // Answers one request frame with an error and closes, like a server failing the OPN
    async fn run(mut self) -> Result<(), WireError> {
        let Some(Message::Hello(hello)) = self.connection.read_frame::<Message>().await? else {
            return Ok(());
        };
        self.connection
            .write_frame(&Message::Acknowledge(Acknowledge::from(&hello)))
            .await?;

        let Some(message) = self.connection.read_frame::<Message>().await? else {
            return Ok(());
        };
        let answer = match message {
            Message::Chunk {
                message_type: MessageType::OpenSecureChannel,
                bytes,
            } => {
                let (error, delay) = self.victim.respond(&bytes);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                error
            }
            other => ErrorMessage::new(
                BAD_TCP_MESSAGE_TYPE_INVALID,
                format!("unexpected {:?} message", other.message_type()),
            ),
        };
        self.connection.write_frame(&Message::Error(answer)).await
    }
}

/// Accepts connections until the listener fails, one task per connection
pub async fn serve<const LIMBS: usize>(listener: TcpListener, victim: SimulatedVictim<LIMBS>) -> io::Result<()>
where
    Uint<LIMBS>: Encoding,
{
    info!(address = ?listener.local_addr()?, leak = ?victim.leak, "simulated victim listening");
    loop {
        let (socket, _) = listener.accept().await?;
        let session = Session {
            connection: Connection::new(socket),
            victim: victim.clone(),
        };
        tokio::spawn(async move {
            if let Err(error) = session.run().await {
                debug!(%error, "session ended with an error");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use crypto_bigint::U512;
    use tokio::runtime::Runtime;

    use super::*;
    use crate::{
        bigint::rsa::tests::keys_512,
        cipher::OpnHeader,
        config::TransportConfig,
        manger::{generate_plaintext_geq_b, generate_plaintext_less_b},
        transport::TcpTransport,
    };

    fn victim(leak: Leak) -> (PublicKey<{ U512::LIMBS }>, SimulatedVictim<{ U512::LIMBS }>) {
        let (public_key, private_key) = keys_512();
        (public_key, SimulatedVictim::new(private_key, leak))
    }

    /// Request whose first block encrypts a plaintext of the given class
    fn request(public_key: &PublicKey<{ U512::LIMBS }>, less: bool) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        let mut request = open_request(public_key, 1, &mut rng);
        let plain = if less {
            generate_plaintext_less_b(public_key, &mut rng)
        } else {
            generate_plaintext_geq_b(public_key, &mut rng)
        };
        let block = RSA::apply_block(public_key, &plain).unwrap();
        let len = request.len();
        request[len - 64..].copy_from_slice(&block);
        request
    }

    #[test]
    fn test_open_request_layout() {
        let (public_key, private_key) = keys_512();
        let request = open_request(&public_key, 3, &mut rand::thread_rng());
        let header = OpnHeader::parse(&request).unwrap();

        assert_eq!(header.message_size as usize, request.len());
        assert_eq!(header.security_policy(), Some(SecurityPolicy::Basic256Sha256));
        assert_eq!(header.certificate_len, 0);
        assert_eq!(request.len(), header.block_offset + 3 * 64);

        let block = &request[header.block_offset..header.block_offset + 64];
        let plain = RSA::apply_block(&private_key, block).unwrap();
        assert!(U512::from_be_slice(&plain) < private_key.boundary());
    }

    #[test]
    fn test_leaks() {
        let cases = [
            (Leak::ErrorCode, (BAD_SECURITY_CHECKS_FAILED, REASON_DECRYPTION), (BAD_DECODING_ERROR, REASON_DECRYPTION)),
            (Leak::ErrorReason, (BAD_SECURITY_CHECKS_FAILED, REASON_LESS_B), (BAD_SECURITY_CHECKS_FAILED, REASON_GEQ_B)),
            (Leak::None, (BAD_SECURITY_CHECKS_FAILED, REASON_DECRYPTION), (BAD_SECURITY_CHECKS_FAILED, REASON_DECRYPTION)),
        ];
        for (leak, less, geq) in cases {
            let (public_key, mut victim) = victim(leak);
            for (class, (code, reason)) in [(true, less), (false, geq)] {
                let result = victim.exchange(&request(&public_key, class)).unwrap();
                assert_eq!(result.response.error(), Some(&ErrorMessage::new(code, reason)), "{leak:?}");
            }
        }
    }

    #[test]
    fn test_timing_leak() {
        let leak = Leak::Timing {
            less_b: Duration::from_micros(500),
            geq_b: Duration::ZERO,
        };
        let (public_key, mut victim) = victim(leak);
        let less = victim.exchange(&request(&public_key, true)).unwrap();
        let geq = victim.exchange(&request(&public_key, false)).unwrap();

        assert!(less.elapsed >= Duration::from_micros(540));
        assert!(geq.elapsed < Duration::from_micros(500));
        assert_eq!(less.response, geq.response);
        assert_eq!(victim.exchanges(), 2);
    }

    #[test]
    fn test_malformed_request() {
        let (public_key, mut victim) = victim(Leak::ErrorCode);
        let mut request = request(&public_key, true);
        request.truncate(request.len() - 1);

        let result = victim.exchange(&request).unwrap();
        assert_eq!(result.response.error().map(|error| error.code), Some(BAD_DECODING_ERROR));

        let header_only = open_request(&public_key, 0, &mut rand::thread_rng());
        let result = victim.exchange(&header_only).unwrap();
        assert_eq!(result.response.error().map(|error| error.code), Some(BAD_DECODING_ERROR));
    }

    #[test]
    fn test_serves_over_tcp() {
        let (public_key, victim) = victim(Leak::ErrorCode);
        let counter = victim.clone();
        let runtime = Runtime::new().unwrap();
        let listener = runtime.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
        let port = listener.local_addr().unwrap().port();
        runtime.spawn(serve(listener, victim));

        let endpoint = Endpoint::new("127.0.0.1", port, public_key);
        let mut transport = TcpTransport::new(&endpoint, TransportConfig::default()).unwrap();
        for (class, code) in [(true, BAD_SECURITY_CHECKS_FAILED), (false, BAD_DECODING_ERROR)] {
            let result = transport.exchange(&request(&public_key, class)).unwrap();
            assert_eq!(result.response.error().map(|error| error.code), Some(code));
        }
        assert_eq!(counter.exchanges(), 2);
    }
}
