use std::{error::Error, time::Duration};

use crypto_bigint::U512;
use manger::{
    bigint::rsa::{NistExponent, RSA},
    config::{TimingConfig, TimingLearnerConfig, TransportConfig},
    endpoint::Endpoint,
    learner::{OracleLearner, TimingOracleLearner},
    manger::{generate_plaintext_geq_b, generate_plaintext_less_b},
    oracle::Oracle,
    sim::{self, Leak, SimulatedVictim},
    transport::TcpTransport,
};
use tokio::{net::TcpListener, runtime::Runtime};
use tracing::{error, info};

const LIMBS: usize = U512::LIMBS;
const CHECKS: usize = 20;

// Calibrates a timing oracle against a victim on loopback that answers slower below B,
// then measures how often it classifies fresh blocks correctly.
fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let (public_key, private_key) = RSA::new::<LIMBS, NistExponent<LIMBS>>();
    let leak = Leak::Timing {
        less_b: Duration::from_millis(2),
        geq_b: Duration::ZERO,
    };
    let server = Runtime::new()?;
    let listener = server.block_on(TcpListener::bind("127.0.0.1:0"))?;
    let port = listener.local_addr()?.port();
    server.spawn(async move {
        if let Err(err) = sim::serve(listener, SimulatedVictim::new(private_key, leak)).await {
            error!("victim stopped : {err}");
        }
    });

    let endpoint = Endpoint::new("127.0.0.1", port, public_key);
    let transport = TcpTransport::new(&endpoint, TransportConfig::default())?;
    let config = TimingLearnerConfig::default().with_timing(TimingConfig::default().with_sample_size(20));
    let mut learner = TimingOracleLearner::new(transport, sim::request_source::<LIMBS>(), config);

    let result = learner.learn(&endpoint)?;
    println!("{}", result.report);
    let Some(mut oracle) = result.oracle else {
        error!("timing classes are not separable");
        return Ok(());
    };

    let mut rng = rand::thread_rng();
    let mut correct = 0;
    for round in 0..CHECKS {
        let less = round % 2 == 0;
        let plain = if less {
            generate_plaintext_less_b(&public_key, &mut rng)
        } else {
            generate_plaintext_geq_b(&public_key, &mut rng)
        };
        let Some(block) = RSA::apply_block(&public_key, &plain) else {
            continue;
        };
        if oracle.check_validity(&block)? == less {
            correct += 1;
        }
    }
    info!(correct, total = CHECKS, "classification of fresh blocks");
    println!("accuracy : {correct}/{CHECKS}");
    Ok(())
}
