//! main.rs — simulated UWB tags for bench development
//!
//! Drives N cars around the default oval and streams range datagrams to the
//! backend exactly as real tags would, including measurement noise, RSSI
//! fade and the occasional dropped reading.

mod car_sim;
mod udp_tx;

use std::time::Duration;

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use car_sim::CarSim;
use race_types::RangePacket;
use udp_tx::UdpTransmitter;

#[derive(Parser, Debug)]
#[command(name = "tag-sim", about = "Simulated UWB race tags over UDP")]
struct Args {
    /// Backend ingress address
    #[arg(long, default_value = "127.0.0.1:4210")]
    target: String,
    /// Number of simulated cars
    #[arg(long, default_value = "3")]
    cars: usize,
    /// Packet rate per car, Hz
    #[arg(long, default_value = "30.0")]
    rate: f64,
    /// Range noise sigma, cm
    #[arg(long, default_value = "3.0")]
    noise: f64,
    /// Car speed along the track, cm/s
    #[arg(long, default_value = "120.0")]
    speed: f64,
    /// Probability of a dropped anchor reading per frame
    #[arg(long, default_value = "0.02")]
    drop: f64,
    /// RNG seed (repeatable runs)
    #[arg(long, default_value = "42")]
    seed: u64,
}

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tag_simulator=info".into()),
        )
        .init();

    let args = Args::parse();
    info!(
        "tag-sim → {} | {} cars @ {:.0} Hz | speed {:.0} cm/s, noise σ {:.1} cm",
        args.target, args.cars, args.rate, args.speed, args.noise
    );

    let tx = UdpTransmitter::new(&args.target)?;
    let mut sim = CarSim::new(args.cars, args.speed);
    let mut rng = StdRng::seed_from_u64(args.seed);

    let dt = 1.0 / args.rate.max(1.0);
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(dt));
    loop {
        ticker.tick().await;
        sim.step(dt, &mut rng);
        for car in sim.cars() {
            let (ranges, rssi) = sim.measure(car, args.noise, args.drop, &mut rng);
            tx.send(&RangePacket::new(car.id, ranges, rssi));
        }
    }
}
