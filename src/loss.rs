//! Simulated segment loss.
//!
//! The receiver drops incoming DATA with probability `p_data` and outgoing
//! acks with probability `p_ack`. Both gates draw from one per-instance RNG
//! seeded from the command line, so a run replays exactly given the same
//! seed and traffic.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug)]
pub struct Faults {
    rng: StdRng,
    p_data: f64,
    p_ack: f64,
}

impl Faults {
    pub fn new(p_data: f64, p_ack: f64, seed: u64) -> Self {
        assert!((0.0..1.0).contains(&p_data));
        assert!((0.0..1.0).contains(&p_ack));

        Faults {
            rng: StdRng::seed_from_u64(seed),
            p_data,
            p_ack,
        }
    }

    /// Roll the ingress gate: true means the data segment is lost.
    pub fn drop_data(&mut self) -> bool {
        self.rng.gen::<f64>() < self.p_data
    }

    /// Roll the egress gate: true means the ack is lost.
    pub fn drop_ack(&mut self) -> bool {
        self.rng.gen::<f64>() < self.p_ack
    }
}
