//! # Execution Session
//!
//! Explicit compute context handed to every stage that touches tensors or
//! randomness. Created once by the driver and dropped at shutdown.

use candle_core::Device;
use oorandom::Rand32;

/// Default seed when the caller does not pick one.
pub const DEFAULT_SEED: u64 = 42;

/// Device plus a seeded random source.
pub struct Session {
    device: Device,
    rng: Rand32,
    seed: u64,
}

impl Session {
    /// Create a CPU session with the given seed.
    pub fn new(seed: u64) -> Self {
        Self::with_device(Device::Cpu, seed)
    }

    /// Create a session on an explicit device.
    pub fn with_device(device: Device, seed: u64) -> Self {
        Self {
            device,
            rng: Rand32::new(seed),
            seed,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Shuffle a slice in place (Fisher-Yates).
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.rng.rand_range(0..(i as u32 + 1)) as usize;
            items.swap(i, j);
        }
    }

    /// Sample from a normal distribution with the given standard deviation.
    pub fn normal(&mut self, std_dev: f32) -> f32 {
        // Box-Muller; u1 is kept away from zero so ln() stays finite.
        let u1 = 1.0 - self.rng.rand_float();
        let u2 = self.rng.rand_float();
        let radius = (-2.0 * u1.ln()).sqrt();
        radius * (2.0 * std::f32::consts::PI * u2).cos() * std_dev
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}
