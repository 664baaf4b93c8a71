//! Attack mode engine
//!
//! Decides, chunk by chunk, what the relay emits. The engine does no I/O and
//! never sleeps: a delay is returned as [`Decision::Delay`] and the forwarding
//! loop that owns the engine performs the wait. One engine serves exactly one
//! relay direction, so the reorder buffer needs no locking.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttackMode {
    #[default]
    Transparent,
    RandomDelay,
    Drop,
    Reorder,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid mode '{0}' (expected transparent, random_delay, drop or reorder)")]
pub struct UnknownMode(pub String);

impl AttackMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transparent => "transparent",
            Self::RandomDelay => "random_delay",
            Self::Drop => "drop",
            Self::Reorder => "reorder",
        }
    }

    /// Parse a configured mode; anything unrecognised becomes
    /// [`AttackMode::Transparent`] with a warning.
    pub fn parse_or_default(s: &str) -> Self {
        s.parse().unwrap_or_else(|e: UnknownMode| {
            tracing::warn!("[relay] [config] {}, defaulting to transparent", e);
            Self::Transparent
        })
    }
}

impl FromStr for AttackMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "transparent" => Ok(Self::Transparent),
            "random_delay" => Ok(Self::RandomDelay),
            "drop" => Ok(Self::Drop),
            "reorder" => Ok(Self::Reorder),
            _ => Err(UnknownMode(s.to_string())),
        }
    }
}

impl fmt::Display for AttackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric knobs shared by all modes. Validated by the config layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttackParams {
    /// Seconds.
    pub delay_min: f64,
    /// Seconds.
    pub delay_max: f64,
    /// Probability in [0, 1] that a chunk is discarded.
    pub drop_rate: f64,
    /// Reorder buffer capacity, at least 1.
    pub reorder_window: usize,
}

impl Default for AttackParams {
    fn default() -> Self {
        Self {
            delay_min: 2.0,
            delay_max: 10.0,
            drop_rate: 0.3,
            reorder_window: 5,
        }
    }
}

/// What to do with one received chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Write these bytes now. Under reorder this may be an older chunk.
    Forward(Bytes),
    /// Write these bytes after waiting.
    Delay(Duration, Bytes),
    /// Chunk is gone.
    Discard,
    /// Chunk went into the reorder buffer; nothing to write yet.
    Hold,
}

pub struct AttackEngine<R = StdRng> {
    mode: AttackMode,
    params: AttackParams,
    reorder_buffer: VecDeque<Bytes>,
    rng: R,
}

impl AttackEngine<StdRng> {
    /// Engine seeded from OS entropy.
    pub fn new(mode: AttackMode, params: AttackParams) -> Self {
        Self::with_rng(mode, params, StdRng::from_entropy())
    }

    /// Engine with a reproducible random sequence.
    pub fn seeded(mode: AttackMode, params: AttackParams, seed: u64) -> Self {
        Self::with_rng(mode, params, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> AttackEngine<R> {
    pub fn with_rng(mode: AttackMode, params: AttackParams, rng: R) -> Self {
        let window = params.reorder_window.max(1);
        Self {
            mode,
            params: AttackParams {
                reorder_window: window,
                ..params
            },
            reorder_buffer: VecDeque::with_capacity(window),
            rng,
        }
    }

    pub fn mode(&self) -> AttackMode {
        self.mode
    }

    /// Chunks currently parked in the reorder buffer.
    pub fn buffered(&self) -> usize {
        self.reorder_buffer.len()
    }

    pub fn apply(&mut self, chunk: Bytes) -> Decision {
        match self.mode {
            AttackMode::Transparent => Decision::Forward(chunk),
            AttackMode::RandomDelay => Decision::Delay(self.draw_delay(), chunk),
            AttackMode::Drop => {
                let sample: f64 = self.rng.gen();
                if sample < self.params.drop_rate {
                    Decision::Discard
                } else {
                    Decision::Forward(chunk)
                }
            }
            AttackMode::Reorder => {
                self.reorder_buffer.push_back(chunk);
                if self.reorder_buffer.len() < self.params.reorder_window {
                    return Decision::Hold;
                }
                let idx = self.rng.gen_range(0..self.reorder_buffer.len());
                match self.reorder_buffer.remove(idx) {
                    Some(released) => Decision::Forward(released),
                    None => Decision::Hold,
                }
            }
        }
    }

    /// Drain the reorder buffer at stream end, oldest first.
    pub fn flush(&mut self) -> Vec<Bytes> {
        self.reorder_buffer.drain(..).collect()
    }

    fn draw_delay(&mut self) -> Duration {
        let min = self.params.delay_min.max(0.0);
        let max = self.params.delay_max.max(min);
        let secs = if max > min {
            self.rng.gen_range(min..=max)
        } else {
            min
        };
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}
