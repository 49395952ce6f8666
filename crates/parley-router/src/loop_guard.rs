// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pairwise cooldown and rate cap for agent->agent traffic.
//!
//! Consulted only when the candidate was not directly mentioned; a mention
//! always bypasses the guard. State is in-memory only: losing it on restart
//! at worst permits one extra exchange.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use parley_core::{Agent, TrustLevel};

/// Minimum spacing between exchanges for one agent pair.
pub const PAIR_COOLDOWN: Duration = Duration::from_secs(30);

/// Length of the rolling exchange window.
pub const PAIR_WINDOW: Duration = Duration::from_secs(60);

/// Maximum exchanges per pair within one window.
pub const PAIR_WINDOW_CAP: u32 = 5;

/// Pairs idle past their window reset by this much are swept.
const SWEEP_STALENESS: Duration = Duration::from_secs(600);

#[derive(Debug)]
struct PairState {
    last_exchange: Instant,
    window_count: u32,
    window_reset: Instant,
}

/// Guard state keyed by the unordered principal pair.
#[derive(Debug, Default)]
pub struct LoopGuard {
    pairs: Mutex<HashMap<(String, String), PairState>>,
}

impl LoopGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an AI-authored, non-mention delivery from `sender_id` to
    /// `target` is permitted right now. Permitting counts as an exchange.
    pub fn permit(&self, sender_id: &str, target: &Agent) -> bool {
        self.permit_at(sender_id, target, Instant::now())
    }

    /// Clock-injectable variant of [`permit`](Self::permit).
    pub fn permit_at(&self, sender_id: &str, target: &Agent, now: Instant) -> bool {
        if sender_id == target.id {
            return false;
        }
        if target.trust == TrustLevel::Standard {
            return false;
        }

        let key = pair_key(sender_id, &target.id);
        let Ok(mut pairs) = self.pairs.lock() else {
            return false;
        };

        match pairs.get_mut(&key) {
            Some(state) => {
                if now < state.last_exchange + PAIR_COOLDOWN {
                    return false;
                }
                if now >= state.window_reset {
                    state.window_count = 0;
                    state.window_reset = now + PAIR_WINDOW;
                }
                if state.window_count >= PAIR_WINDOW_CAP {
                    return false;
                }
                state.window_count += 1;
                state.last_exchange = now;
                true
            }
            None => {
                pairs.insert(
                    key,
                    PairState {
                        last_exchange: now,
                        window_count: 1,
                        window_reset: now + PAIR_WINDOW,
                    },
                );
                true
            }
        }
    }

    /// Record an exchange without consulting the guard. Used for
    /// mention-bypassed deliveries, which still start the pair cooldown.
    pub fn record(&self, sender_id: &str, target_id: &str) {
        self.record_at(sender_id, target_id, Instant::now());
    }

    pub fn record_at(&self, sender_id: &str, target_id: &str, now: Instant) {
        if sender_id == target_id {
            return;
        }
        let key = pair_key(sender_id, target_id);
        let Ok(mut pairs) = self.pairs.lock() else {
            return;
        };
        match pairs.get_mut(&key) {
            Some(state) => {
                if now >= state.window_reset {
                    state.window_count = 0;
                    state.window_reset = now + PAIR_WINDOW;
                }
                state.window_count += 1;
                state.last_exchange = now;
            }
            None => {
                pairs.insert(
                    key,
                    PairState {
                        last_exchange: now,
                        window_count: 1,
                        window_reset: now + PAIR_WINDOW,
                    },
                );
            }
        }
    }

    /// Drop pairs idle long past their window. Not on the hot path.
    pub fn sweep(&self) {
        self.sweep_at(Instant::now());
    }

    pub fn sweep_at(&self, now: Instant) {
        if let Ok(mut pairs) = self.pairs.lock() {
            pairs.retain(|_, state| now < state.window_reset + SWEEP_STALENESS);
        }
    }

    #[cfg(test)]
    fn pair_count(&self) -> usize {
        self.pairs.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Seed pair state directly, for exercising the cap without waiting out
    /// cooldowns.
    #[cfg(test)]
    fn seed_pair(
        &self,
        a: &str,
        b: &str,
        last_exchange: Instant,
        window_count: u32,
        window_reset: Instant,
    ) {
        if let Ok(mut pairs) = self.pairs.lock() {
            pairs.insert(
                pair_key(a, b),
                PairState {
                    last_exchange,
                    window_count,
                    window_reset,
                },
            );
        }
    }
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}
