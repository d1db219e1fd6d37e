//! Send-loop circuit breaker.
//!
//! Tracks near-duplicate outbound text within one turn. The state machine is
//! `Clear -> Warned -> Tripped`:
//!
//! - every send is normalized (whitespace collapsed, lowercased) and compared
//!   with the previous send of the turn
//! - a ratio at or above the threshold extends the streak, anything else
//!   resets it to 1
//! - at the soft limit the turn becomes `Warned`; sends are still delivered
//!   and the agent's last message gets one warning reaction
//! - at the hard limit the turn becomes `Tripped`; the send is suppressed and
//!   the turn is stopped
//!
//! A fresh [`SendLoopBreaker`] is created for every turn.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Streak that moves the turn to `Warned`.
    pub soft_limit: usize,
    /// Streak that trips the breaker.
    pub hard_limit: usize,
    /// Similarity ratio (0.0 to 1.0) counted as a near-duplicate.
    pub similarity_threshold: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            soft_limit: 3,
            hard_limit: 10,
            similarity_threshold: 0.98,
        }
    }
}

/// Breaker state within one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Clear,
    Warned,
    Tripped,
}

/// What to do with an attempted send.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SendVerdict {
    /// Deliver the message. `warn` is set once per turn, on entering `Warned`.
    Deliver {
        streak: usize,
        similarity: f64,
        warn: bool,
    },
    /// Suppress the message and stop the turn. `warn` is set when no warning
    /// reaction was attached earlier in the turn.
    Halt {
        streak: usize,
        similarity: f64,
        warn: bool,
    },
}

/// Per-turn breaker state.
#[derive(Debug, Clone)]
pub struct SendLoopBreaker {
    config: BreakerConfig,
    last_normalized: Option<String>,
    streak: usize,
    warned: bool,
    tripped: bool,
}

impl SendLoopBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            last_normalized: None,
            streak: 0,
            warned: false,
            tripped: false,
        }
    }

    /// Discard all state. Called at the start of every turn.
    pub fn reset(&mut self) {
        self.last_normalized = None;
        self.streak = 0;
        self.warned = false;
        self.tripped = false;
    }

    pub fn state(&self) -> BreakerState {
        if self.tripped {
            BreakerState::Tripped
        } else if self.warned {
            BreakerState::Warned
        } else {
            BreakerState::Clear
        }
    }

    pub fn streak(&self) -> usize {
        self.streak
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    /// Record an attempted send and decide whether it may go out.
    pub fn check(&mut self, text: &str) -> SendVerdict {
        if self.tripped {
            return SendVerdict::Halt {
                streak: self.streak,
                similarity: 1.0,
                warn: false,
            };
        }

        let normalized = normalize(text);
        let similarity = match &self.last_normalized {
            Some(previous) => similarity_ratio(previous, &normalized),
            None => 0.0,
        };
        self.streak = if self.last_normalized.is_some()
            && similarity >= self.config.similarity_threshold
        {
            self.streak + 1
        } else {
            1
        };
        self.last_normalized = Some(normalized);

        if self.streak >= self.config.hard_limit {
            self.tripped = true;
            let warn = !self.warned;
            self.warned = true;
            return SendVerdict::Halt {
                streak: self.streak,
                similarity,
                warn,
            };
        }

        let warn = self.streak >= self.config.soft_limit && !self.warned;
        if warn {
            self.warned = true;
        }
        SendVerdict::Deliver {
            streak: self.streak,
            similarity,
            warn,
        }
    }
}

/// Collapse whitespace runs to one space, trim, and lowercase.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Index lookups allowed for one comparison. Past this the ratio counts only
/// the blocks matched so far, so it never exceeds the exact value.
const MATCH_BUDGET: usize = 10_000_000;

/// Sequences at least this long drop their popular characters from the index.
const POPULAR_MIN_LEN: usize = 200;

/// Ratcliff/Obershelp similarity: `2 * matched / (len(a) + len(b))`.
///
/// Matched characters are found by taking the longest common substring and
/// recursing on both sides of it. Only identical inputs score 1.0.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    let matched = Matcher::new(&a, &b).matched();
    2.0 * matched as f64 / total as f64
}

/// Longest-match search over an index of `b`'s character positions.
struct Matcher<'a> {
    a: &'a [char],
    b: &'a [char],
    /// Ascending positions in `b` for each indexed character.
    b2j: HashMap<char, Vec<usize>>,
    /// Run lengths ending at each position of `b`, stamped with their row.
    runs: [Vec<(usize, usize)>; 2],
    row: usize,
    budget: usize,
}

impl<'a> Matcher<'a> {
    fn new(a: &'a [char], b: &'a [char]) -> Self {
        let mut b2j: HashMap<char, Vec<usize>> = HashMap::new();
        for (j, c) in b.iter().enumerate() {
            b2j.entry(*c).or_default().push(j);
        }
        // Characters in more than 1% of a long `b` are not indexed; matches
        // still grow across them.
        if b.len() >= POPULAR_MIN_LEN {
            let ceiling = b.len() / 100 + 1;
            b2j.retain(|_, positions| positions.len() <= ceiling);
        }

        Self {
            a,
            b,
            b2j,
            runs: [vec![(0, 0); b.len()], vec![(0, 0); b.len()]],
            row: 0,
            budget: MATCH_BUDGET,
        }
    }

    fn matched(mut self) -> usize {
        let mut matched = 0;
        let mut pending = vec![(0, self.a.len(), 0, self.b.len())];
        while let Some((alo, ahi, blo, bhi)) = pending.pop() {
            let Some((i, j, size)) = self.longest_match(alo, ahi, blo, bhi) else {
                tracing::debug!(matched, "Similarity budget spent");
                break;
            };
            if size == 0 {
                continue;
            }
            matched += size;
            if alo < i && blo < j {
                pending.push((alo, i, blo, j));
            }
            if i + size < ahi && j + size < bhi {
                pending.push((i + size, ahi, j + size, bhi));
            }
        }
        matched
    }

    /// Longest common substring of `a[alo..ahi]` and `b[blo..bhi]`, as
    /// `(start_in_a, start_in_b, len)`. Ties resolve to the earliest match.
    /// `None` once the budget is spent.
    fn longest_match(
        &mut self,
        alo: usize,
        ahi: usize,
        blo: usize,
        bhi: usize,
    ) -> Option<(usize, usize, usize)> {
        let (mut best_i, mut best_j, mut best_len) = (alo, blo, 0);

        // Skip a stamp so the first row sees no previous row.
        self.row += 1;
        for i in alo..ahi {
            self.row += 1;
            self.budget = self.budget.checked_sub(1)?;
            let Some(positions) = self.b2j.get(&self.a[i]) else {
                continue;
            };
            let current = self.row % 2;
            let previous = 1 - current;
            let start = positions.partition_point(|&j| j < blo);
            for &j in &positions[start..] {
                if j >= bhi {
                    break;
                }
                self.budget = self.budget.checked_sub(1)?;
                let len = match j.checked_sub(1).map(|p| self.runs[previous][p]) {
                    Some((row, len)) if row == self.row - 1 => len + 1,
                    _ => 1,
                };
                self.runs[current][j] = (self.row, len);
                if len > best_len {
                    best_i = i + 1 - len;
                    best_j = j + 1 - len;
                    best_len = len;
                }
            }
        }

        // Grow across characters left out of the index.
        while best_i > alo && best_j > blo && self.a[best_i - 1] == self.b[best_j - 1] {
            best_i -= 1;
            best_j -= 1;
            best_len += 1;
        }
        while best_i + best_len < ahi
            && best_j + best_len < bhi
            && self.a[best_i + best_len] == self.b[best_j + best_len]
        {
            best_len += 1;
        }

        Some((best_i, best_j, best_len))
    }
}
