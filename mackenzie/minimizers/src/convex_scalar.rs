//! Bounded single-parameter minimizer assuming approximate convexity on `[0, 1]`.
//!
//! The underlying bracketing search is a golden-section search reimplemented
//! directly rather than wrapped around an external scalar-optimizer library.
//! Because nothing in this workspace's stack carries coroutine-like resumable
//! optimizer state, the search is restarted from scratch on every call and
//! replays the evaluation cache until it reaches a point not yet probed —
//! exactly the same "probe, catch a cache miss, return that x" control flow
//! the reimplemented search stands in for.

use serde::{Deserialize, Serialize};

const EPSILON: f64 = 1e-9;
const GOLDEN_RATIO: f64 = 0.6180339887498949;
const BRACKET_TOLERANCE: f64 = 1e-6;
const MAX_BRACKET_STEPS: u32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedValue {
    pub x: f64,
    pub y: f64,
    pub raw_ys: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinimizerState {
    pub max_evals: u32,
    pub n_iter_no_change: u32,
    pub min_rel_improvement: f64,
    pub make_y_positive: bool,
    pub state: String,
    pub eval_cache: Vec<CachedValue>,
}

pub struct ConvexScalarMinimizer {
    pub state: MinimizerState,
}

#[derive(Debug, Clone)]
pub enum NextX {
    Next(f64),
    Complete(String),
}

fn round6(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}

impl ConvexScalarMinimizer {
    pub fn new(
        max_evals: u32,
        n_iter_no_change: u32,
        min_rel_improvement: f64,
        make_y_positive: bool,
    ) -> Self {
        Self {
            state: MinimizerState {
                max_evals,
                n_iter_no_change,
                min_rel_improvement,
                make_y_positive,
                state: "running".to_string(),
                eval_cache: Vec::new(),
            },
        }
    }

    pub fn state_dict_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.state)
    }

    pub fn from_state_dict_json(state_dict_json: &str) -> serde_json::Result<Self> {
        Ok(Self {
            state: serde_json::from_str(state_dict_json)?,
        })
    }

    fn cache_lookup(&self, x: f64) -> Option<f64> {
        let x = round6(x);
        self.state
            .eval_cache
            .iter()
            .rev()
            .find(|cv| cv.x == x)
            .map(|cv| cv.y)
    }

    /// Tail-window early-stopping check: the last `n_iter_no_change + 1`
    /// evaluations must show no relative improvement over `min_rel_improvement`.
    fn stop_early(&self) -> bool {
        let window = (self.state.n_iter_no_change + 1) as usize;
        let tail = if self.state.eval_cache.len() > window {
            &self.state.eval_cache[self.state.eval_cache.len() - window..]
        } else {
            &self.state.eval_cache[..]
        };

        let mut no_improvement = 0u32;
        let mut best_y = f64::MAX;
        for cv in tail {
            let improvement = (best_y - cv.y) / best_y.abs().max(EPSILON);
            if improvement < self.state.min_rel_improvement {
                no_improvement += 1;
            } else {
                no_improvement = 0;
            }

            if cv.y < best_y {
                best_y = cv.y;
                if best_y == 0.0 {
                    best_y = EPSILON;
                }
            }
        }

        no_improvement >= self.state.n_iter_no_change
    }

    /// Replay a golden-section bracket search over `[0, 1]` from scratch,
    /// using the eval cache as the step function; stops at the first point
    /// that hasn't been probed yet.
    fn do_run_minimizer(&self) -> NextX {
        let mut a = 0.0_f64;
        let mut b = 1.0_f64;
        let mut c = round6(b - GOLDEN_RATIO * (b - a));
        let mut d = round6(a + GOLDEN_RATIO * (b - a));

        for _ in 0..MAX_BRACKET_STEPS {
            let fc = match self.cache_lookup(c) {
                Some(y) => y,
                None => return NextX::Next(c),
            };
            let fd = match self.cache_lookup(d) {
                Some(y) => y,
                None => return NextX::Next(d),
            };

            if fc < fd {
                b = d;
            } else {
                a = c;
            }
            if (b - a).abs() < BRACKET_TOLERANCE {
                break;
            }
            c = round6(b - GOLDEN_RATIO * (b - a));
            d = round6(a + GOLDEN_RATIO * (b - a));
        }

        NextX::Complete("optimizer converged: bracket within tolerance".to_string())
    }

    pub fn get_next_x(&mut self) -> NextX {
        if self.stop_early() {
            self.state.state = "early stopping condition reached".to_string();
            return NextX::Complete(self.state.state.clone());
        }
        if self.state.eval_cache.len() as u32 >= self.state.max_evals {
            self.state.state = "max evaluations reached".to_string();
            return NextX::Complete(self.state.state.clone());
        }

        match self.do_run_minimizer() {
            NextX::Next(x) => NextX::Next(x),
            NextX::Complete(reason) => {
                self.state.state = reason.clone();
                NextX::Complete(reason)
            }
        }
    }

    pub fn set_ys(&mut self, x: f64, raw_ys: &[f64]) {
        let x = round6(x);
        let finite_ys: Vec<f64> = raw_ys.iter().copied().filter(|y| y.is_finite()).collect();

        let mut y = if !finite_ys.is_empty() {
            finite_ys.iter().sum::<f64>() / finite_ys.len() as f64
        } else if let Some(max) = self
            .state
            .eval_cache
            .iter()
            .map(|cv| cv.y)
            .fold(None, |acc: Option<f64>, y| match acc {
                Some(m) if m >= y => Some(m),
                _ => Some(y),
            })
        {
            max
        } else {
            f64::MAX
        };

        if self.state.make_y_positive {
            y = y.abs();
        }

        self.state.eval_cache.push(CachedValue {
            x,
            y,
            raw_ys: raw_ys.to_vec(),
        });
    }

    pub fn status(&self) -> Status {
        if self.state.eval_cache.is_empty() {
            return Status {
                best_round: None,
                best_x: None,
                best_y: None,
                n_evals: 0,
                state: self.state.state.clone(),
            };
        }

        let (best_round, best) = self
            .state
            .eval_cache
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.y.partial_cmp(&b.y).unwrap())
            .unwrap();

        Status {
            best_round: Some(best_round),
            best_x: Some(best.x),
            best_y: Some(best.y),
            n_evals: self.state.eval_cache.len(),
            state: self.state.state.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Status {
    pub best_round: Option<usize>,
    pub best_x: Option<f64>,
    pub best_y: Option<f64>,
    pub n_evals: usize,
    pub state: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn early_stopping_on_small_relative_improvement() {
        let mut m = ConvexScalarMinimizer::new(5, 2, 0.01, true);
        for (x, y) in [(0.5, 1.0), (0.4, 0.8), (0.45, 0.799), (0.44, 0.798)] {
            m.set_ys(x, &[y]);
        }
        match m.get_next_x() {
            NextX::Complete(reason) => assert!(reason.contains("early stopping")),
            NextX::Next(_) => panic!("expected early stopping to trigger"),
        }
        let status = m.status();
        assert_eq!(status.n_evals, 4);
        assert_eq!(status.best_x, Some(0.44));
        assert_eq!(status.best_y, Some(0.798));
    }

    #[test]
    fn max_evals_stops_the_search() {
        let mut m = ConvexScalarMinimizer::new(2, 100, 0.0, true);
        m.set_ys(0.5, &[1.0]);
        m.set_ys(0.3, &[0.5]);
        match m.get_next_x() {
            NextX::Complete(reason) => assert!(reason.contains("max evaluations")),
            NextX::Next(_) => panic!("expected max_evals to trigger"),
        }
    }

    #[test]
    fn state_round_trips() {
        let mut m = ConvexScalarMinimizer::new(10, 3, 0.01, true);
        m.set_ys(0.5, &[1.0]);
        let json = m.state_dict_json().unwrap();
        let m2 = ConvexScalarMinimizer::from_state_dict_json(&json).unwrap();
        assert_eq!(m2.state.eval_cache.len(), 1);
        assert_eq!(m2.state.eval_cache[0].x, 0.5);
    }

    #[test]
    fn non_finite_raw_ys_fall_back_to_cache_max() {
        let mut m = ConvexScalarMinimizer::new(10, 3, 0.01, false);
        m.set_ys(0.1, &[1.0]);
        m.set_ys(0.2, &[3.0]);
        m.set_ys(0.3, &[f64::NAN, f64::INFINITY]);
        assert_eq!(m.state.eval_cache[2].y, 3.0);
    }
}
