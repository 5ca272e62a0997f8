//! Bayesian optimizer over the unit hypercube `[0, 1]^n`: a squared-exponential
//! Gaussian process posterior scored with an upper-confidence-bound
//! acquisition function.
//!
//! The reference implementation leans on an external Bayesian-optimization
//! library for both its GP regression and its acquisition-function maximizer,
//! and seeds its initial batch from a scrambled Sobol sequence. None of the
//! three has a counterpart crate in this workspace's dependency stack, so:
//! the GP posterior is hand-rolled on top of `nalgebra`; the acquisition
//! maximizer is replaced with UCB scoring over a batch of randomly sampled
//! candidate points; and Sobol initialization is replaced with a Halton
//! sequence (distinct prime base per dimension), which gives comparable
//! low-discrepancy coverage for seeding. The GP's kernel hyperparameters are
//! fixed rather than fit by maximum likelihood, since this is a local
//! implementation detail of the acquisition surface, not part of the wire
//! contract.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

const LENGTH_SCALE: f64 = 0.3;
const SIGNAL_VARIANCE: f64 = 1.0;
const NOISE_VARIANCE: f64 = 1e-6;
const JITTER: f64 = 1e-8;
const SIMILARITY_DISTANCE: f64 = 1e-6;
const NUDGE_SIGMA: f64 = 1e-2;
const N_ACQUISITION_CANDIDATES: usize = 2000;

fn primes(n: usize) -> Vec<u32> {
    let mut found = Vec::with_capacity(n);
    let mut candidate = 2u32;
    while found.len() < n {
        if (2..candidate).all(|p| candidate % p != 0) {
            found.push(candidate);
        }
        candidate += 1;
    }
    found
}

fn halton(index: u32, base: u32) -> f64 {
    let mut f = 1.0;
    let mut r = 0.0;
    let mut i = index;
    while i > 0 {
        f /= base as f64;
        r += f * (i % base) as f64;
        i /= base;
    }
    r
}

fn halton_point(index: u32, bases: &[u32]) -> Vec<f64> {
    bases.iter().map(|&base| halton(index, base)).collect()
}

fn l2_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn is_similar(x: &[f64], seen: &[Vec<f64>]) -> bool {
    seen.iter().any(|b| l2_distance(x, b) < SIMILARITY_DISTANCE)
}

fn nudge(x: &[f64]) -> Vec<f64> {
    let normal = Normal::new(0.0, NUDGE_SIGMA).unwrap();
    let mut rng = rand::thread_rng();
    x.iter()
        .map(|v| (v + normal.sample(&mut rng)).clamp(0.0, 1.0))
        .collect()
}

fn ensure_not_similar(mut x: Vec<f64>, seen: &[Vec<f64>]) -> Vec<f64> {
    while is_similar(&x, seen) {
        x = nudge(&x);
    }
    x
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub x: Vec<f64>,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinimizerState {
    pub n_dims: usize,
    pub init_evals: u32,
    pub explore_evals: u32,
    pub exploit_evals: u32,
    pub parallel_evals: u32,
    pub kappa_initial: f64,
    pub kappa_scale: f64,
    pub state: String,
    pub eval_cache: Vec<Observation>,
    pub points_probed: u32,
    pub utility_kappa: f64,
}

pub struct BayesOptMinimizer {
    pub state: MinimizerState,
}

#[derive(Debug, Clone)]
pub enum NextX {
    Point(Vec<f64>),
    /// Fewer than `init_evals` results have actually come back yet.
    Wait,
    Complete(String),
}

#[derive(Debug, Clone)]
pub struct Status {
    pub best_seen_x: Option<Vec<f64>>,
    pub best_seen_y: Option<f64>,
    pub best_pred_x: Option<Vec<f64>>,
    pub best_pred_y_mean: Option<f64>,
    pub best_pred_y_std: Option<f64>,
    pub points_probed: u32,
    pub points_seen: usize,
    pub state: String,
}

impl BayesOptMinimizer {
    pub fn new(
        n_dims: usize,
        init_evals: u32,
        explore_evals: u32,
        exploit_evals: u32,
        parallel_evals: u32,
        kappa_initial: f64,
        kappa_scale: f64,
    ) -> Self {
        if !init_evals.is_power_of_two() {
            tracing::warn!(init_evals, "init_evals should be a power of two for even Halton coverage");
        }
        Self {
            state: MinimizerState {
                n_dims,
                init_evals,
                explore_evals,
                exploit_evals,
                parallel_evals,
                kappa_initial,
                kappa_scale,
                state: "running".to_string(),
                eval_cache: Vec::new(),
                points_probed: 0,
                utility_kappa: kappa_initial,
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

    fn kernel(&self, a: &[f64], b: &[f64]) -> f64 {
        let sq_dist: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum();
        SIGNAL_VARIANCE * (-sq_dist / (2.0 * LENGTH_SCALE * LENGTH_SCALE)).exp()
    }

    /// Posterior mean/std of the *negated* objective (what the acquisition
    /// maximizes) at `x`, given the current evaluation cache.
    fn posterior(&self, x: &[f64]) -> (f64, f64) {
        let n = self.state.eval_cache.len();
        if n == 0 {
            return (0.0, SIGNAL_VARIANCE.sqrt());
        }

        let mut k = DMatrix::<f64>::zeros(n, n);
        for i in 0..n {
            for j in 0..n {
                let mut v = self.kernel(&self.state.eval_cache[i].x, &self.state.eval_cache[j].x);
                if i == j {
                    v += NOISE_VARIANCE + JITTER;
                }
                k[(i, j)] = v;
            }
        }

        let targets = DVector::from_iterator(n, self.state.eval_cache.iter().map(|o| -o.y));
        let k_star = DVector::from_iterator(
            n,
            self.state.eval_cache.iter().map(|o| self.kernel(&o.x, x)),
        );

        let k_inv = match k.clone().try_inverse() {
            Some(inv) => inv,
            None => return (targets.mean(), SIGNAL_VARIANCE.sqrt()),
        };

        let mean = (k_star.transpose() * &k_inv * &targets)[(0, 0)];
        let k_star_star = self.kernel(x, x);
        let var = (k_star_star - (k_star.transpose() * &k_inv * &k_star)[(0, 0)]).max(0.0);
        (mean, var.sqrt())
    }

    fn ucb(&self, x: &[f64], kappa: f64) -> f64 {
        let (mean, std) = self.posterior(x);
        mean + kappa * std
    }

    fn suggest(&self, kappa: f64) -> Vec<f64> {
        let mut rng = rand::thread_rng();
        let mut best_x = vec![0.5; self.state.n_dims];
        let mut best_score = f64::MIN;

        for _ in 0..N_ACQUISITION_CANDIDATES {
            let candidate: Vec<f64> = (0..self.state.n_dims).map(|_| rng.gen_range(0.0..1.0)).collect();
            let score = self.ucb(&candidate, kappa);
            if score > best_score {
                best_score = score;
                best_x = candidate;
            }
        }
        best_x
    }

    pub fn get_initial_xs(&mut self) -> Vec<Vec<f64>> {
        let bases = primes(self.state.n_dims);
        let mut points: Vec<Vec<f64>> = (1..=self.state.init_evals)
            .map(|i| halton_point(i, &bases))
            .collect();

        let mut rng = rand::thread_rng();
        for _ in 0..self.state.parallel_evals {
            points.push((0..self.state.n_dims).map(|_| rng.gen_range(0.0..1.0)).collect());
        }

        self.state.points_probed += points.len() as u32;
        points
    }

    pub fn get_next_x(&mut self) -> NextX {
        if (self.state.eval_cache.len() as u32) < self.state.init_evals {
            return NextX::Wait;
        }

        let seen: Vec<Vec<f64>> = self.state.eval_cache.iter().map(|o| o.x.clone()).collect();

        let explore_end = self.state.init_evals + self.state.parallel_evals + self.state.explore_evals;
        if self.state.points_probed < explore_end {
            let x = ensure_not_similar(self.suggest(self.state.utility_kappa), &seen);
            self.state.points_probed += 1;
            return NextX::Point(x);
        }

        let all_evals = explore_end + self.state.exploit_evals;
        if self.state.points_probed < all_evals {
            let x = ensure_not_similar(self.suggest(self.state.utility_kappa), &seen);
            self.state.utility_kappa *= self.state.kappa_scale;
            self.state.points_probed += 1;
            return NextX::Point(x);
        }

        self.state.state = "all points probed".to_string();
        NextX::Complete(self.state.state.clone())
    }

    /// One cache entry per raw replicate, not the mean — a round submitted
    /// with several replicates contributes several observations at the same `x`.
    pub fn set_y(&mut self, x: &[f64], raw_ys: &[f64]) {
        for &y in raw_ys {
            self.state.eval_cache.push(Observation { x: x.to_vec(), y });
        }
    }

    pub fn status(&self) -> Status {
        if self.state.eval_cache.is_empty() {
            return Status {
                best_seen_x: None,
                best_seen_y: None,
                best_pred_x: None,
                best_pred_y_mean: None,
                best_pred_y_std: None,
                points_probed: self.state.points_probed,
                points_seen: 0,
                state: self.state.state.clone(),
            };
        }

        let best_seen = self
            .state
            .eval_cache
            .iter()
            .min_by(|a, b| a.y.partial_cmp(&b.y).unwrap())
            .unwrap();

        let best_pred_x = self.suggest(0.0);
        let (mean, std) = self.posterior(&best_pred_x);

        Status {
            best_seen_x: Some(best_seen.x.clone()),
            best_seen_y: Some(best_seen.y),
            best_pred_x: Some(best_pred_x),
            best_pred_y_mean: Some(-mean),
            best_pred_y_std: Some(std),
            points_probed: self.state.points_probed,
            points_seen: self.state.eval_cache.len(),
            state: self.state.state.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halton_sequence_covers_unit_interval() {
        let points: Vec<f64> = (1..=10).map(|i| halton(i, 2)).collect();
        assert!(points.iter().all(|p| (0.0..1.0).contains(p)));
        assert_ne!(points[0], points[1]);
    }

    #[test]
    fn get_initial_xs_emits_init_plus_parallel_points() {
        let mut m = BayesOptMinimizer::new(2, 4, 4, 4, 2, 2.576, 0.95);
        let xs = m.get_initial_xs();
        assert_eq!(xs.len(), 6);
        assert_eq!(m.state.points_probed, 6);
        assert!(xs.iter().all(|x| x.len() == 2));
    }

    #[test]
    fn waits_until_init_evals_observed() {
        let mut m = BayesOptMinimizer::new(1, 4, 4, 4, 0, 2.576, 0.95);
        m.get_initial_xs();
        m.set_y(&[0.1], &[1.0]);
        matches!(m.get_next_x(), NextX::Wait);
    }

    #[test]
    fn exploit_phase_anneals_kappa() {
        let mut m = BayesOptMinimizer::new(1, 2, 0, 1, 0, 2.576, 0.5);
        m.get_initial_xs();
        m.set_y(&[0.1], &[1.0]);
        m.set_y(&[0.9], &[0.5]);
        let before = m.state.utility_kappa;
        match m.get_next_x() {
            NextX::Point(_) => {}
            other => panic!("expected a suggested point, got {other:?}"),
        }
        assert!((m.state.utility_kappa - before * 0.5).abs() < 1e-12);
    }

    #[test]
    fn completes_after_all_evals_probed() {
        let mut m = BayesOptMinimizer::new(1, 1, 0, 0, 0, 2.576, 0.95);
        m.get_initial_xs();
        m.set_y(&[0.1], &[1.0]);
        match m.get_next_x() {
            NextX::Complete(reason) => assert!(reason.contains("all points probed")),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn set_y_appends_one_entry_per_replicate() {
        let mut m = BayesOptMinimizer::new(1, 1, 0, 0, 0, 2.576, 0.95);
        m.set_y(&[0.5], &[1.0, 2.0, 3.0]);
        assert_eq!(m.state.eval_cache.len(), 3);
    }

    #[test]
    fn state_round_trips() {
        let mut m = BayesOptMinimizer::new(2, 4, 4, 4, 2, 2.576, 0.95);
        m.get_initial_xs();
        m.set_y(&[0.1, 0.2], &[1.0]);
        let json = m.state_dict_json().unwrap();
        let m2 = BayesOptMinimizer::from_state_dict_json(&json).unwrap();
        assert_eq!(m2.state.eval_cache.len(), 1);
        assert_eq!(m2.state.points_probed, m.state.points_probed);
    }
}
