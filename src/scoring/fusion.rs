// src/scoring/fusion.rs
//! Log-odds fusion of a prior and fired-gate LRs.

use super::StopRuleHit;
use crate::config::FusionConfig;
use crate::gates::GateSet;

pub fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

/// Logistic function, arranged so neither branch overflows.
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fusion {
    pub prior_pi: f64,
    pub logit_prior: f64,
    pub sum_log_lr: f64,
    pub logit_post: f64,
    pub p_fail: f64,
    pub hits: Vec<StopRuleHit>,
}

/// Combine `prior` with the LRs of fired gates.
///
/// `logit_post` is clamped before exponentiation, so `p_fail` stays strictly
/// inside (0,1) for any bound the config accepts.
pub fn fuse(prior: f64, gates: &GateSet, cfg: &FusionConfig) -> Fusion {
    let mut hits = Vec::new();

    let floor = cfg.prior_floor;
    let prior_pi = prior.clamp(floor, 1.0 - floor);
    if prior_pi != prior {
        hits.push(StopRuleHit::prior_bounds(prior, prior_pi, floor));
    }
    let logit_prior = logit(prior_pi);

    let sum_log_lr: f64 = gates.fired().map(|g| g.log_lr()).sum();

    let raw = logit_prior + sum_log_lr;
    let bound = cfg.logit_bound;
    let logit_post = raw.clamp(-bound, bound);
    if logit_post != raw {
        hits.push(StopRuleHit::logit_clamp(raw, logit_post, bound));
    }

    Fusion {
        prior_pi,
        logit_prior,
        sum_log_lr,
        logit_post,
        p_fail: sigmoid(logit_post),
        hits,
    }
}
