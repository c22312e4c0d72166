//! Job Formatting Helper
//!
//! Builds the `mining.notify` parameter list for a job. The common prefix is
//! `[job_id, prev_hash, coinbase_value, version, bits, time, height]`, followed
//! by the algorithm extras and the clean-jobs flag:
//! - progpow: `header_hash, mix_hash`
//! - sha256d: `merkle_root`
//! - randomx: `seed_hash`

use crate::job_manager::{AlgorithmExtras, Job};
use serde_json::Value;

pub fn format_job_params(job: &Job, clean_jobs: bool) -> Vec<Value> {
    let mut params = vec![
        Value::String(job.id.clone()),
        Value::String(job.prev_hash.clone()),
        Value::Number(job.coinbase_value.into()),
        Value::String(format!("{:08x}", job.version)),
        Value::String(job.bits.clone()),
        Value::String(format!("{:08x}", job.cur_time)),
        Value::Number(job.height.into()),
    ];

    match &job.extras {
        AlgorithmExtras::Progpow { header_hash, mix_hash } => {
            params.push(Value::String(header_hash.clone()));
            params.push(Value::String(mix_hash.clone()));
        }
        AlgorithmExtras::Sha256d { merkle_root } => params.push(Value::String(merkle_root.clone())),
        AlgorithmExtras::Randomx { seed_hash } => params.push(Value::String(seed_hash.clone())),
    }

    params.push(Value::Bool(clean_jobs));
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::Algorithm;
    use chrono::Utc;

    fn job(algorithm: Algorithm, extras: AlgorithmExtras) -> Job {
        Job {
            id: format!("{}-7", algorithm),
            algorithm,
            prev_hash: "ab".repeat(32),
            coinbase_value: 1250,
            version: 0x2000_0000,
            bits: "1d00ffff".to_string(),
            cur_time: 0x6553_f100,
            height: 9,
            difficulty: algorithm.difficulty(),
            extras,
            clean_jobs: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_progpow_params() {
        let j = job(Algorithm::Progpow, AlgorithmExtras::Progpow { header_hash: "hh".into(), mix_hash: "mm".into() });
        let params = format_job_params(&j, true);

        assert_eq!(params.len(), 10, "progpow notify should have 10 params");
        assert_eq!(params[0], Value::String("progpow-7".into()));
        assert_eq!(params[3], Value::String("20000000".into()), "version is 8 hex digits");
        assert_eq!(params[5], Value::String("6553f100".into()), "time is 8 hex digits");
        assert_eq!(params[7], Value::String("hh".into()));
        assert_eq!(params[8], Value::String("mm".into()));
        assert_eq!(params[9], Value::Bool(true), "clean_jobs is last");
    }

    #[test]
    fn test_sha256d_params() {
        let j = job(Algorithm::Sha256d, AlgorithmExtras::Sha256d { merkle_root: "mr".into() });
        let params = format_job_params(&j, false);

        assert_eq!(params.len(), 9, "sha256d notify should have 9 params");
        assert_eq!(params[7], Value::String("mr".into()));
        assert_eq!(params[8], Value::Bool(false));
    }

    #[test]
    fn test_randomx_params() {
        let j = job(Algorithm::Randomx, AlgorithmExtras::Randomx { seed_hash: "sh".into() });
        let params = format_job_params(&j, true);

        assert_eq!(params.len(), 9, "randomx notify should have 9 params");
        assert!(params[2].is_number(), "coinbase value stays numeric");
        assert_eq!(params[6], Value::Number(9.into()));
        assert_eq!(params[7], Value::String("sh".into()));
    }
}
