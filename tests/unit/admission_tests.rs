use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use scan_agent::admission::{
    policy_from_config, AdmissionDecision, AdmissionPolicy, AlwaysAdmit, LoadAveragePolicy,
    LoadSample, LoadSource,
};
use scan_agent::config::{AdmissionConfig, AdmissionPolicyKind};

struct FixedLoad(LoadSample);

impl LoadSource for FixedLoad {
    fn sample(&self) -> LoadSample {
        self.0
    }
}

fn policy(five_minute: f64, processing_units: usize) -> LoadAveragePolicy<FixedLoad> {
    LoadAveragePolicy::new(
        FixedLoad(LoadSample {
            five_minute,
            processing_units,
        }),
        0.9,
    )
}

#[test]
fn load_below_threshold_admits() {
    assert_eq!(policy(2.0, 4).evaluate(), AdmissionDecision::Admit);
}

#[test]
fn load_at_threshold_rejects() {
    assert_eq!(policy(1.8, 2).evaluate(), AdmissionDecision::Reject);
}

#[test]
fn load_above_threshold_rejects() {
    assert_eq!(policy(4.0, 4).evaluate(), AdmissionDecision::Reject);
}

#[test]
fn zero_processing_units_counts_as_one() {
    let sample = LoadSample {
        five_minute: 0.5,
        processing_units: 0,
    };
    assert!((sample.normalized() - 0.5).abs() < f64::EPSILON);
}

#[test]
fn closures_are_policies() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let policy = move || {
        counter.fetch_add(1, Ordering::SeqCst);
        AdmissionDecision::Reject
    };

    assert_eq!(policy.evaluate(), AdmissionDecision::Reject);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn always_admit_admits() {
    assert_eq!(AlwaysAdmit.evaluate(), AdmissionDecision::Admit);
}

#[test]
fn config_selects_always_admit() {
    let config = AdmissionConfig {
        policy: AdmissionPolicyKind::AlwaysAdmit,
        max_normalized_load: 0.0001,
    };
    assert_eq!(policy_from_config(&config).evaluate(), AdmissionDecision::Admit);
}
