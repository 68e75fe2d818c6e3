use imposter_harness::{FeatureGate, HarnessError, SemanticVersion, VersionGate};

fn gate(output: &str) -> VersionGate {
    VersionGate::from_output("imposter-cli", output)
}

#[test]
fn reads_cli_version_from_multi_component_output() {
    let gate = gate("imposter-engine 4.2.1\nimposter-cli 0.6.2\n");
    assert_eq!(
        gate.current_version().expect("version"),
        SemanticVersion::new(0, 6, 2)
    );
}

#[test]
fn ignores_pre_release_suffix() {
    let gate = gate("imposter-cli 0.7.0-rc1\n");
    assert_eq!(
        gate.current_version().expect("version"),
        SemanticVersion::new(0, 7, 0)
    );
}

#[test]
fn versions_compare_numerically() {
    let newer = SemanticVersion::parse("0.10.0").expect("parse");
    let older = SemanticVersion::parse("0.9.12").expect("parse");
    assert!(newer.at_least(&older));
    assert!(!older.at_least(&newer));
    assert_eq!(newer.to_string(), "0.10.0");
    assert!(SemanticVersion::parse("1.2").is_none());
}

#[test]
fn malformed_output_is_a_parse_error() {
    for output in ["", "imposter-engine 4.2.1", "imposter-cli", "imposter-cli x.y.z"] {
        let err = gate(output).current_version().expect_err(output);
        assert!(
            matches!(err, HarnessError::VersionParse { .. }),
            "{output:?} gave {err:?}"
        );
    }
}

#[test]
fn version_is_unavailable_before_initialization() {
    let gate = VersionGate::new("imposter", "imposter-cli");
    assert!(!gate.is_initialized());
    assert!(matches!(
        gate.current_version(),
        Err(HarnessError::VersionNotInitialized)
    ));
}

#[test]
fn runs_primary_only_at_or_above_threshold() {
    let required = SemanticVersion::new(0, 6, 0);

    for (version, expected) in [("0.5.9", None), ("0.6.0", Some("ran")), ("1.0.0", Some("ran"))] {
        let gate = gate(&format!("imposter-cli {version}"));
        assert_eq!(
            gate.run_if_at_least(required, || "ran").expect("version"),
            expected,
            "version {version}"
        );
    }
}

#[test]
fn fallback_runs_below_threshold() {
    let gate = gate("imposter-cli 0.5.9");
    let chosen = gate
        .run_if_at_least_or_else(SemanticVersion::new(0, 6, 0), || "primary", || "fallback")
        .expect("version");
    assert_eq!(chosen, "fallback");
}

#[test]
fn feature_gates_follow_engine_version() {
    let gate = gate("imposter-cli 0.6.1");
    assert!(gate.supports(&FeatureGate::LOCAL_CONFIG).expect("version"));
    assert!(!gate.supports(&FeatureGate::DOCTOR_ADVICE).expect("version"));

    let custom = FeatureGate::new("future", SemanticVersion::new(1, 0, 0));
    assert!(!gate.supports(&custom).expect("version"));
}

#[test]
fn unparseable_version_propagates_from_gate() {
    let gate = gate("garbage");
    assert!(gate.run_if_at_least(SemanticVersion::new(0, 1, 0), || ()).is_err());
}

#[tokio::test]
async fn missing_binary_is_engine_not_found() {
    let gate = VersionGate::new("/nonexistent/imposter-cli", "imposter-cli");
    let err = gate.initialize().await.expect_err("binary is missing");
    assert!(matches!(err, HarnessError::EngineNotFound { .. }), "got {err:?}");
    assert!(!gate.is_initialized());
}

#[cfg(unix)]
#[tokio::test]
async fn failing_version_command_is_reported() {
    let gate = VersionGate::new("false", "imposter-cli");
    let err = gate.initialize().await.expect_err("`false` exits non-zero");
    assert!(matches!(err, HarnessError::VersionQueryFailed(_)), "got {err:?}");
    assert_eq!(err.exit_code(), Some(1));
}

#[cfg(unix)]
#[tokio::test]
async fn unrelated_output_fails_to_parse_after_initialization() {
    // `echo version` succeeds but prints no CLI marker.
    let gate = VersionGate::new("echo", "imposter-cli");
    gate.initialize().await.expect("echo runs");
    assert!(gate.is_initialized());
    assert!(matches!(
        gate.current_version(),
        Err(HarnessError::VersionParse { .. })
    ));
}
