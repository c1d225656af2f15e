//! Evidence collection against fake attestation clients
//!
//! The client is replaced by small shell scripts, so these only run on unix.
#![cfg(unix)]

mod common;

use common::client::{printing, process_lock, write_script};
use cvmgate::{
    Error, ErrorKind, EvidenceCollector, EvidenceConfig, EvidenceError, ExecutionTrail,
    TokenFileMode,
};
use std::time::Duration;
use tempfile::TempDir;

fn collector(dir: &TempDir, client: &std::path::Path) -> EvidenceCollector {
    EvidenceCollector::new(EvidenceConfig::new(client, dir.path().join("maa_token.jwt")))
}

#[tokio::test]
async fn test_collect_returns_trimmed_token() {
    let _guard = process_lock();
    let dir = TempDir::new().unwrap();
    let client = write_script(dir.path(), "printf 'abc.def.ghi'");
    let collector = collector(&dir, &client);

    let mut trail = ExecutionTrail::new();
    let token = collector.collect(&mut trail).await.expect("collect");

    assert_eq!(token, "abc.def.ghi");
    assert!(trail.contains("AttestationClient exited with code 0"));
    assert!(trail.contains("AttestationClient output (truncated): abc.def.ghi"));
    assert!(trail.contains("Obtained JWT from AttestationClient (len=11)"));

    // The shared token file stays on disk
    let on_disk = std::fs::read_to_string(dir.path().join("maa_token.jwt")).unwrap();
    assert_eq!(on_disk, "abc.def.ghi");
}

#[tokio::test]
async fn test_collect_trail_order() {
    let _guard = process_lock();
    let dir = TempDir::new().unwrap();
    let client = write_script(
        dir.path(),
        "echo 'fetching evidence' >&2\necho 'talking to MAA' >&2\nprintf 'abc.def.ghi\\n'",
    );
    let collector = collector(&dir, &client);

    let mut trail = ExecutionTrail::new();
    collector.collect(&mut trail).await.unwrap();

    let steps: Vec<&str> = trail.steps().collect();
    let command = format!("{} -o token", client.display());
    let token_file = dir.path().join("maa_token.jwt");
    assert_eq!(
        steps,
        vec![
            format!("Invoking AttestationClient: {command}").as_str(),
            format!("Invoking: {command} > {}", token_file.display()).as_str(),
            "stderr: fetching evidence",
            "stderr: talking to MAA",
            "AttestationClient exited with code 0",
            "AttestationClient output (truncated): abc.def.ghi",
            format!("Wrote token file {} (len = 12)", token_file.display()).as_str(),
            "Obtained JWT from AttestationClient (len=11)",
        ]
    );
}

#[tokio::test]
async fn test_collect_passes_tenant_url() {
    let _guard = process_lock();
    let dir = TempDir::new().unwrap();
    let client = write_script(dir.path(), "echo \"args: $*\" >&2\nprintf 'abc.def.ghi'");
    let collector = EvidenceCollector::new(
        EvidenceConfig::new(&client, dir.path().join("maa_token.jwt"))
            .tenant_url("https://sharedeus.eus.attest.azure.net"),
    );

    let mut trail = ExecutionTrail::new();
    collector.collect(&mut trail).await.unwrap();

    assert!(trail.contains("stderr: args: -a https://sharedeus.eus.attest.azure.net -o token"));
}

#[tokio::test]
async fn test_collect_non_zero_exit() {
    let _guard = process_lock();
    let dir = TempDir::new().unwrap();
    let client = write_script(dir.path(), "echo 'device busy' >&2\nexit 3");
    let collector = collector(&dir, &client);

    let mut trail = ExecutionTrail::new();
    let err = collector.collect(&mut trail).await.unwrap_err();

    let message = err.to_string();
    assert!(message.contains('3'), "{message}");
    assert!(message.contains("device busy"), "{message}");
    assert_eq!(
        err,
        Error::Evidence(EvidenceError::ExitFailure {
            code: Some(3),
            stderr: "device busy".into()
        })
    );
    assert_eq!(err.kind(), ErrorKind::Infrastructure);

    assert!(trail.contains("stderr: device busy"));
    assert!(trail.contains("AttestationClient exited with code 3"));
    let last = trail.steps().last().unwrap();
    assert!(last.starts_with("Evidence collection failed: "));
}

#[tokio::test]
async fn test_collect_empty_token_file() {
    let _guard = process_lock();
    let dir = TempDir::new().unwrap();
    let client = write_script(dir.path(), "exit 0");
    let collector = collector(&dir, &client);

    let mut trail = ExecutionTrail::new();
    let err = collector.collect(&mut trail).await.unwrap_err();

    assert!(matches!(
        err,
        Error::Evidence(EvidenceError::TokenFileMissing(_))
    ));
    assert!(err.to_string().contains("token file missing or empty"));
}

#[tokio::test]
async fn test_collect_rejects_non_token_output() {
    let _guard = process_lock();
    let dir = TempDir::new().unwrap();
    let client = write_script(dir.path(), "echo 'Attestation failed: no vTPM'");
    let collector = collector(&dir, &client);

    let mut trail = ExecutionTrail::new();
    let err = collector.collect(&mut trail).await.unwrap_err();

    assert_eq!(err, Error::Evidence(EvidenceError::InvalidToken));
    assert!(err.to_string().contains("not a valid token"));
    assert!(trail.contains("AttestationClient output (truncated): Attestation failed: no vTPM"));
}

#[tokio::test]
async fn test_collect_truncates_preview() {
    let _guard = process_lock();
    let dir = TempDir::new().unwrap();
    let token = format!("{}.{}.{}", "h".repeat(40), "p".repeat(40), "s".repeat(40));
    let client = printing(dir.path(), &token);
    let collector = collector(&dir, &client);

    let mut trail = ExecutionTrail::new();
    assert_eq!(collector.collect(&mut trail).await.unwrap(), token);

    let preview = format!("AttestationClient output (truncated): {}", &token[..60]);
    assert!(trail.contains(&preview));
}

#[tokio::test]
async fn test_collect_missing_binary() {
    let _guard = process_lock();
    let dir = TempDir::new().unwrap();
    let collector = collector(&dir, &dir.path().join("does-not-exist"));

    let mut trail = ExecutionTrail::new();
    let err = collector.collect(&mut trail).await.unwrap_err();

    assert!(matches!(err, Error::Evidence(EvidenceError::Launch { .. })));
    assert!(trail.steps().last().unwrap().starts_with("Evidence collection failed: "));
}

#[tokio::test]
async fn test_collect_unwritable_token_file() {
    let _guard = process_lock();
    let dir = TempDir::new().unwrap();
    let client = write_script(dir.path(), "printf 'abc.def.ghi'");
    let collector = EvidenceCollector::new(EvidenceConfig::new(
        &client,
        dir.path().join("missing-dir").join("maa_token.jwt"),
    ));

    let mut trail = ExecutionTrail::new();
    let err = collector.collect(&mut trail).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Evidence(EvidenceError::TokenFileCreate { .. })
    ));
}

#[tokio::test]
async fn test_collect_timeout_kills_client() {
    let _guard = process_lock();
    let dir = TempDir::new().unwrap();
    let client = write_script(
        dir.path(),
        "echo 'stuck waiting for vTPM' >&2\nexec sleep 30",
    );
    let collector = EvidenceCollector::new(
        EvidenceConfig::new(&client, dir.path().join("maa_token.jwt"))
            .timeout(Duration::from_millis(200)),
    );

    let mut trail = ExecutionTrail::new();
    let started = std::time::Instant::now();
    let err = collector.collect(&mut trail).await.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(
        err,
        Error::Evidence(EvidenceError::TimedOut {
            timeout: Duration::from_millis(200)
        })
    );

    // What the client said before it hung is still reported
    assert!(trail.contains("stderr: stuck waiting for vTPM"));
    assert!(
        trail
            .steps()
            .last()
            .is_some_and(|step| step.starts_with("Evidence collection failed: "))
    );
}

#[tokio::test]
async fn test_collect_leaves_planted_file_alone() {
    let _guard = process_lock();
    let dir = TempDir::new().unwrap();
    let client = write_script(dir.path(), "printf 'abc.def.ghi'");
    let collector = EvidenceCollector::new(
        EvidenceConfig::new(&client, dir.path().join("maa_token.jwt"))
            .token_file_mode(TokenFileMode::PerInvocation),
    );

    // Occupy every name the next few invocations could pick
    let pid = std::process::id();
    let planted: Vec<_> = (0..64)
        .map(|n| dir.path().join(format!("maa_token.jwt.{pid}-{n}")))
        .collect();
    for path in &planted {
        std::fs::write(path, "planted").unwrap();
    }

    // Whether or not this run lands on a planted name, none of them is touched
    let mut trail = ExecutionTrail::new();
    let _ = collector.collect(&mut trail).await;
    for path in &planted {
        assert_eq!(std::fs::read_to_string(path).unwrap(), "planted");
    }
}

#[tokio::test]
async fn test_collect_per_invocation_file_is_removed() {
    let _guard = process_lock();
    let dir = TempDir::new().unwrap();
    let client = write_script(dir.path(), "printf 'abc.def.ghi'");
    let collector = EvidenceCollector::new(
        EvidenceConfig::new(&client, dir.path().join("maa_token.jwt"))
            .token_file_mode(TokenFileMode::PerInvocation),
    );

    let mut trail = ExecutionTrail::new();
    assert_eq!(collector.collect(&mut trail).await.unwrap(), "abc.def.ghi");
    assert_eq!(collector.collect(&mut trail).await.unwrap(), "abc.def.ghi");

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("maa_token.jwt"))
        .collect();
    assert!(leftovers.is_empty());
}
