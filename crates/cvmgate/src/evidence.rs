//! Evidence collection through the platform attestation client
//!
//! The client binary gathers the confidential VM's hardware evidence, exchanges
//! it with Azure Attestation and prints the resulting token. Its stdout is
//! redirected straight into a token file, so nothing depends on how it formats
//! its output. stderr is drained concurrently and copied into the trail.
//!
//! Invocation: `<client> [-a <tenant url>] -o token`

use crate::error::{Error, EvidenceError, Result};
use crate::limits::MAX_TOKEN_LENGTH;
use crate::trail::ExecutionTrail;
use crate::utils::base64url::is_base64url;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::fs::OpenOptions;
use tokio::process::{ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Characters of the token echoed into the trail
const TOKEN_PREVIEW_CHARS: usize = 60;

/// stderr lines kept per invocation; the rest is drained and dropped
const MAX_STDERR_LINES: usize = 256;

const MAX_STDERR_LINE_CHARS: usize = 1024;

/// How long stderr may keep draining once the client has exited or been killed
const STDERR_DRAIN_GRACE: Duration = Duration::from_secs(1);

static INVOCATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Where the client's output is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenFileMode {
    /// Always the configured path, overwritten on every run and left on disk.
    /// Overlapping collections race on this file.
    #[default]
    Shared,
    /// A fresh sibling of the configured path per call, removed afterwards
    PerInvocation,
}

/// Configuration for [`EvidenceCollector`]
#[derive(Debug, Clone)]
pub struct EvidenceConfig {
    client_binary_path: PathBuf,
    token_file_path: PathBuf,
    tenant_url: Option<String>,
    timeout: Option<Duration>,
    token_file_mode: TokenFileMode,
}

impl EvidenceConfig {
    pub fn new(client_binary_path: impl Into<PathBuf>, token_file_path: impl Into<PathBuf>) -> Self {
        Self {
            client_binary_path: client_binary_path.into(),
            token_file_path: token_file_path.into(),
            tenant_url: None,
            timeout: None,
            token_file_mode: TokenFileMode::default(),
        }
    }

    /// Attestation tenant passed as `-a`; a blank value means no flag
    pub fn tenant_url(mut self, tenant_url: impl Into<String>) -> Self {
        let tenant_url = tenant_url.into();
        self.tenant_url = (!tenant_url.trim().is_empty()).then(|| tenant_url.trim().to_owned());
        self
    }

    /// Kill the client if it has not exited after `timeout`
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn token_file_mode(mut self, mode: TokenFileMode) -> Self {
        self.token_file_mode = mode;
        self
    }

    pub fn client_binary_path(&self) -> &Path {
        &self.client_binary_path
    }

    pub fn token_file_path(&self) -> &Path {
        &self.token_file_path
    }
}

/// Runs the attestation client and returns the raw token it produced
#[derive(Debug, Clone)]
pub struct EvidenceCollector {
    config: EvidenceConfig,
}

impl EvidenceCollector {
    pub fn new(config: EvidenceConfig) -> Self {
        Self { config }
    }

    /// Run the client once and return the compact token from its output
    ///
    /// Every step is recorded in `trail`, and a failure adds a final
    /// `Evidence collection failed: ...` entry before it is returned.
    pub async fn collect(&self, trail: &mut ExecutionTrail) -> Result<String> {
        let token_path = self.token_path();
        let result = self.run(&token_path, trail).await;

        // A per-invocation file that could not be created is not ours to remove
        let created = !matches!(result, Err(EvidenceError::TokenFileCreate { .. }));
        if self.config.token_file_mode == TokenFileMode::PerInvocation && created {
            if let Err(e) = tokio::fs::remove_file(&token_path).await {
                debug!(path = %token_path.display(), error = %e, "token file not removed");
            }
        }

        result.map_err(|e| {
            warn!(error = %e, "evidence collection failed");
            trail.add(format!("Evidence collection failed: {e}"));
            Error::from(e)
        })
    }

    async fn run(
        &self,
        token_path: &Path,
        trail: &mut ExecutionTrail,
    ) -> std::result::Result<String, EvidenceError> {
        let args = self.arguments();
        let command_line = self.command_line(&args);
        trail.add(format!("Invoking AttestationClient: {command_line}"));

        let token_file = create_token_file(token_path, self.config.token_file_mode)
            .await
            .map_err(|e| EvidenceError::TokenFileCreate {
                path: token_path.display().to_string(),
                reason: e.to_string(),
            })?
            .into_std()
            .await;

        trail.add(format!("Invoking: {command_line} > {}", token_path.display()));
        info!(command = %command_line, token_file = %token_path.display(), "launching attestation client");

        let mut child = Command::new(&self.config.client_binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(token_file))
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EvidenceError::Launch {
                path: self.config.client_binary_path.display().to_string(),
                reason: e.to_string(),
            })?;

        // Lines land in `stderr_log` as they are read, so they survive a timeout
        let stderr_log = StderrLog::default();
        let drain = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(drain_stderr(stderr, stderr_log.clone())));

        let limit = self.config.timeout;
        let status = match limit {
            Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
            None => Some(child.wait().await),
        };

        let Some(status) = status else {
            let timeout = limit.unwrap_or_default();
            warn!(?timeout, "attestation client timed out, killing it");
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill attestation client");
            }
            finish_drain(drain).await;
            for line in stderr_log.take() {
                trail.add(format!("stderr: {line}"));
            }
            return Err(EvidenceError::TimedOut { timeout });
        };

        finish_drain(drain).await;
        let stderr_lines = stderr_log.take();
        for line in &stderr_lines {
            trail.add(format!("stderr: {line}"));
        }

        let status = status.map_err(|e| EvidenceError::Wait(e.to_string()))?;
        let code = status.code();
        match code {
            Some(code) => trail.add(format!("AttestationClient exited with code {code}")),
            None => trail.add("AttestationClient terminated by signal"),
        }

        if !status.success() {
            return Err(EvidenceError::ExitFailure {
                code,
                stderr: stderr_lines.join("\n"),
            });
        }

        let token = read_token_file(token_path).await?;
        debug!(len = token.text.len(), "attestation client output read");
        if !token.text.is_empty() {
            let preview: String = token
                .text
                .chars()
                .take(TOKEN_PREVIEW_CHARS)
                .map(|c| if c == '\n' { ' ' } else { c })
                .collect();
            trail.add(format!("AttestationClient output (truncated): {preview}"));
        }

        if !is_compact_token(&token.text) {
            return Err(EvidenceError::InvalidToken);
        }

        trail.add(format!(
            "Wrote token file {} (len = {})",
            token_path.display(),
            token.file_len
        ));
        trail.add(format!(
            "Obtained JWT from AttestationClient (len={})",
            token.text.len()
        ));
        Ok(token.text)
    }

    fn arguments(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(4);
        if let Some(tenant_url) = &self.config.tenant_url {
            args.push("-a".to_owned());
            args.push(tenant_url.clone());
        }
        args.push("-o".to_owned());
        args.push("token".to_owned());
        args
    }

    fn command_line(&self, args: &[String]) -> String {
        let mut line = self.config.client_binary_path.display().to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    fn token_path(&self) -> PathBuf {
        match self.config.token_file_mode {
            TokenFileMode::Shared => self.config.token_file_path.clone(),
            TokenFileMode::PerInvocation => unique_sibling(&self.config.token_file_path),
        }
    }
}

/// Trimmed token file contents and the file's size on disk
struct TokenFile {
    text: String,
    file_len: u64,
}

async fn read_token_file(path: &Path) -> std::result::Result<TokenFile, EvidenceError> {
    let file_len = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => meta.len(),
        _ => return Err(EvidenceError::TokenFileMissing(path.display().to_string())),
    };

    let max = MAX_TOKEN_LENGTH as u64;
    if file_len > max {
        return Err(EvidenceError::TokenFileTooLarge {
            size: file_len,
            max,
        });
    }

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| EvidenceError::TokenFileRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    if bytes.len() as u64 > max {
        return Err(EvidenceError::TokenFileTooLarge {
            size: bytes.len() as u64,
            max,
        });
    }

    let text = String::from_utf8_lossy(&bytes).trim().to_owned();
    Ok(TokenFile { text, file_len })
}

/// stderr lines collected by the drain task
#[derive(Debug, Clone, Default)]
struct StderrLog(Arc<Mutex<Vec<String>>>);

impl StderrLog {
    fn push(&self, line: String) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(line);
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Read stderr line by line until EOF
async fn drain_stderr(stderr: ChildStderr, log: StderrLog) {
    let mut reader = BufReader::new(stderr);
    let mut kept = 0;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) if kept >= MAX_STDERR_LINES => {}
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                log.push(line.chars().take(MAX_STDERR_LINE_CHARS).collect());
                kept += 1;
            }
            Err(e) => {
                warn!(error = %e, "failed to read attestation client stderr");
                break;
            }
        }
    }
}

/// Let the drain task reach EOF, giving up after [`STDERR_DRAIN_GRACE`]
///
/// A process the client left behind can hold stderr open after the client
/// itself is gone.
async fn finish_drain(drain: Option<JoinHandle<()>>) {
    let Some(mut drain) = drain else {
        return;
    };
    if tokio::time::timeout(STDERR_DRAIN_GRACE, &mut drain).await.is_err() {
        debug!("stderr still open after client exit, stop draining");
        drain.abort();
    }
}

/// Open the file the client's stdout is redirected into
///
/// The shared file is truncated in place. A per-invocation file must not
/// exist yet, so a planted file or symlink at the predictable name is refused.
async fn create_token_file(path: &Path, mode: TokenFileMode) -> std::io::Result<tokio::fs::File> {
    let mut options = OpenOptions::new();
    options.write(true);
    match mode {
        TokenFileMode::Shared => options.create(true).truncate(true),
        TokenFileMode::PerInvocation => options.create_new(true),
    };
    options.open(path).await
}

/// `segment.segment.segment`, each non-empty and Base64URL
pub(crate) fn is_compact_token(token: &str) -> bool {
    let segments: Vec<&str> = token.split('.').collect();
    segments.len() == 3 && segments.iter().all(|s| !s.is_empty() && is_base64url(s))
}

fn unique_sibling(path: &Path) -> PathBuf {
    let n = INVOCATION_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "token".into());
    name.push(format!(".{}-{n}", std::process::id()));
    path.with_file_name(name)
}
