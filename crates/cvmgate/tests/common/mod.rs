//! Shared helpers for integration tests
//!
//! Tokens are signed locally with `aws-lc-rs`, and the issuer's discovery
//! and key set documents are served by a `mockito` server, so the full
//! verification path runs without any external service.

#![allow(dead_code)]

use aws_lc_rs::rand::SystemRandom;
use aws_lc_rs::signature::{
    RSA_PKCS1_SHA256, RSA_PKCS1_SHA384, RSA_PKCS1_SHA512, RSA_PSS_SHA256, RsaEncoding, RsaKeyPair,
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use cvmgate::{ClaimValidator, HttpConfig, KeyDirectoryClient, TokenVerifier};
use mockito::{Mock, ServerGuard};
use rsa::RsaPrivateKey;
use rsa::pkcs8::EncodePrivateKey;
use rsa::traits::PublicKeyParts;
use serde_json::{Value, json};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Signing algorithms used by the tests
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Algorithm {
    RS256,
    RS384,
    RS512,
    PS256,
}

impl Algorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::RS512 => "RS512",
            Self::PS256 => "PS256",
        }
    }

    fn encoding(&self) -> &'static dyn RsaEncoding {
        match self {
            Self::RS256 => &RSA_PKCS1_SHA256,
            Self::RS384 => &RSA_PKCS1_SHA384,
            Self::RS512 => &RSA_PKCS1_SHA512,
            Self::PS256 => &RSA_PSS_SHA256,
        }
    }
}

/// 2048-bit RSA key generated once per test binary
pub fn signing_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap())
}

/// A second, unrelated key
pub fn other_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap())
}

/// Public JWK for `key`
pub fn rsa_jwk(key: &RsaPrivateKey, kid: &str) -> Value {
    json!({
        "kty": "RSA",
        "kid": kid,
        "use": "sig",
        "n": URL_SAFE_NO_PAD.encode(key.n().to_bytes_be()),
        "e": URL_SAFE_NO_PAD.encode(key.e().to_bytes_be()),
    })
}

/// Current Unix timestamp
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

/// Claims of a compliant confidential VM with secure boot enabled
pub fn compliant_claims(issuer: &str) -> Value {
    let now = now();
    json!({
        "iss": issuer,
        "iat": now - 60,
        "nbf": now - 60,
        "exp": now + 3600,
        "x-ms-ver": "1.0",
        "x-ms-attestation-type": "azurevm",
        "x-ms-azurevm-vmid": "2a1b4e4c-0f7a-4a1c-9d57-3f0b0d4f2b6e",
        "x-ms-isolation-tee": {
            "x-ms-attestation-type": "sevsnpvm",
            "x-ms-compliance-status": "azure-compliant-cvm",
            "x-ms-sevsnpvm-is-debuggable": false,
            "x-ms-runtime": {
                "keys": [],
                "vm-configuration": {
                    "console-enabled": false,
                    "secure-boot": true,
                    "tpm-enabled": true
                }
            }
        }
    })
}

/// Builder for locally signed attestation tokens
#[derive(Debug)]
pub struct TokenBuilder {
    algorithm: Algorithm,
    header: Value,
    claims: Value,
}

impl TokenBuilder {
    pub fn new(issuer: &str) -> Self {
        Self {
            algorithm: Algorithm::RS256,
            header: json!({ "alg": "RS256", "kid": "k1", "typ": "JWT" }),
            claims: compliant_claims(issuer),
        }
    }

    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self.header["alg"] = json!(algorithm.name());
        self
    }

    /// Override a header parameter; `Value::Null` removes it
    pub fn header(mut self, key: &str, value: Value) -> Self {
        set_or_remove(&mut self.header, key, value);
        self
    }

    /// Override a top-level claim; `Value::Null` removes it
    pub fn claim(mut self, key: &str, value: Value) -> Self {
        set_or_remove(&mut self.claims, key, value);
        self
    }

    /// Override a claim below `x-ms-isolation-tee`
    pub fn tee_claim(mut self, path: &[&str], value: Value) -> Self {
        let mut node = &mut self.claims["x-ms-isolation-tee"];
        let (last, parents) = path.split_last().unwrap();
        for key in parents {
            node = &mut node[*key];
        }
        set_or_remove(node, last, value);
        self
    }

    pub fn sign(self) -> String {
        self.sign_with(signing_key())
    }

    pub fn sign_with(self, key: &RsaPrivateKey) -> String {
        let header = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&self.header).unwrap());
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&self.claims).unwrap());
        let signing_input = format!("{header}.{payload}");
        let signature = sign_bytes(key, self.algorithm, signing_input.as_bytes());
        format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature))
    }
}

fn set_or_remove(target: &mut Value, key: &str, value: Value) {
    let map = target.as_object_mut().unwrap();
    if value.is_null() {
        map.remove(key);
    } else {
        map.insert(key.to_owned(), value);
    }
}

fn sign_bytes(key: &RsaPrivateKey, algorithm: Algorithm, message: &[u8]) -> Vec<u8> {
    let pkcs8 = key.to_pkcs8_der().unwrap();
    let keypair = RsaKeyPair::from_pkcs8(pkcs8.as_bytes()).unwrap();
    let mut signature = vec![0u8; keypair.public_modulus_len()];
    keypair
        .sign(algorithm.encoding(), &SystemRandom::new(), message, &mut signature)
        .unwrap();
    signature
}

/// Flip one bit of the decoded signature, keeping the token well-formed
pub fn corrupt_signature(token: &str) -> String {
    let (signing_input, signature) = token.rsplit_once('.').unwrap();
    let mut bytes = URL_SAFE_NO_PAD.decode(signature).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(bytes))
}

/// Mocked discovery and key set endpoints for one issuer
pub struct MockIssuer {
    pub server: ServerGuard,
    pub discovery: Mock,
    pub certs: Mock,
}

impl MockIssuer {
    /// Serve `keys` as the issuer's key set, expecting `hits` fetches
    pub async fn start(keys: Vec<Value>, hits: usize) -> Self {
        let mut server = mockito::Server::new_async().await;
        let discovery = server
            .mock("GET", "/.well-known/openid-configuration")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "issuer": server.url(), "jwks_uri": format!("{}/certs", server.url()) }).to_string())
            .expect(hits)
            .create_async()
            .await;
        let certs = server
            .mock("GET", "/certs")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "keys": keys }).to_string())
            .expect(hits)
            .create_async()
            .await;
        Self {
            server,
            discovery,
            certs,
        }
    }

    /// Issuer serving the default signing key as `k1`
    pub async fn with_signing_key() -> Self {
        Self::start(vec![rsa_jwk(signing_key(), "k1")], 1).await
    }

    pub fn issuer(&self) -> String {
        self.server.url()
    }

    pub fn assert(&self) {
        self.discovery.assert();
        self.certs.assert();
    }
}

/// Verifier with default timeouts and claim policy
pub fn verifier() -> TokenVerifier {
    TokenVerifier::new(
        KeyDirectoryClient::new(HttpConfig::default()).unwrap(),
        ClaimValidator::default(),
    )
}

#[cfg(unix)]
pub mod client {
    //! Fake attestation clients written as shell scripts

    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::sync::{Mutex, MutexGuard};

    /// Serializes writing and running scripts.
    ///
    /// Executing a script while another thread is forking with the script's
    /// write handle still open fails with ETXTBSY.
    pub fn process_lock() -> MutexGuard<'static, ()> {
        static LOCK: Mutex<()> = Mutex::new(());
        LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Write an executable `sh` script named `AttestationClient` into `dir`
    pub fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("AttestationClient");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Script that prints `token` on stdout and exits 0
    pub fn printing(dir: &Path, token: &str) -> PathBuf {
        write_script(dir, &format!("printf '%s\\n' '{token}'"))
    }
}
