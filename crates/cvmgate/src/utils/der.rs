//! DER encoding of RSA public keys published as JWK modulus/exponent pairs
//!
//! Uses the RustCrypto `spki` and `der` crates so the verifier can hand a
//! standard SubjectPublicKeyInfo to `aws-lc-rs`.

use der::{Encode, Sequence, asn1::BitString, asn1::UintRef};
use spki::{AlgorithmIdentifierOwned, ObjectIdentifier, SubjectPublicKeyInfoOwned};

/// rsaEncryption (PKCS #1)
const RSA_ENCRYPTION_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

/// Largest modulus accepted, in bytes (RSA-8192)
const MAX_RSA_MODULUS_SIZE: usize = 1024;

/// RSAPublicKey as defined in RFC 8017:
/// RSAPublicKey ::= SEQUENCE {
///     modulus           INTEGER,  -- n
///     publicExponent    INTEGER   -- e
/// }
#[derive(Sequence)]
struct RsaPublicKey<'a> {
    modulus: UintRef<'a>,
    public_exponent: UintRef<'a>,
}

/// Build a DER-encoded SubjectPublicKeyInfo from big-endian n and e bytes
pub(crate) fn rsa_spki_from_n_e(n: &[u8], e: &[u8]) -> Result<Vec<u8>, String> {
    if n.is_empty() || e.is_empty() {
        return Err("rsa key missing n or e".into());
    }

    if n.len() > MAX_RSA_MODULUS_SIZE + 1 {
        return Err(format!(
            "RSA modulus too large: {} bytes (maximum: {MAX_RSA_MODULUS_SIZE} bytes)",
            n.len()
        ));
    }

    // UintRef strips leading zeros and adds the sign byte where needed
    let rsa_pubkey = RsaPublicKey {
        modulus: UintRef::new(n).map_err(|e| format!("failed to encode RSA modulus: {e}"))?,
        public_exponent: UintRef::new(e)
            .map_err(|e| format!("failed to encode RSA exponent: {e}"))?,
    };

    let rsa_pubkey_der = rsa_pubkey
        .to_der()
        .map_err(|e| format!("failed to encode RSA public key: {e}"))?;

    let spki = SubjectPublicKeyInfoOwned {
        algorithm: AlgorithmIdentifierOwned {
            oid: RSA_ENCRYPTION_OID,
            parameters: Some(der::asn1::AnyRef::NULL.into()),
        },
        subject_public_key: BitString::new(0, rsa_pubkey_der)
            .map_err(|e| format!("failed to create bit string: {e}"))?,
    };

    spki.to_der()
        .map_err(|e| format!("failed to encode SPKI: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsa_spki_from_n_e() {
        let mut n = vec![0x00; 256];
        n[0] = 0xC1;
        let e = vec![0x01, 0x00, 0x01];

        let der = rsa_spki_from_n_e(&n, &e).expect("should encode");
        assert_eq!(der[0], 0x30); // SEQUENCE
        assert!(der.len() > 256);
    }

    #[test]
    fn test_rsa_spki_rejects_empty_parts() {
        assert!(rsa_spki_from_n_e(&[], &[0x01, 0x00, 0x01]).is_err());
        assert!(rsa_spki_from_n_e(&[0x01, 0x02], &[]).is_err());
    }

    #[test]
    fn test_rsa_spki_large_modulus_rejected() {
        let n = vec![0x01; 2048];
        let result = rsa_spki_from_n_e(&n, &[0x01, 0x00, 0x01]);
        assert!(matches!(result, Err(msg) if msg.contains("RSA modulus too large")));
    }
}
