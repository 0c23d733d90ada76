//! X.509 certificate chain verification.
//!
//! Every vendor root of trust (Intel PCK, AMD ARK/ASK/VCEK, AWS Nitro)
//! reduces to the same checks: issuer/subject linkage, signatures up to a
//! self-signed root, a pinned root fingerprint, validity windows and a
//! revocation list of serial numbers. Issuers sign with ECDSA (Intel, AWS,
//! the AMD VCEK) or RSA (the AMD ARK and ASK use RSASSA-PSS).

use base64::engine::general_purpose::STANDARD as b64;
use base64::Engine;
use chrono::{DateTime, Utc};
use der::asn1::Any;
use der::{Decode, Encode, Reader, SliceReader};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::{Pkcs1v15Sign, Pss, RsaPublicKey};
use sha2::{Digest, Sha256, Sha384};
use x509_cert::spki::{AlgorithmIdentifierOwned, ObjectIdentifier};
use x509_cert::Certificate;

use tee_attest_core::tee::{Digest32, HexBytes, VerificationFailure};

use super::util::{constant_time_eq, contains_constant_time, sha256_digest};

const ECDSA_WITH_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
const ECDSA_WITH_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");
pub(crate) const RSASSA_PSS: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.10");
const SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
const SHA384_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.12");
pub(crate) const MGF1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.8");
pub(crate) const ID_SHA256: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");
pub(crate) const ID_SHA384: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.2");

/// Uncompressed SEC1 point lengths.
const P256_POINT_LEN: usize = 65;
const P384_POINT_LEN: usize = 97;

/// `RSASSA-PSS-params` from RFC 4055. Absent fields mean SHA-1, MGF1-SHA-1,
/// a 20-byte salt and trailer 1.
#[derive(Clone, Debug, Eq, PartialEq, der::Sequence)]
pub(crate) struct PssParams {
    #[asn1(context_specific = "0", optional = "true")]
    pub hash: Option<AlgorithmIdentifierOwned>,
    #[asn1(context_specific = "1", optional = "true")]
    pub mask_gen: Option<AlgorithmIdentifierOwned>,
    #[asn1(context_specific = "2", optional = "true")]
    pub salt_len: Option<u32>,
    #[asn1(context_specific = "3", optional = "true")]
    pub trailer_field: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RsaDigest {
    Sha256,
    Sha384,
}

impl RsaDigest {
    fn from_oid(oid: ObjectIdentifier) -> Option<Self> {
        match oid {
            o if o == ID_SHA256 => Some(Self::Sha256),
            o if o == ID_SHA384 => Some(Self::Sha384),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PssScheme {
    digest: RsaDigest,
    salt_len: usize,
}

/// A parsed certificate together with the exact DER it was decoded from.
#[derive(Debug, Clone)]
pub struct ChainCert {
    pub der: Vec<u8>,
    pub cert: Certificate,
}

impl ChainCert {
    pub fn from_der(der: &[u8]) -> Result<Self, VerificationFailure> {
        let cert = Certificate::from_der(der).map_err(|e| {
            VerificationFailure::malformed(format!("invalid X.509 certificate: {}", e))
        })?;
        Ok(Self {
            der: der.to_vec(),
            cert,
        })
    }

    /// SHA-256 over the certificate's DER encoding.
    pub fn fingerprint(&self) -> Digest32 {
        sha256_digest(&self.der)
    }

    /// Raw subject public key: a SEC1 point for EC keys, PKCS#1 for RSA.
    pub fn public_key(&self) -> Option<&[u8]> {
        self.cert
            .tbs_certificate
            .subject_public_key_info
            .subject_public_key
            .as_bytes()
    }

    pub fn serial(&self) -> &[u8] {
        self.cert.tbs_certificate.serial_number.as_bytes()
    }

    fn subject_string(&self) -> String {
        self.cert.tbs_certificate.subject.to_string()
    }
}

/// Trust settings applied to one chain.
#[derive(Debug, Clone, Copy)]
pub struct ChainPolicy<'a> {
    /// Accepted root fingerprints
    pub trusted_roots: &'a [Digest32],
    /// Revoked serial numbers
    pub revoked_serials: &'a [HexBytes],
    /// Reference time for validity windows
    pub now: DateTime<Utc>,
}

/// Split a PEM bundle into DER certificates, in bundle order.
pub fn parse_pem_chain(bundle: &[u8]) -> Result<Vec<ChainCert>, VerificationFailure> {
    let text = std::str::from_utf8(bundle)
        .map_err(|_| VerificationFailure::malformed("certificate bundle is not valid UTF-8"))?;
    let text = text.trim_end_matches('\0');

    let blocks: Vec<&str> = text
        .split("-----END CERTIFICATE-----")
        .filter(|s| s.contains("-----BEGIN CERTIFICATE-----"))
        .collect();

    if blocks.is_empty() {
        return Err(VerificationFailure::malformed(
            "certificate bundle contains no PEM certificates",
        ));
    }

    blocks
        .into_iter()
        .map(|block| ChainCert::from_der(&pem_block_to_der(block)?))
        .collect()
}

fn pem_block_to_der(block: &str) -> Result<Vec<u8>, VerificationFailure> {
    let body = block
        .split("-----BEGIN CERTIFICATE-----")
        .nth(1)
        .unwrap_or_default();
    let b64_text: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    b64.decode(b64_text.as_bytes())
        .map_err(|e| VerificationFailure::malformed(format!("invalid PEM certificate: {}", e)))
}

/// Decode back-to-back DER certificates.
pub fn parse_der_sequence(data: &[u8]) -> Result<Vec<ChainCert>, VerificationFailure> {
    let malformed =
        |e: der::Error| VerificationFailure::malformed(format!("invalid DER certificate: {}", e));

    let mut reader = SliceReader::new(data).map_err(malformed)?;
    let mut certs = Vec::new();
    while !reader.is_finished() {
        let start = usize::try_from(reader.position()).map_err(malformed)?;
        let cert = Certificate::decode(&mut reader).map_err(malformed)?;
        let end = usize::try_from(reader.position()).map_err(malformed)?;
        certs.push(ChainCert {
            der: data[start..end].to_vec(),
            cert,
        });
    }
    Ok(certs)
}

/// Verify a leaf-first chain ending in a self-signed root.
///
/// Linkage and signature problems, as well as an unpinned root, are
/// `SignatureInvalid`; expired, not-yet-valid or revoked certificates are
/// `StaleRevokedKey`.
pub fn verify_chain(chain: &[ChainCert], policy: &ChainPolicy<'_>) -> Result<(), VerificationFailure> {
    let Some(root) = chain.last() else {
        return Err(VerificationFailure::signature_invalid(
            "certificate chain is empty",
        ));
    };

    for pair in chain.windows(2) {
        let (cert, issuer) = (&pair[0], &pair[1]);
        if cert.cert.tbs_certificate.issuer != issuer.cert.tbs_certificate.subject {
            return Err(VerificationFailure::signature_invalid(format!(
                "certificate '{}' is not issued by '{}'",
                cert.subject_string(),
                issuer.subject_string()
            )));
        }
        if !verify_signed_by(&cert.cert, &issuer.cert) {
            return Err(VerificationFailure::signature_invalid(format!(
                "signature on '{}' does not verify against '{}'",
                cert.subject_string(),
                issuer.subject_string()
            )));
        }
    }

    if root.cert.tbs_certificate.issuer != root.cert.tbs_certificate.subject
        || !verify_signed_by(&root.cert, &root.cert)
    {
        return Err(VerificationFailure::signature_invalid(format!(
            "root '{}' is not self-signed",
            root.subject_string()
        )));
    }

    let root_fp = root.fingerprint();
    if !contains_constant_time(policy.trusted_roots, &root_fp) {
        return Err(VerificationFailure::signature_invalid(format!(
            "root certificate '{}' is not a trusted anchor",
            root.subject_string()
        ))
        .with_details(serde_json::json!({ "rootFingerprint": root_fp.to_hex() })));
    }

    for cert in chain {
        check_validity(cert, policy.now)?;
        if is_revoked(cert.serial(), policy.revoked_serials) {
            return Err(VerificationFailure::stale_key(format!(
                "certificate '{}' has been revoked",
                cert.subject_string()
            ))
            .with_details(serde_json::json!({ "serial": hex::encode(cert.serial()) })));
        }
    }

    Ok(())
}

fn check_validity(cert: &ChainCert, now: DateTime<Utc>) -> Result<(), VerificationFailure> {
    let validity = &cert.cert.tbs_certificate.validity;
    let not_before = validity.not_before.to_unix_duration().as_secs();
    let not_after = validity.not_after.to_unix_duration().as_secs();
    let now_secs = u64::try_from(now.timestamp()).unwrap_or(0);

    if now_secs < not_before || now_secs > not_after {
        return Err(VerificationFailure::stale_key(format!(
            "certificate '{}' is outside its validity window",
            cert.subject_string()
        ))
        .with_details(serde_json::json!({
            "notBefore": validity.not_before.to_string(),
            "notAfter": validity.not_after.to_string(),
        })));
    }
    Ok(())
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn is_revoked(serial: &[u8], revoked: &[HexBytes]) -> bool {
    let serial = trim_leading_zeros(serial);
    revoked
        .iter()
        .any(|r| constant_time_eq(trim_leading_zeros(r.as_slice()), serial))
}

/// Verify that `cert` was signed by `issuer`.
///
/// Supports ECDSA P-256/P-384 with SHA-256 or SHA-384, RSASSA-PSS with
/// SHA-256 or SHA-384 and RSA PKCS#1 v1.5, selected from the certificate's
/// signature algorithm.
pub fn verify_signed_by(cert: &Certificate, issuer: &Certificate) -> bool {
    let tbs_der = match cert.tbs_certificate.to_der() {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!("Failed to encode tbsCertificate to DER: {}", e);
            return false;
        }
    };

    let Some(sig_bytes) = cert.signature.as_bytes() else {
        tracing::warn!("Failed to extract signature bytes from certificate");
        return false;
    };

    let Some(issuer_key) = issuer
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .as_bytes()
    else {
        tracing::warn!("Failed to extract issuer public key bytes");
        return false;
    };

    let algorithm = &cert.signature_algorithm;
    match algorithm.oid {
        oid if oid == ECDSA_WITH_SHA256 => {
            verify_der_prehash(issuer_key, &Sha256::digest(&tbs_der), sig_bytes)
        }
        oid if oid == ECDSA_WITH_SHA384 => {
            verify_der_prehash(issuer_key, &Sha384::digest(&tbs_der), sig_bytes)
        }
        oid if oid == RSASSA_PSS => {
            let Some(scheme) = pss_scheme(algorithm.parameters.as_ref()) else {
                tracing::warn!("Unsupported RSASSA-PSS parameters");
                return false;
            };
            verify_rsa_pss(issuer_key, scheme, &tbs_der, sig_bytes)
        }
        oid if oid == SHA256_WITH_RSA => {
            verify_rsa_pkcs1(issuer_key, RsaDigest::Sha256, &tbs_der, sig_bytes)
        }
        oid if oid == SHA384_WITH_RSA => {
            verify_rsa_pkcs1(issuer_key, RsaDigest::Sha384, &tbs_der, sig_bytes)
        }
        other => {
            tracing::warn!(oid = %other, "Unsupported certificate signature algorithm");
            false
        }
    }
}

fn verify_der_prehash(public_key: &[u8], prehash: &[u8], der_sig: &[u8]) -> bool {
    use ecdsa::signature::hazmat::PrehashVerifier;

    match public_key.len() {
        P256_POINT_LEN => {
            let (Ok(key), Ok(sig)) = (
                p256::ecdsa::VerifyingKey::from_sec1_bytes(public_key),
                p256::ecdsa::Signature::from_der(der_sig),
            ) else {
                return false;
            };
            key.verify_prehash(prehash, &sig).is_ok()
        }
        P384_POINT_LEN => {
            let (Ok(key), Ok(sig)) = (
                p384::ecdsa::VerifyingKey::from_sec1_bytes(public_key),
                p384::ecdsa::Signature::from_der(der_sig),
            ) else {
                return false;
            };
            key.verify_prehash(prehash, &sig).is_ok()
        }
        len => {
            tracing::warn!(key_len = len, "Unsupported issuer key type");
            false
        }
    }
}

/// Resolve PSS parameters to a digest and salt length.
///
/// Only SHA-256 and SHA-384 are accepted, with MGF1 over the same digest.
fn pss_scheme(parameters: Option<&Any>) -> Option<PssScheme> {
    let params = PssParams::from_der(&parameters?.to_der().ok()?).ok()?;

    let digest = RsaDigest::from_oid(params.hash.as_ref()?.oid)?;

    let mask_gen = params.mask_gen.as_ref()?;
    if mask_gen.oid != MGF1 {
        return None;
    }
    let mgf_params = mask_gen.parameters.as_ref()?.to_der().ok()?;
    let mgf_hash = AlgorithmIdentifierOwned::from_der(&mgf_params).ok()?;
    if RsaDigest::from_oid(mgf_hash.oid)? != digest {
        return None;
    }

    if params.trailer_field.unwrap_or(1) != 1 {
        return None;
    }

    Some(PssScheme {
        digest,
        salt_len: usize::try_from(params.salt_len.unwrap_or(20)).ok()?,
    })
}

fn rsa_key(public_key_pkcs1: &[u8]) -> Option<RsaPublicKey> {
    match RsaPublicKey::from_pkcs1_der(public_key_pkcs1) {
        Ok(key) => Some(key),
        Err(e) => {
            tracing::warn!("Issuer key is not a usable RSA public key: {}", e);
            None
        }
    }
}

fn verify_rsa_pss(
    public_key_pkcs1: &[u8],
    scheme: PssScheme,
    message: &[u8],
    signature: &[u8],
) -> bool {
    let Some(key) = rsa_key(public_key_pkcs1) else {
        return false;
    };
    let result = match scheme.digest {
        RsaDigest::Sha256 => key.verify(
            Pss::new_with_salt::<Sha256>(scheme.salt_len),
            &Sha256::digest(message),
            signature,
        ),
        RsaDigest::Sha384 => key.verify(
            Pss::new_with_salt::<Sha384>(scheme.salt_len),
            &Sha384::digest(message),
            signature,
        ),
    };
    result.is_ok()
}

fn verify_rsa_pkcs1(
    public_key_pkcs1: &[u8],
    digest: RsaDigest,
    message: &[u8],
    signature: &[u8],
) -> bool {
    let Some(key) = rsa_key(public_key_pkcs1) else {
        return false;
    };
    let result = match digest {
        RsaDigest::Sha256 => key.verify(
            Pkcs1v15Sign::new::<Sha256>(),
            &Sha256::digest(message),
            signature,
        ),
        RsaDigest::Sha384 => key.verify(
            Pkcs1v15Sign::new::<Sha384>(),
            &Sha384::digest(message),
            signature,
        ),
    };
    result.is_ok()
}

/// Verify an RSA PKCS#1 v1.5 SHA-256 signature over `message`.
pub fn verify_rsa_pkcs1_sha256(
    public_key_pkcs1: &[u8],
    message: &[u8],
    signature: &[u8],
) -> bool {
    verify_rsa_pkcs1(public_key_pkcs1, RsaDigest::Sha256, message, signature)
}

/// Verify a fixed-size `r || s` ECDSA-P256-SHA256 signature.
pub fn verify_p256_raw(public_key_sec1: &[u8], message: &[u8], signature: &[u8]) -> bool {
    use p256::ecdsa::{signature::Verifier, Signature, VerifyingKey};

    let (Ok(key), Ok(sig)) = (
        VerifyingKey::from_sec1_bytes(public_key_sec1),
        Signature::from_slice(signature),
    ) else {
        return false;
    };
    key.verify(message, &sig).is_ok()
}

/// Verify a fixed-size `r || s` ECDSA-P384-SHA384 signature.
pub fn verify_p384_raw(public_key_sec1: &[u8], message: &[u8], signature: &[u8]) -> bool {
    use p384::ecdsa::{signature::Verifier, Signature, VerifyingKey};

    let (Ok(key), Ok(sig)) = (
        VerifyingKey::from_sec1_bytes(public_key_sec1),
        Signature::from_slice(signature),
    ) else {
        return false;
    };
    key.verify(message, &sig).is_ok()
}
