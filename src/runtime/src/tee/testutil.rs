//! Test fixtures: deterministic keys, rcgen certificate chains and
//! correctly signed evidence for every provider.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as b64;
use base64::Engine;
use ciborium::value::Value;
use coset::{iana, CborSerializable, CoseSign1Builder, HeaderBuilder, TaggedCborSerializable};
use der::asn1::{Any, BitString};
use der::{Decode, Encode};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use rcgen::{
    BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, RemoteKeyPair, SerialNumber,
    SignatureAlgorithm, PKCS_ECDSA_P256_SHA256, PKCS_ECDSA_P384_SHA384, PKCS_RSA_SHA256,
};
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::rand_core::OsRng;
use rsa::{Pkcs1v15Sign, Pss, RsaPrivateKey};
use sha2::{Digest, Sha256, Sha384};
use tee_attest_core::config::{NitroConfig, SevConfig, SgxConfig};
use tee_attest_core::tee::Digest32;
use x509_cert::spki::AlgorithmIdentifierOwned;
use x509_cert::Certificate;

use super::certs::{ChainCert, PssParams, ID_SHA384, MGF1, RSASSA_PSS};
use super::kds::CertificateChain;
use super::net::ServiceError;
use super::providers::sev::{offsets, SNP_REPORT_SIZE};
use super::providers::{NitroProvider, SevProvider, SgxProvider};
use super::quote_status::QuoteStatusService;
use super::util::sha256;

static KEY_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_seed(label: &str) -> Vec<u8> {
    let mut seed = label.as_bytes().to_vec();
    seed.extend_from_slice(&KEY_COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    seed
}

const TEST_RSA_BITS: usize = 2048;

#[derive(Clone)]
pub enum TestKey {
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
    /// Signs PKCS#1 v1.5 with SHA-256.
    Rsa(Arc<RsaPrivateKey>),
}

impl TestKey {
    pub fn p256(label: &str) -> Self {
        let seed = Sha256::digest(next_seed(label));
        TestKey::P256(p256::ecdsa::SigningKey::from_slice(&seed).unwrap())
    }

    pub fn p384(label: &str) -> Self {
        let seed = Sha384::digest(next_seed(label));
        TestKey::P384(p384::ecdsa::SigningKey::from_slice(&seed).unwrap())
    }

    pub fn rsa() -> Self {
        TestKey::Rsa(Arc::new(RsaPrivateKey::new(&mut OsRng, TEST_RSA_BITS).unwrap()))
    }

    /// Uncompressed SEC1 point, or PKCS#1 `RSAPublicKey` DER.
    pub fn public_key(&self) -> Vec<u8> {
        match self {
            TestKey::P256(k) => k.verifying_key().to_encoded_point(false).as_bytes().to_vec(),
            TestKey::P384(k) => k.verifying_key().to_encoded_point(false).as_bytes().to_vec(),
            TestKey::Rsa(k) => k.to_public_key().to_pkcs1_der().unwrap().as_bytes().to_vec(),
        }
    }

    /// Fixed-size big-endian `r || s` for EC keys, PKCS#1 v1.5 SHA-256 for RSA.
    pub fn sign_raw(&self, msg: &[u8]) -> Vec<u8> {
        use ecdsa::signature::Signer;
        match self {
            TestKey::P256(k) => {
                let sig: p256::ecdsa::Signature = k.sign(msg);
                sig.to_bytes().to_vec()
            }
            TestKey::P384(k) => {
                let sig: p384::ecdsa::Signature = k.sign(msg);
                sig.to_bytes().to_vec()
            }
            TestKey::Rsa(k) => k.sign(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(msg)).unwrap(),
        }
    }

    fn sign_der(&self, msg: &[u8]) -> Vec<u8> {
        use ecdsa::signature::Signer;
        match self {
            TestKey::P256(k) => {
                let sig: p256::ecdsa::Signature = k.sign(msg);
                sig.to_der().as_bytes().to_vec()
            }
            TestKey::P384(k) => {
                let sig: p384::ecdsa::Signature = k.sign(msg);
                sig.to_der().as_bytes().to_vec()
            }
            TestKey::Rsa(_) => self.sign_raw(msg),
        }
    }

    fn key_pair(&self) -> KeyPair {
        let remote = RemoteKey {
            public: self.public_key(),
            key: self.clone(),
        };
        KeyPair::from_remote(Box::new(remote)).unwrap()
    }
}

struct RemoteKey {
    key: TestKey,
    public: Vec<u8>,
}

impl RemoteKeyPair for RemoteKey {
    fn public_key(&self) -> &[u8] {
        &self.public
    }

    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, rcgen::Error> {
        Ok(self.key.sign_der(msg))
    }

    fn algorithm(&self) -> &'static SignatureAlgorithm {
        match self.key {
            TestKey::P256(_) => &PKCS_ECDSA_P256_SHA256,
            TestKey::P384(_) => &PKCS_ECDSA_P384_SHA384,
            TestKey::Rsa(_) => &PKCS_RSA_SHA256,
        }
    }
}

pub fn p256_keypair() -> (TestKey, Vec<u8>) {
    let key = TestKey::p256("standalone");
    let public = key.public_key();
    (key, public)
}

pub fn p384_keypair() -> (TestKey, Vec<u8>) {
    let key = TestKey::p384("standalone");
    let public = key.public_key();
    (key, public)
}

pub fn sign_p256(key: &TestKey, msg: &[u8]) -> Vec<u8> {
    key.sign_raw(msg)
}

pub fn sign_p384(key: &TestKey, msg: &[u8]) -> Vec<u8> {
    key.sign_raw(msg)
}

pub fn to_pem(der: &[u8]) -> String {
    let encoded = b64.encode(der);
    let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
    for line in encoded.as_bytes().chunks(64) {
        pem.push_str(std::str::from_utf8(line).unwrap());
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}

/// Root, intermediate and leaf.
pub struct TestChain {
    certs: Vec<ChainCert>,
    leaf_key: TestKey,
}

impl TestChain {
    pub fn p256(label: &str) -> Self {
        Self::build(label, TestKey::p256(label), TestKey::p256(label), TestKey::p256(label))
    }

    pub fn p384(label: &str) -> Self {
        Self::build(label, TestKey::p384(label), TestKey::p384(label), TestKey::p384(label))
    }

    /// RSA throughout, signed with PKCS#1 v1.5 SHA-256.
    pub fn rsa(label: &str) -> Self {
        Self::build(label, TestKey::rsa(), TestKey::rsa(), TestKey::rsa())
    }

    /// Laid out like AMD's KDS chain: RSA ARK and ASK signing with
    /// RSASSA-PSS SHA-384 (salt 48) over a P-384 VCEK.
    pub fn amd(label: &str) -> Self {
        let ark = Arc::new(RsaPrivateKey::new(&mut OsRng, TEST_RSA_BITS).unwrap());
        let ask = Arc::new(RsaPrivateKey::new(&mut OsRng, TEST_RSA_BITS).unwrap());
        let mut chain = Self::build(
            label,
            TestKey::Rsa(ark.clone()),
            TestKey::Rsa(ask.clone()),
            TestKey::p384(label),
        );

        let issuers = [&ask, &ark, &ark];
        chain.certs = chain
            .certs
            .iter()
            .zip(issuers)
            .map(|(cert, issuer)| {
                ChainCert::from_der(&resign_pss_sha384(&cert.der, issuer)).unwrap()
            })
            .collect();
        chain
    }

    fn build(label: &str, root_key: TestKey, inter_key: TestKey, leaf_key: TestKey) -> Self {
        let (root_kp, inter_kp, leaf_kp) =
            (root_key.key_pair(), inter_key.key_pair(), leaf_key.key_pair());

        let root = Self::params(&format!("{} Root CA", label), true)
            .self_signed(&root_kp)
            .unwrap();
        let inter = Self::params(&format!("{} Intermediate CA", label), true)
            .signed_by(&inter_kp, &root, &root_kp)
            .unwrap();
        let leaf = Self::params(&format!("{} Leaf", label), false)
            .signed_by(&leaf_kp, &inter, &inter_kp)
            .unwrap();

        let certs = [&leaf, &inter, &root]
            .iter()
            .map(|c| ChainCert::from_der(c.der()).unwrap())
            .collect();
        Self { certs, leaf_key }
    }

    fn params(common_name: &str, ca: bool) -> CertificateParams {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.serial_number = Some(SerialNumber::from(KEY_COUNTER.fetch_add(1, Ordering::Relaxed)));
        if ca {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        }
        params
    }

    /// Leaf first.
    pub fn certs(&self) -> Vec<ChainCert> {
        self.certs.clone()
    }

    pub fn root_fingerprint(&self) -> Digest32 {
        self.certs[2].fingerprint()
    }

    /// PEM bundle, leaf first.
    pub fn pem(&self) -> String {
        self.certs.iter().map(|c| to_pem(&c.der)).collect()
    }

    /// Signature by the leaf key, see [`TestKey::sign_raw`].
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        self.leaf_key.sign_raw(msg)
    }
}

/// `RSASSA-PSS` with SHA-384, MGF1-SHA-384 and a 48-byte salt.
pub fn pss_sha384_algorithm() -> AlgorithmIdentifierOwned {
    let sha384 = AlgorithmIdentifierOwned {
        oid: ID_SHA384,
        parameters: None,
    };
    let params = PssParams {
        hash: Some(sha384.clone()),
        mask_gen: Some(AlgorithmIdentifierOwned {
            oid: MGF1,
            parameters: Some(Any::encode_from(&sha384).unwrap()),
        }),
        salt_len: Some(48),
        trailer_field: None,
    };
    AlgorithmIdentifierOwned {
        oid: RSASSA_PSS,
        parameters: Some(Any::encode_from(&params).unwrap()),
    }
}

/// Replace a certificate's signature with an RSASSA-PSS SHA-384 one.
fn resign_pss_sha384(der: &[u8], issuer: &RsaPrivateKey) -> Vec<u8> {
    let mut cert = Certificate::from_der(der).unwrap();
    let algorithm = pss_sha384_algorithm();
    cert.tbs_certificate.signature = algorithm.clone();
    cert.signature_algorithm = algorithm;

    let digest = Sha384::digest(cert.tbs_certificate.to_der().unwrap());
    let signature = issuer
        .sign_with_rng(&mut OsRng, Pss::new_with_salt::<Sha384>(48), &digest)
        .unwrap();
    cert.signature = BitString::from_bytes(&signature).unwrap();
    cert.to_der().unwrap()
}

/// Canned quote status service.
pub struct StubStatus {
    result: Result<String, String>,
}

impl StubStatus {
    pub fn ok() -> Arc<Self> {
        Self::fixed("OK")
    }

    pub fn fixed(status: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(status.to_string()),
        })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            result: Err("connection refused".to_string()),
        })
    }
}

#[async_trait]
impl QuoteStatusService for StubStatus {
    async fn quote_status(&self, _quote: &[u8]) -> Result<String, ServiceError> {
        self.result.clone().map_err(ServiceError::Transport)
    }
}

/// Report signing chain and response builder for the IAS report endpoint.
pub struct IasFixture {
    pub chain: TestChain,
}

impl IasFixture {
    pub fn new() -> Self {
        Self {
            chain: TestChain::rsa("Intel SGX Attestation Report Signing"),
        }
    }

    pub fn roots(&self) -> Vec<Digest32> {
        vec![self.chain.root_fingerprint()]
    }

    /// Verification report JSON echoing the first 432 bytes of `quote`.
    pub fn body(status: &str, quote: &[u8]) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "id": "165171271757108173876306223827987629752",
            "timestamp": "2024-01-15T10:20:30.123456",
            "version": 4,
            "isvEnclaveQuoteStatus": status,
            "isvEnclaveQuoteBody": b64.encode(&quote[..quote.len().min(432)]),
        }))
        .unwrap()
    }

    /// `X-IASReport-Signature` value for `body`.
    pub fn signature(&self, body: &[u8]) -> String {
        b64.encode(self.chain.sign(body))
    }

    /// `X-IASReport-Signing-Certificate` value: the URL-encoded PEM chain.
    pub fn certificate_header(&self) -> String {
        utf8_percent_encode(&self.chain.pem(), NON_ALPHANUMERIC).to_string()
    }
}

/// Knobs for a generated SGX quote.
#[derive(Clone)]
pub struct SgxQuoteBuilder {
    pub mr_enclave: [u8; 32],
    pub mr_signer: [u8; 32],
    pub isv_prod_id: u16,
    pub isv_svn: u16,
    pub flags: u64,
    pub report_data: [u8; 64],
    pub corrupt_qe_binding: bool,
}

impl Default for SgxQuoteBuilder {
    fn default() -> Self {
        Self {
            mr_enclave: [0x11; 32],
            mr_signer: [0x22; 32],
            isv_prod_id: 7,
            isv_svn: 3,
            flags: super::providers::sgx::attributes::MODE64BIT,
            report_data: [0u8; 64],
            corrupt_qe_binding: false,
        }
    }
}

fn sgx_report_body(
    flags: u64,
    mr_enclave: &[u8; 32],
    mr_signer: &[u8; 32],
    isv_prod_id: u16,
    isv_svn: u16,
    report_data: &[u8; 64],
) -> Vec<u8> {
    let mut body = vec![0u8; 384];
    body[48..56].copy_from_slice(&flags.to_le_bytes());
    body[56..64].copy_from_slice(&0x3u64.to_le_bytes());
    body[64..96].copy_from_slice(mr_enclave);
    body[128..160].copy_from_slice(mr_signer);
    body[256..258].copy_from_slice(&isv_prod_id.to_le_bytes());
    body[258..260].copy_from_slice(&isv_svn.to_le_bytes());
    body[320..384].copy_from_slice(report_data);
    body
}

/// PCK chain plus attestation key for building DCAP quotes.
pub struct SgxFixture {
    pub chain: TestChain,
    attestation_key: TestKey,
}

impl SgxFixture {
    pub fn new() -> Self {
        Self {
            chain: TestChain::p256("Intel SGX"),
            attestation_key: TestKey::p256("attestation key"),
        }
    }

    pub fn config(&self) -> SgxConfig {
        let mut config = SgxConfig::new(vec![self.chain.root_fingerprint()]);
        config.attestation_service_url = Some("https://ias.invalid/attestation/v4/report".into());
        config.ias_signing_root_fingerprints = vec![Digest32([0x1A; 32])];
        config
    }

    pub fn provider(&self, status: Arc<StubStatus>) -> SgxProvider {
        SgxProvider::new(self.config(), status)
    }

    pub fn quote(&self, b: &SgxQuoteBuilder) -> Vec<u8> {
        let mut quote = Vec::new();
        quote.extend_from_slice(&3u16.to_le_bytes());
        quote.extend_from_slice(&2u16.to_le_bytes());
        quote.extend_from_slice(&0u32.to_le_bytes());
        quote.extend_from_slice(&5u16.to_le_bytes()); // qe_svn
        quote.extend_from_slice(&9u16.to_le_bytes()); // pce_svn
        quote.extend_from_slice(&[0x93; 16]);
        quote.extend_from_slice(&[0u8; 20]);
        quote.extend_from_slice(&sgx_report_body(
            b.flags,
            &b.mr_enclave,
            &b.mr_signer,
            b.isv_prod_id,
            b.isv_svn,
            &b.report_data,
        ));

        let isv_signature = self.attestation_key.sign_raw(&quote);
        let attestation_key = &self.attestation_key.public_key()[1..];
        let qe_auth_data = b"qe-auth".to_vec();

        let mut binding_input = attestation_key.to_vec();
        binding_input.extend_from_slice(&qe_auth_data);
        let mut qe_report_data = [0u8; 64];
        qe_report_data[..32].copy_from_slice(&sha256(&binding_input));
        if b.corrupt_qe_binding {
            qe_report_data[0] ^= 0xFF;
        }
        let qe_report = sgx_report_body(
            super::providers::sgx::attributes::MODE64BIT,
            &[0xAA; 32],
            &[0xBB; 32],
            1,
            5,
            &qe_report_data,
        );
        let qe_signature = self.chain.sign(&qe_report);
        let cert_data = self.chain.pem().into_bytes();

        let mut sig_data = Vec::new();
        sig_data.extend_from_slice(&isv_signature);
        sig_data.extend_from_slice(attestation_key);
        sig_data.extend_from_slice(&qe_report);
        sig_data.extend_from_slice(&qe_signature);
        sig_data.extend_from_slice(&(qe_auth_data.len() as u16).to_le_bytes());
        sig_data.extend_from_slice(&qe_auth_data);
        sig_data.extend_from_slice(&5u16.to_le_bytes());
        sig_data.extend_from_slice(&(cert_data.len() as u32).to_le_bytes());
        sig_data.extend_from_slice(&cert_data);

        quote.extend_from_slice(&(sig_data.len() as u32).to_le_bytes());
        quote.extend_from_slice(&sig_data);
        quote
    }
}

/// Knobs for a generated SNP report.
#[derive(Clone)]
pub struct SnpReportBuilder {
    pub policy: u64,
    pub guest_svn: u32,
    pub product_id: u16,
    pub measurement: [u8; 48],
    pub id_key_digest: [u8; 48],
    pub author_key_digest: [u8; 48],
    pub author_key_en: bool,
    pub report_data: [u8; 64],
    pub tcb: [u8; 8],
    pub firmware: (u8, u8),
}

impl Default for SnpReportBuilder {
    fn default() -> Self {
        Self {
            policy: 0x20000,
            guest_svn: 2,
            product_id: 1,
            measurement: [0x55; 48],
            id_key_digest: [0x33; 48],
            author_key_digest: [0x44; 48],
            author_key_en: false,
            report_data: [0u8; 64],
            tcb: [3, 0, 0, 0, 0, 0, 8, 115],
            firmware: (1, 55),
        }
    }
}

/// VCEK/ASK/ARK chain for signing SNP reports.
pub struct SevFixture {
    pub chain: TestChain,
}

impl SevFixture {
    pub fn new() -> Self {
        Self {
            chain: TestChain::p384("AMD"),
        }
    }

    /// RSA-PSS ARK and ASK, as served by the AMD KDS.
    pub fn amd() -> Self {
        Self {
            chain: TestChain::amd("AMD"),
        }
    }

    /// The certificate chain as the KDS would return it.
    pub fn kds_chain(&self) -> CertificateChain {
        let certs = self.chain.certs();
        CertificateChain {
            vcek: certs[0].der.clone(),
            ask: certs[1].der.clone(),
            ark: certs[2].der.clone(),
        }
    }

    pub fn config(&self) -> SevConfig {
        SevConfig {
            ark_fingerprints: vec![self.chain.root_fingerprint()],
            ..Default::default()
        }
    }

    pub fn provider(&self) -> SevProvider {
        SevProvider::new(self.config(), None)
    }

    /// Signed 1184-byte report without certificates.
    pub fn report(&self, b: &SnpReportBuilder) -> Vec<u8> {
        let mut raw = vec![0u8; SNP_REPORT_SIZE];
        raw[offsets::VERSION..offsets::VERSION + 4].copy_from_slice(&2u32.to_le_bytes());
        raw[offsets::GUEST_SVN..offsets::GUEST_SVN + 4].copy_from_slice(&b.guest_svn.to_le_bytes());
        raw[offsets::POLICY..offsets::POLICY + 8].copy_from_slice(&b.policy.to_le_bytes());
        raw[offsets::IMAGE_ID..offsets::IMAGE_ID + 2].copy_from_slice(&b.product_id.to_le_bytes());
        raw[offsets::CURRENT_TCB..offsets::CURRENT_TCB + 8].copy_from_slice(&b.tcb);
        raw[offsets::FLAGS..offsets::FLAGS + 4]
            .copy_from_slice(&u32::from(b.author_key_en).to_le_bytes());
        raw[offsets::REPORT_DATA..offsets::REPORT_DATA + 64].copy_from_slice(&b.report_data);
        raw[offsets::MEASUREMENT..offsets::MEASUREMENT + 48].copy_from_slice(&b.measurement);
        raw[offsets::ID_KEY_DIGEST..offsets::ID_KEY_DIGEST + 48].copy_from_slice(&b.id_key_digest);
        raw[offsets::AUTHOR_KEY_DIGEST..offsets::AUTHOR_KEY_DIGEST + 48]
            .copy_from_slice(&b.author_key_digest);
        raw[offsets::REPORTED_TCB..offsets::REPORTED_TCB + 8].copy_from_slice(&b.tcb);
        raw[offsets::CHIP_ID..offsets::CHIP_ID + 64].copy_from_slice(&[0x0C; 64]);
        raw[offsets::CURRENT_MINOR] = b.firmware.1;
        raw[offsets::CURRENT_MAJOR] = b.firmware.0;

        // r and s are stored little-endian in 72-byte fields
        let sig = self.chain.sign(&raw[..offsets::SIGNATURE]);
        let (r, s) = sig.split_at(48);
        for (field_offset, scalar) in [(offsets::SIGNATURE, r), (offsets::SIGNATURE + 72, s)] {
            let mut le = scalar.to_vec();
            le.reverse();
            raw[field_offset..field_offset + 48].copy_from_slice(&le);
        }
        raw
    }

    /// Signed report followed by VCEK, ASK and ARK.
    pub fn evidence(&self, b: &SnpReportBuilder) -> Vec<u8> {
        let mut evidence = self.report(b);
        for cert in self.chain.certs() {
            evidence.extend_from_slice(&cert.der);
        }
        evidence
    }
}

/// Knobs for a generated Nitro attestation document.
#[derive(Clone)]
pub struct NitroDocBuilder {
    pub pcrs: BTreeMap<u8, Vec<u8>>,
    pub user_data: Option<Vec<u8>>,
    pub nonce: Option<Vec<u8>>,
    pub timestamp_ms: u64,
    pub tagged: bool,
    pub corrupt_signature: bool,
}

impl Default for NitroDocBuilder {
    fn default() -> Self {
        let mut pcrs = BTreeMap::new();
        pcrs.insert(0u8, vec![0x01; 48]);
        pcrs.insert(1u8, vec![0x02; 48]);
        pcrs.insert(2u8, vec![0x03; 48]);
        Self {
            pcrs,
            user_data: Some(b"user-data".to_vec()),
            nonce: None,
            timestamp_ms: 1_700_000_000_000,
            tagged: true,
            corrupt_signature: false,
        }
    }
}

/// AWS Nitro CA bundle plus signing certificate.
pub struct NitroFixture {
    pub chain: TestChain,
    alg: iana::Algorithm,
}

impl NitroFixture {
    pub fn new() -> Self {
        Self {
            chain: TestChain::p384("AWS Nitro"),
            alg: iana::Algorithm::ES384,
        }
    }

    pub fn p256() -> Self {
        Self {
            chain: TestChain::p256("AWS Nitro"),
            alg: iana::Algorithm::ES256,
        }
    }

    pub fn config(&self) -> NitroConfig {
        NitroConfig::new(vec![self.chain.root_fingerprint()])
    }

    pub fn provider(&self) -> NitroProvider {
        NitroProvider::new(self.config())
    }

    pub fn document(&self) -> Vec<u8> {
        self.document_with(&NitroDocBuilder::default())
    }

    pub fn document_with(&self, b: &NitroDocBuilder) -> Vec<u8> {
        let certs = self.chain.certs();
        let text = |s: &str| Value::Text(s.to_string());
        let optional = |v: &Option<Vec<u8>>| v.clone().map(Value::Bytes).unwrap_or(Value::Null);

        let pcrs = b
            .pcrs
            .iter()
            .map(|(i, v)| (Value::Integer((*i).into()), Value::Bytes(v.clone())))
            .collect();
        let payload = Value::Map(vec![
            (text("module_id"), text("i-0123456789abcdef0-enc0123456789abcdef")),
            (text("digest"), text("SHA384")),
            (text("timestamp"), Value::Integer(b.timestamp_ms.into())),
            (text("pcrs"), Value::Map(pcrs)),
            (text("certificate"), Value::Bytes(certs[0].der.clone())),
            (
                text("cabundle"),
                Value::Array(vec![
                    Value::Bytes(certs[2].der.clone()),
                    Value::Bytes(certs[1].der.clone()),
                ]),
            ),
            (text("public_key"), Value::Null),
            (text("user_data"), optional(&b.user_data)),
            (text("nonce"), optional(&b.nonce)),
        ]);
        let mut payload_bytes = Vec::new();
        ciborium::ser::into_writer(&payload, &mut payload_bytes).unwrap();

        let mut sign1 = CoseSign1Builder::new()
            .protected(HeaderBuilder::new().algorithm(self.alg).build())
            .payload(payload_bytes)
            .create_signature(b"", |data| self.chain.sign(data))
            .build();
        if b.corrupt_signature {
            sign1.signature[0] ^= 0xFF;
        }

        if b.tagged {
            sign1.to_tagged_vec().unwrap()
        } else {
            sign1.to_vec().unwrap()
        }
    }
}
