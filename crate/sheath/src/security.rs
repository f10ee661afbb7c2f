//! TLS configuration and peer certificate verification.
//!
//! Builds the engine configurations from PEM files named in
//! [TlsOptions] and verifies negotiated peer chains after the
//! handshake. Weak validation swaps the verifier for one that accepts
//! anything, for talking to peers with self-signed material.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine as _;
use base64::prelude::BASE64_STANDARD;
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{WebPkiSupportedAlgorithms, aws_lc_rs};
use rustls::pki_types::pem::PemObject as _;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use sha2::{Digest as _, Sha256};

use crate::stream::StreamError;

/// Certificate and trust material for a TLS stream.
#[derive(Clone, Debug, Default)]
pub struct TlsOptions {
    /// PEM file with the trust anchors used to verify the peer.
    pub ca_file: Option<PathBuf>,

    /// PEM file with the local certificate chain, leaf first.
    pub cert_file: Option<PathBuf>,

    /// PEM file with the private key for `cert_file`.
    pub key_file: Option<PathBuf>,

    /// Accept any peer certificate; chain and hostname checks are
    /// skipped. For test setups with self-signed material only.
    pub weak_cert_validation: bool,
}

/// Engine configuration for the connecting side.
///
/// Also returns the trust store so the stream can re-verify the
/// negotiated chain later.
pub(crate) fn client_config(
    options: &TlsOptions,
) -> Result<(Arc<ClientConfig>, Arc<RootCertStore>), StreamError> {
    let roots = load_roots(options)?;

    let builder = ClientConfig::builder();
    let builder = if options.weak_cert_validation {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new()))
    } else {
        if roots.is_empty() {
            return Err(StreamError::Config(
                "no trust anchors; set ca_file or enable weak_cert_validation".to_string(),
            ));
        }
        builder.with_root_certificates(Arc::clone(&roots))
    };

    let config = match (&options.cert_file, &options.key_file) {
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(load_cert_chain(cert)?, load_key(key)?)
            .map_err(StreamError::Tls)?,
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(StreamError::Config(
                "cert_file and key_file must be set together".to_string(),
            ));
        }
    };

    Ok((Arc::new(config), roots))
}

/// Engine configuration for the accepting side. The certificate chain
/// and key are required.
pub(crate) fn server_config(
    options: &TlsOptions,
) -> Result<(Arc<ServerConfig>, Arc<RootCertStore>), StreamError> {
    let roots = load_roots(options)?;

    let (cert, key) = match (&options.cert_file, &options.key_file) {
        (Some(cert), Some(key)) => (load_cert_chain(cert)?, load_key(key)?),
        _ => {
            return Err(StreamError::Config(
                "server streams need cert_file and key_file".to_string(),
            ));
        }
    };
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert, key)
        .map_err(StreamError::Tls)?;

    Ok((Arc::new(config), roots))
}

/// Verify a negotiated peer chain, leaf first, against `roots` and the
/// expected `host`.
///
/// With weak validation the chain is accepted as-is; the leaf
/// fingerprint is still logged so operators can see who they talked to.
pub fn check_cert(
    chain: &[CertificateDer<'_>],
    roots: &Arc<RootCertStore>,
    host: &str,
    weak_cert_validation: bool,
) -> Result<(), StreamError> {
    let end_entity = chain.first().ok_or(StreamError::NoPeerCertificate)?;
    log::debug!("peer certificate sha-256: {}", fingerprint(end_entity));
    if weak_cert_validation {
        return Ok(());
    }

    let name = ServerName::try_from(host.to_string())
        .map_err(|err| StreamError::Config(format!("invalid hostname {host}: {err}")))?;
    let verifier = WebPkiServerVerifier::builder(Arc::clone(roots))
        .build()
        .map_err(|err| StreamError::Config(err.to_string()))?;
    verifier.verify_server_cert(end_entity, &chain[1..], &name, &[], UnixTime::now())?;

    Ok(())
}

/// Base64-encoded SHA-256 of a DER certificate.
pub fn fingerprint(cert: &CertificateDer<'_>) -> String {
    BASE64_STANDARD.encode(Sha256::digest(cert.as_ref()))
}

fn load_roots(options: &TlsOptions) -> Result<Arc<RootCertStore>, StreamError> {
    let mut roots = RootCertStore::empty();
    if let Some(path) = &options.ca_file {
        for cert in load_cert_chain(path)? {
            roots
                .add(cert)
                .map_err(|err| StreamError::Config(format!("bad trust anchor in {}: {err}", path.display())))?;
        }
    }
    Ok(Arc::new(roots))
}

fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>, StreamError> {
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(|err| StreamError::Config(format!("cannot read {}: {err}", path.display())))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| {
            StreamError::Config(format!("bad certificate in {}: {err}", path.display()))
        })?;
    if certs.is_empty() {
        return Err(StreamError::Config(format!(
            "no certificates in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, StreamError> {
    PrivateKeyDer::from_pem_file(path)
        .map_err(|err| StreamError::Config(format!("cannot read key {}: {err}", path.display())))
}

/// Server certificate verifier for weak validation mode.
///
/// Accepts any presented chain and hostname. Handshake signatures are
/// still checked, so the peer must at least hold the key it presents.
#[derive(Debug)]
struct AcceptAnyServerCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl AcceptAnyServerCert {
    fn new() -> Self {
        Self {
            algorithms: aws_lc_rs::default_provider().signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        log::debug!(
            "weak validation: accepting peer certificate {}",
            fingerprint(end_entity)
        );
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::TlsOptions;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    /// Matching server and client options backed by one self-signed
    /// certificate, plus the tempfiles keeping the PEMs alive.
    pub(crate) struct TestTlsSetup {
        pub server: TlsOptions,
        pub client: TlsOptions,
        _files: Vec<NamedTempFile>,
    }

    /// Generate a self-signed certificate for `hosts` and wire it into
    /// both sides: the server presents it, the client trusts it.
    pub(crate) fn self_signed(hosts: &[&str]) -> TestTlsSetup {
        let key = rcgen::generate_simple_self_signed(
            hosts.iter().map(|h| h.to_string()).collect::<Vec<_>>(),
        )
        .expect("certificate generation");

        let cert_file = write_pem(&key.cert.pem());
        let key_file = write_pem(&key.key_pair.serialize_pem());
        let ca_file = write_pem(&key.cert.pem());

        TestTlsSetup {
            server: TlsOptions {
                cert_file: Some(cert_file.path().to_path_buf()),
                key_file: Some(key_file.path().to_path_buf()),
                ..TlsOptions::default()
            },
            client: TlsOptions {
                ca_file: Some(ca_file.path().to_path_buf()),
                ..TlsOptions::default()
            },
            _files: vec![cert_file, key_file, ca_file],
        }
    }

    fn write_pem(pem: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("tempfile");
        file.write_all(pem.as_bytes()).expect("write pem");
        file.flush().expect("flush pem");
        file
    }
}
