use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{fs, io};

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, Error, RootCertStore, SignatureScheme,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// PEM tags accepted for the client private key.
const PRIVATE_KEY_TAGS: [&str; 3] = ["PRIVATE KEY", "RSA PRIVATE KEY", "EC PRIVATE KEY"];

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("Could not read {note} file {filename:?}: {err}")]
    FileReadFailed {
        note: &'static str,
        filename: PathBuf,
        err: io::Error,
    },
    #[error("Identity certificate is missing a key")]
    MissingKey,
    #[error("Private key is missing a certificate")]
    MissingCertificate,
    #[error("Could not parse certificate in {filename:?}: {err}")]
    CertificateParse { filename: PathBuf, err: io::Error },
    #[error("Could not parse private key in {filename:?}: {err}")]
    PrivateKeyParse { filename: PathBuf, err: io::Error },
    #[error("Error building TLS config: {0}")]
    TlsBuild(rustls::Error),
    #[error("Error adding a certificate to a store: {0}")]
    AddCertToStore(rustls::Error),
    #[error("{0}")]
    VerifierBuild(rustls::client::VerifierBuilderError),
    #[error("Load native certs: {0}")]
    NativeCerts(io::Error),
}

const fn default_true() -> bool {
    true
}

/// Configures the TLS options for connections to the control plane.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    /// Absolute path to an additional CA certificate file, in PEM format.
    /// The system roots are used when this is not set.
    pub ca: Option<PathBuf>,

    /// Absolute path to a certificate file used to identify this client,
    /// in PEM format. If this is set, "key" must also be set.
    pub cert: Option<PathBuf>,

    /// Absolute path to a private key file used to identify this client,
    /// in PEM format (PKCS#8, PKCS#1 or SEC1). If this is set, "cert" must
    /// also be set.
    pub key: Option<PathBuf>,

    /// Enables certificate verification.
    ///
    /// Do NOT set this to false unless you understand the risks of not verifying the
    /// validity of certificates.
    #[serde(default = "default_true")]
    pub verify_certificate: bool,

    /// Enables hostname verification. If enabled, the hostname used to connect to the remote
    /// host must be present in the TLS certificate presented by the remote host.
    #[serde(default = "default_true")]
    pub verify_hostname: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            ca: None,
            cert: None,
            key: None,
            verify_certificate: true,
            verify_hostname: true,
        }
    }
}

impl TlsConfig {
    pub fn client_config(&self) -> Result<ClientConfig, TlsError> {
        let identity = match (&self.cert, &self.key) {
            (Some(cert_file), Some(key_file)) => {
                Some((load_certs(cert_file)?, load_private_key(key_file)?))
            }
            (Some(_), None) => return Err(TlsError::MissingKey),
            (None, Some(_)) => return Err(TlsError::MissingCertificate),
            (None, None) => None,
        };

        let certs = match &self.ca {
            Some(ca_file) => load_certs(ca_file)?,
            None => {
                let result = rustls_native_certs::load_native_certs();
                if !result.errors.is_empty() {
                    warn!(
                        message = "native root CA certificate loading errors",
                        errs = ?result.errors
                    );

                    if result.certs.is_empty() {
                        return Err(TlsError::NativeCerts(io::Error::other(
                            "no native root CA certificates found",
                        )));
                    }
                }

                result.certs
            }
        };

        let mut root_store = RootCertStore::empty();
        for cert in certs {
            root_store.add(cert).map_err(TlsError::AddCertToStore)?;
        }

        let root_store = Arc::new(root_store);
        let builder = ClientConfig::builder().with_root_certificates(Arc::clone(&root_store));
        let mut config = match identity {
            Some((certs, key)) => builder
                .with_client_auth_cert(certs, key)
                .map_err(TlsError::TlsBuild)?,
            None => builder.with_no_client_auth(),
        };

        config
            .dangerous()
            .set_certificate_verifier(Arc::new(ServerCertVerifier {
                inner: WebPkiServerVerifier::builder(root_store)
                    .build()
                    .map_err(TlsError::VerifierBuild)?,
                verify_certificate: self.verify_certificate,
                verify_hostname: self.verify_hostname,
            }));

        Ok(config)
    }
}

#[derive(Debug)]
struct ServerCertVerifier {
    inner: Arc<WebPkiServerVerifier>,

    verify_certificate: bool,
    verify_hostname: bool,
}

impl rustls::client::danger::ServerCertVerifier for ServerCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        if !self.verify_certificate {
            return Ok(ServerCertVerified::assertion());
        }

        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Err(Error::InvalidCertificate(CertificateError::NotValidForName))
                if !self.verify_hostname =>
            {
                Ok(ServerCertVerified::assertion())
            }
            result => result,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        if self.verify_certificate {
            self.inner.verify_tls12_signature(message, cert, dss)
        } else {
            Ok(HandshakeSignatureValid::assertion())
        }
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        if self.verify_certificate {
            self.inner.verify_tls13_signature(message, cert, dss)
        } else {
            Ok(HandshakeSignatureValid::assertion())
        }
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

fn load_certs(filename: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let content = fs::read(filename).map_err(|err| TlsError::FileReadFailed {
        note: "cert",
        filename: filename.to_path_buf(),
        err,
    })?;

    let certs = pem::parse_many(content)
        .map_err(|err| TlsError::CertificateParse {
            filename: filename.to_path_buf(),
            err: io::Error::new(io::ErrorKind::InvalidData, err),
        })?
        .into_iter()
        .filter(|p| p.tag() == "CERTIFICATE")
        .map(|p| CertificateDer::from(p.into_contents()))
        .collect::<Vec<_>>();

    if certs.is_empty() {
        return Err(TlsError::CertificateParse {
            filename: filename.to_path_buf(),
            err: io::Error::new(io::ErrorKind::InvalidData, "no certificate found"),
        });
    }

    Ok(certs)
}

fn load_private_key(filename: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let content = fs::read(filename).map_err(|err| TlsError::FileReadFailed {
        note: "private key",
        filename: filename.to_path_buf(),
        err,
    })?;

    let key = pem::parse_many(content)
        .map_err(|err| TlsError::PrivateKeyParse {
            filename: filename.to_path_buf(),
            err: io::Error::new(io::ErrorKind::InvalidData, err),
        })?
        .into_iter()
        .find(|p| PRIVATE_KEY_TAGS.contains(&p.tag()))
        .ok_or_else(|| TlsError::PrivateKeyParse {
            filename: filename.to_path_buf(),
            err: io::Error::new(
                io::ErrorKind::InvalidData,
                "no private key found in PEM file",
            ),
        })?;

    PrivateKeyDer::try_from(key.into_contents()).map_err(|err| TlsError::PrivateKeyParse {
        filename: filename.to_path_buf(),
        err: io::Error::new(io::ErrorKind::InvalidData, err),
    })
}
