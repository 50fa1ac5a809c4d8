use std::path::PathBuf;

/// TLS material used by HTTPS endpoints.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// PEM file holding the CA certificates used to verify servers. When unset, the platform's native roots are used.
    pub ca_file: Option<PathBuf>,

    /// PEM file holding the client certificate chain.
    pub cert_file: Option<PathBuf>,

    /// PEM file holding the client private key.
    pub key_file: Option<PathBuf>,

    /// Skips verification of the server certificate chain and host name.
    pub insecure_skip_verify: bool,
}

#[cfg(feature = "http")]
mod client {
    use std::{fs::File, io::BufReader, path::Path, sync::Arc};

    use rustls::{
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        crypto::{aws_lc_rs, CryptoProvider},
        pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime},
        ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
    };
    use tracing::warn;

    use super::TlsConfig;
    use crate::endpoint::TransportError;

    fn tls_error(e: impl std::fmt::Display) -> TransportError {
        TransportError::Tls(e.to_string())
    }

    fn open(path: &Path) -> Result<BufReader<File>, TransportError> {
        File::open(path)
            .map(BufReader::new)
            .map_err(|e| TransportError::Tls(format!("failed to open '{}': {e}", path.display())))
    }

    fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
        let certs = rustls_pemfile::certs(&mut open(path)?)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TransportError::Tls(format!("failed to read certificates from '{}': {e}", path.display())))?;

        if certs.is_empty() {
            return Err(TransportError::Tls(format!("no certificates found in '{}'", path.display())));
        }

        Ok(certs)
    }

    fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TransportError> {
        rustls_pemfile::private_key(&mut open(path)?)
            .map_err(|e| TransportError::Tls(format!("failed to read private key from '{}': {e}", path.display())))?
            .ok_or_else(|| TransportError::Tls(format!("no private key found in '{}'", path.display())))
    }

    impl TlsConfig {
        fn root_store(&self) -> Result<RootCertStore, TransportError> {
            let mut roots = RootCertStore::empty();

            if let Some(ca_file) = &self.ca_file {
                for cert in load_certs(ca_file)? {
                    roots.add(cert).map_err(tls_error)?;
                }
            } else {
                let native_certs = rustls_native_certs::load_native_certs();
                for error in native_certs.errors {
                    warn!(%error, "Failed to load a native root certificate.");
                }

                let (added, ignored) = roots.add_parsable_certificates(native_certs.certs);
                if ignored > 0 {
                    warn!(added, ignored, "Ignored unparsable native root certificates.");
                }
            }

            Ok(roots)
        }

        /// Builds the client configuration for HTTPS endpoints.
        ///
        /// # Errors
        ///
        /// If any of the configured files cannot be read, or only one of the client certificate and key is
        /// configured, an error is returned.
        pub(crate) fn client_config(&self) -> Result<ClientConfig, TransportError> {
            let provider = Arc::new(aws_lc_rs::default_provider());
            let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
                .with_safe_default_protocol_versions()
                .map_err(tls_error)?;

            let builder = if self.insecure_skip_verify {
                builder.dangerous().with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider)))
            } else {
                builder.with_root_certificates(self.root_store()?)
            };

            match (&self.cert_file, &self.key_file) {
                (Some(cert_file), Some(key_file)) => {
                    builder.with_client_auth_cert(load_certs(cert_file)?, load_key(key_file)?).map_err(tls_error)
                }
                (None, None) => Ok(builder.with_no_client_auth()),
                _ => Err(TransportError::Tls(
                    "a client certificate and a client key must be configured together".to_string(),
                )),
            }
        }
    }

    /// Accepts any server certificate.
    #[derive(Debug)]
    struct SkipServerVerification(Arc<CryptoProvider>);

    impl ServerCertVerifier for SkipServerVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            rustls::crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            rustls::crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }

}
