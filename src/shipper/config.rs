//! Shipper endpoint and TLS configuration.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// TLS authentication towards the shipper's gRPC endpoint. One of four
/// modes; file paths are validated for presence, not read, at load time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum TlsAuth {
    /// Mutual TLS: CA bundle plus client certificate and key.
    #[serde(rename_all = "camelCase")]
    Mutual {
        ca_file: String,
        cert_file: String,
        key_file: String,
    },
    /// Server verification via CA, client auth via bearer token.
    #[serde(rename_all = "camelCase")]
    Token { ca_file: String, token_file: String },
    /// Server verification only.
    #[serde(rename_all = "camelCase")]
    CaOnly { ca_file: String },
    /// No TLS at all; development only.
    Plaintext,
}

/// Connection settings for the shipper.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipperConfig {
    /// gRPC endpoint of the shipper itself.
    pub grpc_endpoint: String,
    /// HTTP control-plane peer used for bundle CRUD.
    pub server_addr: String,
    /// Permits an `http` control-plane peer; otherwise `https` is required.
    #[serde(default)]
    pub insecure: bool,
    pub tls: TlsAuth,
}

/// Invalid shipper connection settings; fatal at startup.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum ShipperConfigError {
    #[error("unsupported scheme in {field}: {url:?}")]
    #[diagnostic(
        code(hyperfleet::shipper::scheme),
        help("Only http and https schemes are accepted.")
    )]
    Scheme { field: &'static str, url: String },

    #[error("serverAddr must use https unless insecure is set: {url:?}")]
    #[diagnostic(code(hyperfleet::shipper::insecure_server))]
    InsecureServer { url: String },

    #[error("TLS {field} path is empty")]
    #[diagnostic(code(hyperfleet::shipper::tls_path))]
    EmptyTlsPath { field: &'static str },
}

impl ShipperConfig {
    /// Validates schemes and TLS file references.
    pub fn validate(&self) -> Result<(), ShipperConfigError> {
        check_scheme("grpcEndpoint", &self.grpc_endpoint)?;
        check_scheme("serverAddr", &self.server_addr)?;
        if !self.insecure && !self.server_addr.starts_with("https://") {
            return Err(ShipperConfigError::InsecureServer {
                url: self.server_addr.clone(),
            });
        }
        match &self.tls {
            TlsAuth::Mutual {
                ca_file,
                cert_file,
                key_file,
            } => {
                non_empty("caFile", ca_file)?;
                non_empty("certFile", cert_file)?;
                non_empty("keyFile", key_file)?;
            }
            TlsAuth::Token {
                ca_file,
                token_file,
            } => {
                non_empty("caFile", ca_file)?;
                non_empty("tokenFile", token_file)?;
            }
            TlsAuth::CaOnly { ca_file } => non_empty("caFile", ca_file)?,
            TlsAuth::Plaintext => {}
        }
        Ok(())
    }
}

fn check_scheme(field: &'static str, url: &str) -> Result<(), ShipperConfigError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ShipperConfigError::Scheme {
            field,
            url: url.to_string(),
        })
    }
}

fn non_empty(field: &'static str, value: &str) -> Result<(), ShipperConfigError> {
    if value.trim().is_empty() {
        Err(ShipperConfigError::EmptyTlsPath { field })
    } else {
        Ok(())
    }
}
