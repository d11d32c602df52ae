//! TLS support for the CueLink server
//!
//! Production deployments hand in certificate files; development falls back
//! to a fresh self-signed certificate so the extension can still talk to a
//! local server over HTTPS.

use axum_server::tls_rustls::RustlsConfig;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};
use std::path::Path;
use tracing::info;

/// Generate a self-signed certificate for the given hostnames/IPs
pub fn generate_self_signed_cert(
    hostnames: &[String],
) -> Result<(String, String), Box<dyn std::error::Error + Send + Sync>> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "CueLink");
    dn.push(DnType::OrganizationName, "CueLink");
    params.distinguished_name = dn;

    let mut san_list = Vec::new();
    san_list.push(SanType::DnsName("localhost".try_into()?));

    for hostname in hostnames {
        if let Ok(ip) = hostname.parse::<std::net::IpAddr>() {
            san_list.push(SanType::IpAddress(ip));
        } else if let Ok(dns) = hostname.as_str().try_into() {
            san_list.push(SanType::DnsName(dns));
        }
    }

    san_list.push(SanType::IpAddress(std::net::IpAddr::V4(
        std::net::Ipv4Addr::new(127, 0, 0, 1),
    )));

    params.subject_alt_names = san_list;

    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    let cert_pem = cert.pem();
    let key_pem = key_pair.serialize_pem();

    Ok((cert_pem, key_pem))
}

/// Create a RustlsConfig from certificate files
pub async fn rustls_config_from_files(
    cert_path: &Path,
    key_path: &Path,
) -> Result<RustlsConfig, Box<dyn std::error::Error + Send + Sync>> {
    let config = RustlsConfig::from_pem_file(cert_path, key_path).await?;
    Ok(config)
}

/// Create a RustlsConfig around a fresh self-signed certificate
pub async fn rustls_config_self_signed(
    hostnames: &[String],
) -> Result<RustlsConfig, Box<dyn std::error::Error + Send + Sync>> {
    info!("Generating self-signed certificate...");
    let (cert_pem, key_pem) = generate_self_signed_cert(hostnames)?;
    let config =
        RustlsConfig::from_pem(cert_pem.as_bytes().to_vec(), key_pem.as_bytes().to_vec()).await?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cert_generation() {
        let hostnames = vec!["192.168.1.100".to_string(), "pair.example".to_string()];
        let (cert, key) = generate_self_signed_cert(&hostnames).unwrap();
        assert!(!cert.is_empty());
        assert!(!key.is_empty());
        assert!(cert.contains("BEGIN CERTIFICATE"));
        assert!(key.contains("BEGIN PRIVATE KEY"));
    }

    #[tokio::test]
    async fn test_self_signed_rustls_config() {
        let hostnames = vec!["localhost".to_string()];
        assert!(rustls_config_self_signed(&hostnames).await.is_ok());
    }
}
