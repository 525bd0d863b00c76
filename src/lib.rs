//! PKI Provision - Private CA and Certificate Bundle Provisioning
//!
//! A one-shot provisioning tool that issues a private certificate authority
//! and per-host TLS bundles for a configured set of cluster hosts, plus an
//! administrator client certificate for browser authentication:
//!
//! ```text
//! Root CA (self-signed, reused across runs)
//!   ├── Server certificates (fresh keystore + truststore every run)
//!   └── Admin client certificate (fresh .p12 every run)
//! ```
//!
//! # Module Overview
//!
//! - [`configs`]: TOML configuration and environment-sourced secrets
//! - [`generate_ca`]: self-signed root CA builder (RSA-4096, SHA-256)
//! - [`ca_issuer`]: CA persistence, idempotent reuse, serial counter and
//!   request signing
//! - [`generate_csr`]: certificate signing requests with exact SAN sets
//! - [`toolchain`]: mockable collaborator traits over the crypto toolchain
//! - [`entity_bundle`]: per-subject issuance pipeline
//! - [`inventory`]: artifact report and manual deployment guide
//!
//! # Quick Start
//!
//! ```no_run
//! use pki_provision::ca_issuer::CertificateAuthority;
//! use pki_provision::configs::{ProvisionConfig, Secrets};
//! use pki_provision::entity_bundle::{issue_bundle, BundleRequest, SubjectSpec};
//! use pki_provision::toolchain::OpensslToolchain;
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = ProvisionConfig::from_file(Path::new("provision.toml"))?;
//!     let secrets = Secrets::from_env();
//!     secrets.enforce_overridden(false)?;
//!
//!     let ca_dir = config.output_dir.join("ca");
//!     let (ca, reused) =
//!         CertificateAuthority::ensure(config.ca_dn(), config.ca.validity_days, &ca_dir)?;
//!     println!("CA ready (reused: {})", reused);
//!
//!     let subject = SubjectSpec::server("node-a", "10.0.0.5", config.validity.server_days);
//!     let output_dir = config.output_dir.join(&subject.common_name);
//!     let bundle = issue_bundle(
//!         &BundleRequest {
//!             subject: &subject,
//!             dn: config.entity_dn(&subject.common_name),
//!             keystore_password: &secrets.keystore_password,
//!             truststore_password: &secrets.truststore_password,
//!             output_dir: &output_dir,
//!         },
//!         ca.certificate(),
//!         &OpensslToolchain,
//!         &ca,
//!         &OpensslToolchain,
//!     )?;
//!     println!("Issued {}", bundle.keystore_path.display());
//!
//!     Ok(())
//! }
//! ```

pub mod ca_issuer;
pub mod configs;
pub mod entity_bundle;
pub mod generate_ca;
pub mod generate_csr;
pub mod inventory;
pub mod secure_files;
pub mod toolchain;
