//! PKI Provision - Private CA and Certificate Bundle Provisioning
//!
//! One-shot command line tool. A single run:
//! 1. loads configuration and provisioning secrets
//! 2. creates the root CA, or reuses the one already on disk
//! 3. issues a fresh keystore/truststore bundle for every configured host
//! 4. issues the administrator's browser bundle
//! 5. prints the artifact inventory and the manual deployment steps
//!
//! A failed subject is reported and skipped so one bad host entry does not
//! block the rest of the cluster; the exit code is still non-zero.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use pki_provision::ca_issuer::CertificateAuthority;
use pki_provision::configs::{ProvisionConfig, Secrets};
use pki_provision::entity_bundle::{issue_bundle, BundleRequest, Role, SubjectSpec};
use pki_provision::inventory;
use pki_provision::toolchain::OpensslToolchain;

#[derive(Parser)]
#[command(
    name = "pki-provision",
    about = "Issue a private CA and per-host keystore/truststore bundles"
)]
struct Cli {
    /// Path to the provisioning configuration
    #[arg(long, default_value = "provision.toml")]
    config: PathBuf,

    /// Override the configured output directory
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Regenerate the CA even if one exists (invalidates earlier bundles)
    #[arg(long)]
    force_ca: bool,

    /// Proceed with the documented default passwords (development only)
    #[arg(long)]
    allow_default_passwords: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    println!("=== PKI Provision ===\n");

    let mut config =
        ProvisionConfig::from_file(&cli.config).context("Failed to load configuration")?;
    if let Some(output_dir) = cli.output_dir {
        config.output_dir = output_dir;
    }
    println!("✓ Configuration loaded from {}", cli.config.display());

    let secrets = Secrets::from_env();
    secrets.enforce_overridden(cli.allow_default_passwords)?;

    let ca_dir = config.output_dir.join("ca");
    let ca = if cli.force_ca {
        println!("⚠ Regenerating CA; previously issued bundles will no longer chain to it");
        CertificateAuthority::regenerate(config.ca_dn(), config.ca.validity_days, &ca_dir)
            .context("Failed to regenerate CA")?
    } else {
        let (ca, reused) =
            CertificateAuthority::ensure(config.ca_dn(), config.ca.validity_days, &ca_dir)
                .context("Failed to initialize CA")?;
        if reused {
            println!("✓ Reusing existing CA at {}", ca_dir.display());
        } else {
            println!("✓ Root CA generated at {}", ca_dir.display());
        }
        ca
    };

    let mut subjects: Vec<SubjectSpec> = config
        .subjects
        .iter()
        .map(|entry| SubjectSpec::server(&entry.name, &entry.ip, config.validity.server_days))
        .collect();
    if let Some(admin) = &config.admin {
        subjects.push(SubjectSpec::admin(
            &admin.common_name,
            config.validity.admin_days,
        ));
    }

    let mut failures = Vec::new();
    for subject in &subjects {
        let output_dir = config.output_dir.join(subject.file_stem());
        let request = BundleRequest {
            subject,
            dn: config.entity_dn(&subject.common_name),
            keystore_password: match subject.role {
                Role::Server => &secrets.keystore_password,
                Role::Admin => &secrets.admin_password,
            },
            truststore_password: &secrets.truststore_password,
            output_dir: &output_dir,
        };

        match issue_bundle(
            &request,
            ca.certificate(),
            &OpensslToolchain,
            &ca,
            &OpensslToolchain,
        ) {
            Ok(bundle) => {
                println!(
                    "✓ Issued bundle for '{}' ({})",
                    subject.common_name,
                    bundle.keystore_path.display()
                );
            }
            Err(e) => {
                println!("✗ Failed to issue bundle for '{}': {:#}", subject.common_name, e);
                failures.push(subject.common_name.clone());
            }
        }
    }

    let report = inventory::summarize(&config.output_dir);
    inventory::print_report(&report, &config.output_dir);

    if !failures.is_empty() {
        bail!(
            "{} of {} subject bundle(s) failed: {}",
            failures.len(),
            subjects.len(),
            failures.join(", ")
        );
    }

    Ok(())
}
