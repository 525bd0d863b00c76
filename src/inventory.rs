//! Best-effort inventory of produced artifacts plus the operator's
//! next-steps guide. Deployment itself stays manual; this module only
//! reports what was generated and where it has to go.

use std::fs;
use std::path::Path;

/// Artifacts found in one subject (or CA) directory.
#[derive(Debug)]
pub struct DirectoryInventory {
    pub name: String,
    pub files: Vec<String>,
}

/// Result of walking the output directory. I/O problems are collected as
/// warnings instead of failing the run.
#[derive(Debug)]
pub struct InventoryReport {
    pub directories: Vec<DirectoryInventory>,
    pub warnings: Vec<String>,
}

/// Enumerate the artifacts under `output_dir`, best effort.
pub fn summarize(output_dir: &Path) -> InventoryReport {
    let mut report = InventoryReport {
        directories: Vec::new(),
        warnings: Vec::new(),
    };

    let entries = match fs::read_dir(output_dir) {
        Ok(entries) => entries,
        Err(e) => {
            report
                .warnings
                .push(format!("Could not read {}: {}", output_dir.display(), e));
            return report;
        }
    };

    let mut dirs: Vec<_> = entries
        .filter_map(|entry| match entry {
            Ok(entry) if entry.path().is_dir() => Some(entry.path()),
            Ok(_) => None,
            Err(e) => {
                report.warnings.push(format!("Skipping entry: {}", e));
                None
            }
        })
        .collect();
    dirs.sort();

    for dir in dirs {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut files = Vec::new();
        match fs::read_dir(&dir) {
            Ok(entries) => {
                for entry in entries {
                    match entry {
                        Ok(entry) => files.push(entry.file_name().to_string_lossy().into_owned()),
                        Err(e) => report.warnings.push(format!("Skipping entry: {}", e)),
                    }
                }
            }
            Err(e) => {
                report
                    .warnings
                    .push(format!("Could not read {}: {}", dir.display(), e));
            }
        }
        files.sort();

        report.directories.push(DirectoryInventory { name, files });
    }

    report
}

/// Render the report and the manual deployment instructions.
pub fn print_report(report: &InventoryReport, output_dir: &Path) {
    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ GENERATED ARTIFACTS                                         │");
    println!("├─────────────────────────────────────────────────────────────┤");

    if report.directories.is_empty() {
        println!("│ (none)                                                      │");
    }
    for dir in &report.directories {
        println!("│ {:<60}│", format!("{}/", dir.name));
        for file in &dir.files {
            println!("│   {:<58}│", file);
        }
    }
    println!("└─────────────────────────────────────────────────────────────┘");

    for warning in &report.warnings {
        println!("⚠ {}", warning);
    }

    println!("\nNext steps (manual):");
    println!(
        "  1. Copy each host's <name>.keystore and <name>.truststore from {} to that host,",
        output_dir.display()
    );
    println!("     then point its TLS configuration at the copied files and restart the service.");
    println!("  2. Import admin/admin.p12 into the administrator's browser for client");
    println!("     authentication against the management UI.");
    println!("  3. Distribute ca/ca-cert to any peer that needs to verify certificates");
    println!("     issued by this authority.");
    println!("  4. Keep ca/ca-key offline; it is only needed to issue further bundles.");
}
