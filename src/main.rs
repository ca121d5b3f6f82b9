// src/main.rs

use anyhow::Result;
use clap::{Parser, Subcommand};
use regex::Regex;
use std::path::PathBuf;
use tarpkg::config::Config;
use tarpkg::db::PackageDb;
use tarpkg::lock::DbLock;
use tarpkg::ops::{self, InstallOptions};
use std::collections::BTreeSet;
use tarpkg::{archive, check, fsutil};
use tracing::info;

#[derive(Parser)]
#[command(name = "tarpkg")]
#[command(author, version, about = "Lightweight tar-based package manager", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install or upgrade a software package
    Add {
        /// Path to the package archive
        package: PathBuf,
        /// Alternate root directory
        #[arg(short, long, default_value = "/")]
        root: PathBuf,
        /// Alternate rule configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Force install, overwrite conflicting files
        #[arg(short, long)]
        force: bool,
        /// Upgrade package with the same name
        #[arg(short, long)]
        upgrade: bool,
    },
    /// Remove an installed software package
    Rm {
        /// Package name to remove
        package: String,
        /// Alternate root directory
        #[arg(short, long, default_value = "/")]
        root: PathBuf,
    },
    /// Check the integrity of installed packages
    Check {
        /// Alternate root directory
        #[arg(short, long, default_value = "/")]
        root: PathBuf,
        /// Check symlinks
        #[arg(short, long)]
        links: bool,
        /// Check for disappeared files
        #[arg(short, long)]
        disappeared: bool,
        /// Run all checks
        #[arg(short, long)]
        audit: bool,
        /// Packages to check; all installed packages when omitted
        packages: Vec<String>,
    },
    /// Display software package information
    Info {
        /// Alternate root directory
        #[arg(short, long, default_value = "/")]
        root: PathBuf,
        /// List installed packages and their versions
        #[arg(short, long)]
        installed: bool,
        /// List files owned by an installed package or contained in an archive
        #[arg(short, long)]
        list: Option<String>,
        /// List packages that own files matching a pattern
        #[arg(short, long)]
        owner: Option<String>,
        /// Print a package archive's footprint
        #[arg(short, long)]
        footprint: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Add {
            package,
            root,
            config: rules_file,
            force,
            upgrade,
        } => {
            let config = Config::new(root);
            let opts = InstallOptions {
                upgrade,
                force,
                rules_file,
            };
            ops::install_package(&config, &package, &opts)?;
            info!("installed {}", package.display());
            Ok(())
        }
        Commands::Rm { package, root } => {
            let config = Config::new(root);
            ops::remove_package(&config, &package)?;
            Ok(())
        }
        Commands::Check {
            root,
            links,
            disappeared,
            audit,
            packages,
        } => {
            if !(links || disappeared || audit) {
                anyhow::bail!("option missing");
            }

            let config = Config::new(root);
            let _lock = DbLock::acquire(&config, false)?;
            let db = PackageDb::open(config.clone())?;

            let names: Vec<String> = if packages.is_empty() {
                db.packages().keys().cloned().collect()
            } else {
                packages
            };

            for name in &names {
                if links || audit {
                    println!("Symlink check for {name}...");
                    for issue in check::check_links(&config, &db, name)? {
                        let full = config.resolve(&issue.file);
                        if issue.broken {
                            println!("ERROR: {} -> {} (broken)", full.display(), issue.target);
                        } else {
                            println!(
                                "WARNING: {} -> {} (owned by {})",
                                full.display(),
                                issue.target,
                                join_names(&issue.owners)
                            );
                        }
                    }
                }
                if disappeared || audit {
                    println!("Disappeared file check for {name}...");
                    for missing in check::check_disappeared(&config, &db, name)? {
                        println!(
                            "ERROR: disappeared file {}",
                            config.resolve(&missing.file).display()
                        );
                        if !missing.owners.is_empty() {
                            println!("  Claimed by: {}", join_names(&missing.owners));
                        }
                    }
                }
            }

            Ok(())
        }
        Commands::Info {
            root,
            installed,
            list,
            owner,
            footprint,
        } => {
            let modes = installed as usize
                + list.is_some() as usize
                + owner.is_some() as usize
                + footprint.is_some() as usize;
            if modes == 0 {
                anyhow::bail!("option missing");
            }
            if modes > 1 {
                anyhow::bail!("too many options");
            }

            // Footprints read only the archive, no database, no lock.
            if let Some(archive_path) = footprint {
                print!("{}", archive::pkg_footprint(&archive_path)?);
                return Ok(());
            }

            let config = Config::new(root);
            let _lock = DbLock::acquire(&config, false)?;
            let db = PackageDb::open(config)?;

            if installed {
                for (name, record) in db.packages() {
                    println!("{name} {}", record.version);
                }
            } else if let Some(name) = list {
                if let Some(record) = db.get(&name) {
                    for file in &record.files {
                        println!("{file}");
                    }
                } else if fsutil::exists(std::path::Path::new(&name)) {
                    let (_, record) = archive::pkg_open(std::path::Path::new(&name))?;
                    for file in &record.files {
                        println!("{file}");
                    }
                } else {
                    anyhow::bail!("{name} is neither an installed package nor a package file");
                }
            } else if let Some(pattern) = owner {
                print_owners(&db, &pattern)?;
            }

            Ok(())
        }
    }
}

fn join_names(names: &BTreeSet<String>) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.iter().cloned().collect::<Vec<_>>().join(",")
    }
}

/// List packages owning files that match `pattern`, as an aligned
/// two-column table.
fn print_owners(db: &PackageDb, pattern: &str) -> Result<()> {
    let regex = Regex::new(pattern)
        .map_err(|e| anyhow::anyhow!("fail to compile regular expression '{pattern}': {e}"))?;

    let mut rows: Vec<(String, String)> = vec![("Package".to_string(), "File".to_string())];
    let mut width = rows[0].0.len();

    for (name, record) in db.packages() {
        for file in &record.files {
            if regex.is_match(&format!("/{file}")) {
                width = width.max(name.len());
                rows.push((name.clone(), file.clone()));
            }
        }
    }

    if rows.len() > 1 {
        for (package, file) in &rows {
            println!("{package:<w$}{file}", w = width + 2);
        }
    } else {
        println!("tarpkg: no owner(s) found");
    }

    Ok(())
}
