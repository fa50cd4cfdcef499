// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    apt_sources::{
        audit::{AuditEvent, AuditReport, Auditor},
        config::AuditConfig,
        error::AptSourcesError,
        host::{host_codename, OS_RELEASE_PATH},
        keyring::{import_key, missing_keys, TrustedKeys},
        source_list::read_sources_lists,
    },
    clap::{Arg, ArgMatches, Command},
    log::{error, info, warn, LevelFilter},
    serde::Serialize,
    std::sync::{Arc, Mutex},
    thiserror::Error,
};

const ABOUT: &str = "\
Find APT source entries referencing another distribution release.

Every `deb` and `deb-src` line of the configured sources lists whose
distribution does not start with the host's codename, and which is not
whitelisted, is checked against its repository. The repository's `dists/`
directory listing is consulted first. If the server refuses to list it,
release metadata (`InRelease`, `Release`, `Release.gpg`) is probed for every
known codename instead. Codenames newer than the one referenced are reported
as possibly better.

The key each repository signs its `Release` file with is also identified and
compared against the keys trusted by APT. Missing keys are reported and, with
--import-keys, imported from a keyserver.

# YAML Configuration

A YAML file can be passed with --config. All keys are optional.

codenames (list[string])
   Known codenames, oldest first. Used for probing and for ranking.

whitelist (list[string])
   Codenames never reported.

source_paths (list[string])
   Glob patterns of sources list files.

max_parallel_probes (int)
   Maximum number of entries audited concurrently.

probe_timeout_seconds (int)
   Timeout of individual HTTP requests.

resolve_keys (bool)
   Whether to identify signing keys.

use_gpg (bool)
   Run gpg to inspect signatures instead of parsing them in-process.

gpg_program (string)
   gpg executable.

signature_reference_path (string)
   File signatures are checked against when running gpg.

keyring_list_command (list[string])
   Command listing trusted keys.

keyserver (string)
   Keyserver missing keys are imported from.
";

#[derive(Debug, Error)]
pub enum UrlCheckError {
    #[error("argument parsing error: {0}")]
    Clap(#[from] clap::Error),

    #[error("{0}")]
    AptSources(#[from] AptSourcesError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("interrupted")]
    Interrupted,

    #[error("failed to import {0} key(s)")]
    KeyImport(usize),
}

pub type Result<T> = std::result::Result<T, UrlCheckError>;

fn app(default_threads: &str) -> Command<'_> {
    Command::new("apt-urlcheck")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Find stale APT source entries and missing signing keys")
        .long_about(ABOUT)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .takes_value(true)
                .allow_invalid_utf8(true)
                .help("Path to a YAML file defining the audit configuration"),
        )
        .arg(
            Arg::new("codename")
                .long("codename")
                .takes_value(true)
                .help("Codename of the host distribution (detected by default)"),
        )
        .arg(
            Arg::new("whitelist")
                .long("whitelist")
                .takes_value(true)
                .multiple_occurrences(true)
                .help("Additional codename to never report"),
        )
        .arg(
            Arg::new("sources")
                .long("sources")
                .takes_value(true)
                .multiple_occurrences(true)
                .help("Glob pattern of sources list files to audit (replaces the defaults)"),
        )
        .arg(
            Arg::new("max-parallel-io")
                .long("max-parallel-io")
                .takes_value(true)
                .default_value(default_threads)
                .help("Maximum number of entries to audit concurrently"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .takes_value(true)
                .help("Timeout in seconds of individual HTTP requests"),
        )
        .arg(
            Arg::new("use-gpg")
                .long("use-gpg")
                .help("Run gpg to identify signing keys"),
        )
        .arg(
            Arg::new("no-keys")
                .long("no-keys")
                .conflicts_with_all(&["use-gpg", "import-keys"])
                .help("Do not identify signing keys"),
        )
        .arg(
            Arg::new("import-keys")
                .long("import-keys")
                .help("Import missing signing keys (requires root)"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print the report as JSON"),
        )
}

pub async fn run_cli() -> Result<()> {
    let default_threads = format!("{}", apt_sources::config::default_parallelism());

    let matches = app(&default_threads).get_matches();

    init_logging(matches.occurrences_of("verbose"));

    let config = resolve_config(&matches)?;

    let codename = match matches.value_of("codename") {
        Some(codename) => codename.to_string(),
        None => host_codename(OS_RELEASE_PATH)?,
    };
    info!("This is {}.", codename);

    let records = read_sources_lists(&config.source_paths)?;
    info!("Found {} source entries.", records.len());

    let auditor = Auditor::from_config(&config, &codename)?;

    let pb = Arc::new(Mutex::new(None));
    let cb_pb = pb.clone();
    let show_progress = !matches.is_present("json");

    let cb: Option<Box<dyn Fn(AuditEvent) + Sync>> = if show_progress {
        Some(Box::new(move |event: AuditEvent| {
            let mut guard = cb_pb.lock().unwrap();

            match event {
                AuditEvent::EntriesToAudit(total) => {
                    guard.replace(pbr::ProgressBar::on(std::io::stderr(), total as u64));
                }
                AuditEvent::EntrySkipped(_) | AuditEvent::EntryAudited(_) => {
                    if let Some(bar) = guard.as_mut() {
                        bar.inc();
                    }
                }
            }
        }))
    } else {
        None
    };

    let report = tokio::select! {
        report = auditor.audit(&records, &cb) => report,
        _ = tokio::signal::ctrl_c() => {
            return Err(UrlCheckError::Interrupted);
        }
    };

    if let Some(mut bar) = pb.lock().unwrap().take() {
        bar.finish();
    }

    let missing = if config.resolve_keys {
        untrusted_keys(&config, &report)
    } else {
        vec![]
    };
    let import = matches.is_present("import-keys");

    if matches.is_present("json") {
        println!("{}", render_json(&report, &missing)?);
    } else {
        print_report(&report);
        print_missing_keys(&missing, import);
    }

    if import && !missing.is_empty() {
        import_keys(&config, &missing)?;
    }

    Ok(())
}

fn init_logging(verbosity: u64) {
    let log_level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    // This spews unwanted output at default level. Nerf it by default.
    if log_level <= LevelFilter::Debug {
        builder.filter_module("rustls", LevelFilter::Error);
        builder.filter_module("hyper", LevelFilter::Error);
    }

    builder.init();
}

fn resolve_config(args: &ArgMatches) -> Result<AuditConfig> {
    let mut config = match args.value_of_os("config") {
        Some(path) => AuditConfig::from_yaml_path(path)?,
        None => AuditConfig::default(),
    };

    if let Some(values) = args.values_of("whitelist") {
        config.whitelist.extend(values);
    }
    if let Some(values) = args.values_of("sources") {
        config.source_paths = values.map(|v| v.to_string()).collect();
    }
    if args.occurrences_of("max-parallel-io") > 0 || args.value_of_os("config").is_none() {
        config.max_parallel_probes = args.value_of_t::<usize>("max-parallel-io")?;
    }
    if args.is_present("timeout") {
        config.probe_timeout_seconds = args.value_of_t::<u64>("timeout")?;
    }
    if args.is_present("use-gpg") {
        config.use_gpg = true;
    }
    if args.is_present("no-keys") {
        config.resolve_keys = false;
    }

    Ok(config)
}

fn print_report(report: &AuditReport) {
    println!("This is {}.", report.host_codename);
    println!(
        "Found {} sources with {} possibly outdated.",
        report.entries,
        report.mismatches.len()
    );

    for mismatch in &report.mismatches {
        println!(
            "{}: outdated distribution {} ({})",
            mismatch.location, mismatch.entry.distribution, mismatch.entry
        );

        if mismatch.discovery.distributions.is_empty() {
            println!(
                "  available distributions via {}: none",
                mismatch.discovery.method
            );
        } else {
            println!(
                "  available distributions via {}: {}",
                mismatch.discovery.method,
                mismatch.discovery.distributions.join(", ")
            );
        }

        if mismatch.possibly_better.is_empty() {
            println!("  no better match(es) found at the moment");
        } else {
            println!(
                "  possibly better options: {}",
                mismatch.possibly_better.join(", ")
            );
        }
    }

    if !report.keys.is_empty() {
        println!("Signing keys:");
    }

    for key in &report.keys {
        match &key.identity {
            Some(identity) if identity.is_identified() => println!(
                "  {} {}: {} key {} (signature made {})",
                key.url, key.distribution, identity.key_type, identity.key_id, identity.signed_at
            ),
            Some(_) => println!(
                "  {} {}: signer could not be determined",
                key.url, key.distribution
            ),
            None => println!("  {} {}: no signature found", key.url, key.distribution),
        }
    }
}

/// Document written by `--json`.
#[derive(Serialize)]
struct JsonReport<'a> {
    #[serde(flatten)]
    report: &'a AuditReport,
    missing_keys: &'a [String],
}

fn render_json(report: &AuditReport, missing_keys: &[String]) -> Result<String> {
    Ok(serde_json::to_string_pretty(&JsonReport {
        report,
        missing_keys,
    })?)
}

/// Identified signing keys absent from the local keyring.
fn untrusted_keys(config: &AuditConfig, report: &AuditReport) -> Vec<String> {
    let trusted = match TrustedKeys::from_command(config.keyring_list_command.as_slice()) {
        Ok(trusted) => trusted,
        Err(e) => {
            warn!("unable to list trusted keys; not checking keys: {}", e);
            return vec![];
        }
    };

    let missing = missing_keys(report.identities(), &trusted);

    if missing.is_empty() {
        info!("all identified signing keys are trusted");
    }

    missing
}

fn print_missing_keys(missing: &[String], import: bool) {
    for key_id in missing {
        println!("Key {} is not trusted.", key_id);
    }

    if !missing.is_empty() && !import {
        println!("(Run as root with --import-keys to import missing keys.)");
    }
}

fn import_keys(config: &AuditConfig, missing: &[String]) -> Result<()> {
    let mut failures = 0;

    for key_id in missing {
        match import_key(&config.keyserver, key_id) {
            Ok(()) => {
                info!("imported key {}", key_id);
            }
            Err(e) => {
                error!("{}", e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        Err(UrlCheckError::KeyImport(failures))
    } else {
        Ok(())
    }
}
