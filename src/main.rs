use sqlhop::config::ConfigManager;
use sqlhop::doctor::{CheckStatus, Doctor};
use sqlhop::history::{OperationEntry, OperationLog};
use sqlhop::logging;
use sqlhop::ops::outcome::format_bytes;
use sqlhop::ops::registry::{ServerProfile, ServerRegistry, SshTunnelConfig};
use sqlhop::ops::{
    DumpExecutor, DumpRequest, ImportExecutor, ImportOptions, Listing, Prober, TunnelManager,
};
use sqlhop::security::Vault;

use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

fn cli() -> Command {
    let server_arg = || {
        Arg::new("server")
            .required(false)
            .help("Server profile name (defaults to the default server)")
    };
    let database_arg = || {
        Arg::new("database")
            .short('d')
            .long("database")
            .help("Database name (defaults to the profile's database)")
    };

    Command::new("sqlhop")
        .version(env!("CARGO_PKG_VERSION"))
        .about("MySQL dumps and imports, optionally through an SSH tunnel")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .global(true)
                .help("More log output (-v info, -vv debug)"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("server")
                .about("Manage server profiles")
                .subcommand_required(true)
                .subcommand(
                    Command::new("add")
                        .about("Add a server profile")
                        .arg(Arg::new("name").required(true))
                        .arg(Arg::new("host").long("host").required(true))
                        .arg(
                            Arg::new("port")
                                .long("port")
                                .default_value("3306")
                                .value_parser(clap::value_parser!(u16)),
                        )
                        .arg(Arg::new("user").short('u').long("user").required(true))
                        .arg(
                            Arg::new("password-prompt")
                                .long("password-prompt")
                                .action(ArgAction::SetTrue)
                                .help("Ask for the MySQL password"),
                        )
                        .arg(Arg::new("database").long("database"))
                        .arg(Arg::new("charset").long("charset"))
                        .arg(Arg::new("collation").long("collation"))
                        .arg(
                            Arg::new("default")
                                .long("default")
                                .action(ArgAction::SetTrue)
                                .help("Make this the default server"),
                        )
                        .arg(Arg::new("ssh-host").long("ssh-host").requires("ssh-user"))
                        .arg(
                            Arg::new("ssh-port")
                                .long("ssh-port")
                                .default_value("22")
                                .value_parser(clap::value_parser!(u16)),
                        )
                        .arg(Arg::new("ssh-user").long("ssh-user").requires("ssh-host"))
                        .arg(
                            Arg::new("ssh-key")
                                .long("ssh-key")
                                .requires("ssh-host")
                                .conflicts_with("ssh-password-prompt"),
                        )
                        .arg(
                            Arg::new("ssh-password-prompt")
                                .long("ssh-password-prompt")
                                .action(ArgAction::SetTrue)
                                .requires("ssh-host"),
                        ),
                )
                .subcommand(Command::new("list").about("List server profiles"))
                .subcommand(
                    Command::new("show")
                        .about("Show one profile (credentials hidden)")
                        .arg(Arg::new("name").required(true)),
                )
                .subcommand(
                    Command::new("remove")
                        .about("Delete a profile")
                        .arg(Arg::new("name").required(true)),
                )
                .subcommand(
                    Command::new("set-default")
                        .about("Make a profile the default")
                        .arg(Arg::new("name").required(true)),
                ),
        )
        .subcommand(
            Command::new("test")
                .about("Check that a server is reachable")
                .arg(server_arg()),
        )
        .subcommand(
            Command::new("databases")
                .about("List databases on a server")
                .arg(server_arg())
                .arg(
                    Arg::new("all")
                        .long("all")
                        .action(ArgAction::SetTrue)
                        .help("Include system schemas"),
                ),
        )
        .subcommand(
            Command::new("tables")
                .about("List tables in a database")
                .arg(server_arg())
                .arg(database_arg()),
        )
        .subcommand(
            Command::new("dump")
                .about("Dump a database with mysqldump")
                .arg(server_arg())
                .arg(database_arg())
                .arg(
                    Arg::new("tables")
                        .short('t')
                        .long("tables")
                        .value_delimiter(',')
                        .num_args(1..)
                        .help("Only these tables (comma-separated)"),
                )
                .arg(
                    Arg::new("schema-only")
                        .long("schema-only")
                        .action(ArgAction::SetTrue),
                )
                .arg(Arg::new("data-only").long("data-only").action(ArgAction::SetTrue))
                .arg(
                    Arg::new("drop-tables")
                        .long("drop-tables")
                        .action(ArgAction::SetTrue)
                        .help("Add DROP TABLE before each CREATE TABLE"),
                )
                .arg(Arg::new("gzip").long("gzip").action(ArgAction::SetTrue))
                .arg(Arg::new("output").short('o').long("output"))
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Print the command instead of running it"),
                ),
        )
        .subcommand(
            Command::new("import")
                .about("Import a .sql or .sql.gz file")
                .arg(server_arg())
                .arg(database_arg())
                .arg(Arg::new("file").short('f').long("file").required(true))
                .arg(Arg::new("dry-run").long("dry-run").action(ArgAction::SetTrue)),
        )
        .subcommand(Command::new("doctor").about("Check external tools and local setup"))
        .subcommand(
            Command::new("history")
                .about("Show recent dumps and imports")
                .arg(
                    Arg::new("limit")
                        .short('n')
                        .default_value("20")
                        .value_parser(clap::value_parser!(usize)),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Show or change settings")
                .subcommand_required(true)
                .subcommand(Command::new("show").about("Print the effective config"))
                .subcommand(
                    Command::new("set")
                        .about("Set a value, e.g. tunnel.host_key_policy strict")
                        .arg(Arg::new("key").required(true))
                        .arg(Arg::new("value").required(true)),
                ),
        )
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    logging::init(matches.get_count("verbose"));

    // Dropping the running operation kills its pipeline and any tunnel.
    let outcome = tokio::select! {
        result = run(&matches) => result,
        _ = tokio::signal::ctrl_c() => Err(anyhow!("Interrupted")),
    };

    if let Err(e) = outcome {
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}

async fn run(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("server", sub)) => server_command(sub),
        Some(("test", args)) => test_command(args).await,
        Some(("databases", args)) => databases_command(args).await,
        Some(("tables", args)) => tables_command(args).await,
        Some(("dump", args)) => dump_command(args).await,
        Some(("import", args)) => import_command(args).await,
        Some(("doctor", _)) => doctor_command(),
        Some(("history", args)) => {
            let limit = *args.get_one::<usize>("limit").unwrap_or(&20);
            history_command(limit)
        }
        Some(("config", sub)) => config_command(sub),
        _ => Ok(()),
    }
}

/// Resolve a profile by name (or the default) with credentials decrypted.
fn load_profile(args: &ArgMatches) -> Result<ServerProfile> {
    let registry = ServerRegistry::load().context("Failed to read servers.toml")?;
    let name = args.get_one::<String>("server").map(|s| s.as_str());
    let profile = registry.resolve(name)?;
    let vault = Vault::load_or_create()?;
    profile.unseal(&vault)
}

fn database_for(args: &ArgMatches, profile: &ServerProfile) -> Result<String> {
    args.get_one::<String>("database")
        .cloned()
        .or_else(|| profile.database.clone())
        .ok_or_else(|| {
            anyhow!(
                "No database given and server '{}' has no default database. Pass --database.",
                profile.name
            )
        })
}

fn tunnel_manager(manager: &ConfigManager) -> TunnelManager {
    TunnelManager::new(manager.config.tunnel.clone())
}

fn server_command(matches: &ArgMatches) -> Result<()> {
    let mut registry = ServerRegistry::load()?;
    match matches.subcommand() {
        Some(("add", args)) => {
            let name = args.get_one::<String>("name").expect("required");
            let host = args.get_one::<String>("host").expect("required");
            let port = *args.get_one::<u16>("port").expect("defaulted");
            let user = args.get_one::<String>("user").expect("required");

            let mut profile = ServerProfile::new(name, host, port, user);
            if args.get_flag("password-prompt") {
                let password = rpassword::prompt_password("MySQL password: ")?;
                profile.password = Some(password).filter(|p| !p.is_empty());
            }
            profile.database = args.get_one::<String>("database").cloned();
            if let Some(charset) = args.get_one::<String>("charset") {
                profile.charset = charset.clone();
            }
            if let Some(collation) = args.get_one::<String>("collation") {
                profile.collation = collation.clone();
            }
            profile.is_default = args.get_flag("default");

            if let Some(ssh_host) = args.get_one::<String>("ssh-host") {
                let ssh_user = args.get_one::<String>("ssh-user").expect("required by clap");
                let mut tunnel = if let Some(key) = args.get_one::<String>("ssh-key") {
                    SshTunnelConfig::with_key(ssh_host, ssh_user, PathBuf::from(key))
                } else if args.get_flag("ssh-password-prompt") {
                    let password = rpassword::prompt_password("SSH password: ")?;
                    SshTunnelConfig::with_password(ssh_host, ssh_user, &password)
                } else {
                    return Err(anyhow!("--ssh-host needs either --ssh-key or --ssh-password-prompt"));
                };
                tunnel.ssh_port = *args.get_one::<u16>("ssh-port").expect("defaulted");
                profile.ssh_tunnel = Some(tunnel);
            }

            let vault = Vault::load_or_create()?;
            registry.add(profile.seal(&vault)?)?;
            println!("✅ Added server '{}'", name);
        }
        Some(("list", _)) => {
            if registry.all().is_empty() {
                println!("No servers yet. Add one with 'sqlhop server add'.");
                return Ok(());
            }
            for server in registry.all() {
                let marker = if server.is_default { "*" } else { " " };
                let via = server
                    .ssh_tunnel
                    .as_ref()
                    .map(|t| format!(" via {}", t.target()))
                    .unwrap_or_default();
                println!(
                    "{} {:<16} {}@{}:{}{}",
                    marker, server.name, server.username, server.host, server.port, via
                );
            }
        }
        Some(("show", args)) => {
            let name = args.get_one::<String>("name").expect("required");
            let server = registry
                .find_by_name(name)
                .ok_or_else(|| anyhow!("Server '{}' not found", name))?;
            println!("🗄  {}", server.name);
            println!("   Host:      {}:{}", server.host, server.port);
            println!("   User:      {}", server.username);
            println!(
                "   Password:  {}",
                if server.password.is_some() { "(stored, encrypted)" } else { "(none)" }
            );
            println!(
                "   Database:  {}",
                server.database.as_deref().unwrap_or("(none)")
            );
            println!("   Charset:   {} / {}", server.charset, server.collation);
            println!("   Default:   {}", server.is_default);
            if let Some(t) = &server.ssh_tunnel {
                let auth = match &t.ssh_key_path {
                    Some(key) => format!("key {}", key.display()),
                    None => "password".to_string(),
                };
                println!("   SSH:       {}:{} ({})", t.target(), t.ssh_port, auth);
            }
        }
        Some(("remove", args)) => {
            let name = args.get_one::<String>("name").expect("required");
            registry.remove(name)?;
            println!("🗑  Removed server '{}'", name);
        }
        Some(("set-default", args)) => {
            let name = args.get_one::<String>("name").expect("required");
            registry.set_default(name)?;
            println!("✅ '{}' is now the default server", name);
        }
        _ => {}
    }
    Ok(())
}

async fn test_command(args: &ArgMatches) -> Result<()> {
    let profile = load_profile(args)?;
    let manager = ConfigManager::new()?;
    println!("🔌 Testing '{}'...", profile.name);

    let report = Prober::new(tunnel_manager(&manager)).test(&profile).await;
    if !report.success {
        return Err(anyhow!("{}", report.message));
    }
    println!("✅ {}", report.message);
    if let Some(details) = report.details {
        println!("   Endpoint: {}", details.endpoint);
        println!("   Tunneled: {}", details.tunneled);
        println!("   Latency:  {}ms", details.latency_ms);
    }
    Ok(())
}

async fn databases_command(args: &ArgMatches) -> Result<()> {
    let profile = load_profile(args)?;
    let manager = ConfigManager::new()?;
    let listing = Prober::new(tunnel_manager(&manager))
        .list_databases(&profile, args.get_flag("all"))
        .await;
    print_listing(listing, "databases")
}

async fn tables_command(args: &ArgMatches) -> Result<()> {
    let profile = load_profile(args)?;
    let database = database_for(args, &profile)?;
    let manager = ConfigManager::new()?;
    let listing = Prober::new(tunnel_manager(&manager))
        .list_tables(&profile, &database)
        .await;
    print_listing(listing, "tables")
}

fn print_listing(listing: Listing, what: &str) -> Result<()> {
    match listing {
        Listing::Items(names) if names.is_empty() => println!("(no {})", what),
        Listing::Items(names) => {
            for name in names {
                println!("{}", name);
            }
        }
        Listing::Unreachable(reason) => return Err(anyhow!("Could not list {}: {}", what, reason)),
    }
    Ok(())
}

async fn dump_command(args: &ArgMatches) -> Result<()> {
    let profile = load_profile(args)?;
    let manager = ConfigManager::new()?;
    let database = database_for(args, &profile)?;
    let gzip = args.get_flag("gzip");

    let output_path = args
        .get_one::<String>("output")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            manager
                .config
                .output
                .directory
                .join(sqlhop::ops::generate_output_path(&database, gzip))
        });
    if let Some(dir) = output_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.is_dir() {
            return Err(anyhow!("Output directory does not exist: {}", dir.display()));
        }
    }

    let options = DumpRequest {
        database: database.clone(),
        tables: args
            .get_many::<String>("tables")
            .map(|t| t.cloned().collect())
            .unwrap_or_default(),
        schema_only: args.get_flag("schema-only"),
        data_only: args.get_flag("data-only"),
        drop_tables: args.get_flag("drop-tables"),
        gzip,
        output_path: Some(output_path),
    }
    .build()?;

    let executor = DumpExecutor::new(
        tunnel_manager(&manager),
        manager.config.execution.command_timeout(),
    );

    if args.get_flag("dry-run") {
        println!("   [DRY RUN] {}", executor.preview(&profile, &options));
        return Ok(());
    }

    println!("📦 Dumping '{}' from '{}'...", database, profile.name);
    let result = executor.dump(&profile, &options).await;
    if let Err(e) = OperationLog::record(OperationEntry::from_dump(&profile.name, &database, &result)) {
        tracing::warn!(error = %e, "could not write history");
    }

    match result.error() {
        None => {
            println!(
                "✅ Wrote {} ({}) in {:.1}s",
                result.file_path().display(),
                format_bytes(result.size_bytes()),
                result.duration().as_secs_f64()
            );
            Ok(())
        }
        Some(err) => Err(anyhow!("Dump failed: {}", err)),
    }
}

async fn import_command(args: &ArgMatches) -> Result<()> {
    let profile = load_profile(args)?;
    let manager = ConfigManager::new()?;
    let database = database_for(args, &profile)?;
    let file = args.get_one::<String>("file").expect("required");
    let options = ImportOptions::new(&database, file)?;

    let executor = ImportExecutor::new(
        tunnel_manager(&manager),
        manager.config.execution.command_timeout(),
    );

    if args.get_flag("dry-run") {
        println!("   [DRY RUN] {}", executor.preview(&profile, &options));
        return Ok(());
    }

    println!("📥 Importing {} into '{}' on '{}'...", file, database, profile.name);
    let result = executor.import(&profile, &options).await;
    if let Err(e) =
        OperationLog::record(OperationEntry::from_import(&profile.name, &database, &result))
    {
        tracing::warn!(error = %e, "could not write history");
    }

    match result.error() {
        None => {
            println!("✅ Import finished in {:.1}s", result.duration().as_secs_f64());
            Ok(())
        }
        Some(err) => Err(anyhow!("Import failed: {}", err)),
    }
}

fn doctor_command() -> Result<()> {
    println!("🩺 sqlhop doctor");
    let report = Doctor::new().run();
    for check in &report.checks {
        let icon = match check.status {
            CheckStatus::Pass => "✓",
            CheckStatus::Warning => "!",
            CheckStatus::Fail => "✗",
        };
        println!("  {} {:<10} {}", icon, check.name, check.message);
    }
    if report.overall_health == CheckStatus::Fail {
        return Err(anyhow!("Some checks failed"));
    }
    println!("\n✅ Ready");
    Ok(())
}

fn history_command(limit: usize) -> Result<()> {
    let log = OperationLog::load();
    let recent = log.recent(limit);
    if recent.is_empty() {
        println!("No dumps or imports recorded yet.");
        return Ok(());
    }
    for entry in recent {
        let status = if entry.success { "✅" } else { "❌" };
        let size = entry.bytes.map(format_bytes).unwrap_or_default();
        println!(
            "{} {} {:?} {}/{} {} {}",
            status,
            entry.timestamp,
            entry.kind,
            entry.server,
            entry.database,
            entry.file.display(),
            size
        );
        if let Some(err) = &entry.error {
            println!("     {}", err.lines().next().unwrap_or_default());
        }
    }
    Ok(())
}

fn config_command(matches: &ArgMatches) -> Result<()> {
    let mut manager = ConfigManager::new()?;
    match matches.subcommand() {
        Some(("show", _)) => {
            print!("{}", toml::to_string_pretty(&manager.config)?);
        }
        Some(("set", args)) => {
            let key = args.get_one::<String>("key").expect("required");
            let value = args.get_one::<String>("value").expect("required");
            manager.set(key, value)?;
            println!("✅ {} = {}", key, value);
        }
        _ => {}
    }
    Ok(())
}
