//! Operator console for the emulator's dynamic module loader.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hdl_core::{
    CoreModule, ListScope, LoadOptions, LoaderConfig, ModuleRegistry, ShutdownSequencer,
};

/// Load, unload and inspect emulator modules.
#[derive(Parser, Debug)]
#[command(name = "hdl")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform. Defaults to `run`.
    #[command(subcommand)]
    command: Option<Command>,

    /// Configuration file (TOML).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory searched for modules.
    #[arg(long, global = true)]
    module_path: Option<PathBuf>,

    /// Module file suffix; empty disables suffixing.
    #[arg(long, global = true)]
    suffix: Option<String>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start the loader and read operator commands from stdin.
    Run,
    /// Load modules, then print the module listing.
    Load {
        /// Module names.
        #[arg(required = true)]
        names: Vec<String>,
        /// Load even if the dependency check fails.
        #[arg(long)]
        force: bool,
        /// Never allow the modules to be unloaded.
        #[arg(long)]
        no_unload: bool,
        /// Suppress open failure messages.
        #[arg(short, long)]
        quiet: bool,
    },
    /// Print the module listing.
    List {
        /// Include unresolved entry points of the core module.
        #[arg(short, long)]
        all: bool,
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the dependency records.
    Deps,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = build_config(&args)?;
    let shutdown = ShutdownSequencer::new();
    let registry = ModuleRegistry::builder(config)
        .start(Arc::new(CoreModule::new()), &shutdown)
        .context("cannot initialize the dynamic loader")?;

    let result = match args.command.unwrap_or(Command::Run) {
        Command::Run => run_console(&registry),
        Command::Load {
            names,
            force,
            no_unload,
            quiet,
        } => load_modules(&registry, &names, force, no_unload, quiet),
        Command::List { all, json } => list_modules(&registry, all, json),
        Command::Deps => list_dependencies(&registry),
    };

    shutdown.run_all();
    result
}

fn init_logging(verbose: bool) {
    let json_logging = std::env::var("HDL_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "hdl=debug" } else { "hdl=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(io::stderr)
            .init();
    }
}

/// Defaults, then the config file, then the environment, then flags.
fn build_config(args: &Args) -> Result<LoaderConfig> {
    let mut config = match &args.config {
        Some(path) => LoaderConfig::from_toml_file(path)?,
        None => LoaderConfig::default(),
    };
    config = config.apply_env();
    if let Some(path) = &args.module_path {
        config = config.with_module_path(path);
    }
    if let Some(suffix) = &args.suffix {
        config = config.with_module_suffix(suffix);
    }
    Ok(config)
}

fn load_modules(
    registry: &ModuleRegistry,
    names: &[String],
    force: bool,
    no_unload: bool,
    quiet: bool,
) -> Result<()> {
    let options = LoadOptions {
        no_message: quiet,
        no_unload,
        force,
    };
    let mut failed = 0;
    for name in names {
        if registry.load(name, options).is_err() {
            failed += 1;
        }
    }
    list_modules(registry, false, false)?;
    if failed > 0 {
        anyhow::bail!("{} of {} modules failed to load", failed, names.len());
    }
    Ok(())
}

fn list_modules(registry: &ModuleRegistry, all: bool, json: bool) -> Result<()> {
    let scope = if all { ListScope::All } else { ListScope::Named };
    let listing = registry.list(scope)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        for item in listing.iter() {
            println!("{}", item);
        }
    }
    Ok(())
}

fn list_dependencies(registry: &ModuleRegistry) -> Result<()> {
    for record in registry.list_dependencies()? {
        println!("{}", record);
    }
    Ok(())
}

/// Read operator commands until `quit` or end of input.
fn run_console(registry: &ModuleRegistry) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    tracing::debug!("Operator console started");

    loop {
        print!("hdl> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&verb, rest)) = words.split_first() else {
            continue;
        };

        match verb {
            "quit" | "exit" => break,
            "help" => print_help(),
            "ldmod" => match rest.split_first() {
                Some((name, flags)) => match LoadOptions::from_words(flags.iter().copied()) {
                    Ok(options) => {
                        if registry.load(name, options).is_ok() {
                            println!("Module {} loaded", name);
                        }
                    }
                    Err(e) => println!("{}", e),
                },
                None => println!("ldmod: module name required"),
            },
            "rmmod" => {
                if rest.is_empty() {
                    println!("rmmod: module name required");
                }
                for name in rest {
                    if registry.unload(name).is_ok() {
                        println!("Module {} unloaded", name);
                    }
                }
            }
            "lsmod" => {
                let all = rest.first().is_some_and(|w| w.eq_ignore_ascii_case("all"));
                list_modules(registry, all, false)?;
            }
            "lsdep" => list_dependencies(registry)?,
            "modpath" => match rest.first() {
                Some(path) => registry.set_search_path(path),
                None => println!("{}", registry.search_path().display()),
            },
            other => println!("Unknown command: {} (try 'help')", other),
        }
    }
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  ldmod <module> [nomsg|nounload|force]...  load a module");
    println!("  rmmod <module>...                         unload modules");
    println!("  lsmod [all]                               list modules");
    println!("  lsdep                                     list dependencies");
    println!("  modpath [dir]                             show or set the module directory");
    println!("  quit                                      exit");
}
