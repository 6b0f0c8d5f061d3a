//! waywire-scanner - command line entry point
//!
//! Generates Rust bindings from Wayland protocol XML files

use std::env;
use std::path::{Path, PathBuf};
use std::process::{self, Command};

use waywire_scanner::{load_files, Generator, VERSION};

fn print_usage() {
    println!("waywire-scanner v{}", VERSION);
    println!("Generates waywire bindings from Wayland protocol descriptions");
    println!();
    println!("Usage: waywire-scanner [OPTIONS] <protocol.xml>...");
    println!();
    println!("Options:");
    println!("  -client               Generate the client side only");
    println!("  -server               Generate the server side only");
    println!("  -runtime <path>       Path of the runtime crate (default: waywire)");
    println!("  -o <file>             Output file (default: stdout)");
    println!("  -rustfmt              Run rustfmt on the output file");
    println!("  -check                Validate the protocols without generating code");
    println!("  -h, --help            Show this help message");
    println!();
    println!("Examples:");
    println!("  waywire-scanner -o wayland.rs protocols/wayland.xml");
    println!("  waywire-scanner -client -o xdg.rs wayland.xml xdg-shell.xml");
    println!();
}

#[derive(Debug)]
struct Config {
    client: bool,
    server: bool,
    runtime: String,
    output: Option<PathBuf>,
    rustfmt: bool,
    check_only: bool,
    inputs: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            client: true,
            server: true,
            runtime: "waywire".to_string(),
            output: None,
            rustfmt: false,
            check_only: false,
            inputs: Vec::new(),
        }
    }
}

fn parse_args() -> Result<Config, String> {
    let mut config = Config::default();
    let mut side_selected = false;
    let args: Vec<String> = env::args().collect();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            "-client" | "-server" => {
                if !side_selected {
                    config.client = false;
                    config.server = false;
                    side_selected = true;
                }
                if args[i] == "-client" {
                    config.client = true;
                } else {
                    config.server = true;
                }
            }
            "-runtime" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for -runtime".to_string());
                }
                config.runtime = args[i].clone();
            }
            "-o" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for -o".to_string());
                }
                config.output = Some(PathBuf::from(&args[i]));
            }
            "-rustfmt" => {
                config.rustfmt = true;
            }
            "-check" => {
                config.check_only = true;
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            path => config.inputs.push(PathBuf::from(path)),
        }
        i += 1;
    }

    if config.inputs.is_empty() {
        return Err("No protocol files given".to_string());
    }
    if config.rustfmt && config.output.is_none() {
        return Err("-rustfmt requires -o".to_string());
    }

    Ok(config)
}

fn run_rustfmt(path: &Path) {
    match Command::new("rustfmt").arg("--edition").arg("2021").arg(path).status() {
        Ok(status) if status.success() => log::debug!("formatted {}", path.display()),
        Ok(status) => log::warn!("rustfmt exited with {}", status),
        Err(e) => log::warn!("Could not run rustfmt: {}", e),
    }
}

fn main() {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match parse_args() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {}", err);
            eprintln!();
            print_usage();
            process::exit(1);
        }
    };

    let protocols = match load_files(&config.inputs) {
        Ok(protocols) => protocols,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    let interface_count: usize = protocols.iter().map(|p| p.interfaces.len()).sum();
    log::info!(
        "Loaded {} protocols ({} interfaces)",
        protocols.len(),
        interface_count
    );

    if config.check_only {
        log::info!("All protocols are valid");
        return;
    }

    let generator = Generator::new()
        .runtime_path(config.runtime.clone())
        .client(config.client)
        .server(config.server);

    match &config.output {
        Some(path) => {
            if let Err(e) = generator.write_to_file(&protocols, path) {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
            if config.rustfmt {
                run_rustfmt(path);
            }
        }
        None => match generator.generate_to_string(&protocols) {
            Ok(code) => println!("{}", code),
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        },
    }
}
