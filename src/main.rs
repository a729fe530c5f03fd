use clap::{Arg, ArgAction, Command};
use cmm::config::{Config, DEFAULT_MAX_CALL_DEPTH};
use cmm::runner;
use std::fs;
use std::path::Path;
use std::process;

fn main() {
    init_tracing();

    let matches = Command::new("cmm")
        .about("Interpreter for a small C-like language with user-defined infix operators")
        .arg(
            Arg::new("file")
                .help("The script file to execute")
                .value_name("FILE")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("args")
                .help("Arguments passed to the script")
                .value_name("ARGS")
                .num_args(0..)
                .trailing_var_arg(true)
                .allow_hyphen_values(true)
                .index(2),
        )
        .arg(
            Arg::new("max-call-depth")
                .long("max-call-depth")
                .help("Maximum nesting of user function calls")
                .value_name("N")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("no-warnings")
                .long("no-warnings")
                .help("Do not print lexer warnings")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let config = Config {
        max_call_depth: matches
            .get_one::<usize>("max-call-depth")
            .copied()
            .unwrap_or(DEFAULT_MAX_CALL_DEPTH),
        show_warnings: !matches.get_flag("no-warnings"),
    };

    // clap enforces `required(true)`, so the file is always present here.
    let Some(file_path) = matches.get_one::<String>("file") else {
        process::exit(runner::FAILURE_STATUS);
    };
    let mut script_args = vec![file_path.clone()];
    if let Some(extra) = matches.get_many::<String>("args") {
        script_args.extend(extra.cloned());
    }

    process::exit(run_file(file_path, &script_args, &config));
}

fn run_file(path: &str, args: &[String], config: &Config) -> i32 {
    let path = Path::new(path);

    if !path.exists() {
        eprintln!("Error: File '{}' not found", path.display());
        return runner::FAILURE_STATUS;
    }

    match fs::read_to_string(path) {
        Ok(source) => {
            let filename = path.display().to_string();
            runner::run(&source, Some(&filename), args, config)
        }
        Err(e) => {
            eprintln!("Error reading file '{}': {}", path.display(), e);
            runner::FAILURE_STATUS
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // Only initialize if RUST_LOG is set; stdout belongs to the script.
    if std::env::var("RUST_LOG").is_ok() {
        let filter = EnvFilter::from_default_env();
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_level(true),
            )
            .with(filter)
            .init();
    }
}
