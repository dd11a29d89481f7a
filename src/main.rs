use anyhow::Result;
use clap::Parser;
use reposcope::error::user_message;
use reposcope::rpc::{self, Format};
use reposcope::{Workspace, cli};
use serde_json::Value;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("reposcope=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: cli::Args) -> Result<()> {
    let workspace = Workspace::open(args.root.clone(), args.db.clone());
    match &args.command {
        cli::Command::Serve => rpc::serve(&workspace),
        cli::Command::Request {
            method,
            params,
            params_file,
            id,
        } => {
            let params_raw = if let Some(path) = params_file {
                std::fs::read_to_string(path)?
            } else {
                params.clone()
            };
            let response = rpc::call(&workspace, method.clone(), &params_raw, id)?;
            println!("{response}");
            Ok(())
        }
        command => {
            let Some((method, mut params)) = command.to_method() else {
                return Ok(());
            };
            if let Value::Object(map) = &mut params {
                map.insert("format".to_string(), serde_json::to_value(args.format)?);
            }
            let result = rpc::handle_method(&workspace, method, params)?;
            match (args.format, result) {
                (Format::Text, Value::String(text)) => println!("{}", text.trim_end()),
                (_, value) => println!("{}", serde_json::to_string_pretty(&value)?),
            }
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    init_tracing();
    let args = cli::Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", user_message(&err));
            ExitCode::FAILURE
        }
    }
}
