use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use serde_json::{json, Value};
use shroud::{dispatch_command, resolve_root, Cli, OutputFormat};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let format = cli.output_format;
    if let Err(err) = run(cli, format) {
        emit_error(format, &err);
        std::process::exit(1);
    }
}

fn run(cli: Cli, output_format: OutputFormat) -> Result<()> {
    let root = resolve_root(cli.root);
    let timeout = Duration::from_secs(cli.timeout_secs);
    let (message, data) = dispatch_command(&root, timeout, cli.command)?;
    emit_success(output_format, message, data)
}

fn emit_success(format: OutputFormat, message: String, data: Value) -> Result<()> {
    let payload = json!({
        "status": "ok",
        "message": message,
        "data": data,
    });

    match format {
        OutputFormat::Json => println!("{}", payload),
        OutputFormat::Text => {
            println!("{}", payload["message"].as_str().unwrap_or_default());
            if !payload["data"].is_null() {
                let pretty = serde_json::to_string_pretty(&payload["data"])?;
                println!("{pretty}");
            }
        }
    }
    Ok(())
}

fn emit_error(format: OutputFormat, err: &anyhow::Error) {
    let details: Vec<String> = err.chain().map(|cause| cause.to_string()).collect();
    let payload = json!({
        "status": "error",
        "message": err.to_string(),
        "details": details,
        "data": Value::Null,
    });

    match format {
        OutputFormat::Json => println!("{}", payload),
        OutputFormat::Text => {
            eprintln!("Error: {}", err);
            if details.len() > 1 {
                for detail in details.iter().skip(1) {
                    eprintln!("  -> {}", detail);
                }
            }
        }
    }
}
