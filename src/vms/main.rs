// SPDX-License-Identifier: GPL-2.0-or-later

mod app;

use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "./configs/vms.toml";

const HELP: &str = "\
vms

USAGE:
  vms [OPTIONS]

OPTIONS:
  --config <PATH>  Path to the TOML config file [default: ./configs/vms.toml]
  -h, --help       Print this help and exit
";

struct Args {
    config: PathBuf,
}

fn parse_args() -> Result<Args, pico_args::Error> {
    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }
    let config = args
        .opt_value_from_str("--config")?
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    Ok(Args { config })
}

#[tokio::main]
async fn main() {
    let args = match parse_args() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("argument error: {e}\n\n{HELP}");
            std::process::exit(2);
        }
    };

    if let Err(e) = app::run(&args.config).await {
        eprintln!("failed to run vms: {e}");
        std::process::exit(1);
    }
}
