use std::fs;
use std::process::ExitCode;

use log::{error, info, warn};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

mod cli;
use crate::cli::*;

use flowparse_lib::parser::*;
use flowparse_lib::records::*;
use flowparse_lib::settings::*;


fn main() -> ExitCode {
    let args = match CliArgs::parse(std::env::args().skip(1)) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{e}\n{USAGE}");
            return ExitCode::from(2);
        },
    };

    if let Err(e) = TermLogger::init(args.log_level(), Config::default(), TerminalMode::Stderr, ColorChoice::Auto) {
        eprintln!("unable to start logger: {e}");
    }

    let settings = match ParserSettings::load_or_create(&args.config) {
        Ok(s) => s,
        Err(e) => {
            error!("unable to load settings from {}: {e}", args.config.display());
            return ExitCode::FAILURE;
        },
    };
    let mut parser = match NetflowParser::new(&settings) {
        Ok(p) => p,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        },
    };

    let mut flows: Vec<(EventTime, FlowRecord)> = Vec::new();
    let mut failed_files = 0;
    for file in &args.files {
        let data = match fs::read(file) {
            Ok(d) => d,
            Err(e) => {
                error!("unable to read {}: {e}", file.display());
                failed_files += 1;
                continue;
            },
        };

        match parser.decode_from(args.exporter, &data, |time, record| flows.push((time, record))) {
            Ok(report) => {
                info!("{}: {} records, {} templates learned", file.display(), report.records, report.templates_learned);
                for issue in &report.issues {
                    warn!("{}: {issue}", file.display());
                }
            },
            Err(e) => {
                error!("{}: {e}", file.display());
                failed_files += 1;
            },
        }
    }

    if args.json {
        for (time, record) in &flows {
            match json_line(time, record) {
                Ok(line) => println!("{line}"),
                Err(e) => error!("unable to serialize record: {e}"),
            }
        }
    }
    else {
        let flow_table = build_flow_table(&flows);
        println!("{flow_table}");
    }

    let stats = parser.stats();
    info!("stats: {}", serde_json::to_string(stats).unwrap_or_default());

    if failed_files > 0 {
        ExitCode::FAILURE
    }
    else {
        ExitCode::SUCCESS
    }
}
