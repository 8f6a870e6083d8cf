use std::net::IpAddr;
use std::path::PathBuf;

use log::LevelFilter;
use tabled::{builder::Builder, settings::Style};

use flowparse_lib::records::*;

pub const USAGE: &str = "usage: flowparse [--config <file>] [--exporter <ip>] [--json] [-v...] <packet files>...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub config: PathBuf,
    pub exporter: Option<IpAddr>,
    pub json: bool,
    pub verbosity: u8,
    pub files: Vec<PathBuf>,
}

impl CliArgs {
    pub fn parse<I>(args: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut cli_args = CliArgs {
            config: PathBuf::from("flowparse.json"),
            exporter: None,
            json: false,
            verbosity: 0,
            files: Vec::new(),
        };

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    let path = args.next().ok_or("--config needs a file name")?;
                    cli_args.config = PathBuf::from(path);
                },
                "--exporter" | "-e" => {
                    let ip = args.next().ok_or("--exporter needs an address")?;
                    let ip: IpAddr = ip.parse().map_err(|e| format!("bad exporter address {ip}: {e}"))?;
                    cli_args.exporter = Some(ip);
                },
                "--json" | "-j" => cli_args.json = true,
                flag if flag.starts_with("-v") && flag[1..].chars().all(|c| c == 'v') => {
                    cli_args.verbosity += (flag.len() - 1) as u8;
                },
                flag if flag.starts_with('-') => return Err(format!("unknown option {flag}")),
                file => cli_args.files.push(PathBuf::from(file)),
            }
        }

        if cli_args.files.is_empty() {
            return Err("no packet files given".to_string());
        }
        Ok(cli_args)
    }

    pub fn log_level(&self) -> LevelFilter {
        match self.verbosity {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

fn field_or_dash(record: &FlowRecord, names: &[&str]) -> String {
    names.iter()
        .find_map(|name| record.get(name))
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn build_flow_table(flows: &[(EventTime, FlowRecord)]) -> tabled::Table {
    let mut builder = Builder::new();
    builder.push_record([
        "time",
        "version",
        "src_addr",
        "dst_addr",
        "protocol",
        "src_port",
        "dst_port",
        "in_pkts",
        "in_bytes",
        "first_switched",
    ]);

    for (time, record) in flows {
        builder.push_record([
            time.to_string(),
            field_or_dash(record, &["version"]),
            field_or_dash(record, &["ipv4_src_addr", "ipv6_src_addr"]),
            field_or_dash(record, &["ipv4_dst_addr", "ipv6_dst_addr"]),
            field_or_dash(record, &["protocol"]),
            field_or_dash(record, &["l4_src_port"]),
            field_or_dash(record, &["l4_dst_port"]),
            field_or_dash(record, &["in_pkts"]),
            field_or_dash(record, &["in_bytes"]),
            field_or_dash(record, &["first_switched", "flow_start_milliseconds", "flow_start_seconds"]),
        ]);
    }

    let mut table = builder.build();
    table.with(Style::ascii_rounded());
    table
}

pub fn json_line(time: &EventTime, record: &FlowRecord) -> serde_json::Result<String> {
    serde_json::to_string(&serde_json::json!({
        "time": time.to_string(),
        "record": record,
    }))
}
