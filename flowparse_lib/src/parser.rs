use std::net::IpAddr;
use std::time::Instant;

use log::{debug, warn};
use serde::Serialize;

use crate::error::*;
use crate::fields::*;
use crate::flowsets::*;
use crate::records::*;
use crate::settings::*;
use crate::templates::*;
use crate::time::*;
use crate::utils::*;
use crate::v5::*;

/// What one `decode` call produced besides the records themselves.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodeReport {
    pub records: usize,
    pub templates_learned: usize,
    pub issues: Vec<FlowSetIssue>,
}

impl DecodeReport {
    pub(crate) fn push_issue(&mut self, issue: FlowSetIssue) {
        warn!("{}", issue);
        self.issues.push(issue);
    }
}

/// Running totals over the lifetime of a parser.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ParserStats {
    pub packets: u64,
    pub failed_packets: u64,
    pub records: u64,
    pub templates_learned: u64,
    pub unknown_template_sets: u64,
    pub malformed_templates: u64,
}

impl ParserStats {
    fn record(&mut self, report: &DecodeReport) {
        self.records += report.records as u64;
        self.templates_learned += report.templates_learned as u64;
        for issue in &report.issues {
            match issue {
                FlowSetIssue::UnknownTemplate { .. } => self.unknown_template_sets += 1,
                FlowSetIssue::MalformedTemplate { .. } => self.malformed_templates += 1,
            }
        }
    }
}

/// Decodes NetFlow v5, v9 and IPFIX packets.
///
/// Holds the template cache, so one parser should see every packet from a
/// given exporter. Calls are synchronous; wrap the parser in a mutex or keep
/// one per worker to share it between threads.
///
/// ```
/// use flowparse_lib::parser::NetflowParser;
///
/// let mut parser = NetflowParser::default();
/// let packet = [0u8, 5, 0, 0, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 3, 0, 0, 0, 0];
/// let report = parser.decode(&packet, |time, record| {
///     println!("{} {}", time, serde_json::to_string(&record).unwrap_or_default());
/// }).unwrap();
/// assert_eq!(report.records, 0);
/// ```
#[derive(Debug)]
pub struct NetflowParser {
    versions: Vec<NetflowVersion>,
    registry: FieldRegistry,
    converter: TimeConverter,
    cache: TemplateCache,
    stats: ParserStats,
}

impl NetflowParser {
    pub fn new(settings: &ParserSettings) -> std::result::Result<Self, SettingsError> {
        settings.validate()?;
        Ok(NetflowParser {
            versions: settings.accepted_versions(),
            registry: FieldRegistry::with_definitions(&settings.definitions),
            converter: TimeConverter::new(settings.time_mode()),
            cache: TemplateCache::new(settings.cache_ttl(), settings.cache_max_templates_per_exporter),
            stats: ParserStats::default(),
        })
    }

    pub fn decode<F>(&mut self, data: &[u8], emit: F) -> Result<DecodeReport>
    where
        F: FnMut(EventTime, FlowRecord),
    {
        self.decode_from(None, data, emit)
    }

    /// Like `decode`, with templates scoped to the sending exporter's address.
    pub fn decode_from<F>(&mut self, exporter: Option<IpAddr>, data: &[u8], emit: F) -> Result<DecodeReport>
    where
        F: FnMut(EventTime, FlowRecord),
    {
        self.decode_at(exporter, data, Instant::now(), emit)
    }

    /// Like `decode_from`, with an explicit clock for template expiry.
    pub fn decode_at<F>(&mut self, exporter: Option<IpAddr>, data: &[u8], now: Instant, mut emit: F) -> Result<DecodeReport>
    where
        F: FnMut(EventTime, FlowRecord),
    {
        let mut report = DecodeReport::default();
        let result = self.decode_messages(exporter, data, now, &mut report, &mut emit);

        self.stats.packets += 1;
        self.stats.record(&report);
        match result {
            Ok(()) => Ok(report),
            Err(e) => {
                self.stats.failed_packets += 1;
                debug!("packet from {:?} failed after {} records: {}", exporter, report.records, e);
                Err(e)
            },
        }
    }

    fn decode_messages<F>(
        &mut self,
        exporter: Option<IpAddr>,
        data: &[u8],
        now: Instant,
        report: &mut DecodeReport,
        emit: &mut F,
    ) -> Result<()>
    where
        F: FnMut(EventTime, FlowRecord),
    {
        let mut offset = 0;
        loop {
            let rest = &data[offset..];
            let version = ByteCursor::new(rest).peek_u16()?;
            if offset > 0 && version == 0 {
                debug!("ignoring {} bytes of padding after last message", rest.len());
                return Ok(());
            }

            let consumed = match NetflowVersion::from_wire(version).filter(|v| self.versions.contains(v)) {
                Some(NetflowVersion::V5) => decode_v5(rest, &self.converter, report, emit)?,
                Some(v) => {
                    let mut ctx = FlowSetContext {
                        registry: &self.registry,
                        converter: &self.converter,
                        cache: &mut self.cache,
                        exporter,
                        now,
                    };
                    decode_template_message(rest, v, &mut ctx, report, emit)?
                },
                None if offset == 0 => return Err(DecodeError::UnsupportedVersion(version)),
                None => {
                    debug!("ignoring {} trailing bytes with version word {}", rest.len(), version);
                    return Ok(());
                },
            };

            offset += consumed;
            if consumed == 0 || data.len() - offset < 2 {
                return Ok(());
            }
        }
    }

    /// Drops expired templates now instead of waiting for their next lookup.
    pub fn sweep_templates(&mut self) -> usize {
        self.cache.sweep(Instant::now())
    }

    pub fn stats(&self) -> &ParserStats {
        &self.stats
    }

    pub fn template_cache(&self) -> &TemplateCache {
        &self.cache
    }

    pub fn time_mode(&self) -> SwitchedTimeMode {
        self.converter.mode()
    }
}

impl Default for NetflowParser {
    fn default() -> Self {
        NetflowParser {
            versions: vec![NetflowVersion::V5, NetflowVersion::V9, NetflowVersion::Ipfix],
            registry: FieldRegistry::new(),
            converter: TimeConverter::default(),
            cache: TemplateCache::default(),
            stats: ParserStats::default(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    const DEFAULT_UPTIME: u32 = 1048383625;
    const DEFAULT_TIME: u32 = 1456773240;

    fn v5_packet(count: u16) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&5u16.to_be_bytes());
        data.extend_from_slice(&count.to_be_bytes());
        data.extend_from_slice(&DEFAULT_UPTIME.to_be_bytes());
        data.extend_from_slice(&DEFAULT_TIME.to_be_bytes());
        data.extend_from_slice(&987_654_321u32.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&[1, 1, 0, 0]);
        for _ in 0..count {
            data.extend_from_slice(&[10, 0, 1, 122, 192, 168, 0, 3, 10, 0, 0, 3, 0, 1, 0, 2]);
            data.extend_from_slice(&156u32.to_be_bytes());
            data.extend_from_slice(&1024u32.to_be_bytes());
            data.extend_from_slice(&(DEFAULT_UPTIME - 13000).to_be_bytes());
            data.extend_from_slice(&(DEFAULT_UPTIME - 12950).to_be_bytes());
            data.extend_from_slice(&[0x04, 0x18, 0x00, 0x50, 0, 27, 6, 0, 0, 101, 0, 201, 24, 24, 0, 0]);
        }
        data
    }

    fn v9_packet(source_id: u32, sets: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&9u16.to_be_bytes());
        data.extend_from_slice(&1u16.to_be_bytes());
        data.extend_from_slice(&DEFAULT_UPTIME.to_be_bytes());
        data.extend_from_slice(&DEFAULT_TIME.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&source_id.to_be_bytes());
        data.extend_from_slice(sets);
        data
    }

    // template 256 with in_pkts and protocol
    const V9_TEMPLATE_SET: [u8; 16] = [
        0x00, 0x00, 0x00, 0x10, // set id 0, length 16
        0x01, 0x00, 0x00, 0x02, // template 256, 2 fields
        0x00, 0x02, 0x00, 0x04, // in_pkts
        0x00, 0x04, 0x00, 0x01, // protocol
    ];

    const V9_DATA_SET: [u8; 12] = [
        0x01, 0x00, 0x00, 0x0c, // set id 256, length 12
        0x00, 0x00, 0x00, 0x9c, // in_pkts 156
        0x06, // protocol
        0x00, 0x00, 0x00, // padding
    ];

    fn parser_with(json: &str) -> NetflowParser {
        NetflowParser::new(&ParserSettings::from_json_str(json).unwrap()).unwrap()
    }

    fn collect(parser: &mut NetflowParser, data: &[u8]) -> (Result<DecodeReport>, Vec<(EventTime, FlowRecord)>) {
        let mut parsed = Vec::new();
        let result = parser.decode(data, |t, r| parsed.push((t, r)));
        (result, parsed)
    }

    #[test]
    fn dispatches_v5() {
        let mut parser = NetflowParser::default();
        let (result, parsed) = collect(&mut parser, &v5_packet(2));
        assert_eq!(result.unwrap().records, 2);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].0, EventTime::new(i64::from(DEFAULT_TIME), 987_654_321));
        assert_eq!(parser.stats().records, 2);
        assert_eq!(parser.stats().packets, 1);
    }

    #[test]
    fn unsupported_version_decodes_nothing() {
        let mut parser = NetflowParser::default();
        let mut data = v5_packet(1);
        data[1] = 7;
        let (result, parsed) = collect(&mut parser, &data);
        assert_eq!(result.unwrap_err(), DecodeError::UnsupportedVersion(7));
        assert!(parsed.is_empty());
        assert_eq!(parser.stats().failed_packets, 1);
    }

    #[test]
    fn disabled_version_is_unsupported() {
        let mut parser = parser_with(r#"{"versions": [9, 10]}"#);
        let (result, parsed) = collect(&mut parser, &v5_packet(1));
        assert_eq!(result.unwrap_err(), DecodeError::UnsupportedVersion(5));
        assert!(parsed.is_empty());
    }

    #[test]
    fn empty_and_one_byte_buffers_are_truncated() {
        let mut parser = NetflowParser::default();
        assert!(matches!(collect(&mut parser, &[]).0, Err(DecodeError::TruncatedPacket { .. })));
        assert!(matches!(collect(&mut parser, &[0]).0, Err(DecodeError::TruncatedPacket { .. })));
    }

    #[test]
    fn truncated_v5_emits_nothing_and_parser_stays_usable() {
        let mut parser = NetflowParser::default();
        let mut data = v5_packet(2);
        data.pop();
        let (result, parsed) = collect(&mut parser, &data);
        assert!(matches!(result, Err(DecodeError::TruncatedPacket { .. })));
        assert!(parsed.is_empty());

        let (result, parsed) = collect(&mut parser, &v5_packet(1));
        assert!(result.is_ok());
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn concatenated_v5_messages() {
        let mut data = v5_packet(1);
        data.extend(v5_packet(2));
        data.extend_from_slice(&[0, 0, 0]);
        let mut parser = NetflowParser::default();
        let (result, parsed) = collect(&mut parser, &data);
        assert_eq!(result.unwrap().records, 3);
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn trailing_garbage_after_message_is_ignored() {
        let mut data = v5_packet(1);
        data.extend_from_slice(&[0xde, 0xad]);
        let mut parser = NetflowParser::default();
        let (result, parsed) = collect(&mut parser, &data);
        assert_eq!(result.unwrap().records, 1);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parser.stats().failed_packets, 0);

        // the same word at the start of a buffer is still rejected
        let (result, parsed) = collect(&mut parser, &[0xde, 0xad, 0, 1]);
        assert!(matches!(result, Err(DecodeError::UnsupportedVersion(0xdead))));
        assert!(parsed.is_empty());
    }

    #[test]
    fn template_cache_persists_across_calls() {
        let mut parser = NetflowParser::default();
        let (result, _) = collect(&mut parser, &v9_packet(1, &V9_TEMPLATE_SET));
        assert_eq!(result.unwrap().templates_learned, 1);
        assert_eq!(parser.template_cache().len(), 1);

        let (result, parsed) = collect(&mut parser, &v9_packet(1, &V9_DATA_SET));
        assert!(result.unwrap().issues.is_empty());
        assert_eq!(parsed[0].1.get_u64("in_pkts"), Some(156));
        assert_eq!(parsed[0].1.get_u64("protocol"), Some(6));
        assert_eq!(parsed[0].0, EventTime::new(i64::from(DEFAULT_TIME), 0));
    }

    #[test]
    fn unknown_template_is_counted_not_fatal() {
        let mut parser = NetflowParser::default();
        let mut sets = V9_DATA_SET.to_vec();
        sets.extend_from_slice(&V9_TEMPLATE_SET);
        sets.extend_from_slice(&V9_DATA_SET);
        let (result, parsed) = collect(&mut parser, &v9_packet(1, &sets));
        let report = result.unwrap();
        assert_eq!(report.issues, vec![FlowSetIssue::UnknownTemplate { template_id: 256 }]);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parser.stats().unknown_template_sets, 1);
        assert_eq!(parser.stats().templates_learned, 1);
    }

    #[test]
    fn exporters_do_not_share_templates() {
        let mut parser = NetflowParser::default();
        let a = Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)));
        let b = Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 2)));
        parser.decode_from(a, &v9_packet(1, &V9_TEMPLATE_SET), |_, _| {}).unwrap();

        let mut count = 0;
        let report = parser.decode_from(b, &v9_packet(1, &V9_DATA_SET), |_, _| count += 1).unwrap();
        assert_eq!(count, 0);
        assert_eq!(report.issues.len(), 1);

        parser.decode_from(a, &v9_packet(1, &V9_DATA_SET), |_, _| count += 1).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn expired_template_is_unknown() {
        let mut parser = parser_with(r#"{"cache_ttl_secs": 60}"#);
        let start = Instant::now();
        parser.decode_at(None, &v9_packet(1, &V9_TEMPLATE_SET), start, |_, _| {}).unwrap();

        let mut count = 0;
        parser.decode_at(None, &v9_packet(1, &V9_DATA_SET), start + Duration::from_secs(30), |_, _| count += 1).unwrap();
        assert_eq!(count, 1);
        let report = parser.decode_at(None, &v9_packet(1, &V9_DATA_SET), start + Duration::from_secs(61), |_, _| count += 1).unwrap();
        assert_eq!(count, 1);
        assert_eq!(report.issues, vec![FlowSetIssue::UnknownTemplate { template_id: 256 }]);
    }

    #[test]
    fn custom_definitions_rename_fields() {
        let mut parser = parser_with(r#"{"definitions": [{"id": 2, "name": "packets", "kind": "unsigned"}]}"#);
        let mut sets = V9_TEMPLATE_SET.to_vec();
        sets.extend_from_slice(&V9_DATA_SET);
        let (_, parsed) = collect(&mut parser, &v9_packet(1, &sets));
        assert_eq!(parsed[0].1.get_u64("packets"), Some(156));
        assert!(!parsed[0].1.contains_key("in_pkts"));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let settings = ParserSettings { versions: vec![8], ..ParserSettings::default() };
        assert!(matches!(NetflowParser::new(&settings), Err(SettingsError::Invalid(_))));
    }

    #[test]
    fn switched_time_modes_agree_on_value() {
        let mut integer = NetflowParser::default();
        let mut rational = parser_with(r#"{"switched_time_precision": "rational"}"#);
        let (_, a) = collect(&mut integer, &v5_packet(1));
        let (_, b) = collect(&mut rational, &v5_packet(1));
        assert_eq!(a[0].1.get("first_switched"), b[0].1.get("first_switched"));
        assert_eq!(a[0].1.get("first_switched").unwrap().as_str(), Some("2016-02-29T19:13:47.987Z"));
    }

    fn time_decodes(parser: &mut NetflowParser, data: &[u8]) -> Duration {
        // best of several rounds to keep scheduler noise out
        (0..5).map(|_| {
            let start = Instant::now();
            let mut count = 0;
            for _ in 0..200 {
                parser.decode(data, |_, _| count += 1).unwrap();
            }
            assert_eq!(count, 200 * 50);
            start.elapsed()
        }).min().unwrap_or_default()
    }

    #[test]
    fn switched_time_cost_ordering() {
        let data = v5_packet(50);
        let mut raw = parser_with(r#"{"switched_times_from_uptime": true}"#);
        let mut integer = parser_with(r#"{"switched_time_precision": "integer"}"#);
        let mut rational = parser_with(r#"{"switched_time_precision": "rational"}"#);

        let raw_time = time_decodes(&mut raw, &data);
        let integer_time = time_decodes(&mut integer, &data);
        let rational_time = time_decodes(&mut rational, &data);
        assert!(raw_time < integer_time, "raw {raw_time:?} integer {integer_time:?}");
        assert!(integer_time < rational_time, "integer {integer_time:?} rational {rational_time:?}");
    }
}
