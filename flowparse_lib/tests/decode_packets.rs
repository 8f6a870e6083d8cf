use std::net::{IpAddr, Ipv4Addr};

use flowparse_lib::{DecodeError, EventTime, FlowRecord, FlowSetIssue, NetflowParser, ParserSettings};
use simplelog::{Config, LevelFilter, TestLogger};

const UPTIME: u32 = 1048383625;
const EXPORT_SECS: u32 = 1456773240;

fn init_logger() {
    let _ = TestLogger::init(LevelFilter::Debug, Config::default());
}

fn set(set_id: u16, body: &[u8]) -> Vec<u8> {
    let mut out = set_id.to_be_bytes().to_vec();
    out.extend_from_slice(&((body.len() + 4) as u16).to_be_bytes());
    out.extend_from_slice(body);
    out
}

fn v9(source_id: u32, sequence: u32, sets: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&9u16.to_be_bytes());
    out.extend_from_slice(&(sets.len() as u16).to_be_bytes());
    out.extend_from_slice(&UPTIME.to_be_bytes());
    out.extend_from_slice(&EXPORT_SECS.to_be_bytes());
    out.extend_from_slice(&sequence.to_be_bytes());
    out.extend_from_slice(&source_id.to_be_bytes());
    for s in sets {
        out.extend_from_slice(s);
    }
    out
}

fn ipfix(domain_id: u32, sets: &[Vec<u8>]) -> Vec<u8> {
    let body: Vec<u8> = sets.concat();
    let mut out = Vec::new();
    out.extend_from_slice(&10u16.to_be_bytes());
    out.extend_from_slice(&((16 + body.len()) as u16).to_be_bytes());
    out.extend_from_slice(&EXPORT_SECS.to_be_bytes());
    out.extend_from_slice(&1u32.to_be_bytes());
    out.extend_from_slice(&domain_id.to_be_bytes());
    out.extend_from_slice(&body);
    out
}

fn decode(parser: &mut NetflowParser, data: &[u8]) -> Result<Vec<(EventTime, FlowRecord)>, DecodeError> {
    let mut parsed = Vec::new();
    parser.decode(data, |t, r| parsed.push((t, r)))?;
    Ok(parsed)
}

// template 260: ipv6 src/dst, in_bytes, last_switched, first_switched, mac, mpls
fn v9_ipv6_template() -> Vec<u8> {
    set(0, &[
        0x01, 0x04, 0x00, 0x07,
        0x00, 0x1b, 0x00, 0x10, // ipv6_src_addr
        0x00, 0x1c, 0x00, 0x10, // ipv6_dst_addr
        0x00, 0x01, 0x00, 0x08, // in_bytes, 8 bytes
        0x00, 0x15, 0x00, 0x04, // last_switched
        0x00, 0x16, 0x00, 0x04, // first_switched
        0x00, 0x38, 0x00, 0x06, // in_src_mac
        0x00, 0x46, 0x00, 0x03, // mpls_label_1
    ])
}

fn v9_ipv6_record() -> Vec<u8> {
    let mut r = Vec::new();
    r.extend_from_slice(&"2001:db8::1".parse::<std::net::Ipv6Addr>().unwrap().octets());
    r.extend_from_slice(&"2001:db8::2".parse::<std::net::Ipv6Addr>().unwrap().octets());
    r.extend_from_slice(&5_000_000_000u64.to_be_bytes());
    r.extend_from_slice(&(UPTIME - 12950).to_be_bytes());
    r.extend_from_slice(&(UPTIME - 13000).to_be_bytes());
    r.extend_from_slice(&[0x00, 0x1b, 0x21, 0xaa, 0xbb, 0xcc]);
    // label 100, bottom of stack
    r.extend_from_slice(&[0x00, 0x06, 0x41]);
    r
}

#[test]
fn v9_stream_with_rich_field_types() {
    init_logger();
    let mut parser = NetflowParser::default();

    assert!(decode(&mut parser, &v9(1, 1, &[v9_ipv6_template()])).unwrap().is_empty());

    let mut records = v9_ipv6_record();
    records.extend(v9_ipv6_record());
    let parsed = decode(&mut parser, &v9(1, 2, &[set(260, &records)])).unwrap();
    assert_eq!(parsed.len(), 2);

    let (time, record) = &parsed[0];
    assert_eq!(*time, EventTime::new(i64::from(EXPORT_SECS), 0));
    let json = serde_json::to_value(record).unwrap();
    assert_eq!(json["version"], 9);
    assert_eq!(json["flow_seq_num"], 2);
    assert_eq!(json["flowset_id"], 260);
    assert_eq!(json["ipv6_src_addr"], "2001:db8::1");
    assert_eq!(json["ipv6_dst_addr"], "2001:db8::2");
    assert_eq!(json["in_bytes"], 5_000_000_000u64);
    assert_eq!(json["first_switched"], "2016-02-29T19:13:47.000Z");
    assert_eq!(json["last_switched"], "2016-02-29T19:13:47.050Z");
    assert_eq!(json["in_src_mac"], "00:1b:21:aa:bb:cc");
    assert_eq!(json["mpls_label_1"], 100);

    let stats = parser.stats();
    assert_eq!(stats.packets, 2);
    assert_eq!(stats.records, 2);
    assert_eq!(stats.templates_learned, 1);
}

#[test]
fn concatenated_ipfix_messages_share_the_cache() {
    init_logger();
    let template = set(2, &[0x01, 0x00, 0x00, 0x02, 0x00, 0x08, 0x00, 0x04, 0x00, 0x04, 0x00, 0x01]);
    let data = set(256, &[10, 0, 0, 1, 17, 10, 0, 0, 2, 6]);

    let mut buffer = ipfix(7, &[template]);
    buffer.extend(ipfix(7, &[data]));

    let mut parser = NetflowParser::default();
    let parsed = decode(&mut parser, &buffer).unwrap();
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[0].1.get_u64("protocol"), Some(17));
    assert_eq!(parsed[1].1.get("ipv4_src_addr").unwrap().to_string(), "10.0.0.2");
    assert_eq!(parsed[1].1.get_u64("version"), Some(10));
}

#[test]
fn error_mid_packet_keeps_earlier_records() {
    let template = set(2, &[0x01, 0x00, 0x00, 0x01, 0x00, 0x04, 0x00, 0x01]);
    let data = set(256, &[6, 17]);
    let mut message = ipfix(1, &[template, data]);
    // a set whose length runs past the message end
    message.extend_from_slice(&[0x01, 0x00, 0x00, 0x20]);
    let len = message.len() as u16;
    message[2..4].copy_from_slice(&len.to_be_bytes());

    let mut parser = NetflowParser::default();
    let mut parsed = Vec::new();
    let result = parser.decode(&message, |t, r| parsed.push((t, r)));
    assert!(matches!(result, Err(DecodeError::TruncatedPacket { .. })));
    assert_eq!(parsed.len(), 2);
    assert_eq!(parser.stats().failed_packets, 1);
    assert_eq!(parser.stats().records, 2);
}

#[test]
fn per_exporter_capacity_evicts_oldest_template() {
    let settings = ParserSettings::from_json_str(r#"{"cache_max_templates_per_exporter": 2}"#).unwrap();
    let mut parser = NetflowParser::new(&settings).unwrap();
    let exporter = Some(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7)));

    for id in [256u16, 257, 258] {
        let id_bytes = id.to_be_bytes();
        let template = set(0, &[id_bytes[0], id_bytes[1], 0x00, 0x01, 0x00, 0x04, 0x00, 0x01]);
        parser.decode_from(exporter, &v9(1, 1, &[template]), |_, _| {}).unwrap();
    }
    assert_eq!(parser.template_cache().len(), 2);

    let report = parser.decode_from(exporter, &v9(1, 2, &[set(256, &[6])]), |_, _| {}).unwrap();
    assert_eq!(report.issues, vec![FlowSetIssue::UnknownTemplate { template_id: 256 }]);

    let mut count = 0;
    parser.decode_from(exporter, &v9(1, 3, &[set(258, &[6])]), |_, _| count += 1).unwrap();
    assert_eq!(count, 1);
}

#[test]
fn unknown_fields_are_kept_as_hex() {
    let template = set(0, &[0x01, 0x00, 0x00, 0x02, 0x00, 0x04, 0x00, 0x01, 0x7d, 0x00, 0x00, 0x02]);
    let data = set(256, &[6, 0xbe, 0xef, 0x00]);
    let mut parser = NetflowParser::default();
    let parsed = decode(&mut parser, &v9(3, 1, &[template, data])).unwrap();
    let json = serde_json::to_value(&parsed[0].1).unwrap();
    assert_eq!(json["field_32000"], "beef");
    assert_eq!(json["protocol"], 6);
}
