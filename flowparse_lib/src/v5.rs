use std::net::Ipv4Addr;

use log::debug;

use crate::error::*;
use crate::parser::DecodeReport;
use crate::records::*;
use crate::time::*;
use crate::utils::*;

pub const V5_HEADER_LEN: usize = 24;
pub const V5_RECORD_LEN: usize = 48;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct V5Header {
    pub version: u16,
    pub count: u16,
    pub sys_uptime: u32,
    pub unix_secs: u32,
    pub unix_nsecs: u32,
    pub flow_sequence: u32,
    pub engine_type: u8,
    pub engine_id: u8,
    pub sampling_algorithm: u8,
    pub sampling_interval: u16,
}

impl V5Header {
    pub fn parse(cursor: &mut ByteCursor) -> Result<Self> {
        let version = cursor.read_u16()?;
        let count = cursor.read_u16()?;
        let sys_uptime = cursor.read_u32()?;
        let unix_secs = cursor.read_u32()?;
        let unix_nsecs = cursor.read_u32()?;
        let flow_sequence = cursor.read_u32()?;
        let engine_type = cursor.read_u8()?;
        let engine_id = cursor.read_u8()?;
        // top 2 bits mode, low 14 bits interval
        let sampling = cursor.read_u16()?;
        Ok(V5Header {
            version,
            count,
            sys_uptime,
            unix_secs,
            unix_nsecs,
            flow_sequence,
            engine_type,
            engine_id,
            sampling_algorithm: (sampling >> 14) as u8,
            sampling_interval: sampling & 0x3fff,
        })
    }

    pub fn message_len(&self) -> usize {
        V5_HEADER_LEN + usize::from(self.count) * V5_RECORD_LEN
    }

    pub fn clock(&self) -> ExportClock {
        ExportClock {
            uptime_ms: self.sys_uptime,
            unix_secs: self.unix_secs,
            unix_nsecs: self.unix_nsecs,
        }
    }

    pub fn event_time(&self) -> EventTime {
        let extra_secs = i64::from(self.unix_nsecs / 1_000_000_000);
        EventTime::new(i64::from(self.unix_secs) + extra_secs, self.unix_nsecs % 1_000_000_000)
    }

    fn write_into(&self, record: &mut FlowRecord) {
        record.push("version", FlowValue::Unsigned(u64::from(self.version)));
        record.push("flow_records", FlowValue::Unsigned(u64::from(self.count)));
        record.push("uptime", FlowValue::Unsigned(u64::from(self.sys_uptime)));
        record.push("flow_seq_num", FlowValue::Unsigned(u64::from(self.flow_sequence)));
        record.push("engine_type", FlowValue::Unsigned(u64::from(self.engine_type)));
        record.push("engine_id", FlowValue::Unsigned(u64::from(self.engine_id)));
        record.push("sampling_algorithm", FlowValue::Unsigned(u64::from(self.sampling_algorithm)));
        record.push("sampling_interval", FlowValue::Unsigned(u64::from(self.sampling_interval)));
    }
}

/// One fixed 48 byte v5 flow.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct V5Record {
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    pub input: u16,
    pub output: u16,
    pub packets: u32,
    pub octets: u32,
    pub first: u32,
    pub last: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub tcp_flags: u8,
    pub protocol: u8,
    pub tos: u8,
    pub src_as: u16,
    pub dst_as: u16,
    pub src_mask: u8,
    pub dst_mask: u8,
}

impl V5Record {
    pub fn parse(cursor: &mut ByteCursor) -> Result<Self> {
        let src_addr = Ipv4Addr::from(cursor.read_u32()?);
        let dst_addr = Ipv4Addr::from(cursor.read_u32()?);
        let next_hop = Ipv4Addr::from(cursor.read_u32()?);
        let input = cursor.read_u16()?;
        let output = cursor.read_u16()?;
        let packets = cursor.read_u32()?;
        let octets = cursor.read_u32()?;
        let first = cursor.read_u32()?;
        let last = cursor.read_u32()?;
        let src_port = cursor.read_u16()?;
        let dst_port = cursor.read_u16()?;
        cursor.skip(1)?;
        let tcp_flags = cursor.read_u8()?;
        let protocol = cursor.read_u8()?;
        let tos = cursor.read_u8()?;
        let src_as = cursor.read_u16()?;
        let dst_as = cursor.read_u16()?;
        let src_mask = cursor.read_u8()?;
        let dst_mask = cursor.read_u8()?;
        cursor.skip(2)?;
        Ok(V5Record {
            src_addr,
            dst_addr,
            next_hop,
            input,
            output,
            packets,
            octets,
            first,
            last,
            src_port,
            dst_port,
            tcp_flags,
            protocol,
            tos,
            src_as,
            dst_as,
            src_mask,
            dst_mask,
        })
    }

    fn write_into(&self, record: &mut FlowRecord, clock: &ExportClock, converter: &TimeConverter) {
        record.push("ipv4_src_addr", FlowValue::Ipv4(self.src_addr));
        record.push("ipv4_dst_addr", FlowValue::Ipv4(self.dst_addr));
        record.push("ipv4_next_hop", FlowValue::Ipv4(self.next_hop));
        record.push("input_snmp", FlowValue::Unsigned(u64::from(self.input)));
        record.push("output_snmp", FlowValue::Unsigned(u64::from(self.output)));
        record.push("in_pkts", FlowValue::Unsigned(u64::from(self.packets)));
        record.push("in_bytes", FlowValue::Unsigned(u64::from(self.octets)));
        record.push("first_switched", converter.convert(Some(clock), self.first));
        record.push("last_switched", converter.convert(Some(clock), self.last));
        record.push("l4_src_port", FlowValue::Unsigned(u64::from(self.src_port)));
        record.push("l4_dst_port", FlowValue::Unsigned(u64::from(self.dst_port)));
        record.push("tcp_flags", FlowValue::Unsigned(u64::from(self.tcp_flags)));
        record.push("protocol", FlowValue::Unsigned(u64::from(self.protocol)));
        record.push("src_tos", FlowValue::Unsigned(u64::from(self.tos)));
        record.push("src_as", FlowValue::Unsigned(u64::from(self.src_as)));
        record.push("dst_as", FlowValue::Unsigned(u64::from(self.dst_as)));
        record.push("src_mask", FlowValue::Unsigned(u64::from(self.src_mask)));
        record.push("dst_mask", FlowValue::Unsigned(u64::from(self.dst_mask)));
    }
}

/// Decodes one v5 message from the start of `data` and returns the bytes it
/// occupied. The whole message is length checked before the first record is
/// emitted.
pub fn decode_v5<F>(data: &[u8], converter: &TimeConverter, report: &mut DecodeReport, emit: &mut F) -> Result<usize>
where
    F: FnMut(EventTime, FlowRecord),
{
    let mut cursor = ByteCursor::new(data);
    let header = V5Header::parse(&mut cursor)?;
    let message_len = header.message_len();
    check_packet_size(data.len(), message_len)?;
    debug!("v5 packet seq {} with {} records", header.flow_sequence, header.count);

    let clock = header.clock();
    let time = header.event_time();
    for _ in 0..header.count {
        let flow = V5Record::parse(&mut cursor)?;
        let mut record = FlowRecord::with_capacity(26);
        header.write_into(&mut record);
        flow.write_into(&mut record, &clock, converter);
        emit(time, record);
        report.records += 1;
    }
    Ok(message_len)
}
