use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use log::debug;

use crate::error::*;
use crate::fields::*;
use crate::parser::DecodeReport;
use crate::records::*;
use crate::templates::*;
use crate::time::*;
use crate::utils::*;

pub const V9_HEADER_LEN: usize = 20;
pub const IPFIX_HEADER_LEN: usize = 16;
pub const FLOWSET_HEADER_LEN: usize = 4;
/// Data set ids start here, lower ids are templates or reserved.
pub const MIN_DATA_SET_ID: u16 = 256;

const ENTERPRISE_BIT: u16 = 0x8000;

/// Header shared by v9 and IPFIX messages.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: NetflowVersion,
    /// v9 record count; unused for IPFIX
    pub count: u16,
    /// IPFIX message length including this header; unused for v9
    pub length: u16,
    /// v9 only, IPFIX has no uptime in its header
    pub sys_uptime: Option<u32>,
    pub export_secs: u32,
    pub sequence: u32,
    /// v9 source id or IPFIX observation domain id
    pub domain_id: u32,
}

impl MessageHeader {
    pub fn parse_v9(cursor: &mut ByteCursor) -> Result<Self> {
        let _version = cursor.read_u16()?;
        let count = cursor.read_u16()?;
        let sys_uptime = cursor.read_u32()?;
        let export_secs = cursor.read_u32()?;
        let sequence = cursor.read_u32()?;
        let domain_id = cursor.read_u32()?;
        Ok(MessageHeader {
            version: NetflowVersion::V9,
            count,
            length: 0,
            sys_uptime: Some(sys_uptime),
            export_secs,
            sequence,
            domain_id,
        })
    }

    pub fn parse_ipfix(cursor: &mut ByteCursor) -> Result<Self> {
        let _version = cursor.read_u16()?;
        let length = cursor.read_u16()?;
        let export_secs = cursor.read_u32()?;
        let sequence = cursor.read_u32()?;
        let domain_id = cursor.read_u32()?;
        Ok(MessageHeader {
            version: NetflowVersion::Ipfix,
            count: 0,
            length,
            sys_uptime: None,
            export_secs,
            sequence,
            domain_id,
        })
    }

    pub fn header_len(&self) -> usize {
        match self.version {
            NetflowVersion::Ipfix => IPFIX_HEADER_LEN,
            _ => V9_HEADER_LEN,
        }
    }

    pub fn clock(&self) -> Option<ExportClock> {
        self.sys_uptime.map(|uptime_ms| ExportClock {
            uptime_ms,
            unix_secs: self.export_secs,
            unix_nsecs: 0,
        })
    }

    pub fn event_time(&self) -> EventTime {
        EventTime::new(i64::from(self.export_secs), 0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlowSetKind {
    Template,
    OptionTemplate,
    Data(u16),
    Reserved(u16),
}

impl FlowSetKind {
    pub fn classify(version: NetflowVersion, set_id: u16) -> Self {
        match (version, set_id) {
            (NetflowVersion::V9, 0) | (NetflowVersion::Ipfix, 2) => FlowSetKind::Template,
            (NetflowVersion::V9, 1) | (NetflowVersion::Ipfix, 3) => FlowSetKind::OptionTemplate,
            (_, id) if id < MIN_DATA_SET_ID => FlowSetKind::Reserved(id),
            (_, id) => FlowSetKind::Data(id),
        }
    }
}

/// Everything a message decode borrows from its parser.
pub struct FlowSetContext<'a> {
    pub registry: &'a FieldRegistry,
    pub converter: &'a TimeConverter,
    pub cache: &'a mut TemplateCache,
    pub exporter: Option<IpAddr>,
    pub now: Instant,
}

enum TemplateRecord {
    Definition(TemplateDefinition),
    Withdrawal(u16),
    /// IPFIX "withdraw all" record for the set's own id
    WithdrawAll,
}

/// Decodes one v9 or IPFIX message from the start of `data`. Returns the bytes
/// the message occupied: the IPFIX header length, or all of `data` for v9.
pub fn decode_template_message<F>(
    data: &[u8],
    version: NetflowVersion,
    ctx: &mut FlowSetContext,
    report: &mut DecodeReport,
    emit: &mut F,
) -> Result<usize>
where
    F: FnMut(EventTime, FlowRecord),
{
    let mut cursor = ByteCursor::new(data);
    let header = match version {
        NetflowVersion::Ipfix => MessageHeader::parse_ipfix(&mut cursor)?,
        _ => MessageHeader::parse_v9(&mut cursor)?,
    };

    let message_len = match version {
        NetflowVersion::Ipfix => {
            let length = usize::from(header.length);
            if length < IPFIX_HEADER_LEN {
                return Err(DecodeError::MalformedPacket(format!("ipfix message length {} shorter than header", length)));
            }
            check_packet_size(data.len(), length)?;
            length
        },
        _ => data.len(),
    };
    debug!("{:?} message seq {} domain {} ({} bytes)", version, header.sequence, header.domain_id, message_len);

    let key = ExporterKey {
        exporter: ctx.exporter,
        version,
        domain_id: header.domain_id,
    };

    let mut offset = header.header_len();
    while message_len - offset >= FLOWSET_HEADER_LEN {
        let mut set_cursor = ByteCursor::new(&data[offset..message_len]);
        let set_id = set_cursor.read_u16()?;
        let set_len = usize::from(set_cursor.read_u16()?);
        if set_len < FLOWSET_HEADER_LEN {
            return Err(DecodeError::MalformedPacket(format!("flowset {} has length {}", set_id, set_len)));
        }
        if offset + set_len > message_len {
            return Err(DecodeError::TruncatedPacket { needed: offset + set_len, available: message_len });
        }
        let body = &data[offset + FLOWSET_HEADER_LEN..offset + set_len];

        match FlowSetKind::classify(version, set_id) {
            FlowSetKind::Template => parse_template_set(body, set_id, &key, false, ctx, report),
            FlowSetKind::OptionTemplate => parse_template_set(body, set_id, &key, true, ctx, report),
            FlowSetKind::Data(template_id) => decode_data_set(body, template_id, &header, &key, ctx, report, emit),
            FlowSetKind::Reserved(id) => {
                debug!("skipping reserved set id {} ({} bytes)", id, set_len);
            },
        }
        // always by declared length, whatever the set parser consumed
        offset += set_len;
    }

    if offset < message_len {
        debug!("ignoring {} trailing bytes after last flowset", message_len - offset);
    }
    Ok(message_len)
}

fn parse_template_set(
    body: &[u8],
    set_id: u16,
    key: &ExporterKey,
    options: bool,
    ctx: &mut FlowSetContext,
    report: &mut DecodeReport,
) {
    let mut cursor = ByteCursor::new(body);
    while cursor.remaining() >= FLOWSET_HEADER_LEN {
        match cursor.peek_u16() {
            Ok(0) => {
                debug!("template set padding, {} bytes", cursor.remaining());
                return;
            },
            Ok(_) => {},
            Err(_) => return,
        }

        let parsed = match (key.version, options) {
            (NetflowVersion::Ipfix, false) => read_ipfix_template(&mut cursor, set_id),
            (NetflowVersion::Ipfix, true) => read_ipfix_option_template(&mut cursor, set_id),
            (_, false) => read_v9_template(&mut cursor),
            (_, true) => read_v9_option_template(&mut cursor),
        };

        match parsed {
            Ok(TemplateRecord::Definition(definition)) => learn_template(definition, key, ctx, report),
            Ok(TemplateRecord::Withdrawal(template_id)) => {
                let removed = ctx.cache.remove(key, template_id);
                debug!("template {} withdrawn by {:?} (cached: {})", template_id, key, removed);
            },
            Ok(TemplateRecord::WithdrawAll) => {
                let removed = ctx.cache.remove_exporter(key);
                debug!("all {} templates withdrawn by {:?}", removed, key);
            },
            Err(issue) => {
                // the rest of the set can no longer be framed
                report.push_issue(issue);
                return;
            },
        }
    }
}

fn learn_template(definition: TemplateDefinition, key: &ExporterKey, ctx: &mut FlowSetContext, report: &mut DecodeReport) {
    let template_id = definition.id();
    let field_count = definition.field_count();
    let compiled = CompiledTemplate::compile(definition, key.version, ctx.registry);
    if compiled.min_record_len() == 0 {
        report.push_issue(FlowSetIssue::MalformedTemplate {
            template_id,
            reason: "template describes zero length records".to_string(),
        });
        return;
    }
    let replaced = ctx.cache.put(*key, template_id, Arc::new(compiled), ctx.now);
    debug!("learned template {} with {} fields from {:?} (replaced: {})", template_id, field_count, key, replaced);
    report.templates_learned += 1;
}

fn malformed(template_id: u16, reason: &str) -> FlowSetIssue {
    FlowSetIssue::MalformedTemplate { template_id, reason: reason.to_string() }
}

fn read_field_specs(cursor: &mut ByteCursor, template_id: u16, count: usize, ipfix: bool) -> std::result::Result<Vec<FieldSpec>, FlowSetIssue> {
    let truncated = |_| malformed(template_id, "field list runs past the set");
    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        let raw_type = cursor.read_u16().map_err(truncated)?;
        let length = cursor.read_u16().map_err(truncated)?;
        let spec = if ipfix && raw_type & ENTERPRISE_BIT != 0 {
            FieldSpec {
                field_type: raw_type & !ENTERPRISE_BIT,
                length,
                enterprise: Some(cursor.read_u32().map_err(truncated)?),
            }
        }
        else {
            FieldSpec::new(raw_type, length)
        };
        fields.push(spec);
    }
    Ok(fields)
}

fn read_id_and_count(cursor: &mut ByteCursor) -> std::result::Result<(u16, u16), FlowSetIssue> {
    let template_id = cursor.read_u16().map_err(|_| malformed(0, "truncated template header"))?;
    let count = cursor.read_u16().map_err(|_| malformed(template_id, "truncated template header"))?;
    Ok((template_id, count))
}

fn read_v9_template(cursor: &mut ByteCursor) -> std::result::Result<TemplateRecord, FlowSetIssue> {
    let (template_id, field_count) = read_id_and_count(cursor)?;
    if template_id < MIN_DATA_SET_ID {
        return Err(malformed(template_id, "template id below 256"));
    }
    if field_count == 0 {
        return Err(malformed(template_id, "template has no fields"));
    }
    let fields = read_field_specs(cursor, template_id, usize::from(field_count), false)?;
    Ok(TemplateRecord::Definition(TemplateDefinition::Data(Template { id: template_id, fields })))
}

fn read_v9_option_template(cursor: &mut ByteCursor) -> std::result::Result<TemplateRecord, FlowSetIssue> {
    let (template_id, scope_len) = read_id_and_count(cursor)?;
    let option_len = cursor.read_u16().map_err(|_| malformed(template_id, "truncated option template header"))?;
    if template_id < MIN_DATA_SET_ID {
        return Err(malformed(template_id, "template id below 256"));
    }
    // v9 gives the scope and option lists in bytes, 4 per field spec
    if scope_len % 4 != 0 || option_len % 4 != 0 {
        return Err(malformed(template_id, "scope or option length not a multiple of 4"));
    }
    if scope_len == 0 && option_len == 0 {
        return Err(malformed(template_id, "option template has no fields"));
    }
    let scope_fields = read_field_specs(cursor, template_id, usize::from(scope_len / 4), false)?;
    let option_fields = read_field_specs(cursor, template_id, usize::from(option_len / 4), false)?;
    Ok(TemplateRecord::Definition(TemplateDefinition::Options(OptionTemplate {
        id: template_id,
        scope_fields,
        option_fields,
    })))
}

fn read_ipfix_template(cursor: &mut ByteCursor, set_id: u16) -> std::result::Result<TemplateRecord, FlowSetIssue> {
    let (template_id, field_count) = read_id_and_count(cursor)?;
    if field_count == 0 {
        return withdrawal(template_id, set_id);
    }
    if template_id < MIN_DATA_SET_ID {
        return Err(malformed(template_id, "template id below 256"));
    }
    let fields = read_field_specs(cursor, template_id, usize::from(field_count), true)?;
    Ok(TemplateRecord::Definition(TemplateDefinition::Data(Template { id: template_id, fields })))
}

fn read_ipfix_option_template(cursor: &mut ByteCursor, set_id: u16) -> std::result::Result<TemplateRecord, FlowSetIssue> {
    let (template_id, field_count) = read_id_and_count(cursor)?;
    if field_count == 0 {
        return withdrawal(template_id, set_id);
    }
    let scope_count = cursor.read_u16().map_err(|_| malformed(template_id, "truncated option template header"))?;
    if template_id < MIN_DATA_SET_ID {
        return Err(malformed(template_id, "template id below 256"));
    }
    if scope_count == 0 || scope_count > field_count {
        return Err(malformed(template_id, "scope field count must be between 1 and the field count"));
    }
    let mut fields = read_field_specs(cursor, template_id, usize::from(field_count), true)?;
    let option_fields = fields.split_off(usize::from(scope_count));
    Ok(TemplateRecord::Definition(TemplateDefinition::Options(OptionTemplate {
        id: template_id,
        scope_fields: fields,
        option_fields,
    })))
}

fn withdrawal(template_id: u16, set_id: u16) -> std::result::Result<TemplateRecord, FlowSetIssue> {
    if template_id == set_id {
        Ok(TemplateRecord::WithdrawAll)
    }
    else if template_id < MIN_DATA_SET_ID {
        Err(malformed(template_id, "withdrawal for template id below 256"))
    }
    else {
        Ok(TemplateRecord::Withdrawal(template_id))
    }
}

fn decode_data_set<F>(
    body: &[u8],
    template_id: u16,
    header: &MessageHeader,
    key: &ExporterKey,
    ctx: &mut FlowSetContext,
    report: &mut DecodeReport,
    emit: &mut F,
) where
    F: FnMut(EventTime, FlowRecord),
{
    let template = match ctx.cache.get(key, template_id, ctx.now) {
        Some(t) => t,
        None => {
            report.push_issue(FlowSetIssue::UnknownTemplate { template_id });
            return;
        },
    };

    let clock = header.clock();
    let time = header.event_time();
    let min_len = template.min_record_len();
    let mut cursor = ByteCursor::new(body);
    while cursor.remaining() >= min_len {
        let record = match decode_data_record(&mut cursor, &template, header, template_id, clock.as_ref(), ctx.converter) {
            Some(r) => r,
            None => break,
        };
        emit(time, record);
        report.records += 1;
    }
    if !cursor.is_empty() {
        debug!("discarding {} bytes of padding in data set {}", cursor.remaining(), template_id);
    }
}

/// `None` when a record runs past the end of the set; it is dropped.
fn decode_data_record(
    cursor: &mut ByteCursor,
    template: &CompiledTemplate,
    header: &MessageHeader,
    flowset_id: u16,
    clock: Option<&ExportClock>,
    converter: &TimeConverter,
) -> Option<FlowRecord> {
    let mut record = FlowRecord::with_capacity(template.slots.len() + 3);
    record.push("version", FlowValue::Unsigned(u64::from(header.version.number())));
    record.push("flow_seq_num", FlowValue::Unsigned(u64::from(header.sequence)));
    record.push("flowset_id", FlowValue::Unsigned(u64::from(flowset_id)));
    let replace = template.has_duplicate_names();

    for slot in &template.slots {
        let len = match slot.width {
            FieldWidth::Fixed(n) => n,
            FieldWidth::Variable => match cursor.read_u8().ok()? {
                255 => usize::from(cursor.read_u16().ok()?),
                n => usize::from(n),
            },
        };
        let bytes = cursor.take(len).ok()?;
        let value = match slot.kind {
            FieldKind::Skip => continue,
            FieldKind::UptimeMillis if bytes.len() == 4 => {
                let switched = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                converter.convert(clock, switched)
            },
            kind => kind.decode(bytes),
        };
        if replace {
            record.insert(Arc::clone(&slot.name), value);
        }
        else {
            record.push(Arc::clone(&slot.name), value);
        }
    }
    Some(record)
}
