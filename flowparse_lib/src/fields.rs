use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::records::*;
use crate::templates::*;
use crate::time::*;
use crate::utils::*;

use FieldKind as K;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NetflowVersion {
    V5,
    V9,
    Ipfix,
}

impl NetflowVersion {
    pub fn from_wire(version: u16) -> Option<Self> {
        match version {
            5 => Some(NetflowVersion::V5),
            9 => Some(NetflowVersion::V9),
            10 => Some(NetflowVersion::Ipfix),
            _ => None,
        }
    }

    pub fn number(&self) -> u16 {
        match self {
            NetflowVersion::V5 => 5,
            NetflowVersion::V9 => 9,
            NetflowVersion::Ipfix => 10,
        }
    }
}

/// How the bytes of a field are turned into a value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Unsigned,
    Ipv4Addr,
    Ipv6Addr,
    MacAddr,
    MplsLabel,
    String,
    Bytes,
    /// Device uptime in ms, converted to wall-clock by the TimeConverter
    UptimeMillis,
    DateTimeSeconds,
    DateTimeMillis,
    /// Padding, consumed but never emitted
    Skip,
}

impl FieldKind {
    /// Decodes `bytes` per kind. A width the kind cannot represent falls back
    /// to raw bytes instead of failing the record.
    pub fn decode(&self, bytes: &[u8]) -> FlowValue {
        let value = match self {
            FieldKind::Unsigned | FieldKind::UptimeMillis => read_be_uint(bytes).map(FlowValue::Unsigned),
            FieldKind::Ipv4Addr => <[u8; 4]>::try_from(bytes).ok().map(|b| FlowValue::Ipv4(Ipv4Addr::from(b))),
            FieldKind::Ipv6Addr => <[u8; 16]>::try_from(bytes).ok().map(|b| FlowValue::Ipv6(Ipv6Addr::from(b))),
            FieldKind::MacAddr => <[u8; 6]>::try_from(bytes).ok().map(|b| FlowValue::Mac(MacAddr(b))),
            FieldKind::MplsLabel => <[u8; 3]>::try_from(bytes).ok().map(|b| FlowValue::Mpls(MplsLabel::from_bytes(b))),
            FieldKind::String => decode_text(bytes),
            FieldKind::DateTimeSeconds if bytes.len() == 4 => {
                read_be_uint(bytes).and_then(format_epoch_seconds).map(FlowValue::Text)
            },
            FieldKind::DateTimeMillis if bytes.len() == 8 => {
                read_be_uint(bytes).and_then(format_epoch_millis).map(FlowValue::Text)
            },
            _ => None,
        };
        value.unwrap_or_else(|| FlowValue::Bytes(bytes.to_vec()))
    }
}

fn decode_text(bytes: &[u8]) -> Option<FlowValue> {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    std::str::from_utf8(&bytes[..end]).ok().map(|s| FlowValue::Text(s.to_string()))
}

/// Name and kind resolved for one field type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDef {
    pub name: Arc<str>,
    pub kind: FieldKind,
}

impl FieldDef {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        FieldDef { name: Arc::from(name), kind }
    }
}

/// Caller supplied field definition, merged over the built-in dictionary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldExtension {
    /// IPFIX private enterprise number; `None` overrides a standard id
    #[serde(default)]
    pub enterprise: Option<u32>,
    pub id: u16,
    pub name: String,
    pub kind: FieldKind,
}


// NetFlow v9 field types (1-104) plus the common IPFIX information elements.
const STANDARD_FIELDS: &[(u16, &str, FieldKind)] = &[
    (1, "in_bytes", K::Unsigned),
    (2, "in_pkts", K::Unsigned),
    (3, "flows", K::Unsigned),
    (4, "protocol", K::Unsigned),
    (5, "src_tos", K::Unsigned),
    (6, "tcp_flags", K::Unsigned),
    (7, "l4_src_port", K::Unsigned),
    (8, "ipv4_src_addr", K::Ipv4Addr),
    (9, "src_mask", K::Unsigned),
    (10, "input_snmp", K::Unsigned),
    (11, "l4_dst_port", K::Unsigned),
    (12, "ipv4_dst_addr", K::Ipv4Addr),
    (13, "dst_mask", K::Unsigned),
    (14, "output_snmp", K::Unsigned),
    (15, "ipv4_next_hop", K::Ipv4Addr),
    (16, "src_as", K::Unsigned),
    (17, "dst_as", K::Unsigned),
    (18, "bgp_ipv4_next_hop", K::Ipv4Addr),
    (19, "mul_dst_pkts", K::Unsigned),
    (20, "mul_dst_bytes", K::Unsigned),
    (21, "last_switched", K::UptimeMillis),
    (22, "first_switched", K::UptimeMillis),
    (23, "out_bytes", K::Unsigned),
    (24, "out_pkts", K::Unsigned),
    (25, "min_pkt_length", K::Unsigned),
    (26, "max_pkt_length", K::Unsigned),
    (27, "ipv6_src_addr", K::Ipv6Addr),
    (28, "ipv6_dst_addr", K::Ipv6Addr),
    (29, "ipv6_src_mask", K::Unsigned),
    (30, "ipv6_dst_mask", K::Unsigned),
    (31, "ipv6_flow_label", K::Unsigned),
    (32, "icmp_type", K::Unsigned),
    (33, "mul_igmp_type", K::Unsigned),
    (34, "sampling_interval", K::Unsigned),
    (35, "sampling_algorithm", K::Unsigned),
    (36, "flow_active_timeout", K::Unsigned),
    (37, "flow_inactive_timeout", K::Unsigned),
    (38, "engine_type", K::Unsigned),
    (39, "engine_id", K::Unsigned),
    (40, "total_bytes_exp", K::Unsigned),
    (41, "total_pkts_exp", K::Unsigned),
    (42, "total_flows_exp", K::Unsigned),
    (44, "ipv4_src_prefix", K::Ipv4Addr),
    (45, "ipv4_dst_prefix", K::Ipv4Addr),
    (46, "mpls_top_label_type", K::Unsigned),
    (47, "mpls_top_label_ip_addr", K::Ipv4Addr),
    (48, "flow_sampler_id", K::Unsigned),
    (49, "flow_sampler_mode", K::Unsigned),
    (50, "flow_sampler_random_interval", K::Unsigned),
    (52, "min_ttl", K::Unsigned),
    (53, "max_ttl", K::Unsigned),
    (54, "ipv4_ident", K::Unsigned),
    (55, "dst_tos", K::Unsigned),
    (56, "in_src_mac", K::MacAddr),
    (57, "out_dst_mac", K::MacAddr),
    (58, "src_vlan", K::Unsigned),
    (59, "dst_vlan", K::Unsigned),
    (60, "ip_protocol_version", K::Unsigned),
    (61, "direction", K::Unsigned),
    (62, "ipv6_next_hop", K::Ipv6Addr),
    (63, "bgp_ipv6_next_hop", K::Ipv6Addr),
    (64, "ipv6_option_headers", K::Unsigned),
    (70, "mpls_label_1", K::MplsLabel),
    (71, "mpls_label_2", K::MplsLabel),
    (72, "mpls_label_3", K::MplsLabel),
    (73, "mpls_label_4", K::MplsLabel),
    (74, "mpls_label_5", K::MplsLabel),
    (75, "mpls_label_6", K::MplsLabel),
    (76, "mpls_label_7", K::MplsLabel),
    (77, "mpls_label_8", K::MplsLabel),
    (78, "mpls_label_9", K::MplsLabel),
    (79, "mpls_label_10", K::MplsLabel),
    (80, "in_dst_mac", K::MacAddr),
    (81, "out_src_mac", K::MacAddr),
    (82, "if_name", K::String),
    (83, "if_desc", K::String),
    (84, "sampler_name", K::String),
    (85, "in_permanent_bytes", K::Unsigned),
    (86, "in_permanent_pkts", K::Unsigned),
    (88, "fragment_offset", K::Unsigned),
    (89, "forwarding_status", K::Unsigned),
    (90, "mpls_pal_rd", K::Unsigned),
    (91, "mpls_prefix_len", K::Unsigned),
    (92, "src_traffic_index", K::Unsigned),
    (93, "dst_traffic_index", K::Unsigned),
    (94, "application_description", K::String),
    (95, "application_tag", K::Bytes),
    (96, "application_name", K::String),
    (98, "postipdiffservcodepoint", K::Unsigned),
    (99, "replication_factor", K::Unsigned),
    (102, "layer2packet_section_offset", K::Unsigned),
    (103, "layer2packet_section_size", K::Unsigned),
    (104, "layer2packet_section_data", K::Bytes),
    (128, "bgp_next_adjacent_as", K::Unsigned),
    (129, "bgp_prev_adjacent_as", K::Unsigned),
    (130, "exporter_ipv4_address", K::Ipv4Addr),
    (131, "exporter_ipv6_address", K::Ipv6Addr),
    (136, "flow_end_reason", K::Unsigned),
    (138, "observation_point_id", K::Unsigned),
    (139, "icmp_type_code_ipv6", K::Unsigned),
    (144, "exporting_process_id", K::Unsigned),
    (148, "flow_id", K::Unsigned),
    (150, "flow_start_seconds", K::DateTimeSeconds),
    (151, "flow_end_seconds", K::DateTimeSeconds),
    (152, "flow_start_milliseconds", K::DateTimeMillis),
    (153, "flow_end_milliseconds", K::DateTimeMillis),
    (160, "system_init_time_milliseconds", K::DateTimeMillis),
    (176, "icmp_type_ipv4", K::Unsigned),
    (177, "icmp_code_ipv4", K::Unsigned),
    (178, "icmp_type_ipv6", K::Unsigned),
    (179, "icmp_code_ipv6", K::Unsigned),
    (210, "padding_octets", K::Skip),
    (225, "xlate_src_addr_ipv4", K::Ipv4Addr),
    (226, "xlate_dst_addr_ipv4", K::Ipv4Addr),
    (227, "xlate_src_port", K::Unsigned),
    (228, "xlate_dst_port", K::Unsigned),
    (230, "nat_event", K::Unsigned),
    (231, "fwd_flow_delta_bytes", K::Unsigned),
    (232, "rev_flow_delta_bytes", K::Unsigned),
    (233, "fw_event", K::Unsigned),
    (234, "ingress_vrf_id", K::Unsigned),
    (235, "egress_vrf_id", K::Unsigned),
    (323, "observation_time_milliseconds", K::DateTimeMillis),
    (33000, "ingress_acl_id", K::Bytes),
    (33001, "egress_acl_id", K::Bytes),
    (33002, "fw_ext_event", K::Unsigned),
    (40000, "username", K::String),
];

// Option template scope field types, NetFlow v9 only.
const V9_SCOPE_FIELDS: &[(u16, &str, FieldKind)] = &[
    (1, "scope_system", K::Unsigned),
    (2, "scope_interface", K::Unsigned),
    (3, "scope_line_card", K::Unsigned),
    (4, "scope_netflow_cache", K::Unsigned),
    (5, "scope_template", K::Unsigned),
];

/// Immutable lookup table from field type to name and decode kind.
///
/// Built once, then shared read-only by every decode call.
#[derive(Clone, Debug)]
pub struct FieldRegistry {
    standard: HashMap<u16, FieldDef>,
    enterprise: HashMap<(u32, u16), FieldDef>,
    v9_scope: HashMap<u16, FieldDef>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        let to_map = |table: &[(u16, &str, FieldKind)]| {
            table.iter().map(|(id, name, kind)| (*id, FieldDef::new(name, *kind))).collect()
        };
        FieldRegistry {
            standard: to_map(STANDARD_FIELDS),
            enterprise: HashMap::new(),
            v9_scope: to_map(V9_SCOPE_FIELDS),
        }
    }

    pub fn with_definitions(definitions: &[FieldExtension]) -> Self {
        let mut registry = FieldRegistry::new();
        for d in definitions {
            let def = FieldDef::new(&d.name, d.kind);
            match d.enterprise {
                Some(pen) => {
                    registry.enterprise.insert((pen, d.id), def);
                },
                None => {
                    registry.standard.insert(d.id, def);
                },
            }
        }
        registry
    }

    /// Resolves a data or option field. Unknown ids get a synthetic name and
    /// raw byte decoding so vendor fields are never dropped.
    pub fn lookup(&self, spec: &FieldSpec) -> FieldDef {
        let found = match spec.enterprise {
            Some(pen) => self.enterprise.get(&(pen, spec.field_type)),
            None => self.standard.get(&spec.field_type),
        };
        match found {
            Some(def) => def.clone(),
            None => unknown_field(spec),
        }
    }

    /// Resolves a v9 option template scope field.
    pub fn lookup_v9_scope(&self, spec: &FieldSpec) -> FieldDef {
        match self.v9_scope.get(&spec.field_type) {
            Some(def) => def.clone(),
            None => FieldDef::new(&format!("scope_{}", spec.field_type), K::Bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.standard.len() + self.enterprise.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FieldRegistry {
    fn default() -> Self {
        FieldRegistry::new()
    }
}

fn unknown_field(spec: &FieldSpec) -> FieldDef {
    let name = match spec.enterprise {
        Some(pen) => format!("enterprise_{}_{}", pen, spec.field_type),
        None => format!("field_{}", spec.field_type),
    };
    FieldDef::new(&name, K::Bytes)
}
