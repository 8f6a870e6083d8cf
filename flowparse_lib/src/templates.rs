use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;

use crate::fields::*;

/// IPFIX length marker for variable-length fields.
pub const VARIABLE_LENGTH: u16 = 0xFFFF;

/// One (type, length) pair from a template record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldSpec {
    pub field_type: u16,
    pub length: u16,
    /// IPFIX private enterprise number, present when the type's high bit was set
    pub enterprise: Option<u32>,
}

impl FieldSpec {
    pub fn new(field_type: u16, length: u16) -> Self {
        FieldSpec { field_type, length, enterprise: None }
    }

    pub fn is_variable_length(&self) -> bool {
        self.length == VARIABLE_LENGTH
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Template {
    pub id: u16,
    pub fields: Vec<FieldSpec>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OptionTemplate {
    pub id: u16,
    pub scope_fields: Vec<FieldSpec>,
    pub option_fields: Vec<FieldSpec>,
}

/// Templates and option templates share one id space per exporter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TemplateDefinition {
    Data(Template),
    Options(OptionTemplate),
}

impl TemplateDefinition {
    pub fn id(&self) -> u16 {
        match self {
            TemplateDefinition::Data(t) => t.id,
            TemplateDefinition::Options(t) => t.id,
        }
    }

    pub fn field_count(&self) -> usize {
        match self {
            TemplateDefinition::Data(t) => t.fields.len(),
            TemplateDefinition::Options(t) => t.scope_fields.len() + t.option_fields.len(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FieldWidth {
    Fixed(usize),
    /// IPFIX variable-length field, length prefix read per record
    Variable,
}

/// One field of a compiled record layout, name and codec already resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSlot {
    pub spec: FieldSpec,
    pub name: Arc<str>,
    pub kind: FieldKind,
    pub width: FieldWidth,
}

/// A template turned into the ordered decode layout used for data records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledTemplate {
    pub definition: TemplateDefinition,
    pub slots: Vec<FieldSlot>,
    min_record_len: usize,
    duplicate_names: bool,
}

/// Keys every v9 and IPFIX data record starts with, ahead of the template fields.
pub const RECORD_HEADER_FIELDS: [&str; 3] = ["version", "flow_seq_num", "flowset_id"];

impl CompiledTemplate {
    pub fn compile(definition: TemplateDefinition, version: NetflowVersion, registry: &FieldRegistry) -> Self {
        let slot = |spec: &FieldSpec, def: FieldDef| {
            let width = if version == NetflowVersion::Ipfix && spec.is_variable_length() {
                FieldWidth::Variable
            }
            else {
                FieldWidth::Fixed(usize::from(spec.length))
            };
            FieldSlot { spec: *spec, name: def.name, kind: def.kind, width }
        };

        let slots: Vec<FieldSlot> = match &definition {
            TemplateDefinition::Data(t) => {
                t.fields.iter().map(|s| slot(s, registry.lookup(s))).collect()
            },
            TemplateDefinition::Options(t) => {
                let scopes = t.scope_fields.iter().map(|s| {
                    let def = match version {
                        NetflowVersion::V9 => registry.lookup_v9_scope(s),
                        _ => registry.lookup(s),
                    };
                    slot(s, def)
                });
                let options = t.option_fields.iter().map(|s| slot(s, registry.lookup(s)));
                scopes.chain(options).collect()
            },
        };

        // a variable-length field needs at least its one byte length prefix
        let min_record_len = slots.iter().map(|s| match s.width {
            FieldWidth::Fixed(n) => n,
            FieldWidth::Variable => 1,
        }).sum();

        let mut seen: HashSet<&str> = RECORD_HEADER_FIELDS.into_iter().collect();
        let duplicate_names = slots.iter()
            .filter(|s| s.kind != FieldKind::Skip)
            .any(|s| !seen.insert(s.name.as_ref()));

        CompiledTemplate { definition, slots, min_record_len, duplicate_names }
    }

    pub fn id(&self) -> u16 {
        self.definition.id()
    }

    pub fn min_record_len(&self) -> usize {
        self.min_record_len
    }

    /// True when two emitted fields share a name, so later values must replace earlier ones.
    pub fn has_duplicate_names(&self) -> bool {
        self.duplicate_names
    }

    pub fn is_options(&self) -> bool {
        matches!(self.definition, TemplateDefinition::Options(_))
    }
}

/// Scope in which template ids are unique.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExporterKey {
    pub exporter: Option<IpAddr>,
    pub version: NetflowVersion,
    /// v9 source id or IPFIX observation domain id
    pub domain_id: u32,
}

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub template: Arc<CompiledTemplate>,
    pub inserted_at: Instant,
    pub exporter: ExporterKey,
    pub template_id: u16,
}

/// Per-exporter template store with optional TTL and capacity bound.
///
/// Owned by one parser; callers serialize access through `&mut`.
#[derive(Debug, Default)]
pub struct TemplateCache {
    ttl: Option<Duration>,
    max_per_exporter: Option<usize>,
    entries: HashMap<(ExporterKey, u16), CacheEntry>,
    // oldest insertion first
    insertion_order: HashMap<ExporterKey, VecDeque<u16>>,
}

impl TemplateCache {
    pub fn new(ttl: Option<Duration>, max_per_exporter: Option<usize>) -> Self {
        TemplateCache {
            ttl,
            max_per_exporter: max_per_exporter.map(|m| m.max(1)),
            entries: HashMap::new(),
            insertion_order: HashMap::new(),
        }
    }

    /// Inserts or replaces. Returns true when an entry with the same id was replaced.
    pub fn put(&mut self, key: ExporterKey, template_id: u16, template: Arc<CompiledTemplate>, now: Instant) -> bool {
        let replaced = self.entries.insert((key, template_id), CacheEntry {
            template,
            inserted_at: now,
            exporter: key,
            template_id,
        }).is_some();

        let order = self.insertion_order.entry(key).or_default();
        if replaced {
            order.retain(|id| *id != template_id);
        }
        order.push_back(template_id);

        if let Some(max) = self.max_per_exporter {
            while order.len() > max {
                if let Some(oldest) = order.pop_front() {
                    debug!("template cache full for {:?}, evicting template {}", key, oldest);
                    self.entries.remove(&(key, oldest));
                }
            }
        }
        replaced
    }

    /// Expired entries are dropped here and reported as absent.
    pub fn get(&mut self, key: &ExporterKey, template_id: u16, now: Instant) -> Option<Arc<CompiledTemplate>> {
        let expired = match self.entries.get(&(*key, template_id)) {
            Some(entry) => self.is_expired(entry, now),
            None => return None,
        };
        if expired {
            debug!("template {} for {:?} expired", template_id, key);
            self.remove(key, template_id);
            return None;
        }
        self.entries.get(&(*key, template_id)).map(|e| Arc::clone(&e.template))
    }

    pub fn remove(&mut self, key: &ExporterKey, template_id: u16) -> bool {
        let removed = self.entries.remove(&(*key, template_id)).is_some();
        if removed {
            if let Some(order) = self.insertion_order.get_mut(key) {
                order.retain(|id| *id != template_id);
                if order.is_empty() {
                    self.insertion_order.remove(key);
                }
            }
        }
        removed
    }

    /// Forgets every template of one exporter, returns how many were removed.
    pub fn remove_exporter(&mut self, key: &ExporterKey) -> usize {
        let ids = self.insertion_order.remove(key).unwrap_or_default();
        for id in &ids {
            self.entries.remove(&(*key, *id));
        }
        ids.len()
    }

    /// Drops every expired entry, returns how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let expired: Vec<(ExporterKey, u16)> = self.entries.iter()
            .filter(|(_, entry)| self.is_expired(entry, now))
            .map(|(k, _)| *k)
            .collect();
        for (key, id) in &expired {
            self.remove(key, *id);
        }
        expired.len()
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_duration_since(entry.inserted_at) > ttl,
            None => false,
        }
    }

    pub fn exporter_len(&self, key: &ExporterKey) -> usize {
        self.insertion_order.get(key).map_or(0, VecDeque::len)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.insertion_order.clear();
    }
}
