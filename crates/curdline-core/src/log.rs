//! Centralized event log.
//!
//! Every observable stage transition is submitted here as a [`LogEvent`]
//! carrying only the fields that stage knows. The log merges each event
//! over the carried-forward state of all previous records, assigns a
//! gap-free global sequence number, and appends an immutable
//! [`NormalizedRecord`]. After the run, [`EventLog::finalize`] re-buckets
//! the stream by stage order so one stage's records are contiguous,
//! preserving intra-stage order and the original sequence numbers.

use std::collections::HashMap;

use serde::{Serialize, Deserialize};

use crate::error::SimError;
use crate::fixed::{Fixed64, Ticks};
use crate::id::StageId;

// ---------------------------------------------------------------------------
// Field schema
// ---------------------------------------------------------------------------

/// The single normalized field schema shared by every stage.
///
/// All fields are optional at submission; the union covers every
/// stage's observables. Export fills deterministic defaults: numerics
/// become zero, flags become false, labels become empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSet {
    pub phase: Option<String>,
    pub batch_id: Option<u64>,
    pub milk_l: Option<Fixed64>,
    pub whey_l: Option<Fixed64>,
    pub curd_l: Option<Fixed64>,
    pub mass_kg: Option<Fixed64>,
    pub temperature_c: Option<Fixed64>,
    pub ph: Option<Fixed64>,
    pub moisture_pct: Option<Fixed64>,
    pub salt_kg: Option<Fixed64>,
    pub pressure_psi: Option<Fixed64>,
    pub start_tank_l: Option<Fixed64>,
    pub balance_tank_l: Option<Fixed64>,
    pub blade_sharpness: Option<Fixed64>,
    pub auger_speed: Option<Fixed64>,
    pub particle: Option<u32>,
    pub anomaly: Option<bool>,
}

macro_rules! merge_fields {
    ($self:ident, $base:ident; $($field:ident),+ $(,)?) => {
        FieldSet {
            $($field: $self.$field.clone().or_else(|| $base.$field.clone()),)+
        }
    };
}

impl FieldSet {
    /// Merge this event's fields over a base state. Set fields win;
    /// unset fields take the base value.
    pub fn merge_over(&self, base: &FieldSet) -> FieldSet {
        merge_fields!(self, base;
            phase, batch_id, milk_l, whey_l, curd_l, mass_kg,
            temperature_c, ph, moisture_pct, salt_kg, pressure_psi,
            start_tank_l, balance_tank_l, blade_sharpness, auger_speed,
            particle, anomaly,
        )
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One stage observation, immutable once submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub stage: StageId,
    pub time: Ticks,
    pub fields: FieldSet,
}

/// A fully normalized record as stored by the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Global sequence, 1-based, strictly increasing, gap-free.
    pub seq: u64,
    pub stage: StageId,
    /// Virtual time of the observation.
    pub time: Ticks,
    /// Full field state after carry-forward merge.
    pub fields: FieldSet,
    /// The pre-finalize sequence number, set by the first `finalize`.
    pub submitted_seq: Option<u64>,
}

// ---------------------------------------------------------------------------
// Record-stream hash
// ---------------------------------------------------------------------------

/// FNV-1a accumulator over the record stream, for cheap determinism
/// checks in tests.
#[derive(Debug, Clone)]
pub struct RecordHash {
    state: u64,
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

impl RecordHash {
    pub fn new() -> Self {
        Self { state: FNV_OFFSET }
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.state ^= b as u64;
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_fixed64(&mut self, v: Fixed64) {
        self.write(&v.to_bits().to_le_bytes());
    }

    fn write_opt_fixed(&mut self, v: Option<Fixed64>) {
        match v {
            Some(x) => {
                self.write(&[1]);
                self.write_fixed64(x);
            }
            None => self.write(&[0]),
        }
    }

    pub fn finish(&self) -> u64 {
        self.state
    }
}

impl Default for RecordHash {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

/// Per-run event log. One instance per pipeline, injected into the
/// scheduler loop; never global.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    names: HashMap<StageId, String>,
    records: Vec<NormalizedRecord>,
    carry: FieldSet,
    next_seq: u64,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            names: HashMap::new(),
            records: Vec::new(),
            carry: FieldSet::default(),
            next_seq: 1,
        }
    }

    /// Register a stage's display name. Logging from an unregistered
    /// stage is a fatal defect caught at submission.
    pub fn register(&mut self, stage: StageId, name: &str) {
        self.names.insert(stage, name.to_string());
    }

    pub fn stage_name(&self, stage: StageId) -> Option<&str> {
        self.names.get(&stage).map(String::as_str)
    }

    /// Submit one event: merge over the carried state, assign the next
    /// global sequence, append.
    pub fn log(&mut self, event: LogEvent) -> Result<(), SimError> {
        if !self.names.contains_key(&event.stage) {
            return Err(SimError::UnknownStage(event.stage));
        }
        let merged = event.fields.merge_over(&self.carry);
        self.carry = merged.clone();
        self.records.push(NormalizedRecord {
            seq: self.next_seq,
            stage: event.stage,
            time: event.time,
            fields: merged,
            submitted_seq: None,
        });
        self.next_seq += 1;
        Ok(())
    }

    pub fn records(&self) -> &[NormalizedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Re-bucket records so each stage's are contiguous in `stage_order`,
    /// preserving intra-stage submission order. Stages absent from the
    /// order are appended at the end in their original relative order.
    /// Sequence numbers are re-assigned 1..N; the original sequence is
    /// preserved in `submitted_seq` by the first call. Idempotent: a
    /// second call with the same order is a no-op on content.
    pub fn finalize(&mut self, stage_order: &[StageId]) {
        let old = std::mem::take(&mut self.records);
        let mut buckets: Vec<Vec<NormalizedRecord>> =
            stage_order.iter().map(|_| Vec::new()).collect();
        let mut others: Vec<NormalizedRecord> = Vec::new();

        for rec in old {
            match stage_order.iter().position(|s| *s == rec.stage) {
                Some(i) => buckets[i].push(rec),
                None => others.push(rec),
            }
        }

        let mut ordered: Vec<NormalizedRecord> =
            Vec::with_capacity(buckets.iter().map(Vec::len).sum::<usize>() + others.len());
        for bucket in buckets {
            ordered.extend(bucket);
        }
        ordered.extend(others);

        for (idx, rec) in ordered.iter_mut().enumerate() {
            if rec.submitted_seq.is_none() {
                rec.submitted_seq = Some(rec.seq);
            }
            rec.seq = idx as u64 + 1;
        }

        self.records = ordered;
    }

    /// FNV-1a hash of the full record stream.
    pub fn hash(&self) -> u64 {
        let mut h = RecordHash::new();
        for rec in &self.records {
            h.write_u64(rec.seq);
            h.write_u64(rec.stage.0 as u64);
            h.write_u64(rec.time);
            match &rec.fields.phase {
                Some(p) => {
                    h.write(&[1]);
                    h.write(p.as_bytes());
                }
                None => h.write(&[0]),
            }
            match rec.fields.batch_id {
                Some(b) => {
                    h.write(&[1]);
                    h.write_u64(b);
                }
                None => h.write(&[0]),
            }
            h.write_opt_fixed(rec.fields.milk_l);
            h.write_opt_fixed(rec.fields.whey_l);
            h.write_opt_fixed(rec.fields.curd_l);
            h.write_opt_fixed(rec.fields.mass_kg);
            h.write_opt_fixed(rec.fields.temperature_c);
            h.write_opt_fixed(rec.fields.ph);
            h.write_opt_fixed(rec.fields.moisture_pct);
            h.write_opt_fixed(rec.fields.salt_kg);
            h.write_opt_fixed(rec.fields.pressure_psi);
            h.write_opt_fixed(rec.fields.start_tank_l);
            h.write_opt_fixed(rec.fields.balance_tank_l);
            h.write_opt_fixed(rec.fields.blade_sharpness);
            h.write_opt_fixed(rec.fields.auger_speed);
            h.write_u64(rec.fields.particle.map(|p| p as u64 + 1).unwrap_or(0));
            h.write(&[match rec.fields.anomaly {
                Some(true) => 2,
                Some(false) => 1,
                None => 0,
            }]);
        }
        h.finish()
    }
}

// ---------------------------------------------------------------------------
// NDJSON export
// ---------------------------------------------------------------------------

#[cfg(feature = "json-export")]
impl EventLog {
    /// Serialize the record stream as NDJSON: one flat JSON object per
    /// record, unset fields filled with deterministic defaults (zero
    /// for numerics, false for flags, empty for labels).
    pub fn to_ndjson(&self) -> String {
        use crate::fixed::fixed64_to_f64;

        fn num(v: Option<Fixed64>) -> f64 {
            v.map(fixed64_to_f64).unwrap_or(0.0)
        }

        let mut out = String::new();
        for rec in &self.records {
            let machine = self
                .names
                .get(&rec.stage)
                .map(String::as_str)
                .unwrap_or("");
            let mut obj = serde_json::json!({
                "machine": machine,
                "seq": rec.seq,
                "sim_time": rec.time,
                "phase": rec.fields.phase.as_deref().unwrap_or(""),
                "batch_id": rec.fields.batch_id.unwrap_or(0),
                "milk_L": num(rec.fields.milk_l),
                "whey_L": num(rec.fields.whey_l),
                "curd_L": num(rec.fields.curd_l),
                "mass_kg": num(rec.fields.mass_kg),
                "temperature_C": num(rec.fields.temperature_c),
                "pH": num(rec.fields.ph),
                "moisture_percent": num(rec.fields.moisture_pct),
                "salt_kg": num(rec.fields.salt_kg),
                "press_pressure_psi": num(rec.fields.pressure_psi),
                "start_tank_L": num(rec.fields.start_tank_l),
                "balance_tank_L": num(rec.fields.balance_tank_l),
                "blade_sharpness": num(rec.fields.blade_sharpness),
                "auger_speed": num(rec.fields.auger_speed),
                "particle": rec.fields.particle.unwrap_or(0),
                "anomaly": rec.fields.anomaly.unwrap_or(false),
            });
            if let Some(prev) = rec.submitted_seq
                && let Some(map) = obj.as_object_mut()
            {
                map.insert("submitted_seq".into(), serde_json::json!(prev));
            }
            out.push_str(&obj.to_string());
            out.push('\n');
        }
        out
    }
}
