//! Field-level diffing for time-entry history.

use super::{TimeEntry, format_timestamp};

type Extractor = fn(&TimeEntry) -> String;

/// Every audited field, as `(field name, text extractor)`.
///
/// The gateway writes one history row per field whose extracted text differs
/// between the stored and the incoming entry. Auditing a new field is one
/// more line here.
pub const AUDITED_FIELDS: &[(&str, Extractor)] = &[
    ("client_id", client_id),
    ("description", description),
    ("start_time", start_time),
    ("end_time", end_time),
    ("duration_seconds", duration_seconds),
    ("hourly_rate", hourly_rate),
    ("is_billable", is_billable),
];

fn client_id(entry: &TimeEntry) -> String {
    entry.client_id.to_string()
}

fn description(entry: &TimeEntry) -> String {
    entry.description.clone()
}

fn start_time(entry: &TimeEntry) -> String {
    format_timestamp(entry.start_time)
}

fn end_time(entry: &TimeEntry) -> String {
    entry.end_time.map(format_timestamp).unwrap_or_default()
}

fn duration_seconds(entry: &TimeEntry) -> String {
    entry
        .duration_seconds
        .map(|seconds| seconds.to_string())
        .unwrap_or_default()
}

fn hourly_rate(entry: &TimeEntry) -> String {
    entry.hourly_rate.normalize().to_string()
}

fn is_billable(entry: &TimeEntry) -> String {
    entry.is_billable.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: &'static str,
    pub old_value: String,
    pub new_value: String,
}

pub fn diff_entries(old: &TimeEntry, new: &TimeEntry) -> Vec<FieldChange> {
    AUDITED_FIELDS
        .iter()
        .filter_map(|&(field, extract)| {
            let old_value = extract(old);
            let new_value = extract(new);
            (old_value != new_value).then_some(FieldChange {
                field,
                old_value,
                new_value,
            })
        })
        .collect()
}
