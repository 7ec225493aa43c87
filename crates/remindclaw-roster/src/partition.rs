//! Roster partitioning — raw enrollees in, weekday buckets and an invalid report out.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use remindclaw_core::types::{Contact, InvalidContactRecord, RawEnrollee};

use crate::normalize;

/// Placeholder for a record without a registration code.
pub const UNKNOWN_CODE: &str = "Unknown";
/// Placeholder for a record without a usable student name.
pub const UNKNOWN_NAME: &str = "Unknown name";

/// Enrollment status, accepting the provider's Portuguese codes and English names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnrolleeStatus {
    Active,
    InRecovery,
    NeedsAttention,
}

impl EnrolleeStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Ativo" | "Active" => Some(Self::Active),
            "EmRecuperacao" | "InRecovery" => Some(Self::InRecovery),
            "Atencao" | "NeedsAttention" => Some(Self::NeedsAttention),
            _ => None,
        }
    }
}

/// The set of statuses that receive reminders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedStatuses(HashSet<EnrolleeStatus>);

impl AllowedStatuses {
    /// Build from configured names; unknown names are ignored with a warning.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let mut set = HashSet::new();
        for name in names {
            match EnrolleeStatus::parse(name.as_ref()) {
                Some(status) => {
                    set.insert(status);
                }
                None => tracing::warn!("⚠️ Unknown enrollee status in config: {}", name.as_ref()),
            }
        }
        Self(set)
    }

    pub fn allows(&self, raw: Option<&str>) -> bool {
        raw.and_then(EnrolleeStatus::parse)
            .is_some_and(|status| self.0.contains(&status))
    }
}

impl Default for AllowedStatuses {
    fn default() -> Self {
        Self(HashSet::from([
            EnrolleeStatus::Active,
            EnrolleeStatus::InRecovery,
            EnrolleeStatus::NeedsAttention,
        ]))
    }
}

/// One validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    InvalidPhone,
    InvalidName,
    AgentNotEmail,
    AgentNameUnextractable,
    MissingMonitoringLink,
    MissingScheduledDay,
    MissingRegistrationCode,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidPhone => "invalid phone",
            Self::InvalidName => "invalid name",
            Self::AgentNotEmail => "agent not a valid email",
            Self::AgentNameUnextractable => "agent name unextractable",
            Self::MissingMonitoringLink => "missing monitoring link",
            Self::MissingScheduledDay => "missing scheduled day",
            Self::MissingRegistrationCode => "missing registration code",
        };
        f.write_str(s)
    }
}

/// Result of one partitioning pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    /// Contacts keyed by canonical weekday slot.
    pub buckets: BTreeMap<String, Vec<Contact>>,
    /// Invalid records not already present in the caller's dedup set.
    pub invalid: Vec<InvalidContactRecord>,
    /// Records dropped by the status filter.
    pub skipped: usize,
}

impl Partition {
    pub fn bucket(&self, slot: &str) -> &[Contact] {
        self.buckets.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contact_count(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Validate one record, collecting every failure.
pub fn validate(raw: &RawEnrollee) -> Result<Contact, Vec<InvalidReason>> {
    let mut reasons = Vec::new();

    let phone = present(&raw.phone).and_then(normalize::normalize_phone);
    if phone.is_none() {
        reasons.push(InvalidReason::InvalidPhone);
    }

    let first_name = present(&raw.full_name).and_then(normalize::first_name);
    if first_name.is_none() {
        reasons.push(InvalidReason::InvalidName);
    }

    let agent_email = present(&raw.agent).unwrap_or_default();
    let agent_name = if normalize::is_email_shaped(agent_email) {
        let name = normalize::agent_name_from_email(agent_email);
        if name.is_none() {
            reasons.push(InvalidReason::AgentNameUnextractable);
        }
        name
    } else {
        reasons.push(InvalidReason::AgentNotEmail);
        None
    };

    let link = present(&raw.monitoring_link);
    if link.is_none() {
        reasons.push(InvalidReason::MissingMonitoringLink);
    }

    let label = present(&raw.monitoring_day);
    let slot = label.and_then(normalize::weekday_slot);
    if slot.is_none() {
        reasons.push(InvalidReason::MissingScheduledDay);
    }

    let code = present(&raw.registration_code);
    if code.is_none() {
        reasons.push(InvalidReason::MissingRegistrationCode);
    }

    match (phone, first_name, agent_name, link, label, slot, code) {
        (Some(phone), Some(first_name), Some(agent_name), Some(link), Some(label), Some(slot), Some(code))
            if reasons.is_empty() =>
        {
            Ok(Contact {
                phone_canonical: phone.canonical,
                phone_display: phone.display,
                first_name,
                agent_name,
                agent_email_raw: agent_email.to_string(),
                scheduled_day_slot: slot,
                scheduled_day_label: label.to_string(),
                monitoring_link: link.to_string(),
                registration_code: code.to_string(),
            })
        }
        _ => Err(reasons),
    }
}

/// Build the report row for a record that failed validation.
pub fn invalid_record(raw: &RawEnrollee, reasons: &[InvalidReason]) -> InvalidContactRecord {
    let agent = present(&raw.agent)
        .map(|a| normalize::agent_name_from_email(a).unwrap_or_else(|| a.to_string()))
        .unwrap_or_default();
    InvalidContactRecord {
        agent,
        student: present(&raw.full_name)
            .and_then(normalize::first_name)
            .unwrap_or_else(|| UNKNOWN_NAME.to_string()),
        registration_code: present(&raw.registration_code)
            .unwrap_or(UNKNOWN_CODE)
            .to_string(),
        reason: reasons
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "),
    }
}

/// Partition raw records into weekday buckets.
///
/// Pure: `seen` is only read, to suppress invalid records already reported.
pub fn partition_enrollees(
    records: &[RawEnrollee],
    allowed: &AllowedStatuses,
    seen: &HashSet<InvalidContactRecord>,
) -> Partition {
    let mut out = Partition::default();
    let mut reported: HashSet<InvalidContactRecord> = HashSet::new();

    for raw in records {
        if !allowed.allows(raw.status.as_deref()) {
            out.skipped += 1;
            continue;
        }
        match validate(raw) {
            Ok(contact) => out
                .buckets
                .entry(contact.scheduled_day_slot.clone())
                .or_default()
                .push(contact),
            Err(reasons) => {
                let record = invalid_record(raw, &reasons);
                if !seen.contains(&record) && reported.insert(record.clone()) {
                    out.invalid.push(record);
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monday_enrollee() -> RawEnrollee {
        RawEnrollee {
            status: Some("Ativo".into()),
            phone: Some("(11) 98765-4321".into()),
            full_name: Some("Maria Silva".into()),
            agent: Some("lucas.garcia@example.com".into()),
            monitoring_day: Some("Segunda-feira às 09:00".into()),
            monitoring_link: Some("https://meet.example.com/abc".into()),
            registration_code: Some("R-1".into()),
        }
    }

    #[test]
    fn test_valid_record_lands_in_weekday_bucket() {
        let partition =
            partition_enrollees(&[monday_enrollee()], &AllowedStatuses::default(), &HashSet::new());
        assert!(partition.invalid.is_empty());
        let monday = partition.bucket("monday");
        assert_eq!(monday.len(), 1);
        let contact = &monday[0];
        assert_eq!(contact.phone_canonical, "551187654321");
        assert_eq!(contact.first_name, "Maria");
        assert_eq!(contact.agent_name, "Lucas Garcia");
        assert_eq!(contact.scheduled_day_label, "Segunda-feira às 09:00");
    }

    #[test]
    fn test_disallowed_status_is_silently_skipped() {
        let mut graduated = monday_enrollee();
        graduated.status = Some("Graduated".into());
        let mut no_status = monday_enrollee();
        no_status.status = None;
        // Even a broken record is skipped rather than reported.
        let mut broken = graduated.clone();
        broken.phone = None;

        let partition = partition_enrollees(
            &[graduated, no_status, broken],
            &AllowedStatuses::default(),
            &HashSet::new(),
        );
        assert_eq!(partition.contact_count(), 0);
        assert!(partition.invalid.is_empty());
        assert_eq!(partition.skipped, 3);
    }

    #[test]
    fn test_missing_fields_are_all_named() {
        let raw = RawEnrollee {
            status: Some("Atencao".into()),
            registration_code: Some("R-9".into()),
            ..Default::default()
        };
        let partition = partition_enrollees(&[raw], &AllowedStatuses::default(), &HashSet::new());
        assert_eq!(partition.contact_count(), 0);
        assert_eq!(partition.invalid.len(), 1);
        let record = &partition.invalid[0];
        assert_eq!(record.student, UNKNOWN_NAME);
        assert_eq!(
            record.reason,
            "invalid phone, invalid name, agent not a valid email, missing monitoring link, missing scheduled day"
        );
    }

    #[test]
    fn test_each_missing_field_is_reported_individually() {
        let cases: [(fn(&mut RawEnrollee), &str); 6] = [
            (|r| r.phone = None, "invalid phone"),
            (|r| r.full_name = Some("  ".into()), "invalid name"),
            (|r| r.agent = Some("lucas".into()), "agent not a valid email"),
            (|r| r.agent = Some("123@x.com".into()), "agent name unextractable"),
            (|r| r.monitoring_link = None, "missing monitoring link"),
            (|r| r.registration_code = None, "missing registration code"),
        ];
        for (mutate, reason) in cases {
            let mut raw = monday_enrollee();
            mutate(&mut raw);
            let partition =
                partition_enrollees(&[raw], &AllowedStatuses::default(), &HashSet::new());
            assert_eq!(partition.contact_count(), 0, "{reason}");
            assert_eq!(partition.invalid[0].reason, reason);
        }
    }

    #[test]
    fn test_missing_code_uses_placeholder() {
        let mut raw = monday_enrollee();
        raw.registration_code = None;
        raw.phone = Some("123".into());
        let record = &partition_enrollees(&[raw], &AllowedStatuses::default(), &HashSet::new())
            .invalid[0];
        assert_eq!(record.registration_code, UNKNOWN_CODE);
        assert_eq!(record.agent, "Lucas Garcia");
        assert_eq!(record.reason, "invalid phone, missing registration code");
    }

    #[test]
    fn test_duplicates_suppressed_within_and_across_runs() {
        let mut raw = monday_enrollee();
        raw.phone = Some("12345".into());
        let records = vec![raw.clone(), raw];
        let allowed = AllowedStatuses::default();

        let first = partition_enrollees(&records, &allowed, &HashSet::new());
        assert_eq!(first.invalid.len(), 1);

        let seen: HashSet<_> = first.invalid.iter().cloned().collect();
        let second = partition_enrollees(&records, &allowed, &seen);
        assert!(second.invalid.is_empty());
    }

    #[test]
    fn test_english_status_and_schedule() {
        let mut raw = monday_enrollee();
        raw.status = Some("InRecovery".into());
        raw.monitoring_day = Some("Friday at 18:00".into());
        let partition = partition_enrollees(&[raw], &AllowedStatuses::default(), &HashSet::new());
        assert_eq!(partition.bucket("friday").len(), 1);
        assert!(partition.bucket("monday").is_empty());
    }

    #[test]
    fn test_allowed_statuses_from_config_names() {
        let allowed = AllowedStatuses::from_names(&["Ativo", "Bogus"]);
        assert!(allowed.allows(Some("Ativo")));
        assert!(allowed.allows(Some("Active")));
        assert!(!allowed.allows(Some("Atencao")));
        assert!(!allowed.allows(None));
    }
}
