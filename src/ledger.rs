//! # Business Ledger
//!
//! In-memory record of the leads and appointments the assistant captured,
//! shared by all connections and readable over the REST API.
//!
//! Entries are stamped with a UUID and the UTC time they were recorded.
//! Nothing is persisted; a restart starts with an empty ledger. Each list keeps
//! at most `performance.max_ledger_records` entries and drops the oldest first.

use crate::session::tools::{AppointmentDetails, LeadDetails, ToolHook};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct LeadRecord {
    pub id: Uuid,
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub details: LeadDetails,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppointmentRecord {
    pub id: Uuid,
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub details: AppointmentDetails,
}

#[derive(Debug)]
pub struct BusinessLedger {
    leads: RwLock<VecDeque<LeadRecord>>,
    appointments: RwLock<VecDeque<AppointmentRecord>>,
    capacity: AtomicUsize,
}

/// Drop the oldest entries until at most `capacity` remain.
fn retain_newest<T>(records: &mut VecDeque<T>, capacity: usize) -> usize {
    let excess = records.len().saturating_sub(capacity);
    records.drain(..excess);
    excess
}

impl BusinessLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            leads: RwLock::new(VecDeque::new()),
            appointments: RwLock::new(VecDeque::new()),
            capacity: AtomicUsize::new(capacity.max(1)),
        }
    }

    fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Change how many records of each kind are kept, trimming right away.
    pub fn set_capacity(&self, capacity: usize) -> Result<()> {
        let capacity = capacity.max(1);
        self.capacity.store(capacity, Ordering::Relaxed);

        let dropped_leads = retain_newest(
            &mut *self.leads.write().map_err(|_| anyhow!("lead ledger lock poisoned"))?,
            capacity,
        );
        let dropped_appointments = retain_newest(
            &mut *self
                .appointments
                .write()
                .map_err(|_| anyhow!("appointment ledger lock poisoned"))?,
            capacity,
        );
        if dropped_leads + dropped_appointments > 0 {
            debug!(capacity, dropped_leads, dropped_appointments, "Ledger trimmed to new capacity");
        }
        Ok(())
    }

    pub fn add_lead(&self, details: LeadDetails) -> Result<LeadRecord> {
        let record = LeadRecord {
            id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            details,
        };
        let mut leads = self.leads.write().map_err(|_| anyhow!("lead ledger lock poisoned"))?;
        leads.push_back(record.clone());
        retain_newest(&mut leads, self.capacity());
        Ok(record)
    }

    pub fn add_appointment(&self, details: AppointmentDetails) -> Result<AppointmentRecord> {
        let record = AppointmentRecord {
            id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            details,
        };
        let mut appointments = self
            .appointments
            .write()
            .map_err(|_| anyhow!("appointment ledger lock poisoned"))?;
        appointments.push_back(record.clone());
        retain_newest(&mut appointments, self.capacity());
        Ok(record)
    }

    /// Retained leads, oldest first.
    pub fn leads(&self) -> Result<Vec<LeadRecord>> {
        let leads = self.leads.read().map_err(|_| anyhow!("lead ledger lock poisoned"))?;
        Ok(leads.iter().cloned().collect())
    }

    pub fn lead(&self, id: Uuid) -> Result<Option<LeadRecord>> {
        let leads = self.leads.read().map_err(|_| anyhow!("lead ledger lock poisoned"))?;
        Ok(leads.iter().find(|lead| lead.id == id).cloned())
    }

    /// Retained appointments, oldest first.
    pub fn appointments(&self) -> Result<Vec<AppointmentRecord>> {
        let appointments = self
            .appointments
            .read()
            .map_err(|_| anyhow!("appointment ledger lock poisoned"))?;
        Ok(appointments.iter().cloned().collect())
    }

    pub fn appointment(&self, id: Uuid) -> Result<Option<AppointmentRecord>> {
        let appointments = self
            .appointments
            .read()
            .map_err(|_| anyhow!("appointment ledger lock poisoned"))?;
        Ok(appointments.iter().find(|a| a.id == id).cloned())
    }

    /// Number of retained leads and appointments.
    pub fn counts(&self) -> Result<(usize, usize)> {
        let leads = self.leads.read().map_err(|_| anyhow!("lead ledger lock poisoned"))?.len();
        let appointments = self
            .appointments
            .read()
            .map_err(|_| anyhow!("appointment ledger lock poisoned"))?
            .len();
        Ok((leads, appointments))
    }
}

impl ToolHook for BusinessLedger {
    fn record_lead(&self, lead: &LeadDetails) -> Result<()> {
        self.add_lead(lead.clone()).map(|_| ())
    }

    fn schedule_repair(&self, appointment: &AppointmentDetails) -> Result<()> {
        self.add_appointment(appointment.clone()).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_are_stamped_and_listed() {
        let ledger = BusinessLedger::new(100);
        let lead = ledger
            .add_lead(LeadDetails {
                name: "Ari".to_string(),
                contact: "ari@example.com".to_string(),
                issue: "liquid spill".to_string(),
            })
            .unwrap();

        assert_eq!(ledger.leads().unwrap().len(), 1);
        assert_eq!(ledger.lead(lead.id).unwrap().unwrap().details.name, "Ari");
        assert!(ledger.lead(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_tool_hook_appends() {
        let ledger = BusinessLedger::new(100);
        ledger
            .schedule_repair(&AppointmentDetails {
                date: "Friday".to_string(),
                time: "2pm".to_string(),
                service: "Data recovery".to_string(),
            })
            .unwrap();

        let appointments = ledger.appointments().unwrap();
        assert_eq!(appointments.len(), 1);
        assert_eq!(appointments[0].details.service, "Data recovery");
    }

    #[test]
    fn test_record_serializes_flat() {
        let ledger = BusinessLedger::new(100);
        let record = ledger
            .add_lead(LeadDetails {
                name: "Kim".to_string(),
                contact: "555-0199".to_string(),
                issue: "no wifi".to_string(),
            })
            .unwrap();

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["name"], "Kim");
        assert_eq!(value["id"], record.id.to_string());
        assert!(value["recorded_at"].is_string());
    }

    fn lead(name: &str) -> LeadDetails {
        LeadDetails {
            name: name.to_string(),
            contact: format!("{}@example.com", name),
            issue: "slow boot".to_string(),
        }
    }

    #[test]
    fn test_oldest_records_are_dropped_at_capacity() {
        let ledger = BusinessLedger::new(2);
        for name in ["a", "b", "c"] {
            ledger.add_lead(lead(name)).unwrap();
        }

        let names: Vec<String> = ledger
            .leads()
            .unwrap()
            .into_iter()
            .map(|record| record.details.name)
            .collect();
        assert_eq!(names, vec!["b", "c"]);
        assert_eq!(ledger.counts().unwrap(), (2, 0));
    }

    #[test]
    fn test_shrinking_capacity_trims_immediately() {
        let ledger = BusinessLedger::new(10);
        for name in ["a", "b", "c", "d"] {
            ledger.add_lead(lead(name)).unwrap();
        }

        ledger.set_capacity(1).unwrap();
        let leads = ledger.leads().unwrap();
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].details.name, "d");
    }

    #[test]
    fn test_poisoned_lock_is_reported() {
        let ledger = std::sync::Arc::new(BusinessLedger::new(10));
        let poisoner = ledger.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.leads.write().unwrap();
            panic!("poison the lead list");
        })
        .join();

        assert!(ledger.leads().is_err());
        assert!(ledger.add_lead(lead("e")).is_err());
        assert!(ledger.appointments().unwrap().is_empty());
    }
}
