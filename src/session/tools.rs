//! # Tool Dispatcher
//!
//! Maps function calls emitted by the model to local side effects.
//!
//! ## Supported Tools:
//! - **record_lead** `{name, contact, issue}` → a captured lead
//! - **schedule_repair** `{date, time, service}` → a booked appointment
//!
//! Every call is acknowledged with `{"result": "ok"}` under the same call id,
//! whether or not the side effect worked out. Local failures are logged and
//! never reported back to the model. Unknown tool names are acknowledged as
//! no-ops.

use crate::live::protocol::FunctionResponse;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

pub const RECORD_LEAD: &str = "record_lead";
pub const SCHEDULE_REPAIR: &str = "schedule_repair";

/// One function invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCallRequest {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeadDetails {
    pub name: String,
    pub contact: String,
    pub issue: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppointmentDetails {
    pub date: String,
    pub time: String,
    pub service: String,
}

/// What a tool call produced locally.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolEffect {
    LeadCaptured(LeadDetails),
    AppointmentBooked(AppointmentDetails),
    /// Unknown tool or unusable arguments.
    None,
}

/// Downstream consumer of captured leads and bookings (CRM, ledger, ...).
pub trait ToolHook: Send + Sync {
    fn record_lead(&self, lead: &LeadDetails) -> anyhow::Result<()>;

    fn schedule_repair(&self, appointment: &AppointmentDetails) -> anyhow::Result<()>;
}

/// Result of dispatching one call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    /// Acknowledgement to send back to the model.
    pub response: FunctionResponse,
    pub effect: ToolEffect,
}

#[derive(Default)]
pub struct ToolDispatcher {
    hook: Option<Arc<dyn ToolHook>>,
}

impl ToolDispatcher {
    pub fn new(hook: Option<Arc<dyn ToolHook>>) -> Self {
        Self { hook }
    }

    /// Run the side effect for `call` and build its acknowledgement.
    pub fn invoke(&self, call: &ToolCallRequest) -> ToolOutcome {
        let effect = match call.name.as_str() {
            RECORD_LEAD => match serde_json::from_value::<LeadDetails>(call.args.clone()) {
                Ok(lead) => {
                    info!(call_id = %call.id, name = %lead.name, "Lead captured");
                    if let Some(hook) = &self.hook {
                        if let Err(e) = hook.record_lead(&lead) {
                            warn!(call_id = %call.id, "Lead hook failed: {}", e);
                        }
                    }
                    ToolEffect::LeadCaptured(lead)
                }
                Err(e) => {
                    warn!(call_id = %call.id, "Ignoring record_lead with malformed args: {}", e);
                    ToolEffect::None
                }
            },
            SCHEDULE_REPAIR => match serde_json::from_value::<AppointmentDetails>(call.args.clone()) {
                Ok(appointment) => {
                    info!(
                        call_id = %call.id,
                        date = %appointment.date,
                        time = %appointment.time,
                        "Repair scheduled"
                    );
                    if let Some(hook) = &self.hook {
                        if let Err(e) = hook.schedule_repair(&appointment) {
                            warn!(call_id = %call.id, "Appointment hook failed: {}", e);
                        }
                    }
                    ToolEffect::AppointmentBooked(appointment)
                }
                Err(e) => {
                    warn!(call_id = %call.id, "Ignoring schedule_repair with malformed args: {}", e);
                    ToolEffect::None
                }
            },
            other => {
                warn!(call_id = %call.id, tool = other, "Acknowledging unknown tool as no-op");
                ToolEffect::None
            }
        };

        ToolOutcome {
            response: FunctionResponse {
                id: call.id.clone(),
                name: call.name.clone(),
                response: json!({ "result": "ok" }),
            },
            effect,
        }
    }
}
