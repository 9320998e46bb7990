use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use uuid::Uuid;

/// A ledger that cannot be read is a server fault, not a bad request.
fn ledger_unavailable(err: anyhow::Error) -> AppError {
    AppError::Internal(err.to_string())
}

pub async fn list_leads(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let leads = state.ledger.leads().map_err(ledger_unavailable)?;

    Ok(HttpResponse::Ok().json(json!({
        "count": leads.len(),
        "leads": leads
    })))
}

pub async fn get_lead(state: web::Data<AppState>, path: web::Path<Uuid>) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let lead = state
        .ledger
        .lead(id)
        .map_err(ledger_unavailable)?
        .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", id)))?;

    Ok(HttpResponse::Ok().json(lead))
}

pub async fn list_appointments(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let appointments = state.ledger.appointments().map_err(ledger_unavailable)?;

    Ok(HttpResponse::Ok().json(json!({
        "count": appointments.len(),
        "appointments": appointments
    })))
}

pub async fn get_appointment(state: web::Data<AppState>, path: web::Path<Uuid>) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let appointment = state
        .ledger
        .appointment(id)
        .map_err(ledger_unavailable)?
        .ok_or_else(|| AppError::NotFound(format!("Appointment {} not found", id)))?;

    Ok(HttpResponse::Ok().json(appointment))
}
