//! Invoice handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use recruit_billing_core::{Invoice, InvoiceId, TenantId, TimePeriod};

use super::{parse_id, parse_tenant, Pagination};
use crate::auth::{AdminAuth, ServiceAuth};
use crate::error::ApiError;
use crate::state::AppState;

/// Statement generation request.
#[derive(Debug, Deserialize)]
pub struct GenerateInvoiceRequest {
    /// The tenant.
    pub tenant_id: TenantId,
    /// Period start; defaults to the end of the previous statement.
    #[serde(default)]
    pub period_start: Option<DateTime<Utc>>,
    /// Period end; defaults to now.
    #[serde(default)]
    pub period_end: Option<DateTime<Utc>>,
}

/// Generate a usage statement.
pub async fn generate_invoice(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<GenerateInvoiceRequest>,
) -> Result<(StatusCode, Json<Invoice>), ApiError> {
    let period = match (body.period_start, body.period_end) {
        (Some(start), Some(end)) => Some(TimePeriod::new(start, end)?),
        (None, None) => None,
        _ => {
            return Err(ApiError::BadRequest(
                "period_start and period_end must be given together".into(),
            ))
        }
    };

    tracing::debug!(
        service = %auth.service_name,
        tenant_id = %body.tenant_id,
        "Generating usage statement"
    );

    let invoice = state
        .engine
        .invoices
        .generate(body.tenant_id, period)
        .await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

/// Invoice page response.
#[derive(Debug, Serialize)]
pub struct InvoiceListResponse {
    /// Invoices, newest first.
    pub invoices: Vec<Invoice>,
}

/// List invoices for a tenant.
pub async fn list_invoices(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(tenant_id): Path<String>,
    Query(page): Query<Pagination>,
) -> Result<Json<InvoiceListResponse>, ApiError> {
    let tenant_id = parse_tenant(&tenant_id)?;
    let invoices = state
        .store
        .list_invoices(tenant_id, page.limit(), page.offset)
        .await?;
    Ok(Json(InvoiceListResponse { invoices }))
}

/// Get one invoice.
pub async fn get_invoice(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path((tenant_id, invoice_id)): Path<(String, String)>,
) -> Result<Json<Invoice>, ApiError> {
    let tenant_id = parse_tenant(&tenant_id)?;
    let invoice_id: InvoiceId = parse_id(&invoice_id, "invoice ID")?;

    let invoice = state
        .store
        .get_invoice(tenant_id, invoice_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Invoice {invoice_id} not found")))?;
    Ok(Json(invoice))
}

/// Settlement request.
#[derive(Debug, Default, Deserialize)]
pub struct SettleInvoiceRequest {
    /// External payment reference (wire transfer id, check number).
    #[serde(default)]
    pub payment_reference: Option<String>,
}

/// Mark a usage statement paid (admin only).
pub async fn settle_invoice(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Path((tenant_id, invoice_id)): Path<(String, String)>,
    Json(body): Json<SettleInvoiceRequest>,
) -> Result<Json<Invoice>, ApiError> {
    let tenant_id = parse_tenant(&tenant_id)?;
    let invoice_id: InvoiceId = parse_id(&invoice_id, "invoice ID")?;

    tracing::info!(
        admin_id = %auth.admin_id,
        tenant_id = %tenant_id,
        invoice_id = %invoice_id,
        "Admin settling usage statement"
    );

    let invoice = state
        .engine
        .invoices
        .settle_statement(tenant_id, invoice_id, body.payment_reference)
        .await?;
    Ok(Json(invoice))
}
