use axum::{http::StatusCode, response::Json, Json as RequestJson};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::api::tenant_extractor::CurrentTenant;
use crate::error::TenancyError;
use crate::model::TenantId;
use crate::store::TenantSession;

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TenantResponse {
    pub tenant: TenantId,
}

pub async fn current_tenant(CurrentTenant(tenant): CurrentTenant) -> Json<TenantResponse> {
    Json(TenantResponse { tenant })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Customer {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct CustomerList {
    pub tenant: TenantId,
    pub customers: Vec<Customer>,
}

#[derive(Debug, Deserialize)]
pub struct NewCustomer {
    pub name: String,
}

/// Lists `customers` from whichever schema the request resolved to
pub async fn list_customers(mut session: TenantSession) -> Result<Json<CustomerList>, TenancyError> {
    let rows = sqlx::query("SELECT id, name FROM customers ORDER BY id")
        .fetch_all(session.conn())
        .await?;
    let customers = rows
        .into_iter()
        .map(|row| Customer {
            id: row.get("id"),
            name: row.get("name"),
        })
        .collect();

    let tenant = session.schema().clone();
    session.commit().await?;
    Ok(Json(CustomerList { tenant, customers }))
}

pub async fn create_customer(
    mut session: TenantSession,
    RequestJson(new_customer): RequestJson<NewCustomer>,
) -> Result<(StatusCode, Json<Customer>), TenancyError> {
    let id: i32 = sqlx::query_scalar("INSERT INTO customers (name) VALUES ($1) RETURNING id")
        .bind(&new_customer.name)
        .fetch_one(session.conn())
        .await?;
    session.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(Customer {
            id,
            name: new_customer.name,
        }),
    ))
}
