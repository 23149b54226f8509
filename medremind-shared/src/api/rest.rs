//! Minimal REST client helpers for consumers (clients).

use super::endpoints as ep;
use super::*;
use once_cell::sync::Lazy;
use std::time::Duration;

pub use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("http: {0}")]
    Http(String),
    #[error("status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("serde: {0}")]
    Serde(String),
}

impl RestError {
    /// The server answered and rejected the request; retrying will not help.
    pub fn is_client_error(&self) -> bool {
        matches!(self, RestError::Status { status, .. } if (400..500).contains(status))
    }
}

static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .tcp_keepalive(Some(Duration::from_secs(180)))
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(180))
        // Sync runs every minute; a hung request must not outlive the interval
        .timeout(Duration::from_secs(30))
        .build()
        .expect("failed to build HTTP client")
});

fn mk_client() -> reqwest::Client {
    HTTP_CLIENT.clone()
}

async fn handle_json<T: for<'de> serde::Deserialize<'de>>(
    res: reqwest::Response,
) -> Result<T, RestError> {
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(RestError::Status {
            status: status.as_u16(),
            body,
        });
    }
    res.json::<T>()
        .await
        .map_err(|e| RestError::Serde(e.to_string()))
}

async fn handle_empty(res: reqwest::Response) -> Result<(), RestError> {
    if res.status().is_success() {
        Ok(())
    } else {
        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        Err(RestError::Status { status, body })
    }
}

async fn send(req: reqwest::RequestBuilder) -> Result<reqwest::Response, RestError> {
    req.send().await.map_err(|e| RestError::Http(e.to_string()))
}

pub async fn list_medicines(base: &str, phone: &str) -> Result<Vec<MedicineDto>, RestError> {
    let res = send(mk_client().get(ep::medicines(base, phone))).await?;
    handle_json(res).await
}

pub async fn create_medicine(base: &str, req: &NewMedicineReq) -> Result<MedicineDto, RestError> {
    let res = send(mk_client().post(ep::medicines_collection(base)).json(req)).await?;
    handle_json(res).await
}

pub async fn update_medicine(
    base: &str,
    req: &UpdateMedicineReq,
) -> Result<MedicineDto, RestError> {
    let res = send(mk_client().put(ep::medicines_collection(base)).json(req)).await?;
    handle_json(res).await
}

pub async fn delete_medicine(base: &str, phone: &str, id: i32) -> Result<(), RestError> {
    let res = send(mk_client().delete(ep::medicine_item(base, phone, id))).await?;
    handle_empty(res).await
}

pub async fn list_notifications(
    base: &str,
    phone: &str,
) -> Result<Vec<NotificationDto>, RestError> {
    let res = send(mk_client().get(ep::notifications(base, phone))).await?;
    handle_json(res).await
}

pub async fn create_notification(
    base: &str,
    req: &NewNotificationReq,
) -> Result<NotificationDto, RestError> {
    let res = send(mk_client().post(ep::notifications_collection(base)).json(req)).await?;
    handle_json(res).await
}

pub async fn update_notification(
    base: &str,
    req: &UpdateNotificationReq,
) -> Result<NotificationDto, RestError> {
    let res = send(mk_client().put(ep::notifications_collection(base)).json(req)).await?;
    handle_json(res).await
}

pub async fn toggle_notification(
    base: &str,
    req: &ToggleNotificationReq,
) -> Result<NotificationDto, RestError> {
    let res = send(mk_client().patch(ep::notifications_collection(base)).json(req)).await?;
    handle_json(res).await
}

pub async fn delete_notification(base: &str, phone: &str, id: i32) -> Result<(), RestError> {
    let res = send(mk_client().delete(ep::notification_item(base, phone, id))).await?;
    handle_empty(res).await
}

pub async fn record_consumption(
    base: &str,
    req: &ConsumptionReq,
) -> Result<ConsumptionResp, RestError> {
    let res = send(mk_client().post(ep::consumption(base)).json(req)).await?;
    handle_json(res).await
}

pub async fn consumption_stats(
    base: &str,
    phone: &str,
    medicine_id: Option<i32>,
) -> Result<ConsumptionStatsResp, RestError> {
    let res = send(mk_client().get(ep::consumption_stats(base, phone, medicine_id))).await?;
    handle_json(res).await
}

pub async fn push_subscribe(
    base: &str,
    req: &PushSubscribeReq,
) -> Result<PushSubscribeResp, RestError> {
    let res = send(mk_client().post(ep::push_subscribe(base)).json(req)).await?;
    handle_json(res).await
}

pub async fn push_unsubscribe(base: &str, req: &PushUnsubscribeReq) -> Result<(), RestError> {
    let res = send(mk_client().post(ep::push_unsubscribe(base)).json(req)).await?;
    handle_empty(res).await
}
