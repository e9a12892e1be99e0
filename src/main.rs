#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate prometheus;
#[macro_use]
extern crate rocket;

use deyecloud_rs::config;
use deyecloud_rs::coordinator::{RefreshOutcome, Status};
use deyecloud_rs::model::{ControlCommand, Snapshot};
use deyecloud_rs::{Error, Integration};
use rocket::fairing::AdHoc;
use rocket::http::Status as HttpStatus;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::serde::Serialize;
use rocket::{Build, Request, Rocket, State};
use std::sync::Arc;

mod metrics;

/// Library errors as HTTP responses.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        ApiError(error)
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        let status = match &self.0 {
            error if error.is_auth() => HttpStatus::Forbidden,
            Error::RateExceeded(_) => HttpStatus::TooManyRequests,
            Error::InvalidCommand(_) => HttpStatus::BadRequest,
            Error::Config(_) | Error::Internal(_) => HttpStatus::InternalServerError,
            _ => HttpStatus::BadGateway,
        };
        log::warn!("{} {}: {}", request.method(), request.uri(), self.0);

        (status, self.0.to_string()).respond_to(request)
    }
}

#[derive(Serialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
struct RefreshResult {
    outcome: &'static str,
    unavailable: usize,
    error: Option<String>,
}

#[get("/metrics")]
fn metrics_route() -> Result<String, ApiError> {
    Ok(metrics::read()?)
}

#[get("/snapshot")]
fn snapshot_route(integration: &State<Arc<Integration>>) -> Json<Snapshot> {
    Json(integration.snapshot().as_ref().clone())
}

#[get("/status")]
fn status_route(integration: &State<Arc<Integration>>) -> Json<Status> {
    Json(integration.status())
}

#[post("/command", format = "json", data = "<command>")]
async fn command_route(
    command: Json<ControlCommand>,
    integration: &State<Arc<Integration>>,
) -> Result<HttpStatus, ApiError> {
    integration.issue_command(&command).await?;
    Ok(HttpStatus::Accepted)
}

#[post("/refresh")]
async fn refresh_route(
    integration: &State<Arc<Integration>>,
) -> Result<Json<RefreshResult>, ApiError> {
    let result = match integration.refresh().await? {
        RefreshOutcome::Published { errors, .. } => RefreshResult {
            outcome: "published",
            unavailable: errors.len(),
            error: None,
        },
        RefreshOutcome::Skipped => RefreshResult {
            outcome: "skipped",
            unavailable: 0,
            error: None,
        },
        RefreshOutcome::Failed(error) => RefreshResult {
            outcome: "failed",
            unavailable: 0,
            error: Some(error.to_string()),
        },
    };
    Ok(Json(result))
}

fn build(integration: Arc<Integration>) -> Rocket<Build> {
    rocket::build()
        .manage(integration)
        .mount(
            "/",
            routes![
                metrics_route,
                snapshot_route,
                status_route,
                command_route,
                refresh_route
            ],
        )
        .attach(AdHoc::on_liftoff("Start polling", |rocket| {
            Box::pin(async move {
                if let Some(integration) = rocket.state::<Arc<Integration>>() {
                    let integration = Arc::clone(integration);
                    tokio::spawn(async move {
                        if let Err(e) = integration.setup().await {
                            log::error!("Setup failed, polling anyway: {}", e);
                            integration.start();
                        }
                    });
                }
            })
        }))
        .attach(AdHoc::on_shutdown("Stop polling", |rocket| {
            Box::pin(async move {
                if let Some(integration) = rocket.state::<Arc<Integration>>() {
                    integration.shutdown().await;
                }
            })
        }))
}

#[rocket::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let settings = config::read_settings()?;
    let integration = Arc::new(Integration::configure(&settings)?);
    integration.subscribe(metrics::record);

    build(integration).launch().await?;
    Ok(())
}
