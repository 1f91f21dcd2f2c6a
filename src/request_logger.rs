use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::Status;
use rocket::{Data, Request, Response};
use std::time::Instant;

/// Fairing to log one line per HTTP request with timing.
///
/// Rejected credentials (401/403) are raised to `warn` so brute-force and
/// token-replay attempts stand out; only the path is logged, never headers.
pub struct RequestLogger;

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request Logger",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        request.local_cache(Instant::now);
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let started = request.local_cache(Instant::now);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let method = request.method();
        let path = request.uri().path();
        let status = response.status();

        if status == Status::Unauthorized || status == Status::Forbidden {
            log::warn!(
                "{} {} -> {} ({:.2}ms) client={}",
                method,
                path,
                status.code,
                elapsed_ms,
                request
                    .client_ip()
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|| "unknown".into())
            );
        } else {
            log::info!("{} {} -> {} ({:.2}ms)", method, path, status.code, elapsed_ms);
        }
    }
}
