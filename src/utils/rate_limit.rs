// src/utils/rate_limit.rs

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use tower_governor::{
    GovernorError, GovernorLayer,
    governor::GovernorConfigBuilder,
    key_extractor::{KeyExtractor, SmartIpKeyExtractor},
};

use crate::{error::AppError, utils::jwt::Claims};

const LIMIT_HEADER: &str = "x-ratelimit-limit";
const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RESET_HEADER: &str = "x-ratelimit-reset";
/// Set by the governor on rejected requests: seconds until the next one fits.
const AFTER_HEADER: &str = "x-ratelimit-after";

/// How often idle client entries are dropped from a limiter.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Keys clients by authenticated user, else by IP address.
///
/// The IP comes from `x-forwarded-for` / `x-real-ip` / `forwarded` when a
/// proxy sets them, otherwise from the peer address, so the server must be
/// started with `into_make_service_with_connect_info::<SocketAddr>()`.
#[derive(Debug, Clone, Copy)]
pub struct ClientKeyExtractor;

impl KeyExtractor for ClientKeyExtractor {
    type Key = String;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        if let Some(claims) = req.extensions().get::<Claims>() {
            return Ok(format!("user:{}", claims.sub));
        }

        SmartIpKeyExtractor
            .extract(req)
            .map(|ip| format!("ip:{}", ip))
    }
}

/// Request budget of one route group: `limit` requests per `window`,
/// handed back one at a time as the window elapses.
#[derive(Debug, Clone, Copy)]
pub struct RouteLimit {
    name: &'static str,
    limit: u32,
    window: Duration,
}

impl RouteLimit {
    pub fn new(name: &'static str, limit: u32, window: Duration) -> Self {
        Self {
            name,
            limit: limit.max(1),
            window: window.max(Duration::from_secs(1)),
        }
    }

    /// Time for one request's worth of quota to come back.
    fn period(&self) -> Duration {
        self.window / self.limit
    }

    /// Whole seconds, rounded up, until `spent` requests have replenished.
    fn reset_after(&self, spent: u32) -> u64 {
        let wait = self.period() * spent;
        wait.as_secs() + u64::from(wait.subsec_nanos() > 0)
    }

    /// Wraps every route of `router` in its own keyed limiter.
    ///
    /// Must run before the auth layer is added so the limiter sees `Claims`.
    pub fn apply<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let config = GovernorConfigBuilder::default()
            .key_extractor(ClientKeyExtractor)
            .period(self.period())
            .burst_size(self.limit)
            .use_headers()
            .finish()
            .expect("rate limit quota is non-zero");

        let limiter = Arc::downgrade(config.limiter());
        spawn_sweeper(self.name, move || {
            let limiter = limiter.upgrade()?;
            limiter.retain_recent();
            Some(limiter.len())
        });

        router
            .layer(GovernorLayer::new(Arc::new(config)))
            .layer(middleware::from_fn_with_state(self, rate_limit_envelope))
    }
}

/// Periodically forgets clients whose quota has fully replenished.
/// `sweep` returns the number of tracked clients, or `None` once the
/// limiter has been dropped along with its router.
fn spawn_sweeper<F>(name: &'static str, sweep: F)
where
    F: Fn() -> Option<usize> + Send + 'static,
{
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::warn!("No runtime for '{}' rate limit sweeper", name);
        return;
    };

    runtime.spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(tracked) = sweep() else {
                break;
            };
            tracing::debug!("Rate limit '{}' tracks {} clients", name, tracked);
        }
    });
}

/// Axum Middleware: gives governor responses the service's header set and
/// turns its 429 into the JSON error envelope.
async fn rate_limit_envelope(
    State(limit): State<RouteLimit>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let response = next.run(req).await;
    finish_response(&limit, response)
}

fn finish_response(limit: &RouteLimit, mut response: Response) -> Response {
    if response.status() == StatusCode::TOO_MANY_REQUESTS {
        let wait = header_number(response.headers(), AFTER_HEADER)
            .unwrap_or_else(|| limit.reset_after(1));
        tracing::warn!("Rate limit '{}' exceeded, retry in {}s", limit.name, wait);

        let mut limited = AppError::RateLimited(format!(
            "Too many requests, retry in {} seconds",
            wait
        ))
        .into_response();
        let headers = limited.headers_mut();
        apply_headers(headers, limit.limit, 0, wait);
        headers.insert(header::RETRY_AFTER, HeaderValue::from(wait));
        return limited;
    }

    // Only responses that went through the governor carry a remaining count.
    let Some(remaining) = header_number(response.headers(), REMAINING_HEADER) else {
        return response;
    };
    let remaining = u32::try_from(remaining)
        .unwrap_or(limit.limit)
        .min(limit.limit);
    let reset = limit.reset_after(limit.limit - remaining);
    apply_headers(response.headers_mut(), limit.limit, remaining, reset);
    response
}

fn header_number(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

fn apply_headers(headers: &mut HeaderMap, limit: u32, remaining: u32, reset_secs: u64) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(reset_secs));
}
