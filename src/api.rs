use actix_web::{HttpResponse, web};
use chrono::{NaiveDate, Utc};
use log::{error, info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::gate::{Rejection, RetentionGate};
use crate::rate::Rate;
use crate::resolver::{Average, RateResolver};

pub struct AppState {
    pub resolver: RateResolver,
    pub gate: RetentionGate,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AverageBody {
    start_date: NaiveDate,
    end_date: NaiveDate,
    average: Decimal,
    resolved_days: usize,
    requested_days: usize,
    complete: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RangeBody {
    start_date: NaiveDate,
    end_date: NaiveDate,
    rates: Vec<Rate>,
    missing: Vec<NaiveDate>,
    complete: bool,
}

#[derive(Debug, Serialize)]
struct Message {
    message: String,
}

fn message(text: impl Into<String>) -> Message {
    Message {
        message: text.into(),
    }
}

fn bad_request(rejection: Rejection) -> HttpResponse {
    warn!("Rejected request: {}", rejection);
    HttpResponse::BadRequest().json(message(rejection.to_string()))
}

fn internal_error(e: Error) -> HttpResponse {
    error!("Rate lookup failed: {}", e);
    HttpResponse::InternalServerError().json(message("Internal error while resolving rates"))
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

async fn single_rate(state: &AppState, date: NaiveDate) -> HttpResponse {
    match state.resolver.resolve(date).await {
        Ok(Some(rate)) => {
            info!("Rate for {}: {}", date, rate.value);
            HttpResponse::Ok().json(rate)
        }
        Ok(None) => {
            warn!("No rate published for {}", date);
            HttpResponse::NotFound().json(message(format!("No rate found for {}", date)))
        }
        Err(e) => internal_error(e),
    }
}

async fn latest(state: web::Data<AppState>) -> HttpResponse {
    single_rate(&state, today()).await
}

async fn by_date(state: web::Data<AppState>, path: web::Path<NaiveDate>) -> HttpResponse {
    let date = path.into_inner();
    if let Err(rejection) = state.gate.check(date, date, today()) {
        return bad_request(rejection);
    }
    single_rate(&state, date).await
}

async fn average(state: web::Data<AppState>, query: web::Query<PeriodQuery>) -> HttpResponse {
    let PeriodQuery {
        start_date,
        end_date,
    } = query.into_inner();
    if let Err(rejection) = state.gate.check(start_date, end_date, today()) {
        return bad_request(rejection);
    }

    let resolution = match state.resolver.resolve_range(start_date, end_date).await {
        Ok(resolution) => resolution,
        Err(e) => return internal_error(e),
    };

    match resolution.average(state.resolver.coverage()) {
        Average::Mean {
            value,
            resolved_days,
            requested_days,
        } => {
            info!(
                "Average for {}..{} over {}/{} days: {}",
                start_date, end_date, resolved_days, requested_days, value
            );
            HttpResponse::Ok().json(AverageBody {
                start_date,
                end_date,
                average: value.round_dp(4),
                resolved_days,
                requested_days,
                complete: resolution.is_complete(),
            })
        }
        Average::InsufficientData => {
            warn!("Not enough data to average {}..{}", start_date, end_date);
            HttpResponse::NotFound().json(message(format!(
                "Not enough data to average rates for {}..{}",
                start_date, end_date
            )))
        }
    }
}

async fn range(state: web::Data<AppState>, query: web::Query<PeriodQuery>) -> HttpResponse {
    let PeriodQuery {
        start_date,
        end_date,
    } = query.into_inner();
    if let Err(rejection) = state.gate.check(start_date, end_date, today()) {
        return bad_request(rejection);
    }

    match state.resolver.resolve_range(start_date, end_date).await {
        Ok(resolution) if resolution.is_empty() => HttpResponse::NotFound().json(message(format!(
            "No rates found for {}..{}",
            start_date, end_date
        ))),
        Ok(resolution) => HttpResponse::Ok().json(RangeBody {
            start_date,
            end_date,
            complete: resolution.is_complete(),
            rates: resolution.rates,
            missing: resolution.missing,
        }),
        Err(e) => internal_error(e),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/currency/uahusd")
            .app_data(web::PathConfig::default().error_handler(|err, _| {
                actix_web::error::ErrorBadRequest(format!("Invalid date: {}", err))
            }))
            .route("/latest", web::get().to(latest))
            .route("/date/{date}", web::get().to(by_date))
            .route("/average", web::get().to(average))
            .route("/range", web::get().to(range)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use chrono::Days;
    use rust_decimal_macros::dec;

    use crate::cache::MemoryRateCache;
    use crate::resolver::CoveragePolicy;
    use crate::source::MockRateSource;
    use crate::store::MemoryRateStore;

    fn state(source: Arc<MockRateSource>, coverage: CoveragePolicy) -> web::Data<AppState> {
        let resolver = RateResolver::new(
            Arc::new(MemoryRateCache::new()),
            Arc::new(MemoryRateStore::new()),
            source,
        )
        .with_coverage(coverage);
        web::Data::new(AppState {
            resolver,
            gate: RetentionGate::new(12),
        })
    }

    fn days_ago(n: u64) -> NaiveDate {
        today().checked_sub_days(Days::new(n)).unwrap()
    }

    #[actix_web::test]
    async fn test_by_date_found() {
        let source = Arc::new(MockRateSource::new());
        source.publish(Rate::new(days_ago(3), dec!(41.2345)));
        let app = test::init_service(
            App::new()
                .app_data(state(source, CoveragePolicy::Partial))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri(&format!("/api/currency/uahusd/date/{}", days_ago(3)))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["rate"], "41.2345");
        assert_eq!(body["date"], days_ago(3).to_string());
    }

    #[actix_web::test]
    async fn test_by_date_not_found() {
        let app = test::init_service(
            App::new()
                .app_data(state(Arc::new(MockRateSource::new()), CoveragePolicy::Partial))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri(&format!("/api/currency/uahusd/date/{}", days_ago(1)))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_by_date_too_old_is_bad_request() {
        let source = Arc::new(MockRateSource::new());
        let app = test::init_service(
            App::new()
                .app_data(state(source.clone(), CoveragePolicy::Partial))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri(&format!("/api/currency/uahusd/date/{}", days_ago(800)))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(source.calls(), 0);
    }

    #[actix_web::test]
    async fn test_by_date_malformed_is_bad_request() {
        let app = test::init_service(
            App::new()
                .app_data(state(Arc::new(MockRateSource::new()), CoveragePolicy::Partial))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/currency/uahusd/date/21.05.2025")
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_latest_uses_today() {
        let source = Arc::new(MockRateSource::new());
        source.publish(Rate::new(today(), dec!(41.0)));
        let app = test::init_service(
            App::new()
                .app_data(state(source.clone(), CoveragePolicy::Partial))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/currency/uahusd/latest")
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(source.requests(), vec![(today(), today())]);
    }

    #[actix_web::test]
    async fn test_average_partial_coverage() {
        let source = Arc::new(MockRateSource::new());
        source.publish(Rate::new(days_ago(5), dec!(40.0)));
        source.publish(Rate::new(days_ago(4), dec!(41.0)));
        let app = test::init_service(
            App::new()
                .app_data(state(source, CoveragePolicy::Partial))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri(&format!(
                "/api/currency/uahusd/average?startDate={}&endDate={}",
                days_ago(5),
                days_ago(3)
            ))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        let average: Decimal = body["average"].as_str().unwrap().parse().unwrap();
        assert_eq!(average, dec!(40.5));
        assert_eq!(body["resolvedDays"], 2);
        assert_eq!(body["requestedDays"], 3);
        assert_eq!(body["complete"], false);
    }

    #[actix_web::test]
    async fn test_average_full_coverage_required() {
        let source = Arc::new(MockRateSource::new());
        source.publish(Rate::new(days_ago(5), dec!(40.0)));
        let app = test::init_service(
            App::new()
                .app_data(state(source, CoveragePolicy::Full))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri(&format!(
                "/api/currency/uahusd/average?startDate={}&endDate={}",
                days_ago(5),
                days_ago(4)
            ))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_average_inverted_range() {
        let app = test::init_service(
            App::new()
                .app_data(state(Arc::new(MockRateSource::new()), CoveragePolicy::Partial))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri(&format!(
                "/api/currency/uahusd/average?startDate={}&endDate={}",
                days_ago(2),
                days_ago(4)
            ))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_range_far_in_future_is_bad_request() {
        let source = Arc::new(MockRateSource::new());
        let app = test::init_service(
            App::new()
                .app_data(state(source.clone(), CoveragePolicy::Partial))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri(&format!(
                "/api/currency/uahusd/range?startDate={}&endDate=9999-12-31",
                days_ago(2)
            ))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(source.calls(), 0);
    }

    #[actix_web::test]
    async fn test_range_lists_rates_and_gaps() {
        let source = Arc::new(MockRateSource::new());
        source.publish(Rate::new(days_ago(6), dec!(40.1)));
        source.publish(Rate::new(days_ago(4), dec!(40.3)));
        let app = test::init_service(
            App::new()
                .app_data(state(source, CoveragePolicy::Partial))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri(&format!(
                "/api/currency/uahusd/range?startDate={}&endDate={}",
                days_ago(6),
                days_ago(4)
            ))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["rates"].as_array().unwrap().len(), 2);
        assert_eq!(body["missing"][0], days_ago(5).to_string());
        assert_eq!(body["complete"], false);
    }
}
