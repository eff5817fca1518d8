use actix_web::{HttpResponse, Responder, post, web};
use tracing::info;

use watchpost::agent::{ExecuteRequest, ExecuteResponse};
use watchpost::monitoring::{perform_check, validation};

use crate::AgentState;

/// Execute one probe on behalf of the core service.
///
/// Validation rules travel with the request and run here, against the
/// locally captured body; the body itself never leaves the agent.
#[post("/execute")]
pub async fn execute_route(
    state: web::Data<AgentState>,
    request: web::Json<ExecuteRequest>,
) -> impl Responder {
    let request = request.into_inner();
    info!(
        monitor_id = request.monitor_id,
        job_id = %request.job_id,
        monitor_type = %request.monitor_type,
        "Executing dispatched probe"
    );

    let output = perform_check(&request.config, &state.region, state.body_capture_limit).await;
    let mut result = output.result;
    validation::apply(&mut result, &request.validation_rules, output.body.as_deref());

    HttpResponse::Ok().json(ExecuteResponse::from_result(
        request.job_id,
        state.region.clone(),
        &result,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, test};
    use watchpost::monitoring::{ProbeConfig, TcpConfig};
    use watchpost::monitoring::types::CheckStatus;

    fn test_state() -> web::Data<AgentState> {
        web::Data::new(AgentState { region: "eu-west".to_string(), body_capture_limit: 64 * 1024 })
    }

    #[actix_web::test]
    async fn execute_probes_and_stamps_the_agent_region() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let app =
            test::init_service(App::new().app_data(test_state()).service(execute_route)).await;

        let request = ExecuteRequest {
            job_id: "job-1".to_string(),
            monitor_id: 1,
            monitor_type: watchpost::monitoring::checker::MonitorType::Tcp,
            config: ProbeConfig::Tcp(TcpConfig {
                host: addr.ip().to_string(),
                port: addr.port(),
                timeout_ms: 2000,
            }),
            validation_rules: Vec::new(),
        };

        let req = test::TestRequest::post().uri("/execute").set_json(&request).to_request();
        let response: ExecuteResponse = test::call_and_read_body_json(&app, req).await;

        assert_eq!(response.job_id, "job-1");
        assert_eq!(response.region, "eu-west");
        assert_eq!(response.status, CheckStatus::Success);
    }

    #[actix_web::test]
    async fn failed_probe_comes_back_with_error_details() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let app =
            test::init_service(App::new().app_data(test_state()).service(execute_route)).await;

        let request = ExecuteRequest {
            job_id: "job-2".to_string(),
            monitor_id: 1,
            monitor_type: watchpost::monitoring::checker::MonitorType::Tcp,
            config: ProbeConfig::Tcp(TcpConfig {
                host: addr.ip().to_string(),
                port: addr.port(),
                timeout_ms: 2000,
            }),
            validation_rules: Vec::new(),
        };

        let req = test::TestRequest::post().uri("/execute").set_json(&request).to_request();
        let response: ExecuteResponse = test::call_and_read_body_json(&app, req).await;

        assert_ne!(response.status, CheckStatus::Success);
        assert!(response.error.is_some());
    }
}
