use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use nimbus::errors::{AgentError, AgentResult};
use nimbus::models::content::Content;
use nimbus::models::tool::{Tool, ToolCall};
use nimbus::registry::ToolSet;

const NWS_API_BASE: &str = "https://api.weather.gov";
const USER_AGENT: &str = "weather-app/1.0";

/// Weather tools backed by the National Weather Service API
pub struct WeatherToolSet {
    client: Client,
    base_url: String,
    tools: Vec<Tool>,
}

impl WeatherToolSet {
    pub fn new() -> Result<Self> {
        Self::with_base_url(NWS_API_BASE)
    }

    /// Point the tool set at a different NWS endpoint (tests use this to
    /// stand in a mock server)
    pub fn with_base_url<S: Into<String>>(base_url: S) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let alerts_tool = Tool::new(
            "get_alerts",
            "Get weather alerts for a state",
            json!({
                "type": "object",
                "properties": {
                    "state": {
                        "type": "string",
                        "minLength": 2,
                        "maxLength": 2,
                        "description": "Two letter state code (e.g. CA, NY)"
                    }
                },
                "required": ["state"]
            }),
        );

        let forecast_tool = Tool::new(
            "get_forecast",
            "Get weather forecast for a location",
            json!({
                "type": "object",
                "properties": {
                    "latitude": {
                        "type": "number",
                        "minimum": -90,
                        "maximum": 90,
                        "description": "Latitude of the location"
                    },
                    "longitude": {
                        "type": "number",
                        "minimum": -180,
                        "maximum": 180,
                        "description": "Longitude of the location"
                    }
                },
                "required": ["latitude", "longitude"]
            }),
        );

        Ok(Self {
            client,
            base_url: base_url.into(),
            tools: vec![alerts_tool, forecast_tool],
        })
    }

    /// Fetch a geo-JSON document. Connection failures, non-success statuses,
    /// and malformed bodies all collapse to `None` here; an uncaught fetch
    /// failure would otherwise bring down the channel shared by all tools.
    async fn fetch_geo_json<T: DeserializeOwned>(&self, url: &str) -> Option<T> {
        let response = match self
            .client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/geo+json")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(%url, error = %e, "weather request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(%url, status = %response.status(), "weather request failed");
            return None;
        }

        match response.json::<T>().await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!(%url, error = %e, "malformed weather response");
                None
            }
        }
    }

    async fn get_alerts(&self, arguments: &Value) -> AgentResult<Vec<Content>> {
        let state = arguments
            .get("state")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AgentError::InvalidParameters("state must be a string".into()))?
            .to_uppercase();

        let url = format!("{}/alerts?area={}", self.base_url, state);
        let alerts: Option<AlertsResponse> = self.fetch_geo_json(&url).await;

        let features = match alerts {
            Some(alerts) if !alerts.features.is_empty() => alerts.features,
            _ => {
                return Ok(vec![Content::text(format!(
                    "No alerts found for state {state}."
                ))])
            }
        };

        let formatted: Vec<String> = features.iter().map(format_alert).collect();
        Ok(vec![Content::text(format!(
            "Active alerts for {state}:\n\n{}",
            formatted.join("\n")
        ))])
    }

    async fn get_forecast(&self, arguments: &Value) -> AgentResult<Vec<Content>> {
        let latitude = arguments
            .get("latitude")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| AgentError::InvalidParameters("latitude must be a number".into()))?;
        let longitude = arguments
            .get("longitude")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| AgentError::InvalidParameters("longitude must be a number".into()))?;

        // Resolve the gridpoint forecast URL for the coordinates first
        let points_url = format!("{}/points/{:.4},{:.4}", self.base_url, latitude, longitude);
        let points: Option<PointsResponse> = self.fetch_geo_json(&points_url).await;

        let Some(points) = points else {
            return Ok(vec![Content::text(
                "No forecast data available for the specified location.",
            )]);
        };

        let Some(forecast_url) = points.properties.forecast else {
            return Ok(vec![Content::text(
                "No forecast URL available for the specified location.",
            )]);
        };

        let forecast: Option<ForecastResponse> = self.fetch_geo_json(&forecast_url).await;
        let Some(forecast) = forecast else {
            return Ok(vec![Content::text("Failed to retrieve forecast data")]);
        };

        let periods = forecast.properties.periods;
        if periods.is_empty() {
            return Ok(vec![Content::text("No forecast periods available")]);
        }

        let formatted: Vec<String> = periods.iter().map(format_period).collect();
        Ok(vec![Content::text(format!(
            "Forecast for {latitude}, {longitude}:\n\n{}",
            formatted.join("\n")
        ))])
    }
}

#[async_trait]
impl ToolSet for WeatherToolSet {
    fn name(&self) -> &str {
        "weather"
    }

    fn description(&self) -> &str {
        "Weather alerts and forecasts from the National Weather Service"
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        match tool_call.name.as_str() {
            "get_alerts" => self.get_alerts(&tool_call.arguments).await,
            "get_forecast" => self.get_forecast(&tool_call.arguments).await,
            _ => Err(AgentError::ToolNotFound(tool_call.name)),
        }
    }
}

fn format_alert(feature: &AlertFeature) -> String {
    let properties = &feature.properties;
    [
        format!("Event: {}", or_unknown(&properties.event)),
        format!("Area: {}", or_unknown(&properties.area_desc)),
        format!("Severity: {}", or_unknown(&properties.severity)),
        format!("Status: {}", or_unknown(&properties.status)),
        format!("Headline: {}", or_unknown(&properties.headline)),
        "---".to_string(),
    ]
    .join("\n")
}

fn format_period(period: &ForecastPeriod) -> String {
    let temperature = period
        .temperature
        .map(|t| t.to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    [
        format!("{}:", period.name.as_deref().unwrap_or("Unknown Period")),
        format!(
            "Temperature: {}°{}",
            temperature,
            period.temperature_unit.as_deref().unwrap_or("F")
        ),
        format!(
            "Wind: {} {}",
            period.wind_speed.as_deref().unwrap_or("Unknown"),
            period.wind_direction.as_deref().unwrap_or("")
        ),
        period
            .short_forecast
            .clone()
            .unwrap_or_else(|| "No forecast available".to_string()),
        "---".to_string(),
    ]
    .join("\n")
}

fn or_unknown(field: &Option<String>) -> &str {
    field.as_deref().unwrap_or("Unknown")
}

#[derive(Debug, Deserialize)]
struct AlertsResponse {
    #[serde(default)]
    features: Vec<AlertFeature>,
}

#[derive(Debug, Default, Deserialize)]
struct AlertFeature {
    #[serde(default)]
    properties: AlertProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertProperties {
    event: Option<String>,
    area_desc: Option<String>,
    severity: Option<String>,
    status: Option<String>,
    headline: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PointsResponse {
    #[serde(default)]
    properties: PointsProperties,
}

#[derive(Debug, Default, Deserialize)]
struct PointsProperties {
    forecast: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    properties: ForecastProperties,
}

#[derive(Debug, Default, Deserialize)]
struct ForecastProperties {
    #[serde(default)]
    periods: Vec<ForecastPeriod>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForecastPeriod {
    name: Option<String>,
    temperature: Option<f64>,
    temperature_unit: Option<String>,
    wind_speed: Option<String>,
    wind_direction: Option<String>,
    short_forecast: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus::agent::Agent;
    use nimbus::models::message::Message;
    use nimbus::providers::mock::MockProvider;
    use nimbus::registry::ToolRegistry;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn toolset(server: &MockServer) -> WeatherToolSet {
        WeatherToolSet::with_base_url(server.uri()).unwrap()
    }

    fn result_text(contents: &[Content]) -> &str {
        contents[0].as_text().unwrap()
    }

    #[tokio::test]
    async fn test_get_alerts_formats_features() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/alerts"))
            .and(query_param("area", "NY"))
            .and(header("User-Agent", USER_AGENT))
            .and(header("Accept", "application/geo+json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "features": [{
                    "properties": {
                        "event": "Flood Warning",
                        "areaDesc": "New York City",
                        "severity": "Severe",
                        "status": "Actual",
                        "headline": "Flood Warning issued for NYC"
                    }
                }]
            })))
            .mount(&server)
            .await;

        let toolset = toolset(&server).await;
        let result = toolset
            .call(ToolCall::new("get_alerts", json!({"state": "NY"})))
            .await
            .unwrap();

        let text = result_text(&result);
        assert!(text.starts_with("Active alerts for NY:"));
        assert!(text.contains("Event: Flood Warning"));
        assert!(text.contains("Area: New York City"));
        assert!(text.contains("Headline: Flood Warning issued for NYC"));
    }

    #[tokio::test]
    async fn test_get_alerts_upper_cases_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/alerts"))
            .and(query_param("area", "CA"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"features": []})))
            .expect(1)
            .mount(&server)
            .await;

        let toolset = toolset(&server).await;
        let result = toolset
            .call(ToolCall::new("get_alerts", json!({"state": "ca"})))
            .await
            .unwrap();

        assert_eq!(result_text(&result), "No alerts found for state CA.");
    }

    #[tokio::test]
    async fn test_get_alerts_server_error_is_contained() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/alerts"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let toolset = toolset(&server).await;
        let result = toolset
            .call(ToolCall::new("get_alerts", json!({"state": "NY"})))
            .await
            .unwrap();

        assert_eq!(result_text(&result), "No alerts found for state NY.");
    }

    #[tokio::test]
    async fn test_get_alerts_malformed_body_is_contained() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/alerts"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let toolset = toolset(&server).await;
        let result = toolset
            .call(ToolCall::new("get_alerts", json!({"state": "NY"})))
            .await
            .unwrap();

        assert_eq!(result_text(&result), "No alerts found for state NY.");
    }

    #[tokio::test]
    async fn test_get_forecast() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/points/40.7128,-74.0060"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {"forecast": format!("{}/gridpoints/OKX/33,35/forecast", server.uri())}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gridpoints/OKX/33,35/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {
                    "periods": [{
                        "name": "Tonight",
                        "temperature": 45,
                        "temperatureUnit": "F",
                        "windSpeed": "5 mph",
                        "windDirection": "NW",
                        "shortForecast": "Partly cloudy"
                    }]
                }
            })))
            .mount(&server)
            .await;

        let toolset = toolset(&server).await;
        let result = toolset
            .call(ToolCall::new(
                "get_forecast",
                json!({"latitude": 40.7128, "longitude": -74.0060}),
            ))
            .await
            .unwrap();

        let text = result_text(&result);
        assert!(text.contains("Tonight:"));
        assert!(text.contains("Temperature: 45°F"));
        assert!(text.contains("Wind: 5 mph NW"));
        assert!(text.contains("Partly cloudy"));
    }

    #[tokio::test]
    async fn test_get_forecast_points_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let toolset = toolset(&server).await;
        let result = toolset
            .call(ToolCall::new(
                "get_forecast",
                json!({"latitude": 40.7128, "longitude": -74.0060}),
            ))
            .await
            .unwrap();

        assert_eq!(
            result_text(&result),
            "No forecast data available for the specified location."
        );
    }

    #[tokio::test]
    async fn test_get_forecast_missing_forecast_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"properties": {}})))
            .mount(&server)
            .await;

        let toolset = toolset(&server).await;
        let result = toolset
            .call(ToolCall::new(
                "get_forecast",
                json!({"latitude": 40.7128, "longitude": -74.0060}),
            ))
            .await
            .unwrap();

        assert_eq!(
            result_text(&result),
            "No forecast URL available for the specified location."
        );
    }

    #[tokio::test]
    async fn test_get_forecast_fetch_failure_is_contained() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/points/40.7128,-74.0060"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {"forecast": format!("{}/gridpoints/OKX/33,35/forecast", server.uri())}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gridpoints/OKX/33,35/forecast"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let toolset = toolset(&server).await;
        let result = toolset
            .call(ToolCall::new(
                "get_forecast",
                json!({"latitude": 40.7128, "longitude": -74.0060}),
            ))
            .await
            .unwrap();

        assert_eq!(result_text(&result), "Failed to retrieve forecast data");
    }

    #[tokio::test]
    async fn test_agent_answers_weather_query_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/alerts"))
            .and(query_param("area", "NY"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "features": [{
                    "properties": {
                        "event": "Flood Warning",
                        "areaDesc": "New York City",
                        "severity": "Severe",
                        "status": "Actual",
                        "headline": "Flood Warning issued for NYC"
                    }
                }]
            })))
            .mount(&server)
            .await;

        let mut registry = ToolRegistry::new();
        registry
            .register(Box::new(WeatherToolSet::with_base_url(server.uri()).unwrap()))
            .unwrap();

        let provider = MockProvider::new(vec![
            Message::assistant().with_tool_request(
                "toolu_1",
                Ok(ToolCall::new("get_alerts", json!({"state": "NY"}))),
            ),
            Message::assistant().with_text("There is a flood warning in New York."),
        ]);

        let agent = Agent::connect(Box::new(provider), Box::new(registry))
            .await
            .unwrap();
        let answer = agent.process_query("What's the weather in NY?").await.unwrap();

        assert!(answer.contains("[Calling tool get_alerts with args {\"state\":\"NY\"}]"));
        assert!(answer.ends_with("There is a flood warning in New York."));
    }

    #[tokio::test]
    async fn test_out_of_range_coordinates_rejected_before_fetch() {
        let server = MockServer::start().await;

        let mut registry = ToolRegistry::new();
        registry
            .register(Box::new(WeatherToolSet::with_base_url(server.uri()).unwrap()))
            .unwrap();

        let err = registry
            .dispatch(ToolCall::new(
                "get_forecast",
                json!({"latitude": 100.0, "longitude": 0.0}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidParameters(_)));

        let err = registry
            .dispatch(ToolCall::new(
                "get_alerts",
                json!({"state": "NYC"}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidParameters(_)));

        // No request ever left the registry
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
