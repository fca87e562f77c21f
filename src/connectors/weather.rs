// src/connectors/weather.rs
use serde::Deserialize;
use tokio::time::Instant;

use crate::config::{GeoPoint, WatchEntity};
use crate::error::CallError;
use crate::signal::{RawSignal, SourceKind};

use super::{check_status, map_http_error, remaining};

const OWM_URL: &str = "https://api.openweathermap.org/data/2.5/weather";

/// Current conditions at the entity's configured supply-chain node.
pub struct OpenWeatherConnector {
    http: reqwest::Client,
    api_key: String,
}

#[derive(Deserialize)]
struct WeatherResponse {
    #[serde(default)]
    weather: Vec<Condition>,
    #[serde(default)]
    wind: Wind,
}

#[derive(Deserialize)]
struct Condition {
    /// OpenWeather condition id; 2xx thunderstorms, 5xx rain, 7xx atmosphere.
    id: u32,
    description: String,
}

#[derive(Deserialize, Default)]
struct Wind {
    #[serde(default)]
    speed: f64,
}

impl OpenWeatherConnector {
    pub fn new(api_key: String) -> Self {
        Self {
            http: super::news::default_http(),
            api_key,
        }
    }

    pub async fn fetch_conditions(
        &self,
        entity: &WatchEntity,
        location: GeoPoint,
        deadline: Instant,
    ) -> Result<RawSignal, CallError> {
        let resp = self
            .http
            .get(OWM_URL)
            .timeout(remaining(deadline))
            .query(&[
                ("lat", location.lat.to_string()),
                ("lon", location.lon.to_string()),
                ("appid", self.api_key.clone()),
                ("units", "metric".to_string()),
            ])
            .send()
            .await
            .map_err(map_http_error)?;
        let resp = check_status(resp)?;
        let body: WeatherResponse = resp.json().await.map_err(map_http_error)?;

        let description = body
            .weather
            .first()
            .map(|c| c.description.clone())
            .unwrap_or_else(|| "unknown".into());
        let severity = severity_label(body.weather.first().map(|c| c.id), body.wind.speed);

        Ok(RawSignal::new(
            SourceKind::Weather,
            &entity.key,
            format!(
                "{description}, wind {:.0} m/s (severity: {severity})",
                body.wind.speed
            ),
            None,
        ))
    }
}

fn severity_label(condition_id: Option<u32>, wind_speed: f64) -> &'static str {
    let severe_condition = matches!(condition_id, Some(id) if (200..300).contains(&id) || (500..600).contains(&id) || (600..700).contains(&id));
    if wind_speed >= 20.0 || severe_condition {
        "severe"
    } else if wind_speed >= 10.0 {
        "moderate"
    } else {
        "calm"
    }
}
