use anyhow::{Result, anyhow};
use chrono::NaiveDateTime;
use serde_json::Value;

use crate::http_client::{RetryPolicy, get_json, http_client, with_retry};
use crate::race_config::WeatherLocation;

const OPENWEATHER_FORECAST_URL: &str = "http://api.openweathermap.org/data/2.5/forecast";
const FORECAST_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const MAX_SLOT_DISTANCE_SECS: i64 = 3 * 3600;

pub const NEUTRAL_RAIN_PROBABILITY: f64 = 0.0;
pub const NEUTRAL_TEMPERATURE_C: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherOrigin {
    Forecast,
    NeutralDefault,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherForecast {
    pub temperature: f64,
    pub rain_probability: f64,
    pub origin: WeatherOrigin,
}

impl WeatherForecast {
    pub fn neutral() -> Self {
        Self {
            temperature: NEUTRAL_TEMPERATURE_C,
            rain_probability: NEUTRAL_RAIN_PROBABILITY,
            origin: WeatherOrigin::NeutralDefault,
        }
    }
}

pub trait WeatherSource {
    fn forecast(&self, latitude: f64, longitude: f64, timestamp: &str) -> Result<WeatherForecast>;
}

#[derive(Debug, Clone)]
pub struct OpenWeatherSource {
    api_key: String,
    retry: RetryPolicy,
}

impl OpenWeatherSource {
    pub fn new(api_key: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            api_key: api_key.into(),
            retry,
        }
    }
}

impl WeatherSource for OpenWeatherSource {
    fn forecast(&self, latitude: f64, longitude: f64, timestamp: &str) -> Result<WeatherForecast> {
        let client = http_client()?;
        let query = [
            ("lat", latitude.to_string()),
            ("lon", longitude.to_string()),
            ("appid", self.api_key.clone()),
            ("units", "metric".to_string()),
        ];
        let body = with_retry(&self.retry, "openweather forecast", || {
            get_json(client, OPENWEATHER_FORECAST_URL, &query)
        })?;
        match pick_forecast_slot(&body, timestamp)? {
            Some(forecast) => Ok(forecast),
            None => {
                tracing::warn!(timestamp, "no forecast slot near requested time, using neutral weather");
                Ok(WeatherForecast::neutral())
            }
        }
    }
}

/// Exact `dt_txt` match first, otherwise the closest slot within three hours.
pub fn pick_forecast_slot(body: &Value, timestamp: &str) -> Result<Option<WeatherForecast>> {
    let slots = body
        .get("list")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("forecast payload has no list"))?;
    let wanted = NaiveDateTime::parse_from_str(timestamp.trim(), FORECAST_TIME_FORMAT).ok();

    let mut best: Option<(i64, &Value)> = None;
    for slot in slots {
        let Some(dt_txt) = slot.get("dt_txt").and_then(|v| v.as_str()) else {
            continue;
        };
        if dt_txt == timestamp.trim() {
            best = Some((0, slot));
            break;
        }
        let (Some(wanted), Ok(at)) = (
            wanted,
            NaiveDateTime::parse_from_str(dt_txt, FORECAST_TIME_FORMAT),
        ) else {
            continue;
        };
        let distance = (at - wanted).num_seconds().abs();
        if distance <= MAX_SLOT_DISTANCE_SECS && best.is_none_or(|(d, _)| distance < d) {
            best = Some((distance, slot));
        }
    }

    Ok(best.map(|(_, slot)| WeatherForecast {
        rain_probability: slot
            .get("pop")
            .and_then(Value::as_f64)
            .unwrap_or(NEUTRAL_RAIN_PROBABILITY)
            .clamp(0.0, 1.0),
        temperature: slot
            .get("main")
            .and_then(|m| m.get("temp"))
            .and_then(Value::as_f64)
            .unwrap_or(NEUTRAL_TEMPERATURE_C),
        origin: WeatherOrigin::Forecast,
    }))
}

/// Weather never aborts a run: a missing collaborator or a failed forecast
/// degrades to neutral values with a warning.
pub fn resolve_weather(
    source: Option<&dyn WeatherSource>,
    location: Option<&WeatherLocation>,
) -> WeatherForecast {
    let Some(source) = source else {
        tracing::warn!("weather API key not set, using neutral weather");
        return WeatherForecast::neutral();
    };
    let Some(location) = location else {
        tracing::warn!("no weather location or forecast time, using neutral weather");
        return WeatherForecast::neutral();
    };
    match source.forecast(location.latitude, location.longitude, &location.forecast_time) {
        Ok(forecast) => forecast,
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "weather fetch failed, using neutral weather");
            WeatherForecast::neutral()
        }
    }
}

const RACE_LOCATIONS: &[(&str, f64, f64)] = &[
    ("australia", -37.8497, 144.9681),
    ("china", 31.3389, 121.2206),
    ("japan", 34.8823, 136.5845),
    ("bahrain", 26.0325, 50.5106),
    ("monaco", 43.7384, 7.4246),
    ("spain", 41.5700, 2.2611),
    ("canada", 45.5017, -73.5228),
    ("austria", 47.2197, 14.7647),
    ("britain", 52.0786, -1.0169),
    ("hungary", 47.5789, 19.2486),
    ("belgium", 50.4372, 5.9714),
    ("italy", 45.6156, 9.2811),
    ("singapore", 1.2914, 103.8640),
    ("usa", 30.1327, -97.6351),
    ("mexico", 19.4042, -99.0907),
    ("brazil", -23.7036, -46.6997),
    ("qatar", 25.4901, 51.4542),
    ("abu_dhabi", 24.4672, 54.6031),
    ("las_vegas", 36.1147, -115.1728),
];

pub fn race_location(race_key: &str) -> Option<(f64, f64)> {
    let key = race_key.trim().to_lowercase().replace([' ', '-'], "_");
    RACE_LOCATIONS
        .iter()
        .find(|(name, _, _)| *name == key)
        .map(|(_, lat, lon)| (*lat, *lon))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use serde_json::json;

    use super::*;

    fn body() -> Value {
        json!({"list": [
            {"dt_txt": "2025-04-06 03:00:00", "pop": 0.1, "main": {"temp": 18.5}},
            {"dt_txt": "2025-04-06 06:00:00", "pop": 0.8, "main": {"temp": 16.0}},
            {"dt_txt": "2025-04-06 09:00:00", "pop": 0.3, "main": {"temp": 21.0}}
        ]})
    }

    #[test]
    fn exact_slot_wins() {
        let f = pick_forecast_slot(&body(), "2025-04-06 06:00:00")
            .unwrap()
            .expect("slot");
        assert_eq!(f.rain_probability, 0.8);
        assert_eq!(f.temperature, 16.0);
        assert_eq!(f.origin, WeatherOrigin::Forecast);
    }

    #[test]
    fn nearest_slot_within_window() {
        let f = pick_forecast_slot(&body(), "2025-04-06 08:00:00")
            .unwrap()
            .expect("slot");
        assert_eq!(f.temperature, 21.0);
        assert!(pick_forecast_slot(&body(), "2025-04-07 20:00:00").unwrap().is_none());
    }

    struct FailingWeather {
        calls: Cell<u32>,
    }

    impl WeatherSource for FailingWeather {
        fn forecast(&self, _: f64, _: f64, _: &str) -> Result<WeatherForecast> {
            self.calls.set(self.calls.get() + 1);
            Err(anyhow!("service unavailable"))
        }
    }

    #[test]
    fn failures_degrade_to_neutral() {
        let loc = WeatherLocation {
            latitude: 1.0,
            longitude: 2.0,
            forecast_time: "2025-01-01 12:00:00".to_string(),
        };
        assert_eq!(resolve_weather(None, Some(&loc)), WeatherForecast::neutral());

        let failing = FailingWeather { calls: Cell::new(0) };
        let w = resolve_weather(Some(&failing), Some(&loc));
        assert_eq!(w.origin, WeatherOrigin::NeutralDefault);
        assert_eq!(failing.calls.get(), 1);

        assert_eq!(resolve_weather(Some(&failing), None), WeatherForecast::neutral());
    }

    #[test]
    fn race_location_lookup() {
        assert_eq!(race_location("Abu Dhabi"), Some((24.4672, 54.6031)));
        assert!(race_location("atlantis").is_none());
    }
}
