//! `weather` connector: deterministic mock weather lookup keyed by a `city`
//! config field. Mirrors the worked example in the execution-core
//! specification (`data.name`, `data.main.temp`).

use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::{cancelled, failed, success, Connector};
use crate::model::{ConnectorResult, Credential};

pub struct WeatherConnector;

#[async_trait]
impl Connector for WeatherConnector {
    fn action_kind(&self) -> &str {
        "weather"
    }

    async fn invoke(
        &self,
        cancel: CancellationToken,
        config: &Value,
        _credential: Option<&Credential>,
        _input: &Value,
    ) -> ConnectorResult {
        let started = Instant::now();
        if cancel.is_cancelled() {
            return cancelled(started, "cancelled before weather lookup");
        }

        let Some(city) = config.get("city").and_then(Value::as_str) else {
            return failed(started, "missing required config key: city");
        };

        let hash = city.bytes().fold(0u32, |acc, b| acc.wrapping_add(b as u32));
        let temp = ((hash % 35) as i64) + 5;

        success(
            started,
            format!("fetched weather for {city}"),
            json!({
                "name": city,
                "main": { "temp": temp },
                "conditions": match hash % 4 {
                    0 => "clear",
                    1 => "cloudy",
                    2 => "rain",
                    _ => "wind",
                },
            }),
        )
    }
}
