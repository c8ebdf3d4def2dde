use std::sync::Arc;

use anyhow::{bail, Result};
use plugboard_core::{CapabilityDescriptor, ParameterKind, ParameterSpec};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::info;

use crate::{typed_handler, Capability, NoArguments, Plugin};

pub const PLUGIN_NAME: &str = "lights";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Light {
    pub id: i64,
    pub name: String,
    pub is_on: Option<bool>,
    pub brightness: Option<u8>,
    pub hex: Option<String>,
}

impl Light {
    fn seed(id: i64, name: &str, is_on: bool, brightness: u8, hex: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            is_on: Some(is_on),
            brightness: Some(brightness),
            hex: Some(hex.to_string()),
        }
    }
}

/// New state for a light. Absent fields clear the stored value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct LightState {
    #[serde(default)]
    pub is_on: Option<bool>,
    #[serde(default)]
    pub brightness: Option<u8>,
    #[serde(default)]
    pub hex: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LightId {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct ChangeState {
    id: i64,
    light: LightState,
}

pub struct LightsPlugin {
    lights: Mutex<Vec<Light>>,
}

impl Default for LightsPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl LightsPlugin {
    pub fn new() -> Self {
        Self::with_lights(vec![
            Light::seed(1, "Table Lamp", false, 100, "FF0000"),
            Light::seed(2, "Porch light", false, 50, "00FF00"),
            Light::seed(3, "Chandelier", true, 75, "0000FF"),
        ])
    }

    pub fn with_lights(lights: Vec<Light>) -> Self {
        Self { lights: Mutex::new(lights) }
    }

    pub async fn get_lights(&self) -> Vec<Light> {
        self.lights.lock().await.clone()
    }

    pub async fn get_state(&self, id: i64) -> Option<Light> {
        self.lights.lock().await.iter().find(|light| light.id == id).cloned()
    }

    pub async fn change_state(&self, id: i64, state: LightState) -> Result<Option<Light>> {
        if let Some(hex) = state.hex.as_deref() {
            if !is_hex_color(hex) {
                bail!("hex must be 6 hexadecimal digits, got `{hex}`");
            }
        }

        let mut lights = self.lights.lock().await;
        let Some(light) = lights.iter_mut().find(|light| light.id == id) else {
            return Ok(None);
        };

        light.is_on = state.is_on;
        light.brightness = state.brightness;
        light.hex = state.hex;
        info!(
            event_name = "plugin.lights.state_changed",
            light_id = id,
            is_on = ?light.is_on,
            brightness = ?light.brightness,
            "light state changed"
        );
        Ok(Some(light.clone()))
    }
}

fn is_hex_color(value: &str) -> bool {
    value.len() == 6 && value.chars().all(|character| character.is_ascii_hexdigit())
}

fn light_state_schema() -> Value {
    json!({
        "type": "object",
        "description": "The new state of the light",
        "properties": {
            "is_on": { "type": "boolean", "description": "Whether the light is on" },
            "brightness": {
                "type": "integer",
                "minimum": 0,
                "maximum": 255,
                "description": "Brightness from 0 to 255"
            },
            "hex": {
                "type": "string",
                "pattern": "^[0-9A-Fa-f]{6}$",
                "description": "Color as a 6 digit hex code, e.g. FF0000"
            }
        }
    })
}

impl Plugin for LightsPlugin {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    fn capabilities(self: Arc<Self>) -> Vec<Capability> {
        vec![
            (
                CapabilityDescriptor::new("get_lights", "Gets a list of lights and their current state"),
                typed_handler(&self, |plugin: Arc<Self>, _: NoArguments| async move {
                    anyhow::Ok(serde_json::to_value(plugin.get_lights().await)?)
                }),
            ),
            (
                CapabilityDescriptor::new("get_state", "Gets the state of a particular light")
                    .with_parameter(
                        ParameterSpec::required("id", ParameterKind::Integer)
                            .with_description("The ID of the light"),
                    ),
                typed_handler(&self, |plugin: Arc<Self>, input: LightId| async move {
                    anyhow::Ok(serde_json::to_value(plugin.get_state(input.id).await)?)
                }),
            ),
            (
                CapabilityDescriptor::new("change_state", "Changes the state of the light")
                    .with_parameter(
                        ParameterSpec::required("id", ParameterKind::Integer)
                            .with_description("The ID of the light"),
                    )
                    .with_parameter(
                        ParameterSpec::required("light", ParameterKind::Object)
                            .with_schema(light_state_schema()),
                    ),
                typed_handler(&self, |plugin: Arc<Self>, input: ChangeState| async move {
                    anyhow::Ok(serde_json::to_value(plugin.change_state(input.id, input.light).await?)?)
                }),
            ),
        ]
    }
}
