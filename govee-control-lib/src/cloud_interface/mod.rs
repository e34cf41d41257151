use std::fmt;

use anyhow::{bail, Context};
use clap::ValueEnum;
use derivative::Derivative;
use log::debug;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::util::color::Color;

/// Base URL of the Govee developer REST API.
pub const DEFAULT_API_URL: &str = "https://developer-api.govee.com";

const API_KEY_HEADER: &str = "Govee-API-Key";

/// Capability tag selecting which control endpoint a device answers on.
///
/// Lights and appliances speak the same command shape but live under
/// different paths; the tag keys the dispatch instead of a type hierarchy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Light,
    Appliance,
}

impl DeviceKind {
    fn control_path(&self) -> &'static str {
        match self {
            DeviceKind::Light => "/v1/devices/control",
            DeviceKind::Appliance => "/v1/appliance/devices/control",
        }
    }
}

/// A command for the cloud control endpoint, serialized as `{name, value}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudCommand {
    Turn { on: bool },
    Brightness { value: u8 },
    Color { color: Color },
    ColorTem { kelvin: u32 },
}

impl CloudCommand {
    pub fn name(&self) -> &'static str {
        match self {
            CloudCommand::Turn { .. } => "turn",
            CloudCommand::Brightness { .. } => "brightness",
            CloudCommand::Color { .. } => "color",
            CloudCommand::ColorTem { .. } => "colorTem",
        }
    }

    pub fn value(&self) -> serde_json::Value {
        match self {
            CloudCommand::Turn { on } => json!(if *on { "on" } else { "off" }),
            CloudCommand::Brightness { value } => json!(value),
            CloudCommand::Color { color } => json!(color),
            CloudCommand::ColorTem { kelvin } => json!(kelvin),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
}

impl PowerState {
    pub fn is_on(&self) -> bool {
        *self == PowerState::On
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::On => write!(f, "on"),
            PowerState::Off => write!(f, "off"),
        }
    }
}

/// Observed device state from `GET /v1/devices/state`, folded out of the
/// heterogeneous `properties` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloudDeviceState {
    pub online: bool,
    pub power: PowerState,
    pub brightness: u8,
    pub color: Color,
    pub color_tem: u32,
}

impl Default for CloudDeviceState {
    fn default() -> Self {
        CloudDeviceState {
            online: false,
            power: PowerState::Off,
            brightness: 0,
            color: Color::BLACK,
            color_tem: 0,
        }
    }
}

/**
One device as the cloud API lists it.

Identity is the `(model, device)` pair; `state` is a cached observation,
refreshed by [`CloudClient::update`] and updated optimistically by the
convenience commands. Equality ignores the cached state.
*/
#[derive(Derivative)]
#[derivative(PartialEq)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudDevice {
    /// The vendor-assigned device address.
    pub device: String,
    pub model: String,
    #[serde(rename = "deviceName", default)]
    pub name: String,
    #[serde(default)]
    pub controllable: bool,
    #[serde(default)]
    pub retrievable: bool,
    #[serde(rename = "supportCmds", default)]
    pub supported_commands: Vec<String>,

    /// The listing endpoint only returns lights; appliance devices must be
    /// tagged explicitly via [`CloudDevice::with_kind`].
    #[serde(skip)]
    pub kind: DeviceKind,

    #[serde(skip)]
    #[derivative(PartialEq = "ignore")]
    pub state: CloudDeviceState,
}

impl CloudDevice {
    pub fn new(device: impl Into<String>, model: impl Into<String>, kind: DeviceKind) -> Self {
        CloudDevice {
            device: device.into(),
            model: model.into(),
            name: String::new(),
            controllable: true,
            retrievable: true,
            supported_commands: Vec::new(),
            kind,
            state: CloudDeviceState::default(),
        }
    }

    pub fn with_kind(mut self, kind: DeviceKind) -> Self {
        self.kind = kind;
        self
    }
}

impl fmt::Display for CloudDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<CloudDevice name: {}, model: {}, device: {}>",
            self.name, self.model, self.device
        )
    }
}

#[derive(Deserialize, Debug)]
struct DeviceListResponse {
    data: DeviceListData,
}

#[derive(Deserialize, Debug)]
struct DeviceListData {
    #[serde(default)]
    devices: Vec<CloudDevice>,
}

#[derive(Deserialize, Debug)]
struct DeviceStateResponse {
    data: DeviceStateData,
}

#[derive(Deserialize, Debug)]
struct DeviceStateData {
    #[serde(default)]
    properties: Vec<StateProperty>,
}

/// One entry of the state `properties` array. Each entry is a single-key
/// object, which maps onto an externally tagged enum.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
enum StateProperty {
    /// The API has been seen sending both a bool and the string "false".
    Online(serde_json::Value),
    PowerState(PowerState),
    Brightness(u8),
    Color(Color),
    ColorTem(u32),
}

fn fold_properties(properties: Vec<StateProperty>) -> CloudDeviceState {
    let mut state = CloudDeviceState::default();
    for property in properties {
        match property {
            StateProperty::Online(value) => {
                state.online = value.as_bool().unwrap_or(value == json!("true"));
            }
            StateProperty::PowerState(power) => state.power = power,
            StateProperty::Brightness(brightness) => state.brightness = brightness,
            StateProperty::Color(color) => state.color = color,
            StateProperty::ColorTem(kelvin) => state.color_tem = kelvin,
        }
    }
    state
}

/**
Client for the Govee cloud REST API.

Stateless apart from the cached device list; every call carries the
`Govee-API-Key` header, and any non-success HTTP status surfaces as an
error with the status code.
*/
#[derive(Debug, Clone)]
pub struct CloudClient {
    api_url: String,
    key: String,
    client: Client,
    devices: Option<Vec<CloudDevice>>,
}

impl CloudClient {
    pub fn new(key: impl Into<String>) -> Self {
        Self::with_api_url(key, DEFAULT_API_URL)
    }

    pub fn with_api_url(key: impl Into<String>, api_url: impl Into<String>) -> Self {
        CloudClient {
            api_url: api_url.into(),
            key: key.into(),
            client: Client::new(),
            devices: None,
        }
    }

    /// Seeds the device cache without a listing call. Useful for tests and
    /// for callers that already know their devices.
    pub fn with_cached_devices(mut self, devices: Vec<CloudDevice>) -> Self {
        self.devices = Some(devices);
        self
    }

    /**
    Fetches the account's device list, reusing the cached one unless
    `force_refresh` is set or nothing has been fetched yet.
    */
    pub async fn get_devices(&mut self, force_refresh: bool) -> anyhow::Result<&[CloudDevice]> {
        if self.devices.is_none() || force_refresh {
            let url = format!("{}/v1/devices", self.api_url);
            let response = self
                .client
                .get(&url)
                .header(API_KEY_HEADER, &self.key)
                .send()
                .await
                .context("Failed to fetch device list")?;

            if response.status() != StatusCode::OK {
                bail!(
                    "Failed to fetch device list with status: {}",
                    response.status()
                );
            }
            let listing: DeviceListResponse = response
                .json()
                .await
                .context("Failed to deserialize device list")?;
            debug!("Device list: {:?}", listing.data.devices);
            self.devices = Some(listing.data.devices);
        }
        Ok(self.devices.as_deref().unwrap_or_default())
    }

    pub fn get_device_by_name(&self, name: &str) -> Option<&CloudDevice> {
        self.cached_devices().iter().find(|d| d.name == name)
    }

    pub fn get_device_by_model(&self, model: &str) -> Option<&CloudDevice> {
        self.cached_devices().iter().find(|d| d.model == model)
    }

    pub fn get_device_by_address(&self, address: &str) -> Option<&CloudDevice> {
        self.cached_devices().iter().find(|d| d.device == address)
    }

    fn cached_devices(&self) -> &[CloudDevice] {
        self.devices.as_deref().unwrap_or_default()
    }

    /// Sends one command to the control endpoint matching the device's kind.
    pub async fn control(
        &self,
        device: &CloudDevice,
        command: &CloudCommand,
    ) -> anyhow::Result<()> {
        let url = format!("{}{}", self.api_url, device.kind.control_path());
        let body = json!({
            "device": device.device,
            "model": device.model,
            "cmd": {
                "name": command.name(),
                "value": command.value(),
            },
        });
        let response = self
            .client
            .put(&url)
            .header(API_KEY_HEADER, &self.key)
            .json(&body)
            .send()
            .await
            .context("Failed to send control request")?;

        if response.status() != StatusCode::OK {
            bail!("Control request failed with status: {}", response.status());
        }
        Ok(())
    }

    pub async fn turn_on(&self, device: &mut CloudDevice) -> anyhow::Result<()> {
        self.control(device, &CloudCommand::Turn { on: true }).await?;
        device.state.power = PowerState::On;
        Ok(())
    }

    pub async fn turn_off(&self, device: &mut CloudDevice) -> anyhow::Result<()> {
        self.control(device, &CloudCommand::Turn { on: false })
            .await?;
        device.state.power = PowerState::Off;
        Ok(())
    }

    pub async fn set_brightness(
        &self,
        device: &mut CloudDevice,
        brightness: u8,
    ) -> anyhow::Result<()> {
        self.control(device, &CloudCommand::Brightness { value: brightness })
            .await?;
        device.state.brightness = brightness;
        Ok(())
    }

    pub async fn set_color(&self, device: &mut CloudDevice, color: Color) -> anyhow::Result<()> {
        self.control(device, &CloudCommand::Color { color }).await?;
        device.state.color = color;
        Ok(())
    }

    /// Queries the device state endpoint and returns the folded state.
    pub async fn get_device_state(
        &self,
        device: &CloudDevice,
    ) -> anyhow::Result<CloudDeviceState> {
        let url = format!("{}/v1/devices/state", self.api_url);
        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.key)
            .query(&[("device", &device.device), ("model", &device.model)])
            .send()
            .await
            .context("Failed to fetch device state")?;

        if response.status() != StatusCode::OK {
            bail!(
                "Failed to fetch device state with status: {}",
                response.status()
            );
        }
        let state: DeviceStateResponse = response
            .json()
            .await
            .context("Failed to deserialize device state")?;
        Ok(fold_properties(state.data.properties))
    }

    /// Refreshes the device's cached state from the state endpoint.
    pub async fn update(&self, device: &mut CloudDevice) -> anyhow::Result<()> {
        device.state = self.get_device_state(device).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_names_and_values() {
        assert_eq!(CloudCommand::Turn { on: true }.name(), "turn");
        assert_eq!(CloudCommand::Turn { on: true }.value(), json!("on"));
        assert_eq!(CloudCommand::Turn { on: false }.value(), json!("off"));
        assert_eq!(CloudCommand::Brightness { value: 42 }.value(), json!(42));
        assert_eq!(
            CloudCommand::Color {
                color: Color::new(1, 2, 3)
            }
            .value(),
            json!({"r": 1, "g": 2, "b": 3})
        );
        assert_eq!(CloudCommand::ColorTem { kelvin: 5600 }.name(), "colorTem");
    }

    #[test]
    fn test_control_path_per_kind() {
        assert_eq!(DeviceKind::Light.control_path(), "/v1/devices/control");
        assert_eq!(
            DeviceKind::Appliance.control_path(),
            "/v1/appliance/devices/control"
        );
    }

    #[test]
    fn test_device_listing_deserializes() {
        let body = json!({
            "code": 200,
            "message": "Success",
            "data": {
                "devices": [{
                    "device": "AA:BB:CC:DD:EE:FF:00:11",
                    "model": "H6159",
                    "deviceName": "Bedroom strip",
                    "controllable": true,
                    "retrievable": true,
                    "supportCmds": ["turn", "brightness", "color", "colorTem"]
                }]
            }
        });
        let listing: DeviceListResponse = serde_json::from_value(body).unwrap();
        let device = &listing.data.devices[0];
        assert_eq!(device.device, "AA:BB:CC:DD:EE:FF:00:11");
        assert_eq!(device.model, "H6159");
        assert_eq!(device.name, "Bedroom strip");
        assert_eq!(device.kind, DeviceKind::Light);
        assert!(device.controllable);
        assert_eq!(device.supported_commands.len(), 4);
    }

    #[test]
    fn test_state_properties_fold() {
        let body = json!({
            "data": {
                "device": "AA:BB",
                "model": "H6159",
                "properties": [
                    {"online": "false"},
                    {"powerState": "off"},
                    {"brightness": 82},
                    {"color": {"r": 0, "g": 0, "b": 255}}
                ]
            }
        });
        let response: DeviceStateResponse = serde_json::from_value(body).unwrap();
        let state = fold_properties(response.data.properties);
        assert!(!state.online);
        assert_eq!(state.power, PowerState::Off);
        assert_eq!(state.brightness, 82);
        assert_eq!(state.color, Color::new(0, 0, 255));
        assert_eq!(state.color_tem, 0);
    }

    #[test]
    fn test_online_accepts_bool_and_string() {
        let folded = fold_properties(vec![StateProperty::Online(json!(true))]);
        assert!(folded.online);
        let folded = fold_properties(vec![StateProperty::Online(json!("true"))]);
        assert!(folded.online);
        let folded = fold_properties(vec![StateProperty::Online(json!("false"))]);
        assert!(!folded.online);
    }

    #[test]
    fn test_lookups_over_cached_devices() {
        let client = CloudClient::new("test-key").with_cached_devices(vec![
            CloudDevice {
                name: "Bedroom strip".to_string(),
                ..CloudDevice::new("AA:BB", "H6159", DeviceKind::Light)
            },
            CloudDevice::new("CC:DD", "H5083", DeviceKind::Appliance),
        ]);

        assert!(client.get_device_by_name("Bedroom strip").is_some());
        assert!(client.get_device_by_model("H5083").is_some());
        assert!(client.get_device_by_address("AA:BB").is_some());
        assert!(client.get_device_by_address("EE:FF").is_none());
    }

    #[test]
    fn test_lookups_miss_with_no_cache() {
        let client = CloudClient::new("test-key");
        assert!(client.get_device_by_name("anything").is_none());
    }
}
